//! SettingsDebouncer — collapses rapid edits to one outbound update.
//!
//! One entry per (group, key).  Scheduling again aborts the old timer and
//! replaces the payload whole; nothing is merged field by field.  Each timer
//! carries the generation it was started for, so a timer that loses a race
//! with a superseding edit is recognised as stale in `take_due`.
//!
//! Every timer is an aborted-on-drop task: `cancel_all`, `flush_all` and
//! `Drop` are the cancellation paths.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SettingKey {
    pub group: String,
    pub key: String,
}

impl SettingKey {
    pub fn new(group: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            key: key.into(),
        }
    }
}

/// Sent by a timer when its quiet period has elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebounceDue {
    pub key: SettingKey,
    pub generation: u64,
}

/// A payload ready to be sent to the settings API.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingUpdate {
    pub key: SettingKey,
    pub payload: Value,
}

struct DebounceEntry {
    payload: Value,
    deadline: Instant,
    generation: u64,
    timer: AbortHandle,
}

pub struct SettingsDebouncer {
    entries: HashMap<SettingKey, DebounceEntry>,
    next_generation: u64,
    due_tx: mpsc::UnboundedSender<DebounceDue>,
}

impl SettingsDebouncer {
    pub fn new(due_tx: mpsc::UnboundedSender<DebounceDue>) -> Self {
        Self {
            entries: HashMap::new(),
            next_generation: 1,
            due_tx,
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn schedule(&mut self, key: SettingKey, payload: Value, delay: Duration) {
        if let Some(old) = self.entries.remove(&key) {
            debug!(
                "debounce: superseding {}/{} (gen {})",
                key.group, key.key, old.generation
            );
            old.timer.abort();
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let tx = self.due_tx.clone();
        let due = DebounceDue {
            key: key.clone(),
            generation,
        };
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means the owner is shutting down.
            let _ = tx.send(due);
        })
        .abort_handle();

        self.entries.insert(
            key,
            DebounceEntry {
                payload,
                deadline: Instant::now() + delay,
                generation,
                timer,
            },
        );
    }

    /// Claim the payload for an expired timer.  Returns `None` if the entry
    /// was superseded, flushed or cancelled after the timer fired.
    pub fn take_due(&mut self, due: &DebounceDue) -> Option<SettingUpdate> {
        match self.entries.get(&due.key) {
            Some(entry) if entry.generation == due.generation => {}
            Some(_) => {
                debug!("debounce: stale timer for {}/{}", due.key.group, due.key.key);
                return None;
            }
            None => return None,
        }
        let entry = self.entries.remove(&due.key)?;
        Some(SettingUpdate {
            key: due.key.clone(),
            payload: entry.payload,
        })
    }

    /// Abort every timer and hand back what was pending, for immediate send.
    pub fn flush_all(&mut self) -> Vec<SettingUpdate> {
        let mut updates: Vec<(Instant, SettingUpdate)> = self
            .entries
            .drain()
            .map(|(key, entry)| {
                entry.timer.abort();
                (
                    entry.deadline,
                    SettingUpdate {
                        key,
                        payload: entry.payload,
                    },
                )
            })
            .collect();
        // oldest edit first
        updates.sort_by_key(|(deadline, _)| *deadline);
        updates.into_iter().map(|(_, u)| u).collect()
    }

    pub fn cancel_all(&mut self) {
        if !self.entries.is_empty() {
            warn!("debounce: cancelling {} pending update(s)", self.entries.len());
        }
        for (_, entry) in self.entries.drain() {
            entry.timer.abort();
        }
    }

    pub fn pending_len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_pending(&self, key: &SettingKey) -> bool {
        self.entries.contains_key(key)
    }
}

impl Drop for SettingsDebouncer {
    fn drop(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.timer.abort();
        }
    }
}
