//! StateReconciler — the single writer of `SystemState`.
//!
//! Notifications are applied strictly in arrival order.  There is no
//! buffering and no reordering: a `transition_complete` that overtakes its
//! `transition_start` is applied as it arrives.
//!
//! Every payload is parsed into a typed `Event` before the state is touched,
//! so a malformed event is dropped whole and can never leave a partial merge.

use amp_proto::event::{ClientStatusPatch, Event, PartialState, StateSnapshot};
use amp_proto::protocol::Notification;
use amp_proto::state::{ClientStatus, ErrorInfo, SystemState};
use tracing::{debug, info, warn};

/// What `apply_event` did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Recognised and merged into the state.
    Applied,
    /// Not a pair the reconciler owns; state untouched.
    Ignored,
    /// Recognised but malformed; state untouched.
    Dropped,
}

#[derive(Debug, Default)]
pub struct StateReconciler {
    state: SystemState,
    /// Incremented once per applied event.
    revision: u64,
}

impl StateReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SystemState {
        &self.state
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn apply_event(&mut self, n: &Notification) -> ApplyOutcome {
        let event = match Event::parse(n) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!("reconciler: ignoring {}/{}", n.category, n.kind);
                return ApplyOutcome::Ignored;
            }
            Err(e) => {
                warn!("reconciler: dropping event: {}", e);
                return ApplyOutcome::Dropped;
            }
        };

        match event {
            Event::StateChanged(snapshot) => self.replace_state(snapshot),
            Event::TransitionStart => {
                if self.state.is_transitioning {
                    debug!("reconciler: transition_start while already transitioning");
                }
                self.state.is_transitioning = true;
            }
            Event::TransitionComplete(partial) => {
                self.state.is_transitioning = false;
                self.merge_partial(partial);
            }
            Event::Error(payload) => {
                self.state.is_transitioning = false;
                warn!("backend error: {}", payload.message());
                self.state.last_error = Some(ErrorInfo {
                    message: payload.message().to_string(),
                    code: payload.code(),
                    plugin: payload.plugin.clone(),
                    received_at: chrono::Local::now(),
                });
            }
            Event::PluginMetadata(fields) => {
                for (k, v) in fields {
                    self.state.metadata.insert(k, v);
                }
            }
            Event::ClientStatus(patch) => self.upsert_client(patch),
            Event::ClientRemoved { id } => {
                if self.state.multiroom_clients.remove(&id).is_none() {
                    debug!("reconciler: client_removed for unknown client {}", id);
                }
            }
            Event::OutputsChanged {
                multiroom,
                equalizer,
            } => {
                if let Some(m) = multiroom {
                    self.state.multiroom_enabled = m;
                }
                if let Some(e) = equalizer {
                    self.state.equalizer_enabled = e;
                }
            }
            // Volume belongs to the volume controller.
            Event::VolumeChanged { .. } => return ApplyOutcome::Ignored,
        }

        self.revision += 1;
        ApplyOutcome::Applied
    }

    fn replace_state(&mut self, snapshot: StateSnapshot) {
        if self.state.mode != snapshot.mode {
            info!("reconciler: mode {:?} → {:?}", self.state.mode, snapshot.mode);
        }
        self.state.mode = snapshot.mode;
        self.state.active_source_plugin = snapshot.active_source_plugin;
        self.state.metadata = snapshot.metadata.unwrap_or_default();
        self.state.last_error = None;
    }

    /// Apply only the fields a `transition_complete` carried.  Carrying a
    /// mode makes it a full state change, which clears `last_error`.
    fn merge_partial(&mut self, partial: PartialState) {
        if let Some(mode) = partial.mode {
            if self.state.mode != mode {
                info!("reconciler: mode {:?} → {:?}", self.state.mode, mode);
            }
            self.state.mode = mode;
            self.state.last_error = None;
        }
        if let Some(plugin) = partial.active_source_plugin {
            self.state.active_source_plugin = plugin;
        }
        if let Some(metadata) = partial.metadata {
            self.state.metadata = metadata;
        }
    }

    fn upsert_client(&mut self, patch: ClientStatusPatch) {
        let client = self
            .state
            .multiroom_clients
            .entry(patch.id.clone())
            .or_insert_with(|| ClientStatus {
                id: patch.id.clone(),
                name: patch.id.clone(),
                ..Default::default()
            });
        if let Some(name) = patch.name {
            client.name = name;
        }
        if let Some(connected) = patch.connected {
            client.connected = connected;
        }
        if let Some(volume) = patch.volume {
            client.volume = volume.clamp(0, 100) as u8;
        }
        if let Some(muted) = patch.muted {
            client.muted = muted;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amp_proto::state::Mode;
    use serde_json::{json, Value};

    fn ev(category: &str, kind: &str, data: Value) -> Notification {
        Notification::new(category, kind, data)
    }

    #[test]
    fn test_transition_with_metadata_in_between() {
        let mut r = StateReconciler::new();
        r.apply_event(&ev("system", "transition_start", json!({})));
        assert!(r.state().is_transitioning);
        r.apply_event(&ev("plugin", "metadata", json!({"track": "X"})));
        r.apply_event(&ev(
            "system",
            "transition_complete",
            json!({"mode": "streaming-active"}),
        ));

        let s = r.state();
        assert!(!s.is_transitioning);
        assert_eq!(s.mode, Mode::StreamingActive);
        assert_eq!(s.metadata, json!({"track": "X"}).as_object().unwrap().clone());
    }

    #[test]
    fn test_state_changed_is_idempotent() {
        let n = ev(
            "system",
            "state_changed",
            json!({"mode": "bluetooth-active", "activeSourcePlugin": "bt", "metadata": {"a": 1}}),
        );
        let mut once = StateReconciler::new();
        once.apply_event(&n);
        let mut twice = StateReconciler::new();
        twice.apply_event(&n);
        twice.apply_event(&n);
        assert_eq!(once.state(), twice.state());
    }

    #[test]
    fn test_state_changed_is_full_replace() {
        let mut r = StateReconciler::new();
        r.apply_event(&ev(
            "system",
            "state_changed",
            json!({"mode": "streaming-active", "activeSourcePlugin": "spop", "metadata": {"title": "a"}}),
        ));
        r.apply_event(&ev("system", "state_changed", json!({"mode": "idle"})));
        let s = r.state();
        assert_eq!(s.mode, Mode::Idle);
        assert_eq!(s.active_source_plugin, None);
        assert!(s.metadata.is_empty());
    }

    #[test]
    fn test_error_sets_and_state_changed_clears() {
        let mut r = StateReconciler::new();
        r.apply_event(&ev("system", "transition_start", json!({})));
        r.apply_event(&ev(
            "system",
            "error",
            json!({"message": "bluetooth pairing failed", "plugin": "bt"}),
        ));
        let s = r.state();
        assert!(!s.is_transitioning);
        let err = s.last_error.as_ref().unwrap();
        assert_eq!(err.message, "bluetooth pairing failed");
        assert_eq!(err.plugin.as_deref(), Some("bt"));

        // plugin updates do not clear the error
        r.apply_event(&ev("plugin", "state_changed", json!({"status": "stop"})));
        assert!(r.state().has_error());

        r.apply_event(&ev("system", "state_changed", json!({"mode": "idle"})));
        assert!(r.state().last_error.is_none());
    }

    #[test]
    fn test_complete_before_start_is_applied_as_is() {
        let mut r = StateReconciler::new();
        assert_eq!(
            r.apply_event(&ev("system", "transition_complete", json!({}))),
            ApplyOutcome::Applied
        );
        assert!(!r.state().is_transitioning);
        r.apply_event(&ev("system", "transition_start", json!({})));
        assert!(r.state().is_transitioning);
    }

    #[test]
    fn test_plugin_events_never_touch_mode() {
        let mut r = StateReconciler::new();
        r.apply_event(&ev("system", "transition_start", json!({})));
        r.apply_event(&ev(
            "plugin",
            "state_changed",
            json!({"mode": "bluetooth-active", "isTransitioning": false}),
        ));
        let s = r.state();
        assert_eq!(s.mode, Mode::Idle);
        assert!(s.is_transitioning);
        assert_eq!(s.metadata["mode"], json!("bluetooth-active"));
    }

    #[test]
    fn test_malformed_event_leaves_state_unchanged() {
        let mut r = StateReconciler::new();
        r.apply_event(&ev("plugin", "metadata", json!({"track": "X"})));
        let before = r.state().clone();
        let rev = r.revision();

        assert_eq!(
            r.apply_event(&ev("system", "state_changed", json!({"mode": "warp-drive"}))),
            ApplyOutcome::Dropped
        );
        assert_eq!(
            r.apply_event(&ev("plugin", "metadata", json!("not an object"))),
            ApplyOutcome::Dropped
        );
        assert_eq!(r.state(), &before);
        assert_eq!(r.revision(), rev);

        // later events still apply
        assert_eq!(
            r.apply_event(&ev("plugin", "metadata", json!({"track": "Y"}))),
            ApplyOutcome::Applied
        );
        assert_eq!(r.state().track_title(), Some("Y"));
    }

    #[test]
    fn test_unknown_pairs_are_ignored() {
        let mut r = StateReconciler::new();
        assert_eq!(
            r.apply_event(&ev("system", "firmware_update", json!({}))),
            ApplyOutcome::Ignored
        );
        assert_eq!(
            r.apply_event(&ev("volume", "changed", json!({"volume": 10}))),
            ApplyOutcome::Ignored
        );
        assert_eq!(r.revision(), 0);
    }

    #[test]
    fn test_transition_interval_tracking() {
        // isTransitioning holds exactly between start and its resolution
        let seq: &[(&str, Value, bool)] = &[
            ("state_changed", json!({"mode": "idle"}), false),
            ("transition_start", json!({}), true),
            ("state_changed", json!({"mode": "line-in-active"}), true),
            ("transition_complete", json!({}), false),
            ("transition_start", json!({}), true),
            ("error", json!({"message": "x"}), false),
            ("state_changed", json!({"mode": "idle"}), false),
        ];
        let mut r = StateReconciler::new();
        for (kind, data, expect) in seq {
            r.apply_event(&ev("system", kind, data.clone()));
            assert_eq!(r.state().is_transitioning, *expect, "after {}", kind);
        }
    }

    #[test]
    fn test_multiroom_client_upsert_and_remove() {
        let mut r = StateReconciler::new();
        r.apply_event(&ev(
            "multiroom",
            "client_status",
            json!({"id": "c1", "name": "Kitchen", "connected": true, "volume": 140}),
        ));
        r.apply_event(&ev("multiroom", "client_status", json!({"id": "c1", "muted": true})));
        let c = &r.state().multiroom_clients["c1"];
        assert_eq!(c.name, "Kitchen");
        assert!(c.connected);
        assert!(c.muted);
        assert_eq!(c.volume, 100);

        assert_eq!(
            r.apply_event(&ev("multiroom", "client_status", json!({"name": "no id"}))),
            ApplyOutcome::Dropped
        );

        r.apply_event(&ev("multiroom", "client_removed", json!({"id": "c1"})));
        assert!(r.state().multiroom_clients.is_empty());
    }

    #[test]
    fn test_outputs_changed_partial() {
        let mut r = StateReconciler::new();
        r.apply_event(&ev(
            "system",
            "outputs_changed",
            json!({"multiroom": true, "equalizer": true}),
        ));
        r.apply_event(&ev("system", "outputs_changed", json!({"equalizer": false})));
        assert!(r.state().multiroom_enabled);
        assert!(!r.state().equalizer_enabled);
    }
}
