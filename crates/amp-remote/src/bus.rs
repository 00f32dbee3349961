//! Per-(category, type) subscriptions for the presentation layer.
//!
//! `subscribe` returns a `Subscription`; the caller must call
//! `unsubscribe()` on teardown.  Dropping the handle does NOT remove the
//! handler.  Handlers run on the core task right after the notification has
//! been applied.  They may subscribe or unsubscribe from inside a callback;
//! the set of handlers for one dispatch is fixed when it starts.  A handler
//! that panics is logged and skipped, and the core keeps running.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use amp_proto::protocol::Notification;
use tracing::{debug, warn};

type Handler = Arc<Mutex<dyn FnMut(&Notification) + Send + 'static>>;

struct Entry {
    id: u64,
    category: String,
    kind: String,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Entry>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Registry>>,
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Handler panics are caught below, so poisoning only follows a panic
    // inside the bus itself; the data is still consistent.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for notifications matching (category, kind).
    /// `kind == "*"` matches every type in the category.
    pub fn subscribe<F>(&self, category: &str, kind: &str, handler: F) -> Subscription
    where
        F: FnMut(&Notification) + Send + 'static,
    {
        let handler: Handler = Arc::new(Mutex::new(handler));
        let mut reg = lock(&self.inner);
        reg.next_id += 1;
        let id = reg.next_id;
        reg.entries.push(Entry {
            id,
            category: category.to_string(),
            kind: kind.to_string(),
            handler,
        });
        debug!("bus: subscription {} for {}/{}", id, category, kind);
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `n` to every matching handler in subscription order.
    /// Returns how many handlers completed without panicking.
    pub fn dispatch(&self, n: &Notification) -> usize {
        let matching: Vec<(u64, Handler)> = {
            let reg = lock(&self.inner);
            reg.entries
                .iter()
                .filter(|e| n.matches(&e.category, &e.kind))
                .map(|e| (e.id, Arc::clone(&e.handler)))
                .collect()
        };

        let mut delivered = 0;
        for (id, handler) in matching {
            let mut f = lock(&*handler);
            match panic::catch_unwind(AssertUnwindSafe(|| (&mut *f)(n))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(
                    "bus: handler {} panicked on {}/{}, skipping",
                    id, n.category, n.kind
                ),
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).entries.len()
    }
}

/// Handle for one registered handler.
#[must_use = "subscriptions stay registered until `unsubscribe` is called"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the handler.  Returns false if the bus is already gone.
    pub fn unsubscribe(self) -> bool {
        let Some(inner) = self.registry.upgrade() else {
            return false;
        };
        let mut reg = lock(&inner);
        let before = reg.entries.len();
        reg.entries.retain(|e| e.id != self.id);
        debug!("bus: unsubscribed {}", self.id);
        reg.entries.len() != before
    }
}
