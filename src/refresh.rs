//! In-process "something changed, re-fetch" signal.
//!
//! The counter poller publishes after every successful tick; mounted views
//! subscribe and run a silent refresh. Handlers run synchronously on the
//! publishing thread, outside the subscriber lock, so a handler may
//! subscribe or unsubscribe without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Handler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, Handler)>>,
}

/// Cheap to clone; clones share one subscriber list.
#[derive(Clone, Default)]
pub struct RefreshBroadcaster {
    inner: Arc<Subscribers>,
}

impl RefreshBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke every current subscriber once.
    pub fn publish(&self) {
        let handlers: Vec<Handler> = self
            .inner
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        log::debug!("Refresh: notifying {} subscriber(s)", handlers.len());
        for handler in handlers {
            handler();
        }
    }

    /// Register `handler`. It stays registered until the returned
    /// subscription is unsubscribed or dropped.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.handlers.lock().push((id, Arc::new(handler)));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.handlers.lock().len()
    }
}

/// Handle returned by [`RefreshBroadcaster::subscribe`].
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    /// Remove the handler. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers
                .handlers
                .lock()
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
