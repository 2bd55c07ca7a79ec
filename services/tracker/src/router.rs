//! Notification fan-out.
//!
//! Handlers run synchronously on the dispatch task, in registration order.
//! A panicking handler is logged and skipped; the rest still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use st_protocol::Notification;
use tracing::{error, trace};

pub type Handler = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, Handler)>>,
}

/// Registry of notification handlers.  Cheap to clone.
#[derive(Clone, Default)]
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler`.  Dropping the returned [`Subscription`] keeps the
    /// handler registered; call [`Subscription::unsubscribe`] to remove it.
    #[must_use = "keep the subscription to be able to unsubscribe"]
    pub fn subscribe(&self, handler: impl Fn(&Notification) + Send + Sync + 'static) -> Subscription {
        self.subscribe_arc(Arc::new(handler))
    }

    /// Register a shared handler.  The same `Arc` may be registered more
    /// than once; each registration is removed independently.
    #[must_use = "keep the subscription to be able to unsubscribe"]
    pub fn subscribe_arc(&self, handler: Handler) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::SeqCst);
        self.lock().push((id, handler));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn handler_count(&self) -> usize {
        self.lock().len()
    }

    /// Deliver `notification` to every handler registered right now.
    pub fn dispatch(&self, notification: &Notification) {
        // Snapshot so handlers may subscribe or unsubscribe re-entrantly.
        let handlers: Vec<(u64, Handler)> = self.lock().clone();
        trace!(game_id = notification.game_id, handlers = handlers.len(), "dispatch");
        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(notification))).is_err() {
                error!(
                    subscription = id,
                    game_id = notification.game_id,
                    "notification handler panicked"
                );
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(u64, Handler)>> {
        self.registry
            .handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Capability to remove one handler registration.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Remove exactly this registration.  A no-op once the router is gone.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .handlers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}
