use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tracing::warn;

pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: Vec<(u64, Handler)>,
}

/// Fan-out of inbound frames to any number of handlers, in registration
/// order.
#[derive(Clone, Default)]
pub struct Subscribers {
    inner: Arc<Mutex<Registry>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.inner);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.handlers.push((id, Arc::new(handler)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Forwards every frame into an unbounded channel. Frames sent after the
    /// receiver is dropped are discarded.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |frame| {
            let _ = tx.send(frame.clone());
        });
        (subscription, rx)
    }

    /// Delivers `frame` to every handler. A panicking handler is logged and
    /// skipped. Returns the number of handlers that completed.
    pub fn publish(&self, frame: &Value) -> usize {
        let handlers: Vec<(u64, Handler)> = lock(&self.inner).handlers.clone();
        let mut delivered = 0;
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(frame))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(event = "subscriber_panic", subscriber = id),
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps a handler registered until dropped or [`Subscription::unsubscribe`]d.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).handlers.retain(|(id, _)| *id != self.id);
        }
    }
}

fn lock(registry: &Mutex<Registry>) -> std::sync::MutexGuard<'_, Registry> {
    registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn delivers_in_registration_order() {
        let subscribers = Subscribers::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let first = {
            let seen = seen.clone();
            subscribers.subscribe(move |frame| seen.lock().unwrap().push(("first", frame["n"].clone())))
        };
        let second = {
            let seen = seen.clone();
            subscribers.subscribe(move |frame| seen.lock().unwrap().push(("second", frame["n"].clone())))
        };

        subscribers.publish(&json!({ "n": 1 }));
        subscribers.publish(&json!({ "n": 2 }));

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ("first", json!(1)),
                ("second", json!(1)),
                ("first", json!(2)),
                ("second", json!(2)),
            ]
        );
        drop((first, second));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let subscribers = Subscribers::new();
        let (subscription, mut rx) = subscribers.subscribe_channel();
        subscribers.publish(&json!({ "n": 1 }));
        subscription.unsubscribe();
        subscribers.publish(&json!({ "n": 2 }));

        assert_eq!(rx.try_recv().ok(), Some(json!({ "n": 1 })));
        assert!(rx.try_recv().is_err());
        assert!(subscribers.is_empty());
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let subscribers = Subscribers::new();
        let _bad = subscribers.subscribe(|_| panic!("handler failure"));
        let (_good, mut rx) = subscribers.subscribe_channel();

        assert_eq!(subscribers.publish(&json!({ "n": 1 })), 1);
        assert_eq!(rx.try_recv().ok(), Some(json!({ "n": 1 })));
        assert_eq!(subscribers.publish(&json!({ "n": 2 })), 1);
        assert_eq!(rx.try_recv().ok(), Some(json!({ "n": 2 })));
    }

    #[test]
    fn dropped_receiver_is_harmless() {
        let subscribers = Subscribers::new();
        let (_subscription, rx) = subscribers.subscribe_channel();
        drop(rx);
        assert_eq!(subscribers.publish(&json!({})), 1);
    }
}
