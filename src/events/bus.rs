//! Synchronous event bus.
//!
//! `publish` delivers to a snapshot of the subscriber list taken when the
//! call starts, in subscription order. A failing subscriber does not stop
//! delivery to the ones after it; all failures are logged and returned.
//!
//! Handlers must not publish back into the same bus in a way that re-enters
//! themselves before returning.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{trace, warn};

use super::model::Event;
use crate::error::Error;

/// A bus listener. Subscribers ignore event kinds they don't handle.
pub trait Subscriber: Send + Sync {
    /// Name used in logs and failure reports.
    fn name(&self) -> &str;

    /// Handle one event.
    fn update(&self, event: &Event) -> Result<(), Error>;
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// One subscriber's failure during a publish.
#[derive(Debug)]
pub struct SubscriberFailure {
    pub subscriber: String,
    pub error: Error,
}

/// Returned by [`EventBus::publish`] when at least one subscriber failed.
#[derive(Debug, thiserror::Error)]
#[error("{} subscriber(s) failed handling {event}", failures.len())]
pub struct PublishError {
    pub event: &'static str,
    pub failures: Vec<SubscriberFailure>,
}

type Entry = (SubscriptionId, Arc<dyn Subscriber>);

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner());
        subscribers.push((id, subscriber));
        id
    }

    /// Remove a subscriber. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn publish(&self, event: Event) -> Result<(), PublishError> {
        // Release the lock before dispatch so handlers may (un)subscribe.
        let snapshot: Vec<Entry> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        trace!(
            event = event.kind(),
            conversation = %event.conversation(),
            subscribers = snapshot.len(),
            "Publishing event"
        );

        let mut failures = Vec::new();
        for (_, subscriber) in &snapshot {
            if let Err(error) = subscriber.update(&event) {
                warn!(
                    subscriber = subscriber.name(),
                    event = event.kind(),
                    conversation = %event.conversation(),
                    error = %error,
                    "Subscriber failed to handle event"
                );
                failures.push(SubscriberFailure {
                    subscriber: subscriber.name().to_string(),
                    error,
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PublishError {
                event: event.kind(),
                failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::conversation::ConversationId;
    use crate::error::ConversationError;

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Subscriber for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn update(&self, event: &Event) -> Result<(), Error> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, event.kind()));
            Ok(())
        }
    }

    struct Failing;

    impl Subscriber for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn update(&self, event: &Event) -> Result<(), Error> {
            Err(ConversationError::UnknownConversation(event.conversation()).into())
        }
    }

    /// Subscribes a new recorder the first time it sees an event.
    struct Joiner {
        bus: Arc<EventBus>,
        log: Arc<Mutex<Vec<String>>>,
        joined: Mutex<bool>,
    }

    impl Subscriber for Joiner {
        fn name(&self) -> &str {
            "joiner"
        }

        fn update(&self, _event: &Event) -> Result<(), Error> {
            let mut joined = self.joined.lock().unwrap();
            if !*joined {
                *joined = true;
                self.bus.subscribe(Arc::new(Recorder {
                    name: "late".into(),
                    log: Arc::clone(&self.log),
                }));
            }
            Ok(())
        }
    }

    fn recorder(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Subscriber> {
        Arc::new(Recorder {
            name: name.into(),
            log: Arc::clone(log),
        })
    }

    fn save(id: i64) -> Event {
        Event::SaveForm {
            conversation: ConversationId(id),
        }
    }

    #[test]
    fn delivers_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(recorder("a", &log));
        bus.subscribe(recorder("b", &log));

        bus.publish(save(1)).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a:save_form", "b:save_form"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = bus.subscribe(recorder("a", &log));
        bus.subscribe(recorder("b", &log));

        assert!(bus.unsubscribe(a));
        assert!(!bus.unsubscribe(a));
        bus.publish(save(1)).unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["b:save_form"]);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn failure_is_reported_and_others_still_run() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(recorder("a", &log));
        bus.subscribe(Arc::new(Failing));
        bus.subscribe(recorder("b", &log));

        let err = bus.publish(save(3)).unwrap_err();

        assert_eq!(err.event, "save_form");
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].subscriber, "failing");
        assert_eq!(*log.lock().unwrap(), vec!["a:save_form", "b:save_form"]);
    }

    #[test]
    fn subscribe_during_publish_uses_snapshot() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(Arc::new(Joiner {
            bus: Arc::clone(&bus),
            log: Arc::clone(&log),
            joined: Mutex::new(false),
        }));

        bus.publish(save(1)).unwrap();
        assert!(log.lock().unwrap().is_empty(), "late subscriber must miss in-flight event");

        bus.publish(save(1)).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["late:save_form"]);
    }
}
