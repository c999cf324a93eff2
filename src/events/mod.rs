//! Publish/subscribe relay between the conversation engine and the form store.

pub mod bus;
pub mod model;

pub use bus::{EventBus, PublishError, Subscriber, SubscriberFailure, SubscriptionId};
pub use model::Event;
