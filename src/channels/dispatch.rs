//! NotificationDispatcher — delivers `Notify` events to users.
//!
//! The bus is synchronous, so the subscriber only queues the message; a
//! separate task performs the send through the shared `Outbound`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::channel::OutgoingMessage;
use super::outbound::Outbound;
use crate::conversation::ConversationId;
use crate::error::{ChannelError, Error};
use crate::events::{Event, Subscriber};

pub struct NotificationDispatcher {
    tx: mpsc::UnboundedSender<(ConversationId, String)>,
}

impl NotificationDispatcher {
    /// Create the subscriber and spawn its delivery task.
    pub fn spawn(outbound: Outbound) -> (Arc<Self>, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<(ConversationId, String)>();
        let task = tokio::spawn(async move {
            while let Some((conversation, message)) = rx.recv().await {
                match outbound
                    .send(conversation, &OutgoingMessage::plain(message))
                    .await
                {
                    Ok(_) => debug!(conversation = %conversation, "Notification delivered"),
                    Err(e) => warn!(
                        conversation = %conversation,
                        error = %e,
                        "Failed to deliver notification"
                    ),
                }
            }
        });
        (Arc::new(Self { tx }), task)
    }
}

impl Subscriber for NotificationDispatcher {
    fn name(&self) -> &str {
        "notification_dispatcher"
    }

    fn update(&self, event: &Event) -> Result<(), Error> {
        if let Event::Notify {
            conversation,
            message,
        } = event
        {
            self.tx
                .send((*conversation, message.clone()))
                .map_err(|_| ChannelError::Disconnected {
                    name: "notifications".into(),
                    reason: "delivery task stopped".into(),
                })?;
        }
        Ok(())
    }
}
