//! ConversationDriver — routes inbound events and runs activations.
//!
//! A start trigger spawns one task per activation. The task loops over the
//! chain, calling `StepExecutor::handle` once per step, until the chain is
//! exhausted. Responses are handed to the suspended step through the
//! registry and never touch the task directly.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use super::executor::{Activation, StepExecutor};
use super::id::ConversationId;
use super::registry::{ConversationRegistry, Delivery};
use super::state::Modality;
use crate::channels::{IncomingKind, IncomingMessage, MessageStream, OutgoingMessage, Outbound};
use crate::error::{ConversationError, Error};
use crate::events::{Event, EventBus};
use crate::questionnaire::StartPoint;

/// Sent when a prompt could not be delivered and the activation stopped.
pub const TRANSPORT_APOLOGY: &str =
    "⚠️ Не удалось отправить сообщение. Нажмите /start, чтобы начать заново.";

/// What the driver did with one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A new activation started with this generation.
    Started { generation: u64 },
    /// A response was routed; see the delivery outcome.
    Response(Delivery),
}

pub struct ConversationDriver {
    executor: Arc<StepExecutor>,
    registry: Arc<ConversationRegistry>,
    bus: Arc<EventBus>,
    outbound: Outbound,
}

impl ConversationDriver {
    pub fn new(
        executor: Arc<StepExecutor>,
        registry: Arc<ConversationRegistry>,
        bus: Arc<EventBus>,
        outbound: Outbound,
    ) -> Arc<Self> {
        Arc::new(Self {
            executor,
            registry,
            bus,
            outbound,
        })
    }

    pub fn registry(&self) -> &Arc<ConversationRegistry> {
        &self.registry
    }

    /// Consume inbound events until the stream ends.
    pub async fn run(self: Arc<Self>, mut inbound: MessageStream) {
        info!(channel = self.outbound.channel_name(), "Conversation driver started");
        while let Some(message) = inbound.next().await {
            self.dispatch(message);
        }
        info!("Inbound stream ended; conversation driver stopped");
    }

    pub fn dispatch(self: &Arc<Self>, message: IncomingMessage) -> Dispatch {
        let conversation = message.conversation;
        let (modality, data) = match message.kind {
            IncomingKind::Start => {
                let generation = self.start(conversation);
                return Dispatch::Started { generation };
            }
            IncomingKind::Text { text } => (Modality::Text, text),
            IncomingKind::Button { data } => (Modality::Button, data),
        };

        let delivery = self.registry.deliver(conversation, modality, data);
        if !delivery.is_accepted() {
            debug!(
                conversation = %conversation,
                modality = %modality,
                outcome = ?delivery,
                "Dropped inbound response"
            );
        }
        Dispatch::Response(delivery)
    }

    /// Begin a fresh activation at the head of the chain.
    pub fn start(self: &Arc<Self>, conversation: ConversationId) -> u64 {
        let index = self.executor.chain().start(StartPoint::Head);
        let generation = self.registry.begin(conversation, index);
        if let Err(e) = self.bus.publish(Event::NewForm { conversation }) {
            warn!(conversation = %conversation, error = %e, "NewForm delivery incomplete");
        }
        info!(conversation = %conversation, generation, "Conversation started");

        let activation = Activation {
            conversation,
            generation,
        };
        let driver = Arc::clone(self);
        let task = tokio::spawn(async move { driver.drive(activation, index).await });
        self.registry.attach_task(conversation, generation, task.abort_handle());
        generation
    }

    async fn drive(&self, activation: Activation, mut index: usize) {
        let Activation {
            conversation,
            generation,
        } = activation;
        loop {
            if let Err(e) = self.registry.activate(conversation, generation, index) {
                debug!(conversation = %conversation, error = %e, "Activation no longer current");
                return;
            }
            match self.executor.handle(activation, index).await {
                Ok(Some(next)) => {
                    if self.registry.advance(conversation, generation).is_err() {
                        return;
                    }
                    index = next;
                }
                Ok(None) => match self.registry.finish(conversation, generation) {
                    Some(restart) => {
                        info!(
                            conversation = %conversation,
                            restart_at = restart,
                            "Conversation restarted"
                        );
                        index = restart;
                    }
                    None => {
                        info!(conversation = %conversation, "Conversation finished");
                        return;
                    }
                },
                Err(e) => {
                    self.on_failure(activation, index, e).await;
                    return;
                }
            }
        }
    }

    async fn on_failure(&self, activation: Activation, index: usize, error: Error) {
        let conversation = activation.conversation;
        match &error {
            Error::Conversation(
                ConversationError::Superseded(_) | ConversationError::Abandoned(_),
            ) => {
                debug!(conversation = %conversation, error = %error, "Activation ended");
            }
            Error::Channel(e) => {
                warn!(
                    conversation = %conversation,
                    step = index,
                    error = %e,
                    "Step failed to reach the user"
                );
                let apology = OutgoingMessage::plain(TRANSPORT_APOLOGY);
                if let Err(e) = self.outbound.send(conversation, &apology).await {
                    debug!(conversation = %conversation, error = %e, "Channel still unreachable");
                }
            }
            _ => {
                error!(conversation = %conversation, step = index, error = %error, "Step failed");
            }
        }
        self.registry.fail(conversation, activation.generation);
    }
}
