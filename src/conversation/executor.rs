//! StepExecutor — runs one step of the chain for one activation.
//!
//! `handle` performs all of a step's I/O: it sends the prompt, waits for the
//! response if the step needs one, publishes the resulting events, and only
//! then returns the index of the next step.

use std::sync::Arc;

use tracing::{debug, warn};

use super::id::ConversationId;
use super::registry::ConversationRegistry;
use super::state::Modality;
use crate::channels::{MessageHandle, OutgoingMessage, Outbound};
use crate::error::{ConversationError, Error, QuestionnaireError};
use crate::events::{Event, EventBus};
use crate::forms::{FieldValue, PERSISTENCE_APOLOGY};
use crate::questionnaire::{Chain, Choice, Interaction, StartPoint, StepSpec};

/// Identifies the activation a step runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activation {
    pub conversation: ConversationId,
    pub generation: u64,
}

pub struct StepExecutor {
    chain: Chain,
    bus: Arc<EventBus>,
    outbound: Outbound,
    registry: Arc<ConversationRegistry>,
}

impl StepExecutor {
    pub fn new(
        chain: Chain,
        bus: Arc<EventBus>,
        outbound: Outbound,
        registry: Arc<ConversationRegistry>,
    ) -> Self {
        Self {
            chain,
            bus,
            outbound,
            registry,
        }
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Run the step at `index`. Returns the next index, or `None` when the
    /// chain is exhausted.
    pub async fn handle(
        &self,
        activation: Activation,
        index: usize,
    ) -> crate::error::Result<Option<usize>> {
        let step = self
            .chain
            .step(index)
            .ok_or(QuestionnaireError::InvalidRestart {
                index,
                len: self.chain.len(),
            })?;
        debug!(conversation = %activation.conversation, step = %step.name, index, "Running step");

        match &step.interaction {
            Interaction::Info => {
                self.send(activation.conversation, step, &[]).await?;
            }
            Interaction::Button {
                choices,
                echo,
                field,
            } => {
                let rx = self
                    .registry
                    .suspend(activation.conversation, activation.generation, Modality::Button)?;
                let handle = self.send(activation.conversation, step, choices).await?;
                let data = self.await_choice(activation, rx, choices).await?;

                if let Some(prefix) = echo {
                    self.echo(&handle, prefix, choices, &data).await;
                }
                if let Some(binding) = field {
                    self.publish(Event::UpdateField {
                        conversation: activation.conversation,
                        field: binding.field.clone(),
                        value: binding.mapper.map(&data),
                    });
                }
            }
            Interaction::Text { field } => {
                let rx = self
                    .registry
                    .suspend(activation.conversation, activation.generation, Modality::Text)?;
                self.send(activation.conversation, step, &[]).await?;
                let text = Self::await_response(activation.conversation, rx).await?;
                self.publish(Event::UpdateField {
                    conversation: activation.conversation,
                    field: field.clone(),
                    value: FieldValue::Text(text),
                });
            }
            Interaction::Finish { choices } => {
                let rx = self
                    .registry
                    .suspend(activation.conversation, activation.generation, Modality::Button)?;
                self.send(activation.conversation, step, choices).await?;
                if !self.publish(Event::SaveForm {
                    conversation: activation.conversation,
                }) {
                    self.apologize(activation.conversation).await;
                }
                self.await_choice(activation, rx, choices).await?;
                self.publish(Event::Reinitialize {
                    conversation: activation.conversation,
                    restart_at: self.chain.start(StartPoint::Body),
                });
                return Ok(None);
            }
        }

        Ok(self.chain.next(index))
    }

    async fn send(
        &self,
        conversation: ConversationId,
        step: &StepSpec,
        choices: &[Choice],
    ) -> Result<MessageHandle, Error> {
        let message = OutgoingMessage::plain(step.prompt.clone())
            .with_format(step.format)
            .with_buttons(choices.to_vec());
        Ok(self.outbound.send(conversation, &message).await?)
    }

    async fn await_response(
        conversation: ConversationId,
        rx: tokio::sync::oneshot::Receiver<String>,
    ) -> Result<String, ConversationError> {
        rx.await.map_err(|_| ConversationError::Abandoned(conversation))
    }

    /// Wait for a press of one of `choices`. Presses of buttons left over
    /// from earlier prompts are ignored and the step keeps waiting.
    async fn await_choice(
        &self,
        activation: Activation,
        mut rx: tokio::sync::oneshot::Receiver<String>,
        choices: &[Choice],
    ) -> Result<String, ConversationError> {
        loop {
            let data = Self::await_response(activation.conversation, rx).await?;
            if choices.iter().any(|c| c.data == data) {
                return Ok(data);
            }
            debug!(
                conversation = %activation.conversation,
                data = %data,
                "Ignoring button that is not offered by the current step"
            );
            rx = self.registry.suspend(
                activation.conversation,
                activation.generation,
                Modality::Button,
            )?;
        }
    }

    async fn echo(&self, handle: &MessageHandle, prefix: &str, choices: &[Choice], data: &str) {
        let label = choices
            .iter()
            .find(|c| c.data == data)
            .map(|c| c.label.as_str())
            .unwrap_or(data);
        if let Err(e) = self
            .outbound
            .edit_text(handle, &format!("{prefix}{label}"))
            .await
        {
            warn!(conversation = %handle.conversation, error = %e, "Failed to echo answer");
        }
    }

    /// Publish and log failures. Returns false if any subscriber failed.
    fn publish(&self, event: Event) -> bool {
        match self.bus.publish(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Event delivery incomplete");
                false
            }
        }
    }

    async fn apologize(&self, conversation: ConversationId) {
        let message = OutgoingMessage::plain(PERSISTENCE_APOLOGY);
        if let Err(e) = self.outbound.send(conversation, &message).await {
            warn!(conversation = %conversation, error = %e, "Failed to send apology");
        }
    }
}
