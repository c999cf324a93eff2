//! Channel trait and the message types that cross it.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::conversation::ConversationId;
use crate::error::ChannelError;
use crate::questionnaire::{Choice, TextFormat};

/// What the user did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IncomingKind {
    /// The `/start` trigger.
    Start,
    /// Free text.
    Text { text: String },
    /// A button press carrying the button's data.
    Button { data: String },
}

/// One inbound event, tagged with its conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub conversation: ConversationId,
    pub kind: IncomingKind,
}

impl IncomingMessage {
    pub fn start(conversation: ConversationId) -> Self {
        Self {
            conversation,
            kind: IncomingKind::Start,
        }
    }

    pub fn text(conversation: ConversationId, text: impl Into<String>) -> Self {
        Self {
            conversation,
            kind: IncomingKind::Text { text: text.into() },
        }
    }

    pub fn button(conversation: ConversationId, data: impl Into<String>) -> Self {
        Self {
            conversation,
            kind: IncomingKind::Button { data: data.into() },
        }
    }
}

/// A message to send, with optional buttons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub format: TextFormat,
    pub buttons: Vec<Choice>,
}

impl OutgoingMessage {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: TextFormat::Plain,
            buttons: Vec::new(),
        }
    }

    pub fn with_format(mut self, format: TextFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_buttons(mut self, buttons: Vec<Choice>) -> Self {
        self.buttons = buttons;
        self
    }
}

/// Identifies a sent message so it can be edited later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub conversation: ConversationId,
    pub message_id: i64,
}

pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// A chat transport. Sends must be safe to call concurrently.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Start receiving. The stream ends when the channel stops.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    async fn send(
        &self,
        conversation: ConversationId,
        message: &OutgoingMessage,
    ) -> Result<MessageHandle, ChannelError>;

    /// Replace the text of a sent message, removing its buttons.
    async fn edit_text(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError>;

    async fn health_check(&self) -> Result<(), ChannelError>;

    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
