//! Events broadcast on the bus.

use serde::{Deserialize, Serialize};

use crate::conversation::ConversationId;
use crate::forms::FieldValue;

/// A tagged, fire-and-forget payload. Every subscriber sees every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Create (or overwrite) the conversation's form.
    NewForm { conversation: ConversationId },
    /// Write one answer into the conversation's form.
    UpdateField {
        conversation: ConversationId,
        field: String,
        value: FieldValue,
    },
    /// Persist the conversation's form.
    SaveForm { conversation: ConversationId },
    /// Reset the form and re-arm the conversation at step `restart_at`.
    Reinitialize {
        conversation: ConversationId,
        restart_at: usize,
    },
    /// Add `delta` to the form's mark and mark the verdict as pending.
    UpdateMark {
        conversation: ConversationId,
        delta: i64,
    },
    /// Deliver `message` to the conversation outside the step chain.
    Notify {
        conversation: ConversationId,
        message: String,
    },
}

impl Event {
    /// The conversation this event refers to.
    pub fn conversation(&self) -> ConversationId {
        match self {
            Self::NewForm { conversation }
            | Self::UpdateField { conversation, .. }
            | Self::SaveForm { conversation }
            | Self::Reinitialize { conversation, .. }
            | Self::UpdateMark { conversation, .. }
            | Self::Notify { conversation, .. } => *conversation,
        }
    }

    /// Short name of the event kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewForm { .. } => "new_form",
            Self::UpdateField { .. } => "update_field",
            Self::SaveForm { .. } => "save_form",
            Self::Reinitialize { .. } => "reinitialize",
            Self::UpdateMark { .. } => "update_mark",
            Self::Notify { .. } => "notify",
        }
    }
}
