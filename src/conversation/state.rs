//! Conversation state machine — tracks where a conversation's activation is.

use serde::{Deserialize, Serialize};

/// The kind of inbound input a suspended step accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Button,
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Button => write!(f, "button"),
        }
    }
}

/// The phases of one conversation.
///
/// Idle → AwaitingActivation → (Suspended ↔ Advancing)* → Idle.
/// A start trigger may move any phase back to AwaitingActivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    /// No activation running.
    Idle,
    /// A step is about to run `handle`.
    AwaitingActivation,
    /// A step is blocked waiting for input of the given modality.
    Suspended(Modality),
    /// A step returned and the driver is about to run the next one.
    Advancing,
}

impl ConversationPhase {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: ConversationPhase) -> bool {
        use ConversationPhase::*;
        match (self, target) {
            // start trigger, from anywhere
            (_, AwaitingActivation) => true,
            (AwaitingActivation, Suspended(_)) | (AwaitingActivation, Advancing) => true,
            (Suspended(_), Advancing) => true,
            (Advancing, Suspended(_)) => true,
            // chain exhausted or activation failed
            (AwaitingActivation | Suspended(_) | Advancing, Idle) => true,
            _ => false,
        }
    }

    /// The modality accepted in this phase, if any.
    pub fn accepts(&self) -> Option<Modality> {
        match self {
            Self::Suspended(modality) => Some(*modality),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl Default for ConversationPhase {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for ConversationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingActivation => write!(f, "awaiting_activation"),
            Self::Suspended(modality) => write!(f, "suspended({modality})"),
            Self::Advancing => write!(f, "advancing"),
        }
    }
}
