//! Error types for the intake bot.

use crate::conversation::ConversationId;
use crate::events::PublishError;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Conversation error: {0}")]
    Conversation(#[from] ConversationError),

    #[error("Questionnaire error: {0}")]
    Questionnaire(#[from] QuestionnaireError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Event delivery failed: {0}")]
    Publish(#[from] PublishError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Transport-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Channel {name} disconnected: {reason}")]
    Disconnected { name: String, reason: String },

    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to edit message on channel {name}: {reason}")]
    EditFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Rate limited on channel {name}")]
    RateLimited { name: String },

    #[error("HTTP error: {0}")]
    Http(String),
}

impl ChannelError {
    /// Whether the failure is transient and the request may be repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Disconnected { .. }
                | Self::SendFailed { .. }
                | Self::EditFailed { .. }
                | Self::RateLimited { .. }
                | Self::Http(_)
        )
    }
}

/// Per-conversation failures. None of these are fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error("No live form or state for conversation {0}")]
    UnknownConversation(ConversationId),

    #[error("Activation of conversation {0} was replaced by a newer one")]
    Superseded(ConversationId),

    #[error("Conversation {0} was evicted while waiting for input")]
    Abandoned(ConversationId),
}

/// Questionnaire table validation errors.
#[derive(Debug, thiserror::Error)]
pub enum QuestionnaireError {
    #[error("Questionnaire has no steps")]
    Empty,

    #[error("Field {field} is written by more than one step")]
    DuplicateField { field: String },

    #[error("Field {field} is reserved and cannot be written by a step")]
    ReservedField { field: String },

    #[error("Step {step} is not last but is a finish step")]
    MisplacedFinish { step: String },

    #[error("Last step {step} must be a finish step")]
    MissingFinish { step: String },

    #[error("Step {step} offers no choices")]
    NoChoices { step: String },

    #[error("Restart index {index} is out of range for {len} steps")]
    InvalidRestart { index: usize, len: usize },

    #[error("Failed to parse questionnaire: {0}")]
    Parse(String),
}

/// Verdict relay errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Failed to bind verdict socket {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Failed to connect to verdict publisher {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("Invalid verdict message: {0}")]
    InvalidVerdict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
