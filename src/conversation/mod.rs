//! Conversation engine — per-conversation state, step execution, and the
//! driver loop that threads a conversation through the questionnaire chain.
//!
//! Each conversation owns an index cursor into the shared immutable step
//! table. The driver runs one activation per conversation as a spawned task;
//! a step that needs input parks on a single-use pending slot held by the
//! registry until the matching inbound response arrives.

pub mod driver;
pub mod executor;
pub mod id;
pub mod registry;
pub mod state;

pub use driver::{ConversationDriver, Dispatch};
pub use executor::{Activation, StepExecutor};
pub use id::ConversationId;
pub use registry::{ConversationRegistry, Delivery, RegistryStats, spawn_idle_sweep};
pub use state::{ConversationPhase, Modality};
