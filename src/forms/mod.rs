//! Per-conversation answer forms and their persistence path.

pub mod model;
pub mod outbox;
pub mod store;

pub use model::{FieldValue, Form, RESERVED_FIELDS, fields};
pub use outbox::{PERSISTENCE_APOLOGY, Outbox, OutboxHandle, PendingRecord};
pub use store::FormStore;
