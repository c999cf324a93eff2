//! Persistence layer — document store for completed questionnaires.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Criteria, Document, FormRepository};
