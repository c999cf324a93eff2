//! `FormRepository` trait — the document-store seam.

use async_trait::async_trait;

use crate::error::DatabaseError;

/// A flat JSON record, one per completed questionnaire.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Top-level field equality criteria for [`FormRepository::find_one`].
pub type Criteria = Document;

/// Backend-agnostic, append-only document store.
#[async_trait]
pub trait FormRepository: Send + Sync {
    /// Insert a record. Returns its `_id` (taken from the record, or generated).
    async fn insert(&self, document: &Document) -> Result<String, DatabaseError>;

    /// Find the most recently stored record matching every criteria field.
    async fn find_one(&self, criteria: &Criteria) -> Result<Option<Document>, DatabaseError>;
}
