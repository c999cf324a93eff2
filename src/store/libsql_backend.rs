//! libSQL backend — async `FormRepository` implementation.
//!
//! Records are stored as JSON text; `find_one` matches top-level fields with
//! `json_extract`. Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::params::Params;
use libsql::{Connection, Database as LibSqlDatabase, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::forms::fields;
use crate::store::migrations;
use crate::store::traits::{Criteria, Document, FormRepository};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        migrations::run_migrations(backend.conn()).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM form_records", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("count: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0)),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("count: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Criteria keys become JSON paths, so only plain identifiers are allowed.
fn is_plain_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Convert a criteria value into the SQL value `json_extract` yields for it.
fn criteria_value(key: &str, value: &serde_json::Value) -> Result<Value, DatabaseError> {
    match value {
        serde_json::Value::Bool(b) => Ok(Value::Integer(i64::from(*b))),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::Integer(i)),
            None => n
                .as_f64()
                .map(Value::Real)
                .ok_or_else(|| DatabaseError::Query(format!("unsupported number for {key}"))),
        },
        serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
        _ => Err(DatabaseError::Query(format!(
            "unsupported criteria value for {key}: only scalars can be matched"
        ))),
    }
}

/// Build the WHERE clause and positional parameters for `find_one`.
fn build_filter(criteria: &Criteria) -> Result<(String, Vec<Value>), DatabaseError> {
    let mut clauses = Vec::with_capacity(criteria.len());
    let mut params = Vec::with_capacity(criteria.len() * 2);

    for (key, value) in criteria {
        if key == fields::ID {
            let id = value
                .as_str()
                .ok_or_else(|| DatabaseError::Query("_id criteria must be a string".into()))?;
            params.push(Value::Text(id.to_string()));
            clauses.push(format!("id = ?{}", params.len()));
            continue;
        }
        if !is_plain_key(key) {
            return Err(DatabaseError::Query(format!("invalid criteria key: {key:?}")));
        }
        params.push(Value::Text(format!("$.{key}")));
        let path_idx = params.len();
        params.push(criteria_value(key, value)?);
        clauses.push(format!("json_extract(body, ?{path_idx}) = ?{}", params.len()));
    }

    let filter = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    Ok((filter, params))
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl FormRepository for LibSqlBackend {
    async fn insert(&self, document: &Document) -> Result<String, DatabaseError> {
        let id = document
            .get(fields::ID)
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let conversation_id = document
            .get(fields::CONVERSATION_ID)
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| {
                DatabaseError::Serialization("record has no numeric conversationId".into())
            })?;
        let saved_at = Utc::now().to_rfc3339();

        let mut body = document.clone();
        body.insert(fields::ID.into(), serde_json::Value::String(id.clone()));
        body.insert(fields::SAVED_AT.into(), serde_json::Value::String(saved_at.clone()));
        let body = serde_json::to_string(&body)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        // A retried insert of the same record is a no-op.
        let inserted = self
            .conn()
            .execute(
                "INSERT INTO form_records (id, conversation_id, body, saved_at) \
                 VALUES (?1, ?2, ?3, ?4) ON CONFLICT(id) DO NOTHING",
                libsql::params![id.clone(), conversation_id, body, saved_at],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert: {e}")))?;

        debug!(
            record_id = %id,
            conversation = conversation_id,
            duplicate = inserted == 0,
            "Form record inserted"
        );
        Ok(id)
    }

    async fn find_one(&self, criteria: &Criteria) -> Result<Option<Document>, DatabaseError> {
        let (filter, params) = build_filter(criteria)?;
        let sql = format!("SELECT body FROM form_records{filter} ORDER BY rowid DESC LIMIT 1");

        let mut rows = self
            .conn()
            .query(&sql, Params::Positional(params))
            .await
            .map_err(|e| DatabaseError::Query(format!("find_one: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let body: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("find_one row parse: {e}")))?;
                let document: Document = serde_json::from_str(&body)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
                Ok(Some(document))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_one: {e}"))),
        }
    }
}
