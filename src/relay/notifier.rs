//! Relay — turns verdicts into bus events.
//!
//! A ready verdict is looked up in the document store and becomes a `Notify`
//! for the record's conversation; a mark verdict becomes `UpdateMark`.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::source::{Verdict, VerdictListener};
use crate::conversation::ConversationId;
use crate::error::RelayError;
use crate::events::{Event, EventBus};
use crate::forms::fields;
use crate::store::{Criteria, Document, FormRepository};

const VERDICT_BUFFER: usize = 64;

/// Build the message sent to the user for a checked record.
pub fn format_verdict(record: &Document) -> String {
    let doctor = record
        .get(fields::DOCTOR_NAME)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("не указан");
    let mark = record
        .get(fields::MARK)
        .and_then(Value::as_i64)
        .unwrap_or_default();
    let comment = record
        .get(fields::DOCTOR_COMMENT)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("—");

    format!(
        "🩺 Ваша анкета проверена врачом.\n\n\
         Врач: {doctor}\n\
         Оценка риска: {mark}\n\
         Комментарий врача: {comment}"
    )
}

pub struct Relay {
    repo: Arc<dyn FormRepository>,
    bus: Arc<EventBus>,
}

impl Relay {
    pub fn new(repo: Arc<dyn FormRepository>, bus: Arc<EventBus>) -> Self {
        Self { repo, bus }
    }

    /// Apply one verdict.
    pub async fn handle(&self, verdict: Verdict) -> crate::error::Result<()> {
        match verdict {
            Verdict::Ready { record_id } => {
                let mut criteria = Criteria::new();
                criteria.insert(fields::ID.into(), Value::String(record_id.clone()));
                let Some(record) = self.repo.find_one(&criteria).await? else {
                    warn!(record_id = %record_id, "Verdict for unknown record");
                    return Ok(());
                };
                let conversation = record
                    .get(fields::CONVERSATION_ID)
                    .and_then(Value::as_i64)
                    .map(ConversationId)
                    .ok_or_else(|| {
                        RelayError::InvalidVerdict(format!(
                            "record {record_id} has no conversationId"
                        ))
                    })?;

                info!(record_id = %record_id, conversation = %conversation, "Delivering verdict");
                self.bus.publish(Event::Notify {
                    conversation,
                    message: format_verdict(&record),
                })?;
            }
            Verdict::Mark {
                conversation,
                delta,
            } => {
                info!(conversation = %conversation, delta, "Applying mark");
                self.bus
                    .publish(Event::UpdateMark {
                        conversation,
                        delta,
                    })?;
            }
        }
        Ok(())
    }

    /// Run `listener` and apply everything it yields.
    pub fn spawn(self, listener: Arc<dyn VerdictListener>) -> tokio::task::JoinHandle<()> {
        let (tx, mut rx) = mpsc::channel(VERDICT_BUFFER);
        let name = listener.name().to_string();
        tokio::spawn(async move {
            if let Err(e) = listener.listen(tx).await {
                error!(listener = %name, error = %e, "Verdict listener stopped");
            }
        });

        tokio::spawn(async move {
            while let Some(verdict) = rx.recv().await {
                if let Err(e) = self.handle(verdict).await {
                    warn!(error = %e, "Failed to apply verdict");
                }
            }
        })
    }
}
