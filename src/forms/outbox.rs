//! Outbox — at-least-once delivery of saved forms to the document store.
//!
//! Saved forms are buffered in order. A failed insert keeps the record at the
//! head of the buffer and retries on every tick; the user gets one apology per
//! record that could not be stored on the first try.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use uuid::Uuid;

use crate::conversation::ConversationId;
use crate::error::DatabaseError;
use crate::events::{Event, EventBus};
use crate::forms::fields;
use crate::store::{Document, FormRepository};

/// Sent to the user when their form could not be stored right away.
pub const PERSISTENCE_APOLOGY: &str = "⚠️ Не удалось сохранить анкету. \
Мы повторим попытку автоматически, повторно заполнять анкету не нужно.";

/// A form document waiting to be inserted.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub conversation: ConversationId,
    pub document: Document,
    attempts: u32,
}

impl PendingRecord {
    /// Wrap a document for insertion. A document without `_id` gets one here,
    /// so every retry of the record writes the same row.
    pub fn new(conversation: ConversationId, mut document: Document) -> Self {
        document
            .entry(fields::ID)
            .or_insert_with(|| serde_json::Value::String(Uuid::new_v4().to_string()));
        Self {
            conversation,
            document,
            attempts: 0,
        }
    }
}

/// Sending half of the outbox, held by the form store.
#[derive(Debug, Clone)]
pub struct OutboxHandle {
    tx: mpsc::UnboundedSender<PendingRecord>,
}

impl OutboxHandle {
    pub fn enqueue(&self, record: PendingRecord) -> Result<(), DatabaseError> {
        self.tx
            .send(record)
            .map_err(|_| DatabaseError::Pool("outbox worker is not running".into()))
    }
}

pub struct Outbox {
    repo: Arc<dyn FormRepository>,
    bus: Arc<EventBus>,
    retry_interval: Duration,
    pending: VecDeque<PendingRecord>,
}

impl Outbox {
    pub fn channel() -> (OutboxHandle, mpsc::UnboundedReceiver<PendingRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (OutboxHandle { tx }, rx)
    }

    pub fn new(
        repo: Arc<dyn FormRepository>,
        bus: Arc<EventBus>,
        retry_interval: Duration,
    ) -> Self {
        Self {
            repo,
            bus,
            retry_interval,
            pending: VecDeque::new(),
        }
    }

    /// Number of records still waiting to be stored.
    pub fn backlog(&self) -> usize {
        self.pending.len()
    }

    /// Spawn the worker draining `rx` until every handle is dropped.
    pub fn spawn(self, rx: mpsc::UnboundedReceiver<PendingRecord>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PendingRecord>) {
        let mut interval = tokio::time::interval(self.retry_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(record) => {
                        self.pending.push_back(record);
                        self.flush().await;
                    }
                    None => break,
                },
                _ = interval.tick(), if !self.pending.is_empty() => {
                    self.flush().await;
                }
            }
        }

        self.flush().await;
        if !self.pending.is_empty() {
            warn!(backlog = self.pending.len(), "Outbox stopped with unsaved forms");
        }
    }

    /// Insert buffered records in order, stopping at the first failure.
    pub async fn flush(&mut self) {
        loop {
            let backlog = self.pending.len();
            let Some(record) = self.pending.front_mut() else {
                break;
            };
            record.attempts += 1;
            match self.repo.insert(&record.document).await {
                Ok(id) => {
                    info!(
                        conversation = %record.conversation,
                        record_id = %id,
                        attempts = record.attempts,
                        "Form saved"
                    );
                    self.pending.pop_front();
                }
                Err(e) => {
                    warn!(
                        conversation = %record.conversation,
                        attempts = record.attempts,
                        backlog,
                        error = %e,
                        "Form insert failed; will retry"
                    );
                    if record.attempts == 1 {
                        let notify = Event::Notify {
                            conversation: record.conversation,
                            message: PERSISTENCE_APOLOGY.to_string(),
                        };
                        if let Err(e) = self.bus.publish(notify) {
                            warn!(error = %e, "Failed to publish persistence apology");
                        }
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::Error;
    use crate::events::Subscriber;
    use crate::store::Criteria;

    /// Fails the first `failures` inserts, then stores documents in memory.
    struct FlakyRepo {
        failures: AtomicUsize,
        saved: Mutex<Vec<Document>>,
    }

    impl FlakyRepo {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicUsize::new(failures),
                saved: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl FormRepository for FlakyRepo {
        async fn insert(&self, document: &Document) -> Result<String, DatabaseError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DatabaseError::Query("database is locked".into()));
            }
            let mut saved = self.saved.lock().unwrap();
            saved.push(document.clone());
            Ok(format!("rec-{}", saved.len()))
        }

        async fn find_one(&self, _criteria: &Criteria) -> Result<Option<Document>, DatabaseError> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct Notifications(Mutex<Vec<Event>>);

    impl Subscriber for Notifications {
        fn name(&self) -> &str {
            "notifications"
        }

        fn update(&self, event: &Event) -> Result<(), Error> {
            if matches!(event, Event::Notify { .. }) {
                self.0.lock().unwrap().push(event.clone());
            }
            Ok(())
        }
    }

    fn record(id: i64) -> PendingRecord {
        let mut doc = Document::new();
        doc.insert("conversationId".into(), id.into());
        PendingRecord::new(ConversationId(id), doc)
    }

    #[tokio::test]
    async fn flush_stores_in_order() {
        let repo = FlakyRepo::new(0);
        let mut outbox = Outbox::new(repo.clone(), EventBus::new(), Duration::from_millis(10));
        outbox.pending.push_back(record(1));
        outbox.pending.push_back(record(2));

        outbox.flush().await;

        assert_eq!(outbox.backlog(), 0);
        let saved = repo.saved.lock().unwrap();
        assert_eq!(saved[0]["conversationId"], 1);
        assert_eq!(saved[1]["conversationId"], 2);
    }

    #[tokio::test]
    async fn failure_keeps_record_and_apologizes_once() {
        let repo = FlakyRepo::new(3);
        let bus = EventBus::new();
        let notes = Arc::new(Notifications::default());
        bus.subscribe(notes.clone());
        let mut outbox = Outbox::new(repo.clone(), bus, Duration::from_millis(10));
        outbox.pending.push_back(record(7));

        for _ in 0..3 {
            outbox.flush().await;
            assert_eq!(outbox.backlog(), 1);
        }
        outbox.flush().await;

        assert_eq!(outbox.backlog(), 0);
        assert_eq!(repo.saved.lock().unwrap().len(), 1);
        let notes = notes.0.lock().unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(
            notes[0],
            Event::Notify {
                conversation: ConversationId(7),
                message: PERSISTENCE_APOLOGY.to_string()
            }
        );
    }

    #[tokio::test]
    async fn worker_retries_until_stored() {
        let repo = FlakyRepo::new(2);
        let (handle, rx) = Outbox::channel();
        let outbox = Outbox::new(repo.clone(), EventBus::new(), Duration::from_millis(10));
        let worker = outbox.spawn(rx);

        handle.enqueue(record(9)).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while repo.saved.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("record was never stored");

        drop(handle);
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker did not stop")
            .unwrap();
    }

    #[test]
    fn pending_record_assigns_id_once() {
        let first = record(1);
        let id = first.document["_id"].as_str().unwrap().to_string();
        assert!(!id.is_empty());

        let again = PendingRecord::new(first.conversation, first.document.clone());
        assert_eq!(again.document["_id"], serde_json::Value::String(id));
    }

    #[tokio::test]
    async fn retried_record_keeps_its_id() {
        let repo = FlakyRepo::new(1);
        let mut outbox = Outbox::new(repo.clone(), EventBus::new(), Duration::from_millis(10));
        let pending = record(3);
        let id = pending.document["_id"].clone();
        outbox.pending.push_back(pending);

        outbox.flush().await;
        outbox.flush().await;

        let saved = repo.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0]["_id"], id);
    }

    #[test]
    fn enqueue_fails_when_worker_gone() {
        let (handle, rx) = Outbox::channel();
        drop(rx);
        assert!(handle.enqueue(record(1)).is_err());
    }
}
