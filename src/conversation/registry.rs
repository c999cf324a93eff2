//! ConversationRegistry — the single owner of per-conversation runtime state.
//!
//! Each record holds the phase, the cursor into the chain, the pending
//! response slot of a suspended step, and the handle of the running
//! activation. Every mutation from an activation carries its generation so a
//! superseded activation can never touch the state of its replacement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::id::ConversationId;
use super::state::{ConversationPhase, Modality};
use crate::error::{ConversationError, Error};
use crate::events::{Event, Subscriber};
use crate::forms::FormStore;

/// Outcome of routing one inbound response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the suspended step.
    Accepted,
    /// The suspended step expects the other modality.
    ModalityMismatch { expected: Modality, got: Modality },
    /// Nothing is waiting; the step already took a response or is not suspended.
    NotAwaiting,
    /// No conversation with that id.
    Unknown,
}

impl Delivery {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub accepted: u64,
    pub modality_mismatch: u64,
    pub not_awaiting: u64,
    pub unknown: u64,
    pub evicted: u64,
}

struct PendingResponse {
    modality: Modality,
    tx: oneshot::Sender<String>,
}

struct Record {
    phase: ConversationPhase,
    cursor: Option<usize>,
    pending: Option<PendingResponse>,
    restart_at: Option<usize>,
    task: Option<AbortHandle>,
    last_activity: DateTime<Utc>,
    generation: u64,
}

impl Record {
    fn new() -> Self {
        Self {
            phase: ConversationPhase::Idle,
            cursor: None,
            pending: None,
            restart_at: None,
            task: None,
            last_activity: Utc::now(),
            generation: 0,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    fn transition(&mut self, conversation: ConversationId, target: ConversationPhase) {
        if !self.phase.can_transition_to(target) {
            warn!(
                conversation = %conversation,
                from = %self.phase,
                to = %target,
                "Unexpected conversation phase transition"
            );
        }
        self.phase = target;
    }
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    modality_mismatch: AtomicU64,
    not_awaiting: AtomicU64,
    unknown: AtomicU64,
    evicted: AtomicU64,
}

#[derive(Default)]
pub struct ConversationRegistry {
    records: Mutex<HashMap<ConversationId, Record>>,
    counters: Counters,
}

impl ConversationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn records(&self) -> MutexGuard<'_, HashMap<ConversationId, Record>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up the record an activation owns.
    fn owned<'a>(
        records: &'a mut HashMap<ConversationId, Record>,
        conversation: ConversationId,
        generation: u64,
    ) -> Result<&'a mut Record, ConversationError> {
        let record = records
            .get_mut(&conversation)
            .ok_or(ConversationError::UnknownConversation(conversation))?;
        if record.generation != generation {
            return Err(ConversationError::Superseded(conversation));
        }
        Ok(record)
    }

    /// Start a new activation at `index`, cancelling any running one.
    /// Returns the new generation.
    pub fn begin(&self, conversation: ConversationId, index: usize) -> u64 {
        let mut records = self.records();
        let record = records.entry(conversation).or_insert_with(Record::new);
        if let Some(task) = record.task.take() {
            task.abort();
            debug!(conversation = %conversation, "Aborted previous activation");
        }
        record.generation += 1;
        record.pending = None;
        record.restart_at = None;
        record.cursor = Some(index);
        record.transition(conversation, ConversationPhase::AwaitingActivation);
        record.touch();
        record.generation
    }

    /// Remember the task running `generation`. A stale task is aborted.
    pub fn attach_task(&self, conversation: ConversationId, generation: u64, task: AbortHandle) {
        let mut records = self.records();
        match Self::owned(&mut records, conversation, generation) {
            Ok(record) => record.task = Some(task),
            Err(_) => task.abort(),
        }
    }

    /// Mark the step at `index` as about to run.
    pub fn activate(
        &self,
        conversation: ConversationId,
        generation: u64,
        index: usize,
    ) -> Result<(), ConversationError> {
        let mut records = self.records();
        let record = Self::owned(&mut records, conversation, generation)?;
        record.cursor = Some(index);
        record.transition(conversation, ConversationPhase::AwaitingActivation);
        Ok(())
    }

    /// Mark the current step as returned.
    pub fn advance(
        &self,
        conversation: ConversationId,
        generation: u64,
    ) -> Result<(), ConversationError> {
        let mut records = self.records();
        let record = Self::owned(&mut records, conversation, generation)?;
        if record.phase != ConversationPhase::Advancing {
            record.transition(conversation, ConversationPhase::Advancing);
        }
        Ok(())
    }

    /// Open the pending-response slot. Must be called before the prompt is
    /// sent so that an immediate reply finds the slot.
    pub fn suspend(
        &self,
        conversation: ConversationId,
        generation: u64,
        modality: Modality,
    ) -> Result<oneshot::Receiver<String>, ConversationError> {
        let mut records = self.records();
        let record = Self::owned(&mut records, conversation, generation)?;
        let (tx, rx) = oneshot::channel();
        record.pending = Some(PendingResponse { modality, tx });
        record.transition(conversation, ConversationPhase::Suspended(modality));
        Ok(rx)
    }

    /// Route an inbound response. The first matching response wins; the
    /// slot is consumed and later responses are dropped until the next
    /// suspension.
    pub fn deliver(
        &self,
        conversation: ConversationId,
        modality: Modality,
        data: String,
    ) -> Delivery {
        let mut records = self.records();
        let Some(record) = records.get_mut(&conversation) else {
            self.counters.unknown.fetch_add(1, Ordering::Relaxed);
            return Delivery::Unknown;
        };
        record.touch();

        let outcome = match record.pending.take() {
            None => Delivery::NotAwaiting,
            Some(pending) if pending.modality != modality => {
                let expected = pending.modality;
                record.pending = Some(pending);
                Delivery::ModalityMismatch {
                    expected,
                    got: modality,
                }
            }
            Some(pending) => match pending.tx.send(data) {
                Ok(()) => {
                    record.transition(conversation, ConversationPhase::Advancing);
                    Delivery::Accepted
                }
                Err(_) => Delivery::NotAwaiting,
            },
        };

        let counter = match outcome {
            Delivery::Accepted => &self.counters.accepted,
            Delivery::ModalityMismatch { .. } => &self.counters.modality_mismatch,
            Delivery::NotAwaiting => &self.counters.not_awaiting,
            Delivery::Unknown => &self.counters.unknown,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    /// Arrange for the current activation to continue at `index` once its
    /// chain is exhausted.
    pub fn arm_restart(
        &self,
        conversation: ConversationId,
        index: usize,
    ) -> Result<(), ConversationError> {
        let mut records = self.records();
        let record = records
            .get_mut(&conversation)
            .ok_or(ConversationError::UnknownConversation(conversation))?;
        record.restart_at = Some(index);
        Ok(())
    }

    /// The chain ran out. Returns the armed restart index, or goes idle.
    pub fn finish(&self, conversation: ConversationId, generation: u64) -> Option<usize> {
        let mut records = self.records();
        let record = Self::owned(&mut records, conversation, generation).ok()?;
        record.touch();
        match record.restart_at.take() {
            Some(index) => {
                record.cursor = Some(index);
                record.transition(conversation, ConversationPhase::AwaitingActivation);
                Some(index)
            }
            None => {
                record.cursor = None;
                record.task = None;
                record.transition(conversation, ConversationPhase::Idle);
                None
            }
        }
    }

    /// The activation stopped on an error.
    pub fn fail(&self, conversation: ConversationId, generation: u64) {
        let mut records = self.records();
        if let Ok(record) = Self::owned(&mut records, conversation, generation) {
            record.pending = None;
            record.restart_at = None;
            record.cursor = None;
            record.task = None;
            if !record.phase.is_idle() {
                record.transition(conversation, ConversationPhase::Idle);
            }
        }
    }

    pub fn phase(&self, conversation: ConversationId) -> Option<ConversationPhase> {
        self.records().get(&conversation).map(|r| r.phase)
    }

    pub fn cursor(&self, conversation: ConversationId) -> Option<usize> {
        self.records().get(&conversation).and_then(|r| r.cursor)
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Drop a conversation, cancelling its activation.
    pub fn evict(&self, conversation: ConversationId) -> bool {
        let removed = self.records().remove(&conversation);
        match removed {
            Some(record) => {
                if let Some(task) = record.task {
                    task.abort();
                }
                self.counters.evicted.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Evict every conversation without activity for at least `max_idle`.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<ConversationId> {
        self.evict_idle_with(max_idle, |_| {})
    }

    /// Like `evict_idle`, calling `on_evict` for each evicted conversation
    /// while the registry is still locked, so a conversation started during
    /// the sweep is never cleaned up along with the stale one.
    ///
    /// `on_evict` must not call back into the registry.
    pub fn evict_idle_with(
        &self,
        max_idle: Duration,
        mut on_evict: impl FnMut(ConversationId),
    ) -> Vec<ConversationId> {
        let now = Utc::now();
        let mut records = self.records();
        let stale: Vec<ConversationId> = records
            .iter()
            .filter(|(_, r)| (now - r.last_activity).to_std().unwrap_or_default() >= max_idle)
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            if let Some(task) = records.remove(id).and_then(|r| r.task) {
                task.abort();
            }
            on_evict(*id);
        }
        self.counters
            .evicted
            .fetch_add(stale.len() as u64, Ordering::Relaxed);
        stale
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            modality_mismatch: self.counters.modality_mismatch.load(Ordering::Relaxed),
            not_awaiting: self.counters.not_awaiting.load(Ordering::Relaxed),
            unknown: self.counters.unknown.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
        }
    }
}

impl Subscriber for ConversationRegistry {
    fn name(&self) -> &str {
        "conversation_registry"
    }

    fn update(&self, event: &Event) -> Result<(), Error> {
        if let Event::Reinitialize {
            conversation,
            restart_at,
        } = event
        {
            self.arm_restart(*conversation, *restart_at)?;
            debug!(conversation = %conversation, restart_at, "Restart armed");
        }
        Ok(())
    }
}

/// Periodically evict idle conversations together with their forms.
pub fn spawn_idle_sweep(
    registry: Arc<ConversationRegistry>,
    forms: Arc<FormStore>,
    idle_timeout: Duration,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = registry.evict_idle_with(idle_timeout, |id| {
                forms.evict(id);
            });
            if evicted.is_empty() {
                continue;
            }
            info!(
                count = evicted.len(),
                live = registry.len(),
                "Evicted idle conversations"
            );
        }
    })
}
