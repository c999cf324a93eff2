//! Shared harness for the integration tests: an in-memory channel that
//! records everything sent to it, and a bus subscriber that records events.

#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use intake_bot::channels::{
    Channel, MessageHandle, MessageStream, NotificationDispatcher, OutgoingMessage, Outbound,
    RetryPolicy,
};
use intake_bot::conversation::{
    ConversationDriver, ConversationId, ConversationRegistry, StepExecutor,
};
use intake_bot::error::{ChannelError, Error};
use intake_bot::events::{Event, EventBus, Subscriber};
use intake_bot::forms::{FormStore, Outbox};
use intake_bot::questionnaire::Chain;
use intake_bot::store::LibSqlBackend;

/// Maximum time any wait is allowed to take before the test is considered hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Something the bot did to the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Message {
        conversation: ConversationId,
        message: OutgoingMessage,
    },
    Edit {
        handle: MessageHandle,
        text: String,
    },
}

/// In-memory channel. Sends of a prompt listed in `fail_on` fail.
pub struct RecordingChannel {
    tx: mpsc::UnboundedSender<Sent>,
    next_id: AtomicI64,
    fail_on: Mutex<Vec<String>>,
}

impl RecordingChannel {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Sent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            tx,
            next_id: AtomicI64::new(1),
            fail_on: Mutex::new(Vec::new()),
        });
        (channel, rx)
    }

    pub fn fail_on(&self, text: &str) {
        self.fail_on.lock().unwrap().push(text.to_string());
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn send(
        &self,
        conversation: ConversationId,
        message: &OutgoingMessage,
    ) -> Result<MessageHandle, ChannelError> {
        if self.fail_on.lock().unwrap().contains(&message.text) {
            return Err(ChannelError::SendFailed {
                name: "recording".into(),
                reason: "refused".into(),
            });
        }
        let _ = self.tx.send(Sent::Message {
            conversation,
            message: message.clone(),
        });
        Ok(MessageHandle {
            conversation,
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn edit_text(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
        let _ = self.tx.send(Sent::Edit {
            handle: *handle,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Records every event published on the bus.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Events for one conversation, excluding outbound notifications.
    pub fn form_events(&self, conversation: ConversationId) -> Vec<Event> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.conversation() == conversation && !matches!(e, Event::Notify { .. }))
            .collect()
    }
}

impl Subscriber for EventLog {
    fn name(&self) -> &str {
        "event_log"
    }

    fn update(&self, event: &Event) -> Result<(), Error> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// A fully wired bot over an in-memory database and a recording channel.
pub struct Harness {
    pub driver: Arc<ConversationDriver>,
    pub registry: Arc<ConversationRegistry>,
    pub bus: Arc<EventBus>,
    pub forms: Arc<FormStore>,
    pub repo: Arc<LibSqlBackend>,
    pub channel: Arc<RecordingChannel>,
    pub log: Arc<EventLog>,
    sent: mpsc::UnboundedReceiver<Sent>,
}

impl Harness {
    pub async fn new(chain: Chain) -> Self {
        let repo = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let bus = EventBus::new();
        let log = Arc::new(EventLog::default());
        bus.subscribe(log.clone());

        let (outbox_handle, outbox_rx) = Outbox::channel();
        let forms = FormStore::new(outbox_handle);
        bus.subscribe(forms.clone());
        Outbox::new(repo.clone(), Arc::clone(&bus), Duration::from_millis(50)).spawn(outbox_rx);

        let registry = ConversationRegistry::new();
        bus.subscribe(registry.clone());

        let (channel, sent) = RecordingChannel::new();
        let outbound = Outbound::new(channel.clone(), RetryPolicy::none());
        let (dispatcher, _task) = NotificationDispatcher::spawn(outbound.clone());
        bus.subscribe(dispatcher);

        let executor = Arc::new(StepExecutor::new(
            chain,
            Arc::clone(&bus),
            outbound.clone(),
            Arc::clone(&registry),
        ));
        let driver = ConversationDriver::new(
            executor,
            Arc::clone(&registry),
            Arc::clone(&bus),
            outbound,
        );

        Self {
            driver,
            registry,
            bus,
            forms,
            repo,
            channel,
            log,
            sent,
        }
    }

    /// Next thing sent to the channel, edits included.
    pub async fn next_sent(&mut self) -> Sent {
        timeout(TEST_TIMEOUT, self.sent.recv())
            .await
            .expect("timed out waiting for the bot")
            .expect("channel closed")
    }

    /// Next message sent, skipping answer echoes.
    pub async fn next_message(&mut self) -> (ConversationId, OutgoingMessage) {
        loop {
            if let Sent::Message {
                conversation,
                message,
            } = self.next_sent().await
            {
                return (conversation, message);
            }
        }
    }

    /// Next message for `conversation`, asserting its text.
    pub async fn expect_prompt(
        &mut self,
        conversation: ConversationId,
        text: &str,
    ) -> OutgoingMessage {
        let (to, message) = self.next_message().await;
        assert_eq!(to, conversation);
        assert_eq!(message.text, text);
        message
    }

    /// True if nothing is sent within `wait`.
    pub async fn quiet_for(&mut self, wait: Duration) -> bool {
        timeout(wait, self.sent.recv()).await.is_err()
    }

    /// Wait until the database holds `n` records.
    pub async fn wait_for_records(&self, n: i64) {
        timeout(TEST_TIMEOUT, async {
            while self.repo.count().await.unwrap() < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for saved forms");
    }
}
