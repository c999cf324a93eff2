//! Outbound — sends through a channel, retrying transient failures with
//! exponential backoff and jitter.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use super::channel::{Channel, MessageHandle, OutgoingMessage};
use crate::conversation::ConversationId;
use crate::error::ChannelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped, plus up to 25% jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let capped = exp.min(self.max_delay);
        let jitter_ms = (capped.as_millis() as u64) / 4;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        capped + Duration::from_millis(jitter)
    }
}

/// Shared outbound sender used by the steps and the notification path.
#[derive(Clone)]
pub struct Outbound {
    channel: Arc<dyn Channel>,
    policy: RetryPolicy,
}

impl Outbound {
    pub fn new(channel: Arc<dyn Channel>, policy: RetryPolicy) -> Self {
        Self { channel, policy }
    }

    pub fn channel_name(&self) -> &str {
        self.channel.name()
    }

    pub async fn send(
        &self,
        conversation: ConversationId,
        message: &OutgoingMessage,
    ) -> Result<MessageHandle, ChannelError> {
        let mut attempt = 1;
        loop {
            match self.channel.send(conversation, message).await {
                Ok(handle) => return Ok(handle),
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        conversation = %conversation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Send failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn edit_text(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
        let mut attempt = 1;
        loop {
            match self.channel.edit_text(handle, text).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        conversation = %handle.conversation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Edit failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::channels::MessageStream;

    /// Fails the first `failures` sends with the given error kind.
    struct Flaky {
        failures: AtomicU32,
        retryable: bool,
        calls: AtomicU32,
        sent: Mutex<Vec<String>>,
    }

    impl Flaky {
        fn new(failures: u32, retryable: bool) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU32::new(failures),
                retryable,
                calls: AtomicU32::new(0),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn error(&self) -> ChannelError {
            if self.retryable {
                ChannelError::Http("connection reset".into())
            } else {
                ChannelError::InvalidMessage("chat not found".into())
            }
        }
    }

    #[async_trait]
    impl Channel for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn start(&self) -> Result<MessageStream, ChannelError> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn send(
            &self,
            conversation: ConversationId,
            message: &OutgoingMessage,
        ) -> Result<MessageHandle, ChannelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(self.error());
            }
            self.sent.lock().unwrap().push(message.text.clone());
            Ok(MessageHandle {
                conversation,
                message_id: 1,
            })
        }

        async fn edit_text(
            &self,
            _handle: &MessageHandle,
            _text: &str,
        ) -> Result<(), ChannelError> {
            Err(self.error())
        }

        async fn health_check(&self) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let channel = Flaky::new(2, true);
        let outbound = Outbound::new(channel.clone(), fast(5));

        let handle = outbound
            .send(ConversationId(1), &OutgoingMessage::plain("hi"))
            .await
            .unwrap();

        assert_eq!(handle.message_id, 1);
        assert_eq!(channel.calls.load(Ordering::SeqCst), 3);
        assert_eq!(*channel.sent.lock().unwrap(), vec!["hi"]);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let channel = Flaky::new(10, true);
        let outbound = Outbound::new(channel.clone(), fast(3));

        let result = outbound
            .send(ConversationId(1), &OutgoingMessage::plain("hi"))
            .await;

        assert!(result.is_err());
        assert_eq!(channel.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let channel = Flaky::new(1, false);
        let outbound = Outbound::new(channel.clone(), fast(5));

        let result = outbound
            .send(ConversationId(1), &OutgoingMessage::plain("hi"))
            .await;

        assert!(matches!(result, Err(ChannelError::InvalidMessage(_))));
        assert_eq!(channel.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };
        let first = policy.delay(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        let third = policy.delay(3);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(500));
        let capped = policy.delay(9);
        assert!(capped >= Duration::from_millis(1000) && capped <= Duration::from_millis(1250));
    }
}
