//! Verdict listeners.
//!
//! Both speak newline-delimited text over TCP. The legacy request/reply
//! listener only answers liveness probes; the subscribe listener receives
//! one verdict per line and expects no reply.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::conversation::ConversationId;
use crate::error::RelayError;

/// Payload the legacy listener replies with.
pub const LIVENESS_REPLY: &str = "World";

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// One message from the verdict side channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The stored record with this id has a verdict ready.
    Ready { record_id: String },
    /// Add `delta` to a live form's mark.
    Mark {
        conversation: ConversationId,
        delta: i64,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireVerdict {
    Ready {
        #[serde(rename = "id")]
        record_id: String,
    },
    Mark {
        #[serde(rename = "conversationId")]
        conversation: ConversationId,
        delta: i64,
    },
}

/// Parse one line: a bare record id, or a JSON object tagged with `type`.
pub fn parse_verdict_line(line: &str) -> Result<Verdict, RelayError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(RelayError::InvalidVerdict("empty line".into()));
    }
    if line.starts_with('{') {
        let wire: WireVerdict = serde_json::from_str(line)
            .map_err(|e| RelayError::InvalidVerdict(format!("{e}: {line}")))?;
        return Ok(match wire {
            WireVerdict::Ready { record_id } => Verdict::Ready { record_id },
            WireVerdict::Mark {
                conversation,
                delta,
            } => Verdict::Mark {
                conversation,
                delta,
            },
        });
    }
    if line.chars().any(char::is_whitespace) {
        return Err(RelayError::InvalidVerdict(format!("not a record id: {line}")));
    }
    Ok(Verdict::Ready {
        record_id: line.to_string(),
    })
}

/// A source of verdicts.
#[async_trait]
pub trait VerdictListener: Send + Sync {
    fn name(&self) -> &str;

    /// Run until the sink closes or the listener fails.
    async fn listen(&self, sink: mpsc::Sender<Verdict>) -> Result<(), RelayError>;
}

async fn bind(addr: &str) -> Result<TcpListener, RelayError> {
    TcpListener::bind(addr).await.map_err(|e| RelayError::Bind {
        addr: addr.to_string(),
        reason: e.to_string(),
    })
}

async fn connect(addr: &str) -> Result<TcpStream, RelayError> {
    TcpStream::connect(addr).await.map_err(|e| RelayError::Connect {
        addr: addr.to_string(),
        reason: e.to_string(),
    })
}

/// Forward every parsable line of `reader` to `sink`. Returns false once the
/// sink is closed.
async fn pump<R: AsyncRead + Unpin>(reader: R, sink: &mpsc::Sender<Verdict>) -> bool {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_verdict_line(&line) {
                    Ok(verdict) => {
                        debug!(?verdict, "Verdict received");
                        if sink.send(verdict).await.is_err() {
                            return false;
                        }
                    }
                    Err(e) => warn!(error = %e, "Skipping verdict line"),
                }
            }
            Ok(None) => return true,
            Err(e) => {
                warn!(error = %e, "Verdict stream read failed");
                return true;
            }
        }
    }
}

// ── Legacy request/reply ────────────────────────────────────────────

/// Answers each request line with [`LIVENESS_REPLY`] after a fixed delay.
pub struct ReplyListener {
    listener: TcpListener,
    delay: Duration,
}

impl ReplyListener {
    pub async fn bind(addr: &str, delay: Duration) -> Result<Self, RelayError> {
        Ok(Self {
            listener: bind(addr).await?,
            delay,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }
}

#[async_trait]
impl VerdictListener for ReplyListener {
    fn name(&self) -> &str {
        "reply"
    }

    async fn listen(&self, sink: mpsc::Sender<Verdict>) -> Result<(), RelayError> {
        info!(addr = ?self.listener.local_addr().ok(), "Verdict reply listener started");
        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => accepted?,
                _ = sink.closed() => return Ok(()),
            };
            let delay = self.delay;
            tokio::spawn(async move {
                let (reader, mut writer) = stream.into_split();
                let mut lines = BufReader::new(reader).lines();
                while let Ok(Some(request)) = lines.next_line().await {
                    info!(peer = %peer, request = %request, "Received request");
                    tokio::time::sleep(delay).await;
                    if writer
                        .write_all(format!("{LIVENESS_REPLY}\n").as_bytes())
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });
        }
    }
}

// ── Subscribe ───────────────────────────────────────────────────────

enum Endpoint {
    Bound(TcpListener),
    Connect(String),
}

/// Receives verdicts, one per line, either from any number of publishers
/// connecting to a bound address or from one publisher it connects to.
pub struct SubscribeListener {
    endpoint: Endpoint,
}

impl SubscribeListener {
    pub async fn bind(addr: &str) -> Result<Self, RelayError> {
        Ok(Self {
            endpoint: Endpoint::Bound(bind(addr).await?),
        })
    }

    pub fn connect(addr: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::Connect(addr.into()),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.endpoint {
            Endpoint::Bound(listener) => listener.local_addr().ok(),
            Endpoint::Connect(_) => None,
        }
    }
}

#[async_trait]
impl VerdictListener for SubscribeListener {
    fn name(&self) -> &str {
        "subscribe"
    }

    async fn listen(&self, sink: mpsc::Sender<Verdict>) -> Result<(), RelayError> {
        match &self.endpoint {
            Endpoint::Bound(listener) => {
                info!(addr = ?listener.local_addr().ok(), "Verdict subscriber bound");
                loop {
                    let (stream, peer) = tokio::select! {
                        accepted = listener.accept() => accepted?,
                        _ = sink.closed() => return Ok(()),
                    };
                    debug!(peer = %peer, "Verdict publisher connected");
                    let sink = sink.clone();
                    tokio::spawn(async move {
                        pump(stream, &sink).await;
                    });
                }
            }
            Endpoint::Connect(addr) => loop {
                match connect(addr).await {
                    Ok(stream) => {
                        info!(addr = %addr, "Connected to verdict publisher");
                        if !pump(stream, &sink).await {
                            return Ok(());
                        }
                        warn!(addr = %addr, "Verdict publisher disconnected");
                    }
                    Err(e) => warn!(error = %e, "Verdict publisher unreachable"),
                }
                if sink.is_closed() {
                    return Ok(());
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_id_is_ready() {
        assert_eq!(
            parse_verdict_line("  6a1f-42 \n").unwrap(),
            Verdict::Ready {
                record_id: "6a1f-42".into()
            }
        );
    }

    #[test]
    fn json_mark() {
        assert_eq!(
            parse_verdict_line(r#"{"type":"mark","conversationId":42,"delta":5}"#).unwrap(),
            Verdict::Mark {
                conversation: ConversationId(42),
                delta: 5
            }
        );
    }

    #[test]
    fn json_ready() {
        assert_eq!(
            parse_verdict_line(r#"{"type":"ready","id":"abc"}"#).unwrap(),
            Verdict::Ready {
                record_id: "abc".into()
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_verdict_line("").is_err());
        assert!(parse_verdict_line("two words").is_err());
        assert!(parse_verdict_line(r#"{"type":"mark"}"#).is_err());
        assert!(parse_verdict_line("{not json").is_err());
    }

    #[tokio::test]
    async fn reply_listener_answers_with_liveness() {
        let listener = ReplyListener::bind("127.0.0.1:0", Duration::from_millis(1))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        tokio::spawn(async move { listener.listen(tx).await });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"Hello\n").await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let reply = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.as_deref(), Some(LIVENESS_REPLY));
    }

    #[tokio::test]
    async fn subscribe_listener_forwards_valid_lines() {
        let listener = SubscribeListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        tokio::spawn(async move { listener.listen(tx).await });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"rec-1\nbad line\n").await.unwrap();
        stream
            .write_all(b"{\"type\":\"mark\",\"conversationId\":7,\"delta\":-2}\n")
            .await
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(
            first,
            Some(Verdict::Ready {
                record_id: "rec-1".into()
            })
        );
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(
            second,
            Some(Verdict::Mark {
                conversation: ConversationId(7),
                delta: -2
            })
        );
    }

    #[tokio::test]
    async fn connect_failure_names_the_address() {
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = closed.local_addr().unwrap().to_string();
        drop(closed);

        match connect(&addr).await {
            Err(RelayError::Connect { addr: failed, .. }) => assert_eq!(failed, addr),
            other => panic!("expected a connect error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscribe_listener_connects_to_publisher() {
        let publisher = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = publisher.local_addr().unwrap();
        let listener = SubscribeListener::connect(addr.to_string());
        let (tx, mut rx) = mpsc::channel(4);
        tokio::spawn(async move { listener.listen(tx).await });

        let (mut stream, _) = publisher.accept().await.unwrap();
        stream.write_all(b"rec-9\n").await.unwrap();

        let verdict = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(
            verdict,
            Some(Verdict::Ready {
                record_id: "rec-9".into()
            })
        );
    }
}
