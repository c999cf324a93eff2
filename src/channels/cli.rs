//! CLI channel — stdin/stdout REPL for local testing.
//!
//! One local conversation. `/start` starts it; when buttons are on screen,
//! typing a button's number, label or data presses it; anything else is text.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{Channel, IncomingMessage, MessageHandle, MessageStream, OutgoingMessage};
use crate::conversation::ConversationId;
use crate::error::ChannelError;
use crate::questionnaire::Choice;

/// The single conversation a terminal session represents.
pub const CLI_CONVERSATION: ConversationId = ConversationId(1);

/// A simple CLI channel that reads from stdin and writes to stdout.
pub struct CliChannel {
    buttons: Arc<Mutex<Vec<Choice>>>,
    next_message_id: AtomicI64,
}

impl CliChannel {
    pub fn new() -> Self {
        Self {
            buttons: Arc::new(Mutex::new(Vec::new())),
            next_message_id: AtomicI64::new(1),
        }
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Interpret one typed line against the buttons currently on screen.
fn parse_line(line: &str, buttons: &[Choice]) -> IncomingMessage {
    if line == "/start" {
        return IncomingMessage::start(CLI_CONVERSATION);
    }
    let pressed = line
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| buttons.get(i))
        .or_else(|| {
            buttons
                .iter()
                .find(|b| b.data == line || b.label.eq_ignore_ascii_case(line))
        });
    match pressed {
        Some(button) => IncomingMessage::button(CLI_CONVERSATION, button.data.clone()),
        None => IncomingMessage::text(CLI_CONVERSATION, line),
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let buttons = Arc::clone(&self.buttons);

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            eprintln!("Type /start to begin.");
            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            eprint!("> ");
                            continue;
                        }
                        let msg = {
                            let shown = buttons.lock().unwrap_or_else(|e| e.into_inner());
                            parse_line(&line, &shown)
                        };
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn send(
        &self,
        conversation: ConversationId,
        message: &OutgoingMessage,
    ) -> Result<MessageHandle, ChannelError> {
        println!("\n{}", message.text);
        for (i, button) in message.buttons.iter().enumerate() {
            println!("  [{}] {}", i + 1, button.label);
        }
        println!();
        eprint!("> ");

        if !message.buttons.is_empty() {
            *self.buttons.lock().unwrap_or_else(|e| e.into_inner()) = message.buttons.clone();
        }
        Ok(MessageHandle {
            conversation,
            message_id: self.next_message_id.fetch_add(1, Ordering::Relaxed),
        })
    }

    async fn edit_text(&self, _handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
        println!("✔ {text}\n");
        eprint!("> ");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
