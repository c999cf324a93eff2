//! Telegram channel — long-polls the Bot API for updates.
//!
//! `/start` commands, text messages and inline-keyboard presses become
//! `IncomingMessage`s keyed by chat id. Prompts go out with `sendMessage`
//! (Markdown first, plain text fallback) and answers are echoed with
//! `editMessageText`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::channels::{Channel, IncomingMessage, MessageHandle, MessageStream, OutgoingMessage};
use crate::conversation::ConversationId;
use crate::error::ChannelError;
use crate::questionnaire::{Choice, TextFormat};

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const START_COMMAND: &str = "/start";

/// Pause after a failed poll when the API does not say how long to wait.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Telegram channel — connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.bot_token, method)
    }

    /// Send a single message chunk (≤4096 chars), Markdown-first with fallback.
    /// Returns the id of the sent message.
    async fn send_message_chunk(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
        buttons: &[Choice],
    ) -> Result<i64, ChannelError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
        });
        if !buttons.is_empty() {
            body["reply_markup"] = inline_keyboard(buttons);
        }

        if format == TextFormat::Markdown {
            let mut markdown_body = body.clone();
            markdown_body["parse_mode"] = json!("Markdown");
            let resp = self.post("sendMessage", &markdown_body).await?;
            if resp.status().is_success() {
                return message_id(resp).await;
            }
            tracing::warn!(
                status = ?resp.status(),
                "Telegram sendMessage with Markdown failed; retrying without parse_mode"
            );
        }

        let resp = self.post("sendMessage", &body).await?;
        if !resp.status().is_success() {
            return Err(status_error("sendMessage", resp).await);
        }
        message_id(resp).await
    }

    async fn post(&self, method: &str, body: &Value) -> Result<reqwest::Response, ChannelError> {
        self.client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(format!("{method}: {e}")))
    }

    /// Stop the client-side spinner on a pressed inline button.
    async fn answer_callback(&self, callback_id: &str) {
        let body = json!({ "callback_query_id": callback_id });
        if let Err(e) = self.post("answerCallbackQuery", &body).await {
            tracing::debug!(error = %e, "answerCallbackQuery failed");
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let client = self.client.clone();
        let acker = Self {
            bot_token: self.bot_token.clone(),
            client: self.client.clone(),
        };

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = json!({
                    "offset": offset,
                    "timeout": 30,
                    "allowed_updates": ["message", "callback_query"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let Some(results) = poll_results(&data) else {
                    let delay = poll_retry_delay(&data);
                    tracing::warn!(
                        error_code = data.get("error_code").and_then(serde_json::Value::as_i64),
                        description = data
                            .get("description")
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or_default(),
                        retry_in_secs = delay.as_secs(),
                        "Telegram getUpdates rejected"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                };
                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    if let Some(callback_id) = update
                        .get("callback_query")
                        .and_then(|q| q.get("id"))
                        .and_then(Value::as_str)
                    {
                        acker.answer_callback(callback_id).await;
                    }

                    let Some(incoming) = parse_update(update) else {
                        continue;
                    };
                    if tx.send(incoming).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn send(
        &self,
        conversation: ConversationId,
        message: &OutgoingMessage,
    ) -> Result<MessageHandle, ChannelError> {
        let chunks = split_message(&message.text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);
        let mut message_id = 0;

        // Buttons go on the last chunk.
        for (i, chunk) in chunks.iter().enumerate() {
            let buttons: &[Choice] = if i == last { &message.buttons } else { &[] };
            message_id = self
                .send_message_chunk(conversation.as_i64(), chunk, message.format, buttons)
                .await?;
        }

        Ok(MessageHandle {
            conversation,
            message_id,
        })
    }

    async fn edit_text(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
        let body = json!({
            "chat_id": handle.conversation.as_i64(),
            "message_id": handle.message_id,
            "text": text,
        });
        let resp = self.post("editMessageText", &body).await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(status_error("editMessageText", resp).await)
        }
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn api_url(token: &SecretString, method: &str) -> String {
    format!("https://api.telegram.org/bot{}/{method}", token.expose_secret())
}

/// One button per row, as the questionnaire screens are laid out.
fn inline_keyboard(buttons: &[Choice]) -> Value {
    let rows: Vec<Value> = buttons
        .iter()
        .map(|b| json!([{ "text": b.label, "callback_data": b.data }]))
        .collect();
    json!({ "inline_keyboard": rows })
}

async fn message_id(resp: reqwest::Response) -> Result<i64, ChannelError> {
    let data: Value = resp
        .json()
        .await
        .map_err(|e| ChannelError::Http(format!("sendMessage response: {e}")))?;
    data.get("result")
        .and_then(|r| r.get("message_id"))
        .and_then(Value::as_i64)
        .ok_or_else(|| ChannelError::InvalidMessage("sendMessage returned no message_id".into()))
}

async fn status_error(method: &str, resp: reqwest::Response) -> ChannelError {
    let status = resp.status();
    let detail = resp.text().await.unwrap_or_default();
    classify_status(method, status, &detail)
}

/// Map a failed API response: 429 and 5xx are transient, other 4xx are not.
fn classify_status(method: &str, status: StatusCode, detail: &str) -> ChannelError {
    let reason = format!("{method} returned {status}: {detail}");
    if status == StatusCode::TOO_MANY_REQUESTS {
        ChannelError::RateLimited {
            name: "telegram".into(),
        }
    } else if status.is_server_error() && method == "editMessageText" {
        ChannelError::EditFailed {
            name: "telegram".into(),
            reason,
        }
    } else if status.is_server_error() {
        ChannelError::SendFailed {
            name: "telegram".into(),
            reason,
        }
    } else {
        ChannelError::InvalidMessage(reason)
    }
}

/// The updates of a successful `getUpdates` reply.
fn poll_results(data: &Value) -> Option<&Vec<Value>> {
    if data.get("ok").and_then(Value::as_bool) == Some(false) {
        return None;
    }
    data.get("result").and_then(Value::as_array)
}

/// How long to back off after a rejected poll. Honours `retry_after`.
fn poll_retry_delay(data: &Value) -> Duration {
    data.get("parameters")
        .and_then(|p| p.get("retry_after"))
        .and_then(Value::as_u64)
        .map(Duration::from_secs)
        .unwrap_or(POLL_RETRY_DELAY)
}

/// Turn one `getUpdates` entry into an inbound event.
fn parse_update(update: &Value) -> Option<IncomingMessage> {
    if let Some(query) = update.get("callback_query") {
        let chat_id = query
            .get("message")
            .and_then(|m| m.get("chat"))
            .and_then(|c| c.get("id"))
            .and_then(Value::as_i64)?;
        let data = query.get("data").and_then(Value::as_str)?;
        return Some(IncomingMessage::button(ConversationId(chat_id), data));
    }

    let message = update.get("message")?;
    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)?;
    let text = message.get("text").and_then(Value::as_str)?;
    let conversation = ConversationId(chat_id);

    if is_start_command(text) {
        Some(IncomingMessage::start(conversation))
    } else {
        Some(IncomingMessage::text(conversation, text))
    }
}

/// `/start`, `/start payload` and `/start@BotName` all count.
fn is_start_command(text: &str) -> bool {
    let command = text.split_whitespace().next().unwrap_or_default();
    let command = command.split('@').next().unwrap_or_default();
    command == START_COMMAND
}

/// Split a message into chunks that fit Telegram's limit.
/// Tries to split on newlines, then spaces, then hard-cuts on a char boundary.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut limit = max_len;
        while !remaining.is_char_boundary(limit) {
            limit -= 1;
        }

        // Find a good split point
        let chunk = &remaining[..limit];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(limit);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
