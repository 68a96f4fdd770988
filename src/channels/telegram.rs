//! Telegram adapter — long-polls the Bot API for updates.
//!
//! Native Bot API implementation over reqwest. Inbound updates (text,
//! callback queries from inline keyboards, document/photo uploads) are
//! normalized into `ChatEvent`s; outbound goes through `ChatOutbound`
//! with Markdown-first rendering and a plain-text fallback.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tracing::{info, warn};

use crate::channels::{AttachmentRef, ChatEvent, ChatEventKind, ChatOutbound, Choice, EventStream};
use crate::config::TelegramConfig;
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Telegram chat transport, long-polling via `getUpdates`.
pub struct TelegramChannel {
    bot_token: String,
    allowed_users: Vec<String>,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            bot_token: config.bot_token.expose_secret().to_string(),
            allowed_users: config.allowed_users.clone(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    /// Verify the token against `getMe`.
    pub async fn health_check(&self) -> Result<(), ChannelError> {
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

    /// Start the long-poll loop and return the normalized event stream.
    pub fn start(&self) -> EventStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let bot_token = self.bot_token.clone();
        let allowed_users = self.allowed_users.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            info!("Telegram channel listening for updates...");

            loop {
                let url = format!("https://api.telegram.org/bot{bot_token}/getUpdates");
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": 30,
                    "allowed_updates": ["message", "callback_query"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("Telegram poll error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: serde_json::Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("Telegram parse error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(serde_json::Value::as_array)
                else {
                    continue;
                };

                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64)
                    {
                        offset = uid + 1;
                    }

                    let Some(parsed) = parse_update(update) else {
                        continue;
                    };

                    // Acknowledge button presses so clients stop spinning.
                    if let Some(callback_id) = &parsed.callback_id {
                        let _ = client
                            .post(format!(
                                "https://api.telegram.org/bot{bot_token}/answerCallbackQuery"
                            ))
                            .json(&serde_json::json!({ "callback_query_id": callback_id }))
                            .send()
                            .await;
                    }

                    // Allowlist against username and numeric id.
                    let id_str = parsed.event.sender_id.to_string();
                    let mut identities = vec![id_str.as_str()];
                    if let Some(username) = &parsed.username {
                        identities.push(username.as_str());
                    }
                    if !check_user_allowed(&allowed_users, identities) {
                        warn!(
                            sender_id = parsed.event.sender_id,
                            username = parsed.username.as_deref().unwrap_or("unknown"),
                            "Ignoring update from unauthorized user"
                        );
                        continue;
                    }

                    if tx.send(parsed.event).is_err() {
                        info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream =
            futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|e| (e, rx)) });
        Box::pin(stream)
    }

    /// Send one chunk (≤4096 chars), Markdown-first with plain fallback.
    /// `reply_markup` rides along on both attempts.
    async fn send_chunk(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<serde_json::Value>,
    ) -> Result<(), ChannelError> {
        let mut markdown_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });
        if let Some(markup) = &reply_markup {
            markdown_body["reply_markup"] = markup.clone();
        }

        let markdown_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&markdown_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if markdown_resp.status().is_success() {
            return Ok(());
        }

        let markdown_status = markdown_resp.status();
        warn!(
            status = ?markdown_status,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        let mut plain_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(markup) = &reply_markup {
            plain_body["reply_markup"] = markup.clone();
        }
        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!(
                    "sendMessage failed (markdown: {markdown_status}, plain: {plain_err})"
                ),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl ChatOutbound for TelegramChannel {
    async fn send(&self, conversation_id: i64, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_chunk(conversation_id, &chunk, None).await?;
        }
        Ok(())
    }

    async fn send_choices(
        &self,
        conversation_id: i64,
        text: &str,
        choices: &[Choice],
    ) -> Result<(), ChannelError> {
        self.send_chunk(conversation_id, text, Some(inline_keyboard(choices)))
            .await
    }
}

// ── Helpers (public within the module for testing) ──────────────────

/// An update normalized into an event plus transport bookkeeping.
#[derive(Debug)]
struct ParsedUpdate {
    event: ChatEvent,
    /// Callback query id to acknowledge, when the event is a `Choice`.
    callback_id: Option<String>,
    username: Option<String>,
}

/// Display name from a Telegram `from` object: first + last name,
/// falling back to `@username`, then the numeric id.
fn display_name(from: &serde_json::Value, sender_id: i64) -> String {
    let first = from.get("first_name").and_then(serde_json::Value::as_str);
    let last = from.get("last_name").and_then(serde_json::Value::as_str);
    match (first, last) {
        (Some(f), Some(l)) => format!("{f} {l}"),
        (Some(f), None) => f.to_string(),
        _ => from
            .get("username")
            .and_then(serde_json::Value::as_str)
            .map(|u| format!("@{u}"))
            .unwrap_or_else(|| format!("User {sender_id}")),
    }
}

/// Normalize one `getUpdates` entry. `None` for update kinds we ignore.
fn parse_update(update: &serde_json::Value) -> Option<ParsedUpdate> {
    if let Some(callback) = update.get("callback_query") {
        let data = callback.get("data").and_then(serde_json::Value::as_str)?;
        let from = callback.get("from")?;
        let sender_id = from.get("id").and_then(serde_json::Value::as_i64)?;
        let conversation_id = callback
            .get("message")
            .and_then(|m| m.get("chat"))
            .and_then(|c| c.get("id"))
            .and_then(serde_json::Value::as_i64)?;
        return Some(ParsedUpdate {
            event: ChatEvent {
                conversation_id,
                sender_id,
                sender_name: display_name(from, sender_id),
                kind: ChatEventKind::Choice(data.to_string()),
            },
            callback_id: callback
                .get("id")
                .and_then(serde_json::Value::as_str)
                .map(String::from),
            username: from
                .get("username")
                .and_then(serde_json::Value::as_str)
                .map(String::from),
        });
    }

    let message = update.get("message")?;
    let from = message.get("from")?;
    let sender_id = from.get("id").and_then(serde_json::Value::as_i64)?;
    let conversation_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(serde_json::Value::as_i64)?;

    let kind = if let Some(text) = message.get("text").and_then(serde_json::Value::as_str) {
        ChatEventKind::Text(text.to_string())
    } else if let Some(document) = message.get("document") {
        let file_id = document.get("file_id").and_then(serde_json::Value::as_str)?;
        let file_name = document
            .get("file_name")
            .and_then(serde_json::Value::as_str)
            .map(String::from);
        ChatEventKind::Attachment(AttachmentRef::new(file_id, file_name))
    } else if let Some(photos) = message.get("photo").and_then(serde_json::Value::as_array) {
        // Telegram sends multiple sizes; the last is the largest.
        let file_id = photos
            .last()
            .and_then(|p| p.get("file_id"))
            .and_then(serde_json::Value::as_str)?;
        ChatEventKind::Attachment(AttachmentRef::new(file_id, None))
    } else {
        return None;
    };

    Some(ParsedUpdate {
        event: ChatEvent {
            conversation_id,
            sender_id,
            sender_name: display_name(from, sender_id),
            kind,
        },
        callback_id: None,
        username: from
            .get("username")
            .and_then(serde_json::Value::as_str)
            .map(String::from),
    })
}

/// Check if any identity matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Render choices as a one-button-per-row inline keyboard.
fn inline_keyboard(choices: &[Choice]) -> serde_json::Value {
    let rows: Vec<serde_json::Value> = choices
        .iter()
        .map(|c| serde_json::json!([{ "text": c.label, "callback_data": c.data }]))
        .collect();
    serde_json::json!({ "inline_keyboard": rows })
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
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

        // max_len is a byte budget; back up to a char boundary so a
        // multi-byte character is never cut in half.
        let mut boundary = max_len;
        while boundary > 0 && !remaining.is_char_boundary(boundary) {
            boundary -= 1;
        }
        if boundary == 0 {
            boundary = remaining
                .chars()
                .next()
                .map_or(remaining.len(), char::len_utf8);
        }

        let chunk = &remaining[..boundary];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(boundary);

        // Never split at position 0 (infinite loop guard).
        let split_at = if split_at == 0 { boundary } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
