//! Chat transport seam.
//!
//! The intake machine only sees `ChatEvent` in and `ChatOutbound` out;
//! everything Telegram-specific stays in the adapter.

pub mod telegram;

pub use telegram::TelegramChannel;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Opaque handle to a file uploaded on the chat side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Channel-native file id, resolvable only by the same transport.
    pub file_id: String,
    /// Original file name, when the transport reports one.
    pub file_name: Option<String>,
}

impl AttachmentRef {
    pub fn new(file_id: impl Into<String>, file_name: Option<String>) -> Self {
        Self {
            file_id: file_id.into(),
            file_name,
        }
    }

    /// Name shown in summaries and notification bodies.
    pub fn label(&self) -> &str {
        self.file_name.as_deref().unwrap_or("arquivo")
    }
}

/// One inline button offered to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub label: String,
    pub data: String,
}

impl Choice {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// Inbound chat event, normalized from the transport.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    /// Stable conversation id (Telegram chat id).
    pub conversation_id: i64,
    /// Stable sender id, key for the contact directory.
    pub sender_id: i64,
    /// Display name derived from the sender's profile.
    pub sender_name: String,
    pub kind: ChatEventKind,
}

#[derive(Debug, Clone)]
pub enum ChatEventKind {
    /// Free text typed by the user.
    Text(String),
    /// Callback data from an inline button press.
    Choice(String),
    /// File upload.
    Attachment(AttachmentRef),
}

/// Stream of normalized inbound events.
pub type EventStream = std::pin::Pin<Box<dyn futures::Stream<Item = ChatEvent> + Send>>;

/// Outbound side of the chat transport.
#[async_trait]
pub trait ChatOutbound: Send + Sync {
    /// Send plain text to a conversation.
    async fn send(&self, conversation_id: i64, text: &str) -> Result<(), ChannelError>;

    /// Send text with inline choice buttons.
    async fn send_choices(
        &self,
        conversation_id: i64,
        text: &str,
        choices: &[Choice],
    ) -> Result<(), ChannelError>;
}
