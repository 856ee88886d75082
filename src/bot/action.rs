//! Outbound actions and the messaging platform seams.

use super::event::{InboundEvent, MediaKind};
use super::hashtags::TagSpan;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Errors reported by the messaging platform
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Bot API request failed
    #[error("Telegram request error: {0}")]
    Request(#[from] teloxide::RequestError),
    /// File download failed
    #[error("Telegram download error: {0}")]
    Download(#[from] teloxide::DownloadError),
    /// The platform accepted the call but returned something unusable
    #[error("Platform rejected the request: {0}")]
    Rejected(String),
}

/// Capabilities the pipeline needs from the messaging platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Send a text message
    async fn send_text(&self, chat_id: i64, text: &str, silent: bool)
        -> Result<(), PlatformError>;
    /// Upload the placeholder image, returning the new message ID
    async fn send_placeholder(&self, chat_id: i64, name: &str) -> Result<i32, PlatformError>;
    /// Re-send an existing file as an animation or video
    async fn send_media(
        &self,
        chat_id: i64,
        kind: MediaKind,
        file_id: &str,
        caption: &str,
    ) -> Result<(), PlatformError>;
    /// Replace a message's photo, caption and hashtag entities
    async fn edit_media(
        &self,
        chat_id: i64,
        message_id: i32,
        file_id: &str,
        caption: &str,
        tags: &[TagSpan],
    ) -> Result<(), PlatformError>;
    /// Delete a message
    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), PlatformError>;
}

/// Inbound subscription for one account.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Push events into `sink` until `cancel` fires or the sink closes.
    async fn run(&self, sink: mpsc::Sender<InboundEvent>, cancel: CancellationToken);
}

/// One platform call produced by the inbound path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    /// Plain text reply
    SendText {
        /// Target chat
        chat_id: i64,
        /// Message text
        text: String,
        /// Send without notification
        silent: bool,
    },
    /// Placeholder photo used to reserve a channel message ID
    SendPlaceholder {
        /// Target channel
        chat_id: i64,
        /// Upload file name
        name: String,
    },
    /// Non-image media published without deduplication
    SendMedia {
        /// Target channel
        chat_id: i64,
        /// Animation or video
        kind: MediaKind,
        /// File to re-send
        file_id: String,
        /// Caption
        caption: String,
    },
    /// Turn a placeholder into the real post
    EditMedia {
        /// Channel holding the placeholder
        chat_id: i64,
        /// Placeholder message
        message_id: i32,
        /// Real photo
        file_id: String,
        /// Final caption
        caption: String,
        /// Hashtag entities for the caption
        tags: Vec<TagSpan>,
    },
    /// Remove a message
    DeleteMessage {
        /// Chat holding the message
        chat_id: i64,
        /// Message to delete
        message_id: i32,
    },
}

impl OutboundAction {
    /// Text reply to a chat
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        Self::SendText {
            chat_id,
            text: text.into(),
            silent: false,
        }
    }

    /// Text reply sent without notification
    pub fn silent_text(chat_id: i64, text: impl Into<String>) -> Self {
        Self::SendText {
            chat_id,
            text: text.into(),
            silent: true,
        }
    }

    /// Delete a message
    #[must_use]
    pub const fn delete(chat_id: i64, message_id: i32) -> Self {
        Self::DeleteMessage {
            chat_id,
            message_id,
        }
    }

    /// Perform the action. Returns the new message ID for actions that
    /// create one.
    ///
    /// # Errors
    ///
    /// Returns the platform error unchanged.
    pub async fn execute(&self, platform: &dyn ChatPlatform) -> Result<Option<i32>, PlatformError> {
        match self {
            Self::SendText {
                chat_id,
                text,
                silent,
            } => platform.send_text(*chat_id, text, *silent).await.map(|()| None),
            Self::SendPlaceholder { chat_id, name } => {
                platform.send_placeholder(*chat_id, name).await.map(Some)
            }
            Self::SendMedia {
                chat_id,
                kind,
                file_id,
                caption,
            } => platform
                .send_media(*chat_id, *kind, file_id, caption)
                .await
                .map(|()| None),
            Self::EditMedia {
                chat_id,
                message_id,
                file_id,
                caption,
                tags,
            } => platform
                .edit_media(*chat_id, *message_id, file_id, caption, tags)
                .await
                .map(|()| None),
            Self::DeleteMessage {
                chat_id,
                message_id,
            } => platform
                .delete_message(*chat_id, *message_id)
                .await
                .map(|()| None),
        }
    }

    /// Short name for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SendText { .. } => "send_text",
            Self::SendPlaceholder { .. } => "send_placeholder",
            Self::SendMedia { .. } => "send_media",
            Self::EditMedia { .. } => "edit_media",
            Self::DeleteMessage { .. } => "delete_message",
        }
    }
}
