//! Telegram implementation of the platform seams.

use super::action::{ChatPlatform, EventSource, PlatformError};
use super::event::{InboundEvent, MediaKind, MediaRef};
use super::hashtags::{to_entities, TagSpan};
use async_trait::async_trait;
use std::time::Duration;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::requests::Request;
use teloxide::types::{FileId, InputFile, InputMedia, InputMediaPhoto, MessageId, UpdateKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Long-polling timeout passed to `getUpdates`, in seconds.
/// Kept below the default HTTP client timeout.
const POLL_TIMEOUT_SECS: u32 = 10;

/// Pause after a failed poll before polling again.
const POLL_ERROR_PAUSE: Duration = Duration::from_secs(5);

/// Smallest valid 1x1 JPEG, uploaded as the placeholder photo.
static PLACEHOLDER_JPEG: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x00, 0x00, 0x60,
    0x00, 0x60, 0x00, 0x00, 0xFF, 0xDB, 0x00, 0x43, 0x00, 0x03, 0x02, 0x02, 0x02, 0x02, 0x02, 0x03,
    0x02, 0x02, 0x02, 0x03, 0x03, 0x03, 0x03, 0x04, 0x06, 0x04, 0x04, 0x04, 0x04, 0x04, 0x08, 0x06,
    0x06, 0x05, 0x06, 0x09, 0x08, 0x0A, 0x0A, 0x09, 0x08, 0x09, 0x09, 0x0A, 0x0C, 0x0F, 0x0C, 0x0A,
    0x0B, 0x0E, 0x0B, 0x09, 0x09, 0x0D, 0x11, 0x0D, 0x0E, 0x0F, 0x10, 0x10, 0x11, 0x10, 0x0A, 0x0C,
    0x12, 0x13, 0x12, 0x10, 0x13, 0x0F, 0x10, 0x10, 0x10, 0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x01,
    0x00, 0x01, 0x01, 0x01, 0x11, 0x00, 0xFF, 0xC4, 0x00, 0x14, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x09, 0xFF, 0xC4, 0x00, 0x14,
    0x10, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00, 0x54, 0xDF, 0xFF, 0xD9,
];

/// Telegram Bot API client for one account.
#[derive(Clone)]
pub struct TelegramPlatform {
    bot: Bot,
}

impl TelegramPlatform {
    /// Wrap a bot handle
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Log in and return the bot's own user ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is rejected.
    pub async fn account_id(&self) -> Result<i64, PlatformError> {
        let me = self.bot.get_me().await?;
        Ok(me.user.id.0.cast_signed())
    }

    /// Download a file by ID into memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file lookup or the download fails.
    pub async fn download(&self, file_id: &str) -> Result<Vec<u8>, PlatformError> {
        let file = self.bot.get_file(FileId(file_id.to_string())).await?;
        let mut buf = Vec::new();
        self.bot.download_file(&file.path, &mut buf).await?;
        Ok(buf)
    }
}

#[async_trait]
impl ChatPlatform for TelegramPlatform {
    async fn send_text(&self, chat_id: i64, text: &str, silent: bool) -> Result<(), PlatformError> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .disable_notification(silent)
            .await?;
        Ok(())
    }

    async fn send_placeholder(&self, chat_id: i64, name: &str) -> Result<i32, PlatformError> {
        let file = InputFile::memory(PLACEHOLDER_JPEG).file_name(name.to_string());
        let msg = self
            .bot
            .send_photo(ChatId(chat_id), file)
            .disable_notification(true)
            .await?;
        Ok(msg.id.0)
    }

    async fn send_media(
        &self,
        chat_id: i64,
        kind: MediaKind,
        file_id: &str,
        caption: &str,
    ) -> Result<(), PlatformError> {
        let file = InputFile::file_id(FileId(file_id.to_string()));
        match kind {
            MediaKind::Animation => {
                self.bot
                    .send_animation(ChatId(chat_id), file)
                    .caption(caption)
                    .await?;
            }
            MediaKind::Video => {
                self.bot
                    .send_video(ChatId(chat_id), file)
                    .caption(caption)
                    .await?;
            }
        }
        Ok(())
    }

    async fn edit_media(
        &self,
        chat_id: i64,
        message_id: i32,
        file_id: &str,
        caption: &str,
        tags: &[TagSpan],
    ) -> Result<(), PlatformError> {
        let photo = InputMediaPhoto::new(InputFile::file_id(FileId(file_id.to_string())))
            .caption(caption)
            .caption_entities(to_entities(tags));
        self.bot
            .edit_message_media(ChatId(chat_id), MessageId(message_id), InputMedia::Photo(photo))
            .await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), PlatformError> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventSource for TelegramPlatform {
    async fn run(&self, sink: mpsc::Sender<InboundEvent>, cancel: CancellationToken) {
        let mut offset = 0;
        loop {
            let request = self
                .bot
                .get_updates()
                .offset(offset)
                .timeout(POLL_TIMEOUT_SECS);

            let updates = tokio::select! {
                () = cancel.cancelled() => break,
                res = request.send() => res,
            };

            let updates = match updates {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "Failed to poll Telegram updates");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(POLL_ERROR_PAUSE) => continue,
                    }
                }
            };

            for update in updates {
                offset = update.id.as_offset();
                let UpdateKind::Message(msg) = update.kind else {
                    continue;
                };
                let Some(event) = event_from_message(&msg) else {
                    continue;
                };
                if sink.send(event).await.is_err() {
                    debug!("Inbound loop closed, stopping Telegram polling");
                    return;
                }
            }
        }
        debug!("Telegram polling stopped");
    }
}

/// Convert a Telegram message into an [`InboundEvent`].
///
/// Returns `None` for messages without a sender.
#[must_use]
pub fn event_from_message(msg: &Message) -> Option<InboundEvent> {
    let user = msg.from.as_ref()?;
    Some(InboundEvent {
        sender_id: user.id.0.cast_signed(),
        sender_name: user
            .username
            .clone()
            .unwrap_or_else(|| user.first_name.clone()),
        sender_is_bot: user.is_bot,
        chat_id: msg.chat.id.0,
        chat_is_private: msg.chat.is_private(),
        text: msg.text().map(ToString::to_string),
        caption: msg.caption().map(ToString::to_string),
        media: media_target(msg),
        media_group_id: msg.media_group_id().map(ToString::to_string),
    })
}

/// Pick the attachment to process: the largest photo size, else the video,
/// animation or document with its declared MIME type.
fn media_target(msg: &Message) -> Option<MediaRef> {
    if let Some(photos) = msg.photo() {
        return photos
            .iter()
            .max_by_key(|p| p.file.size)
            .map(|p| MediaRef::new(p.file.id.0.clone(), ""));
    }
    if let Some(video) = msg.video() {
        return Some(MediaRef::new(
            video.file.id.0.clone(),
            video.mime_type.as_ref().map(ToString::to_string).unwrap_or_default(),
        ));
    }
    if let Some(animation) = msg.animation() {
        return Some(MediaRef::new(
            animation.file.id.0.clone(),
            animation
                .mime_type
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
        ));
    }
    msg.document().map(|doc| {
        MediaRef::new(
            doc.file.id.0.clone(),
            doc.mime_type.as_ref().map(ToString::to_string).unwrap_or_default(),
        )
    })
}
