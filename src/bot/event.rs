//! Transport-independent inbound events.

/// A media attachment the pipeline can fingerprint or re-send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    /// Platform file identifier
    pub file_id: String,
    /// Declared MIME type, empty when the platform does not report one (photos)
    pub mime: String,
}

impl MediaRef {
    /// Create a media reference
    pub fn new(file_id: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            mime: mime.into(),
        }
    }

    /// Kind to publish a non-image attachment as, if any.
    #[must_use]
    pub fn fallback_kind(&self) -> Option<MediaKind> {
        if self.mime.ends_with("/gif") {
            Some(MediaKind::Animation)
        } else if self.mime.starts_with("video/") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

/// How a non-image attachment is re-published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// GIF / animation
    Animation,
    /// Video
    Video,
}

/// One message received by an account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundEvent {
    /// Sender user ID
    pub sender_id: i64,
    /// Sender display name, for logs
    pub sender_name: String,
    /// Whether the sender is a bot
    pub sender_is_bot: bool,
    /// Chat the message arrived in
    pub chat_id: i64,
    /// Whether that chat is a private conversation
    pub chat_is_private: bool,
    /// Message text
    pub text: Option<String>,
    /// Media caption
    pub caption: Option<String>,
    /// Attached media
    pub media: Option<MediaRef>,
    /// Album identifier shared by media sent together
    pub media_group_id: Option<String>,
}

impl InboundEvent {
    /// Text of the message, or an empty string
    #[must_use]
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Caption of the message, or an empty string
    #[must_use]
    pub fn caption(&self) -> &str {
        self.caption.as_deref().unwrap_or("")
    }
}
