/// Outbound actions and platform traits
pub mod action;
/// Inbound event model
pub mod event;
/// Hashtag entity spans for captions
pub mod hashtags;
/// Per-account routing and the add/delete protocol
pub mod pipeline;
/// Telegram Bot API adapter
pub mod telegram;
