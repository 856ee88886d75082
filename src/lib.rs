#![deny(missing_docs)]
//! Forwarder library.
//!
//! Relays media from authorized users to a Telegram channel, publishing each
//! distinct image once per account.

/// Telegram-facing pipeline: events, actions, routing and hashtags.
pub mod bot;
/// Expiring caption caches.
pub mod cache;
/// Configuration management.
pub mod config;
/// Content and perceptual image hashes.
pub mod fingerprint;
/// Offline record import.
pub mod import;
/// Session lifecycle for all accounts.
pub mod session;
/// Dedup store (SQLite).
pub mod store;

#[cfg(test)]
mod testing;
