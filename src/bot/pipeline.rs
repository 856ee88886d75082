//! Per-account message pipeline
//!
//! Each connected account runs two tasks: the inbound loop routes events,
//! fingerprints media and talks to the dedup store; the outbound loop
//! delivers queued [`OutboundAction`]s in FIFO order. They share a single
//! bounded channel and a cancellation token.
//!
//! Publishing a new image goes through a placeholder: a tiny photo is posted
//! first to obtain a channel message ID, the store records that ID, and only
//! then is the placeholder edited into the real picture. A duplicate or a
//! failure deletes the placeholder again.

use super::action::{ChatPlatform, OutboundAction, PlatformError};
use super::event::{InboundEvent, MediaRef};
use super::hashtags::split_tags;
use crate::cache::TtlCache;
use crate::fingerprint::{Fingerprint, FingerprintError, FingerprintResolver};
use crate::store::{AddOutcome, DedupStore, StoreError};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reply to users outside the allow-list
pub const MSG_UNAUTHORIZED: &str = "Sorry, I don't know you.";
/// Reply to a bare delete command
pub const MSG_DELETE_HINT: &str = "Use \"/delete\" with an image to delete it.";
/// Reply to the clear-caption command
pub const MSG_CAPTION_CLEARED: &str = "Removed any current cached caption!";
/// Reply after publishing a new image
pub const MSG_ADDED: &str = "I've added that image!";
/// Reply when the image is already published
pub const MSG_DUPLICATE: &str = "I've seen that image before.";
/// Reply when the media was published without deduplication
pub const MSG_NOT_AN_IMAGE: &str =
    "I'm sorry, I couldn't get an image hash for that, but I tried to upload it as a video instead!";
/// Reply when an add or delete fails
pub const MSG_FAILED: &str = "I'm sorry, but I cannot process that image.";
/// Reply after removing a published image
pub const MSG_REMOVED: &str = "I've removed that image!";
/// Reply when a delete finds no record
pub const MSG_NOTHING_TO_DELETE: &str =
    "I couldn't find that image, so there was nothing to delete.";

/// Errors that end a single add or delete flow
#[derive(Error, Debug)]
pub enum FlowError {
    /// Fetching or hashing the media failed
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
    /// The dedup store failed
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A platform call failed
    #[error(transparent)]
    Platform(#[from] PlatformError),
    /// The call did not finish within the operation timeout
    #[error("operation timed out")]
    TimedOut,
    /// The session is shutting down
    #[error("operation cancelled")]
    Cancelled,
}

/// Terminal state of an add flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddStatus {
    /// Published as a new image
    Success,
    /// Already published; the placeholder was removed
    Duplicate,
    /// Published as animation or video without deduplication
    NotAnImage,
    /// Nothing was published
    Failed,
}

impl AddStatus {
    /// Reply sent to the user for this outcome
    #[must_use]
    pub fn reply(self, chat_id: i64) -> OutboundAction {
        match self {
            Self::Success => OutboundAction::silent_text(chat_id, MSG_ADDED),
            Self::Duplicate => OutboundAction::silent_text(chat_id, MSG_DUPLICATE),
            Self::NotAnImage => OutboundAction::text(chat_id, MSG_NOT_AN_IMAGE),
            Self::Failed => OutboundAction::text(chat_id, MSG_FAILED),
        }
    }
}

/// Terminal state of a delete flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    /// The record was removed and the channel message queued for deletion
    Removed,
    /// No record matched
    NotFound,
    /// The media could not be processed
    Failed,
}

impl DeleteStatus {
    /// Reply sent to the user for this outcome
    #[must_use]
    pub fn reply(self, chat_id: i64) -> OutboundAction {
        match self {
            Self::Removed => OutboundAction::text(chat_id, MSG_REMOVED),
            Self::NotFound => OutboundAction::text(chat_id, MSG_NOTHING_TO_DELETE),
            Self::Failed => OutboundAction::text(chat_id, MSG_FAILED),
        }
    }
}

/// A connected account. Immutable once the session starts.
#[derive(Debug, Clone)]
pub struct Account {
    /// Bot user ID, also the account key in the dedup store
    pub id: i64,
    /// Channel that receives published media
    pub channel_id: i64,
    /// Users allowed to publish through this account
    pub authorized_users: HashSet<i64>,
}

impl Account {
    /// Whether `user_id` may use this account
    #[must_use]
    pub fn is_authorized(&self, user_id: i64) -> bool {
        self.authorized_users.contains(&user_id)
    }
}

/// The two caption caches shared by every pipeline.
#[derive(Clone)]
pub struct CaptionCaches {
    /// Pending caption per user
    pub users: Arc<TtlCache<i64>>,
    /// Resolved caption per media group
    pub groups: Arc<TtlCache<String>>,
}

/// True for `/del…` commands long enough to carry an argument.
fn is_delete_command(text: &str) -> bool {
    text.len() > 3 && text.starts_with("/del")
}

/// Inbound routing and the add/delete protocol for one account.
pub struct AccountPipeline {
    account: Account,
    platform: Arc<dyn ChatPlatform>,
    resolver: Arc<dyn FingerprintResolver>,
    store: Arc<dyn DedupStore>,
    captions: CaptionCaches,
    op_timeout: Duration,
}

impl AccountPipeline {
    /// Build a pipeline for `account`.
    #[must_use]
    pub fn new(
        account: Account,
        platform: Arc<dyn ChatPlatform>,
        resolver: Arc<dyn FingerprintResolver>,
        store: Arc<dyn DedupStore>,
        captions: CaptionCaches,
        op_timeout: Duration,
    ) -> Self {
        Self {
            account,
            platform,
            resolver,
            store,
            captions,
            op_timeout,
        }
    }

    /// The account this pipeline serves
    #[must_use]
    pub const fn account(&self) -> &Account {
        &self.account
    }

    /// Process inbound events one at a time until cancelled or the event
    /// source goes away. Dropping `actions` on return lets the outbound loop
    /// finish draining.
    pub async fn run_inbound(
        &self,
        mut events: mpsc::Receiver<InboundEvent>,
        actions: mpsc::Sender<OutboundAction>,
        cancel: CancellationToken,
    ) {
        let account = self.account.id;
        debug!(account, "Inbound loop started");
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                ev = events.recv() => match ev {
                    Some(ev) => ev,
                    None => break,
                },
            };
            self.handle(event, &actions, &cancel).await;
        }
        debug!(account, "Inbound loop stopped");
    }

    /// Deliver queued actions in order until cancelled or every sender is
    /// gone, then drain what is left with each call bounded by the
    /// operation timeout.
    pub async fn run_outbound(
        &self,
        mut actions: mpsc::Receiver<OutboundAction>,
        cancel: CancellationToken,
    ) {
        let account = self.account.id;
        debug!(account, "Outbound loop started");
        loop {
            let action = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                action = actions.recv() => match action {
                    Some(action) => action,
                    None => {
                        debug!(account, "Outbound loop stopped");
                        return;
                    }
                },
            };
            self.deliver(&action).await;
        }

        actions.close();
        let mut drained = 0usize;
        while let Ok(action) = actions.try_recv() {
            self.deliver(&action).await;
            drained += 1;
        }
        debug!(account, drained, "Outbound loop stopped");
    }

    async fn deliver(&self, action: &OutboundAction) {
        let account = self.account.id;
        match tokio::time::timeout(self.op_timeout, action.execute(self.platform.as_ref())).await {
            Ok(Ok(_)) => debug!(account, action = action.name(), "Delivered"),
            Ok(Err(e)) => warn!(account, action = action.name(), error = %e, "Delivery failed"),
            Err(_) => warn!(account, action = action.name(), "Delivery timed out"),
        }
    }

    /// Route one inbound event.
    pub async fn handle(
        &self,
        event: InboundEvent,
        actions: &mpsc::Sender<OutboundAction>,
        cancel: &CancellationToken,
    ) {
        let account = self.account.id;
        if !event.chat_is_private || event.sender_is_bot {
            return;
        }
        if !self.account.is_authorized(event.sender_id) {
            debug!(
                account,
                user = event.sender_id,
                name = %event.sender_name,
                "Unauthorized user"
            );
            self.enqueue(actions, cancel, OutboundAction::text(event.chat_id, MSG_UNAUTHORIZED))
                .await;
            return;
        }

        let Some(media) = event.media.clone() else {
            self.handle_text(&event, actions, cancel).await;
            return;
        };

        let reply = if is_delete_command(event.text()) || is_delete_command(event.caption()) {
            debug!(account, user = event.sender_id, "Delete command");
            self.captions.users.clear(&event.sender_id);
            self.delete_flow(&media, actions, cancel)
                .await
                .reply(event.chat_id)
        } else {
            let caption = self.resolve_caption(&event);
            self.add_flow(&media, &caption, actions, cancel)
                .await
                .reply(event.chat_id)
        };
        self.enqueue(actions, cancel, reply).await;
    }

    async fn handle_text(
        &self,
        event: &InboundEvent,
        actions: &mpsc::Sender<OutboundAction>,
        cancel: &CancellationToken,
    ) {
        let text = event.text();
        if text.is_empty() {
            return;
        }
        if text.starts_with("/del") {
            self.enqueue(actions, cancel, OutboundAction::text(event.chat_id, MSG_DELETE_HINT))
                .await;
        } else if text.starts_with("/clear") {
            self.captions.users.clear(&event.sender_id);
            self.enqueue(
                actions,
                cancel,
                OutboundAction::text(event.chat_id, MSG_CAPTION_CLEARED),
            )
            .await;
        } else {
            debug!(account = self.account.id, user = event.sender_id, "Caption cached");
            self.captions.users.set(event.sender_id, text);
        }
    }

    /// Pick the caption for a media event.
    ///
    /// Items of one media group share the caption resolved for the first
    /// item: the group cache, else the sender's pending caption, else the
    /// item's own caption. The result is written back to the group cache.
    #[must_use]
    pub fn resolve_caption(&self, event: &InboundEvent) -> String {
        let Some(group) = event.media_group_id.as_ref() else {
            return self
                .captions
                .users
                .get(&event.sender_id, true)
                .unwrap_or_else(|| event.caption().to_string());
        };
        if let Some(text) = self.captions.groups.get(group, false) {
            return text;
        }
        let text = self
            .captions
            .users
            .get(&event.sender_id, true)
            .unwrap_or_else(|| event.caption().to_string());
        self.captions.groups.set(group.clone(), text.clone());
        text
    }

    /// Publish `media` to the channel unless the account already has it.
    pub async fn add_flow(
        &self,
        media: &MediaRef,
        caption: &str,
        actions: &mpsc::Sender<OutboundAction>,
        cancel: &CancellationToken,
    ) -> AddStatus {
        let account = self.account.id;
        let channel = self.account.channel_id;

        let fp = match self.bounded(cancel, self.resolver.resolve(media)).await {
            Ok(fp) => fp,
            Err(FlowError::Fingerprint(FingerprintError::NotAnImage)) => {
                return self.publish_unhashed(media, caption, actions, cancel).await;
            }
            Err(e) => {
                error!(account, file = %media.file_id, mime = %media.mime, error = %e, "Cannot fingerprint media");
                return AddStatus::Failed;
            }
        };
        debug!(account, fingerprint = %fp, "Fingerprint computed");

        let Some(message_id) = self.send_placeholder(&fp, cancel).await else {
            return AddStatus::Failed;
        };

        let outcome = self
            .bounded(
                cancel,
                self.store
                    .add(fp.perceptual_hash, &fp.content_hash, account, message_id),
            )
            .await;
        match outcome {
            Ok(AddOutcome::Inserted) => {}
            Ok(AddOutcome::Duplicate) => {
                debug!(account, fingerprint = %fp, "Already published");
                self.discard_placeholder(actions, cancel, message_id).await;
                return AddStatus::Duplicate;
            }
            Err(e) => {
                error!(account, fingerprint = %fp, error = %e, "Dedup store add failed");
                // A timed out or cancelled insert may still have committed.
                self.forget_placeholder(message_id).await;
                self.discard_placeholder(actions, cancel, message_id).await;
                return AddStatus::Failed;
            }
        }

        let edit = OutboundAction::EditMedia {
            chat_id: channel,
            message_id,
            file_id: fp.file_id.clone(),
            caption: caption.to_string(),
            tags: split_tags(caption),
        };
        if let Err(e) = self.bounded(cancel, edit.execute(self.platform.as_ref())).await {
            error!(account, message_id, error = %e, "Cannot finalize placeholder");
            self.forget_placeholder(message_id).await;
            self.discard_placeholder(actions, cancel, message_id).await;
            return AddStatus::Failed;
        }

        info!(account, message_id, fingerprint = %fp, "Image published");
        AddStatus::Success
    }

    async fn send_placeholder(&self, fp: &Fingerprint, cancel: &CancellationToken) -> Option<i32> {
        let account = self.account.id;
        let placeholder = OutboundAction::SendPlaceholder {
            chat_id: self.account.channel_id,
            name: format!("{}.jpg", fp.content_hash),
        };
        match self
            .bounded(cancel, placeholder.execute(self.platform.as_ref()))
            .await
        {
            Ok(Some(message_id)) => {
                debug!(account, message_id, "Placeholder sent");
                Some(message_id)
            }
            Ok(None) => {
                error!(account, "Placeholder send returned no message");
                None
            }
            Err(e) => {
                error!(account, error = %e, "Cannot send placeholder");
                None
            }
        }
    }

    async fn publish_unhashed(
        &self,
        media: &MediaRef,
        caption: &str,
        actions: &mpsc::Sender<OutboundAction>,
        cancel: &CancellationToken,
    ) -> AddStatus {
        let Some(kind) = media.fallback_kind() else {
            error!(
                account = self.account.id,
                file = %media.file_id,
                mime = %media.mime,
                "Unsupported media, not forwarding"
            );
            return AddStatus::Failed;
        };
        let action = OutboundAction::SendMedia {
            chat_id: self.account.channel_id,
            kind,
            file_id: media.file_id.clone(),
            caption: caption.to_string(),
        };
        self.enqueue(actions, cancel, action).await;
        AddStatus::NotAnImage
    }

    /// Remove the account's record for `media` and queue deletion of the
    /// channel message it points to.
    pub async fn delete_flow(
        &self,
        media: &MediaRef,
        actions: &mpsc::Sender<OutboundAction>,
        cancel: &CancellationToken,
    ) -> DeleteStatus {
        let account = self.account.id;
        let fp = match self.bounded(cancel, self.resolver.resolve(media)).await {
            Ok(fp) => fp,
            Err(e) => {
                error!(account, file = %media.file_id, error = %e, "Cannot fingerprint media for delete");
                return DeleteStatus::Failed;
            }
        };

        match self
            .bounded(cancel, self.store.delete(&fp.content_hash, account))
            .await
        {
            Ok(Some(message_id)) => {
                info!(account, message_id, fingerprint = %fp, "Image removed");
                self.enqueue(
                    actions,
                    cancel,
                    OutboundAction::delete(self.account.channel_id, message_id),
                )
                .await;
                DeleteStatus::Removed
            }
            Ok(None) => {
                debug!(account, fingerprint = %fp, "Nothing to delete");
                DeleteStatus::NotFound
            }
            Err(e) => {
                error!(account, fingerprint = %fp, error = %e, "Dedup store delete failed");
                DeleteStatus::Failed
            }
        }
    }

    /// Run `fut` bounded by the operation timeout and the cancellation token.
    async fn bounded<T, E>(
        &self,
        cancel: &CancellationToken,
        fut: impl Future<Output = Result<T, E>> + Send,
    ) -> Result<T, FlowError>
    where
        FlowError: From<E>,
    {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(FlowError::Cancelled),
            res = tokio::time::timeout(self.op_timeout, fut) => match res {
                Ok(res) => res.map_err(FlowError::from),
                Err(_) => Err(FlowError::TimedOut),
            },
        }
    }

    /// Delete a placeholder that will not be finalized.
    ///
    /// Queued behind earlier actions while the session runs. Once cancelled,
    /// or if the outbound loop is gone, the delete is sent inline bounded by
    /// the operation timeout only, so the placeholder is never left behind.
    async fn discard_placeholder(
        &self,
        actions: &mpsc::Sender<OutboundAction>,
        cancel: &CancellationToken,
        message_id: i32,
    ) {
        let action = OutboundAction::delete(self.account.channel_id, message_id);
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            permit = actions.reserve() => permit.ok(),
        };
        match permit {
            Some(permit) => permit.send(action),
            None => self.deliver(&action).await,
        }
    }

    /// Drop the store record pointing at `message_id`, ignoring cancellation.
    async fn forget_placeholder(&self, message_id: i32) {
        let account = self.account.id;
        match tokio::time::timeout(
            self.op_timeout,
            self.store.remove_message(account, message_id),
        )
        .await
        {
            Ok(Ok(removed)) => debug!(account, message_id, removed, "Dedup record rolled back"),
            Ok(Err(e)) => warn!(account, message_id, error = %e, "Cannot roll back dedup record"),
            Err(_) => warn!(account, message_id, "Dedup record rollback timed out"),
        }
    }

    async fn enqueue(
        &self,
        actions: &mpsc::Sender<OutboundAction>,
        cancel: &CancellationToken,
        action: OutboundAction,
    ) {
        let name = action.name();
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            res = actions.send(action) => res.is_ok(),
        };
        if !sent {
            warn!(account = self.account.id, action = name, "Outbound queue closed, dropping action");
        }
    }
}
