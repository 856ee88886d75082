//! In-memory fakes for pipeline and session tests.

use crate::bot::action::{ChatPlatform, EventSource, PlatformError};
use crate::bot::event::{InboundEvent, MediaKind, MediaRef};
use crate::bot::hashtags::TagSpan;
use crate::fingerprint::{Fingerprint, FingerprintError, FingerprintResolver};
use crate::store::{AddOutcome, DedupStore, StoreError};
use async_trait::async_trait;
use sha2::{Digest, Sha512};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One call observed by [`RecordingPlatform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    Text {
        chat_id: i64,
        text: String,
        silent: bool,
    },
    Placeholder {
        chat_id: i64,
        name: String,
    },
    Media {
        chat_id: i64,
        kind: MediaKind,
        file_id: String,
    },
    Edit {
        chat_id: i64,
        message_id: i32,
        file_id: String,
        caption: String,
        tags: Vec<TagSpan>,
    },
    Delete {
        chat_id: i64,
        message_id: i32,
    },
}

/// Platform that records every call and hands out sequential message IDs.
pub struct RecordingPlatform {
    calls: Mutex<Vec<PlatformCall>>,
    next_id: AtomicI32,
    fail_edits: AtomicBool,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicI32::new(1),
            fail_edits: AtomicBool::new(false),
        }
    }

    pub fn fail_edits(&self) {
        self.fail_edits.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, call: PlatformCall) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn send_text(&self, chat_id: i64, text: &str, silent: bool) -> Result<(), PlatformError> {
        self.record(PlatformCall::Text {
            chat_id,
            text: text.to_string(),
            silent,
        });
        Ok(())
    }

    async fn send_placeholder(&self, chat_id: i64, name: &str) -> Result<i32, PlatformError> {
        self.record(PlatformCall::Placeholder {
            chat_id,
            name: name.to_string(),
        });
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn send_media(
        &self,
        chat_id: i64,
        kind: MediaKind,
        file_id: &str,
        _caption: &str,
    ) -> Result<(), PlatformError> {
        self.record(PlatformCall::Media {
            chat_id,
            kind,
            file_id: file_id.to_string(),
        });
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
        self.record(PlatformCall::Edit {
            chat_id,
            message_id,
            file_id: file_id.to_string(),
            caption: caption.to_string(),
            tags: tags.to_vec(),
        });
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(PlatformError::Rejected("message to edit not found".into()));
        }
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), PlatformError> {
        self.record(PlatformCall::Delete {
            chat_id,
            message_id,
        });
        Ok(())
    }
}

/// Resolver that derives a stable fingerprint from the file ID alone.
pub struct StaticResolver;

impl StaticResolver {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FingerprintResolver for StaticResolver {
    async fn resolve(&self, media: &MediaRef) -> Result<Fingerprint, FingerprintError> {
        let perceptual_hash = media
            .file_id
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
                (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
            });
        Ok(Fingerprint {
            content_hash: format!("{:x}", Sha512::digest(media.file_id.as_bytes())),
            perceptual_hash,
            file_id: media.file_id.clone(),
        })
    }
}

#[derive(Debug, Clone)]
struct Record {
    image_hash: u64,
    file_hash: String,
    account_id: i64,
    message_id: i32,
}

/// Dedup store kept in a vector.
pub struct MemoryStore {
    records: Mutex<Vec<Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("records lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DedupStore for MemoryStore {
    async fn add(
        &self,
        image_hash: u64,
        file_hash: &str,
        account_id: i64,
        message_id: i32,
    ) -> Result<AddOutcome, StoreError> {
        let mut records = self.records.lock().expect("records lock");
        if records
            .iter()
            .any(|r| r.image_hash == image_hash && r.account_id == account_id)
        {
            return Ok(AddOutcome::Duplicate);
        }
        records.push(Record {
            image_hash,
            file_hash: file_hash.to_string(),
            account_id,
            message_id,
        });
        Ok(AddOutcome::Inserted)
    }

    async fn delete(&self, file_hash: &str, account_id: i64) -> Result<Option<i32>, StoreError> {
        let mut records = self.records.lock().expect("records lock");
        let pos = records
            .iter()
            .position(|r| r.file_hash == file_hash && r.account_id == account_id);
        Ok(pos.map(|i| records.remove(i).message_id))
    }

    async fn remove_message(&self, account_id: i64, message_id: i32) -> Result<bool, StoreError> {
        let mut records = self.records.lock().expect("records lock");
        let before = records.len();
        records.retain(|r| !(r.account_id == account_id && r.message_id == message_id));
        Ok(records.len() < before)
    }

    async fn close(&self) {}
}

/// Event source that replays a fixed list of events, then idles until
/// cancelled.
pub struct ScriptedSource {
    events: Mutex<Vec<InboundEvent>>,
}

impl ScriptedSource {
    pub fn new(events: Vec<InboundEvent>) -> Self {
        Self {
            events: Mutex::new(events),
        }
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn run(&self, sink: mpsc::Sender<InboundEvent>, cancel: CancellationToken) {
        let events = std::mem::take(&mut *self.events.lock().expect("events lock"));
        for event in events {
            if sink.send(event).await.is_err() {
                return;
            }
        }
        cancel.cancelled().await;
    }
}
