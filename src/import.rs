//! Offline import of previously published channel messages
//!
//! The input is a JSON array of records produced by an external export tool:
//!
//! ```json
//! [{"id": 31, "bot": 123456789, "file": "<sha512 hex>", "image": "c3a1f0e2d4b59687"}]
//! ```
//!
//! Malformed records are skipped; the first store failure aborts the import,
//! leaving every record written before it committed.

use crate::store::{AddOutcome, DedupStore, StoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Errors that can occur during an import
#[derive(Error, Debug)]
pub enum ImportError {
    /// The file could not be read
    #[error("cannot open {path}: {source}")]
    Io {
        /// File being imported
        path: String,
        /// Underlying I/O error
        source: std::io::Error,
    },
    /// The file is not a JSON record array
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// File being imported
        path: String,
        /// Underlying JSON error
        source: serde_json::Error,
    },
    /// The store rejected a record
    #[error("cannot import record {index}: {source}")]
    Store {
        /// Position of the failing record
        index: usize,
        /// Underlying store error
        source: StoreError,
    },
    /// Shutdown was requested mid-import
    #[error("import cancelled after {imported} records")]
    Cancelled {
        /// Records written before cancellation
        imported: usize,
    },
}

/// One exported channel message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ImportRecord {
    /// Channel message ID
    #[serde(default)]
    pub id: u64,
    /// Account (bot) ID that published it
    #[serde(default)]
    pub bot: u64,
    /// Content hash
    #[serde(default)]
    pub file: String,
    /// Perceptual hash as hex
    #[serde(default)]
    pub image: String,
}

/// A record that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRecord {
    /// Perceptual hash
    pub image_hash: u64,
    /// Content hash
    pub file_hash: String,
    /// Owning account
    pub account_id: i64,
    /// Channel message ID
    pub message_id: i32,
}

impl ImportRecord {
    /// Check identifiers and parse the perceptual hash.
    ///
    /// Returns `None` for zero or empty fields, unparsable or zero hex, and
    /// IDs outside the store's integer ranges.
    #[must_use]
    pub fn validate(&self) -> Option<ValidRecord> {
        if self.id == 0 || self.bot == 0 || self.file.is_empty() || self.image.is_empty() {
            return None;
        }
        let image_hash = u64::from_str_radix(&self.image, 16).ok().filter(|h| *h != 0)?;
        Some(ValidRecord {
            image_hash,
            file_hash: self.file.clone(),
            account_id: i64::try_from(self.bot).ok()?,
            message_id: i32::try_from(self.id).ok()?,
        })
    }
}

/// Counts reported after an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// New records written
    pub imported: usize,
    /// Malformed records skipped
    pub skipped: usize,
    /// Records the store already had
    pub duplicates: usize,
}

/// Read a record file.
///
/// # Errors
///
/// Returns `ImportError::Io` or `ImportError::Parse`.
pub fn load_records(path: &Path) -> Result<Vec<ImportRecord>, ImportError> {
    let shown = path.display().to_string();
    let data = std::fs::read(path).map_err(|source| ImportError::Io {
        path: shown.clone(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|source| ImportError::Parse {
        path: shown,
        source,
    })
}

/// Write `records` to the store.
///
/// # Errors
///
/// Returns `ImportError::Store` on the first store failure and
/// `ImportError::Cancelled` if `cancel` fires first.
pub async fn import_records(
    store: &dyn DedupStore,
    records: &[ImportRecord],
    cancel: &CancellationToken,
) -> Result<ImportSummary, ImportError> {
    info!(count = records.len(), "Importing records");
    let mut summary = ImportSummary::default();

    for (index, record) in records.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(ImportError::Cancelled {
                imported: summary.imported,
            });
        }
        let Some(valid) = record.validate() else {
            warn!(index, image = %record.image, "Skipping invalid record");
            summary.skipped += 1;
            continue;
        };
        let outcome = store
            .add(
                valid.image_hash,
                &valid.file_hash,
                valid.account_id,
                valid.message_id,
            )
            .await
            .map_err(|source| ImportError::Store { index, source })?;
        match outcome {
            AddOutcome::Inserted => summary.imported += 1,
            AddOutcome::Duplicate => summary.duplicates += 1,
        }
    }

    info!(
        imported = summary.imported,
        skipped = summary.skipped,
        duplicates = summary.duplicates,
        "Import complete"
    );
    Ok(summary)
}
