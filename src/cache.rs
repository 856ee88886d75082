//! Expiring key → text store for pending captions
//!
//! One [`TtlCache`] is keyed by user ID (the caption a user sent ahead of their
//! media), another by media-group ID (the caption shared by every item of an
//! album). Entries are swept by the session's background task.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Source of the current time for expiry calculations.
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Clock backed by the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    text: String,
    expires: Instant,
}

/// Lock-guarded map of text values with a fixed time-to-live.
///
/// Every operation holds the lock only for the map access itself.
pub struct TtlCache<K> {
    entries: Mutex<HashMap<K, Entry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K: Eq + Hash + Clone> TtlCache<K> {
    /// Create an empty cache whose entries live for `ttl`
    #[must_use]
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, Entry>> {
        // A panic while holding the lock cannot leave the map half-written.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `text` under `key`, replacing any previous value and restarting
    /// its lifetime.
    pub fn set(&self, key: K, text: impl Into<String>) {
        let expires = self.clock.now() + self.ttl;
        self.lock().insert(
            key,
            Entry {
                text: text.into(),
                expires,
            },
        );
    }

    /// Look up `key`. With `consume` the entry is removed whether or not it
    /// was found.
    pub fn get(&self, key: &K, consume: bool) -> Option<String> {
        let mut entries = self.lock();
        if consume {
            entries.remove(key).map(|e| e.text)
        } else {
            entries.get(key).map(|e| e.text.clone())
        }
    }

    /// Remove `key` unconditionally.
    pub fn clear(&self, key: &K) {
        self.lock().remove(key);
    }

    /// Remove every entry whose expiry is at or before `now`.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires > now);
        before - entries.len()
    }

    /// Number of live (not yet pruned) entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
