//! Configuration and settings management
//!
//! Loads settings from an optional config file and `FORWARDER__*` environment
//! variables, and defines the runtime defaults.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// How long a pending caption or media-group caption stays visible.
/// Default: 3 minutes.
pub const CAPTION_TTL_SECS: u64 = 180;
/// Interval between cache sweeps.
/// Default: 5 minutes.
pub const SWEEP_INTERVAL_SECS: u64 = 300;
/// Capacity of each account's outbound action queue.
pub const QUEUE_CAPACITY: usize = 128;
/// Upper bound for a single store, download or platform call.
pub const OPERATION_TIMEOUT_SECS: u64 = 60;
/// Default database location.
pub const DATABASE_URL: &str = "sqlite://forwarder.db?mode=rwc";

/// Default configuration, printed by `--dump-defaults`.
pub const DEFAULT_CONFIG: &str = r#"# Forwarder configuration
caption_ttl_secs = 180
sweep_interval_secs = 300
queue_capacity = 128
operation_timeout_secs = 60

[database]
url = "sqlite://forwarder.db?mode=rwc"
max_connections = 4
acquire_timeout_secs = 180

[[accounts]]
telegram_token = ""
channel_id = 0
authorized_users = [0, 1]
"#;

/// Authorized user list, accepted either as a list or as a delimited string.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum UserList {
    /// `authorized_users = [1, 2]`
    List(Vec<i64>),
    /// `authorized_users = "1, 2; 3"`
    Text(String),
}

impl Default for UserList {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

/// One connected bot account.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AccountSettings {
    /// Telegram Bot API token
    pub telegram_token: String,
    /// Channel the account publishes into
    pub channel_id: i64,
    /// Users allowed to talk to the account
    #[serde(default)]
    pub authorized_users: UserList,
}

impl AccountSettings {
    /// Returns the set of Telegram IDs that are allowed to use the account
    #[must_use]
    pub fn authorized_users(&self) -> HashSet<i64> {
        match &self.authorized_users {
            UserList::List(ids) => ids.iter().copied().collect(),
            UserList::Text(s) => s
                .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                .filter(|token| !token.is_empty())
                .filter_map(|id| id.parse::<i64>().ok())
                .collect(),
        }
    }
}

/// Dedup store connection settings.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseSettings {
    /// SQLite connection URL
    pub url: String,
    /// Pool size
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection
    pub acquire_timeout_secs: u64,
}

/// Application settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Pending caption lifetime in seconds
    pub caption_ttl_secs: u64,
    /// Seconds between cache sweeps
    pub sweep_interval_secs: u64,
    /// Outbound queue capacity per account
    pub queue_capacity: usize,
    /// Per-call timeout in seconds
    pub operation_timeout_secs: u64,
    /// Dedup store settings
    pub database: DatabaseSettings,
    /// Connected accounts
    #[serde(default)]
    pub accounts: Vec<AccountSettings>,
}

impl Settings {
    /// Load settings from defaults, the given file (or `config/forwarder` when
    /// present) and the environment.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use forwarder::config::Settings;
    ///
    /// let settings = Settings::load(None).expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a source cannot be read or deserialized.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name("config/forwarder").required(false),
        };

        Config::builder()
            .set_default("caption_ttl_secs", CAPTION_TTL_SECS)?
            .set_default("sweep_interval_secs", SWEEP_INTERVAL_SECS)?
            .set_default("queue_capacity", QUEUE_CAPACITY as u64)?
            .set_default("operation_timeout_secs", OPERATION_TIMEOUT_SECS)?
            .set_default("database.url", DATABASE_URL)?
            .set_default("database.max_connections", 4)?
            .set_default("database.acquire_timeout_secs", 180)?
            .add_source(file)
            // Eg.. `FORWARDER__DATABASE__URL=sqlite::memory: ./forwarder`
            .add_source(
                Environment::with_prefix("FORWARDER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Check the values a running instance cannot do without.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError::Message` naming the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.is_empty() {
            return Err(ConfigError::Message("missing database url".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Message(
                "sweep_interval_secs must be positive".into(),
            ));
        }
        if self.operation_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "operation_timeout_secs must be positive".into(),
            ));
        }
        if self.accounts.is_empty() {
            return Err(ConfigError::Message("no telegram accounts".into()));
        }
        for (i, account) in self.accounts.iter().enumerate() {
            if account.channel_id == 0 {
                return Err(ConfigError::Message(format!(
                    "account {i}: missing channel_id"
                )));
            }
            if account.telegram_token.is_empty() {
                return Err(ConfigError::Message(format!(
                    "account {i}: missing telegram_token"
                )));
            }
        }
        Ok(())
    }

    /// Caption lifetime as a `Duration`
    #[must_use]
    pub const fn caption_ttl(&self) -> Duration {
        Duration::from_secs(self.caption_ttl_secs)
    }

    /// Sweep interval as a `Duration`
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Per-call timeout as a `Duration`
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}
