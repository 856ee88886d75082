use anyhow::{bail, Context};
use clap::Parser;
use dotenvy::dotenv;
use forwarder::bot::pipeline::Account;
use forwarder::bot::telegram::TelegramPlatform;
use forwarder::cache::SystemClock;
use forwarder::config::{Settings, DEFAULT_CONFIG};
use forwarder::fingerprint::TelegramResolver;
use forwarder::import::load_records;
use forwarder::session::{SessionManager, SessionOptions};
use forwarder::store::{DedupStore, SqliteDedupStore};
use regex::Regex;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::Bot;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Forwards media from authorized users to Telegram channels, publishing
/// each image once.
#[derive(Parser, Debug)]
#[command(name = "forwarder", version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short = 'f', long = "config")]
    config: Option<PathBuf>,
    /// Print the default configuration and exit
    #[arg(short = 'd', long = "dump-defaults")]
    dump_defaults: bool,
    /// Import exported channel records from a JSON file and exit
    #[arg(short = 'I', long = "import")]
    import: Option<PathBuf>,
    /// Remove every dedup record before starting
    #[arg(long = "clear-all")]
    clear_all: bool,
}

/// Regex patterns for redacting bot tokens
struct RedactionPatterns {
    token_url: Regex,
    token_bare: Regex,
    token_prefixed: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token_url: Regex::new(r"(https?://[^/]+/(?:file/)?bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token_bare: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token_prefixed: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let output = self
            .token_url
            .replace_all(input, "$1[TELEGRAM_TOKEN]$3")
            .to_string();
        let output = self
            .token_bare
            .replace_all(&output, "[TELEGRAM_TOKEN]")
            .to_string();
        self.token_prefixed
            .replace_all(&output, "$1[TELEGRAM_TOKEN]")
            .to_string()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the original length; the redacted text may be shorter.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter::new(io::stderr, patterns);
    let debug_mode = std::env::var("DEBUG_MODE").is_ok_and(|v| v == "1" || v == "true");
    let default_filter = if debug_mode {
        "forwarder=debug"
    } else {
        "forwarder=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.dump_defaults {
        print!("{DEFAULT_CONFIG}");
        return Ok(());
    }

    dotenv().ok();

    let patterns =
        Arc::new(RedactionPatterns::new().context("Failed to compile redaction patterns")?);
    init_logging(patterns);

    let settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    info!("Configuration loaded successfully.");

    let store = SqliteDedupStore::connect(&settings.database)
        .await
        .context("Failed to open dedup store")?;
    if cli.clear_all {
        let removed = store.reset().await.context("Failed to clear dedup store")?;
        warn!(removed, "Cleared all dedup records");
    }
    let store = Arc::new(store);
    let options = SessionOptions::from_settings(&settings);

    if let Some(path) = cli.import {
        let records = load_records(&path)?;
        let session = SessionManager::new(store.clone(), Arc::new(SystemClock), options);
        let token = session.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
        let result = session.import(&records).await;
        store.close().await;
        let summary = result?;
        println!(
            "Import complete: {} imported, {} duplicates, {} skipped.",
            summary.imported, summary.duplicates, summary.skipped
        );
        return Ok(());
    }

    settings.validate().context("Invalid configuration")?;

    let mut session = SessionManager::new(store, Arc::new(SystemClock), options);
    for (i, account) in settings.accounts.iter().enumerate() {
        let platform = TelegramPlatform::new(Bot::new(account.telegram_token.clone()));
        let id = platform
            .account_id()
            .await
            .with_context(|| format!("Failed to log in account {i}"))?;
        info!(account = id, channel = account.channel_id, "Logged in");

        let platform = Arc::new(platform);
        session.add_account(
            Account {
                id,
                channel_id: account.channel_id,
                authorized_users: account.authorized_users(),
            },
            platform.clone(),
            Arc::new(TelegramResolver::new(platform.as_ref().clone())),
            platform,
        );
    }
    if session.account_count() == 0 {
        bail!("no accounts to run");
    }

    info!("Forwarder is running...");
    session.run().await;
    Ok(())
}
