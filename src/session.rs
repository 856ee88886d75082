//! Session lifecycle: every account's loops plus the shared cache sweeper.
//!
//! Each account gets a child of the session's [`CancellationToken`]; one
//! `cancel()` on the parent stops every event source, inbound loop,
//! outbound loop and the sweeper. [`SessionManager::stop`] waits for all of
//! them before closing the dedup store.

use crate::bot::action::{ChatPlatform, EventSource, OutboundAction};
use crate::bot::event::InboundEvent;
use crate::bot::pipeline::{Account, AccountPipeline, CaptionCaches};
use crate::cache::{Clock, TtlCache};
use crate::config::Settings;
use crate::fingerprint::FingerprintResolver;
use crate::import::{import_records, ImportError, ImportRecord, ImportSummary};
use crate::store::DedupStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tunables shared by every account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Lifetime of pending and group captions
    pub caption_ttl: Duration,
    /// Time between cache sweeps
    pub sweep_interval: Duration,
    /// Capacity of each inbound and outbound queue
    pub queue_capacity: usize,
    /// Bound on each platform, resolver and store call
    pub op_timeout: Duration,
}

impl SessionOptions {
    /// Take the session tunables from loaded settings
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            caption_ttl: settings.caption_ttl(),
            sweep_interval: settings.sweep_interval(),
            queue_capacity: settings.queue_capacity.max(1),
            op_timeout: settings.operation_timeout(),
        }
    }
}

struct AccountRuntime {
    pipeline: Arc<AccountPipeline>,
    source: Arc<dyn EventSource>,
}

/// Owns every account pipeline and the background sweeper.
pub struct SessionManager {
    store: Arc<dyn DedupStore>,
    captions: CaptionCaches,
    clock: Arc<dyn Clock>,
    options: SessionOptions,
    accounts: Vec<AccountRuntime>,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl SessionManager {
    /// Create a session with empty caption caches.
    #[must_use]
    pub fn new(store: Arc<dyn DedupStore>, clock: Arc<dyn Clock>, options: SessionOptions) -> Self {
        let captions = CaptionCaches {
            users: Arc::new(TtlCache::new(options.caption_ttl, clock.clone())),
            groups: Arc::new(TtlCache::new(options.caption_ttl, clock.clone())),
        };
        Self {
            store,
            captions,
            clock,
            options,
            accounts: Vec::new(),
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Register an account. Must be called before [`Self::start`].
    pub fn add_account(
        &mut self,
        account: Account,
        platform: Arc<dyn ChatPlatform>,
        resolver: Arc<dyn FingerprintResolver>,
        source: Arc<dyn EventSource>,
    ) {
        let pipeline = AccountPipeline::new(
            account,
            platform,
            resolver,
            self.store.clone(),
            self.captions.clone(),
            self.options.op_timeout,
        );
        self.accounts.push(AccountRuntime {
            pipeline: Arc::new(pipeline),
            source,
        });
    }

    /// Number of registered accounts
    #[must_use]
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Token that stops the whole session when cancelled
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Caches shared by every pipeline
    #[must_use]
    pub const fn captions(&self) -> &CaptionCaches {
        &self.captions
    }

    /// Spawn every account's loops and the sweeper.
    pub fn start(&mut self) {
        for runtime in &self.accounts {
            let account = runtime.pipeline.account().id;
            let cancel = self.cancel.child_token();
            let (events_tx, events_rx) = mpsc::channel::<InboundEvent>(self.options.queue_capacity);
            let (actions_tx, actions_rx) =
                mpsc::channel::<OutboundAction>(self.options.queue_capacity);

            let source = runtime.source.clone();
            let token = cancel.clone();
            self.tasks
                .spawn(async move { source.run(events_tx, token).await });

            let pipeline = runtime.pipeline.clone();
            let token = cancel.clone();
            self.tasks.spawn(async move {
                pipeline.run_inbound(events_rx, actions_tx, token).await;
            });

            let pipeline = runtime.pipeline.clone();
            self.tasks
                .spawn(async move { pipeline.run_outbound(actions_rx, cancel).await });

            info!(account, channel = runtime.pipeline.account().channel_id, "Account started");
        }

        let captions = self.captions.clone();
        let clock = self.clock.clone();
        let interval = self.options.sweep_interval;
        let cancel = self.cancel.clone();
        self.tasks
            .spawn(async move { sweep(captions, clock, interval, cancel).await });
    }

    /// Start, block until SIGINT, SIGTERM or cancellation, then stop.
    pub async fn run(&mut self) {
        self.start();
        info!(accounts = self.accounts.len(), "Session running");
        wait_for_shutdown(&self.cancel).await;
        self.stop().await;
    }

    /// Cancel every task, wait for all of them to exit and close the store.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        while let Some(res) = self.tasks.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "Session task ended abnormally");
            }
        }
        self.store.close().await;
        info!("Session stopped");
    }

    /// Write exported records straight into the store.
    ///
    /// # Errors
    ///
    /// Returns the first store failure, or `ImportError::Cancelled` if the
    /// session is stopped mid-import.
    pub async fn import(&self, records: &[ImportRecord]) -> Result<ImportSummary, ImportError> {
        import_records(self.store.as_ref(), records, &self.cancel).await
    }
}

async fn sweep(
    captions: CaptionCaches,
    clock: Arc<dyn Clock>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let now = clock.now();
                let users = captions.users.prune(now);
                let groups = captions.groups.prune(now);
                debug!(users, groups, "Caption caches swept");
            }
        }
    }
    debug!("Sweeper stopped");
}

/// Resolve on SIGINT, SIGTERM (unix) or when `cancel` fires.
async fn wait_for_shutdown(cancel: &CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
        () = cancel.cancelled() => info!("Session cancelled, shutting down"),
    }
}
