//! Keeps a replica in sync with the upstream server.
//!
//! Every (re)connection to the push stream starts with a full resync via
//! [`SnapshotLoader::load_all`]; frames that arrive meanwhile wait in the
//! socket and are applied in order afterwards.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use tafwatch_store::{ReconcileStats, Reconciler, SnapshotLoader};

use crate::retry::Backoff;
use crate::stream::{self, StreamError, WsStream};

#[derive(Clone, Debug)]
pub struct WatcherConfig {
    pub ws_url: String,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    /// Fetch every version of every TMI after each resync.
    pub hydrate_on_resync: bool,
}

/// What one push-stream connection did before it ended.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub resynced: bool,
    pub stats: ReconcileStats,
}

pub struct Watcher {
    loader: SnapshotLoader,
    reconciler: Reconciler,
    config: WatcherConfig,
}

impl Watcher {
    pub fn new(loader: SnapshotLoader, config: WatcherConfig) -> Self {
        let reconciler = Reconciler::new(loader.replica().clone());
        Self {
            loader,
            reconciler,
            config,
        }
    }

    /// Connect, resync and apply events until `cancel` fires, reconnecting
    /// with backoff whenever the stream drops.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.config.reconnect_initial, self.config.reconnect_max);

        while !cancel.is_cancelled() {
            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                result = stream::connect(&self.config.ws_url) => result,
            };

            match connected {
                Ok(ws) => {
                    backoff.reset();
                    match self.run_connection(ws, &cancel).await {
                        Ok(summary) => info!(
                            resynced = summary.resynced,
                            events = summary.stats.total(),
                            applied = summary.stats.applied,
                            "push stream connection ended"
                        ),
                        Err(e) => warn!(error = %e, "push stream connection failed"),
                    }
                }
                Err(e) => warn!(error = %e, "push stream connect failed"),
            }

            let delay = backoff.next_delay();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("watcher stopped");
    }

    /// Drive one established connection to its end.
    ///
    /// A failed resync is logged and events are still applied; the next
    /// reconnect retries the resync.
    #[instrument(skip_all)]
    pub async fn run_connection(
        &self,
        mut ws: WsStream,
        cancel: &CancellationToken,
    ) -> Result<ConnectionSummary, StreamError> {
        let resynced = tokio::select! {
            _ = cancel.cancelled() => return Ok(ConnectionSummary::default()),
            resynced = self.resync() => resynced,
        };
        let mut summary = ConnectionSummary {
            resynced,
            ..ConnectionSummary::default()
        };

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                next = stream::next_messages(&mut ws) => Some(next?),
            };
            let Some(next) = next else {
                let _ = ws.close(None).await;
                return Ok(summary);
            };
            let Some(messages) = next else {
                return Ok(summary);
            };
            for message in &messages {
                summary.stats.record(self.reconciler.apply_raw(message));
            }
        }
    }

    async fn resync(&self) -> bool {
        match self.loader.load_all().await {
            Ok(listing) => {
                if self.config.hydrate_on_resync && !listing.is_empty() {
                    self.loader.hydrate().await;
                }
                true
            }
            Err(e) => {
                warn!(error = %e, retryable = e.is_retryable(), "resync failed, continuing on events only");
                false
            }
        }
    }
}
