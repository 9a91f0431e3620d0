use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use tafwatch_client::{HttpSnapshotSource, RetryConfig, RetryingSource, Watcher, WatcherConfig};
use tafwatch_settings::TafwatchSettings;
use tafwatch_store::{Replica, SnapshotLoader};
use tafwatch_telemetry::{init_telemetry, parse_level, TelemetryConfig};

/// Keep a local replica of a trust-assessment server's sessions and TMIs.
#[derive(Debug, Parser)]
#[command(name = "tafwatch", version)]
struct Cli {
    /// Settings file (default: ~/.tafwatch/settings.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Upstream API base URL, e.g. http://taf:8080/api/
    #[arg(long)]
    upstream: Option<String>,

    /// Read API port
    #[arg(long)]
    port: Option<u16>,

    /// Do not start the read API
    #[arg(long)]
    no_server: bool,
}

impl Cli {
    fn apply(&self, settings: &mut TafwatchSettings) {
        if let Some(url) = &self.upstream {
            settings.upstream.base_url = url.clone();
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.no_server {
            settings.server.enabled = false;
        }
    }
}

fn telemetry_config(settings: &TafwatchSettings) -> TelemetryConfig {
    let logging = &settings.logging;
    TelemetryConfig {
        log_level: parse_level(&logging.level).unwrap_or(tracing::Level::INFO),
        module_levels: logging
            .modules
            .iter()
            .filter_map(|(module, level)| parse_level(level).map(|l| (module.clone(), l)))
            .collect(),
        json: logging.json,
    }
}

fn retry_config(settings: &TafwatchSettings) -> RetryConfig {
    let retry = &settings.retry;
    RetryConfig {
        max_retries: retry.max_retries,
        base_delay: Duration::from_millis(retry.base_delay_ms),
        max_delay: Duration::from_millis(retry.max_delay_ms),
        backoff_multiplier: retry.backoff_multiplier,
        jitter_factor: retry.jitter_factor,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => tafwatch_settings::load_settings_from_path(path),
        None => tafwatch_settings::load_settings(),
    }
    .context("failed to load settings")?;
    cli.apply(&mut settings);
    settings.validate().context("invalid settings")?;

    let _telemetry = init_telemetry(telemetry_config(&settings));
    tracing::info!(upstream = %settings.upstream.base_url, ws = %settings.upstream.ws_url, "starting tafwatch");

    let replica = Replica::new(settings.replica.event_log_capacity);
    let http = HttpSnapshotSource::new(
        &settings.upstream.base_url,
        Duration::from_millis(settings.upstream.request_timeout_ms),
    )
    .context("failed to build upstream client")?;
    let source = RetryingSource::new(http, retry_config(&settings));
    let loader = SnapshotLoader::new(Arc::new(source), replica.clone());

    let cancel = CancellationToken::new();

    let server = if settings.server.enabled {
        let config = tafwatch_server::ServerConfig {
            host: settings.server.host.clone(),
            port: settings.server.port,
        };
        let handle = tafwatch_server::start(config, replica.clone(), cancel.clone())
            .await
            .context("failed to start read API")?;
        Some(handle)
    } else {
        None
    };

    let watcher = Watcher::new(
        loader,
        WatcherConfig {
            ws_url: settings.upstream.ws_url.clone(),
            reconnect_initial: Duration::from_millis(settings.reconnect.initial_delay_ms),
            reconnect_max: Duration::from_millis(settings.reconnect.max_delay_ms),
            hydrate_on_resync: settings.upstream.hydrate_on_resync,
        },
    );

    // Wait for shutdown signal
    let signal = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl+c");
            }
            tracing::info!("shutting down");
            cancel.cancel();
        })
    };

    watcher.run(cancel.clone()).await;
    signal.abort();

    if let Some(server) = server {
        server.join().await;
    }
    Ok(())
}
