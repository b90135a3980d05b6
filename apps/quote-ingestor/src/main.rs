//! Quote Ingestor Binary
//!
//! Starts the market-hours ingestion loop.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin quote-ingestor
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `SUPABASE_URL`: Store base URL
//! - `SUPABASE_API_KEY`: Store API key
//! - `BROKER_ID`: Numeric broker identifier
//! - `BROKER_DNI`, `BROKER_USER`, `BROKER_PASSWORD`: Feed login identity
//!
//! ## Optional
//! - `INGEST_MODE`: push | poll (default: push)
//! - `CYCLE_WINDOW_SECS`: Push window per cycle (default: 60)
//! - `FEED_QUEUE_CAPACITY`: Push batch queue size (default: 256)
//! - `POLL_INTERVAL_SECS`: Pause after each poll query (default: 5)
//! - `POLL_SETTLEMENT`: Settlement term for poll queries (default: 24hs)
//! - `MARKET_TIMEZONE`: IANA zone (default: America/Argentina/Buenos_Aires)
//! - `MARKET_OPEN_HOUR` / `MARKET_CLOSE_HOUR`: Window, end-exclusive (default: 11 / 17)
//! - `GATE_RECHECK_SECS`: Sleep while closed or after a failure (default: 60)
//! - `RESTART_AFTER_SECS`: Uptime before re-exec, 0 disables (default: 3600)
//! - `FEED_GATEWAY_URL`: Feed gateway (default: <http://127.0.0.1:8700>)
//! - `FEED_EVENTS_WAIT_SECS`: Long-poll wait on the gateway (default: 5)
//! - `STORE_TIMEOUT_SECS`: Store request timeout (default: 30)
//! - `UPSERT_PACING_MS`: Pause between upserts (default: 0)
//! - `HEALTH_PORT`: Health and metrics HTTP port, 0 disables (default: 8082)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: `quote_ingestor=info`)

use std::sync::Arc;

use anyhow::Context;
use quote_ingestor::infrastructure::telemetry;
use quote_ingestor::{
    BatchIngestor, CategoryTable, CycleController, ExecRestarter, GatewayConnector, HealthServer,
    HealthServerState, IngestMode, IngestorConfig, Normalizer, RestStore, Supervisor,
    init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Quote Ingestor");

    let _metrics_handle = init_metrics();

    let config = IngestorConfig::from_env().context("invalid configuration")?;
    let tables = Arc::new(CategoryTable::embedded().context("invalid classification tables")?);
    log_config(&config, &tables);

    let store = Arc::new(RestStore::new(&config.store).context("store client")?);
    let connector = Arc::new(GatewayConnector::new(&config.feed).context("feed client")?);
    let ingestor = BatchIngestor::new(
        store,
        Arc::clone(&tables),
        Normalizer::new(config.market_hours.timezone()),
        config.store.pacing,
    );
    let controller = CycleController::new(
        connector,
        config.credentials.clone(),
        Arc::clone(&tables),
        ingestor,
        config.mode.clone(),
    );

    let shutdown_token = CancellationToken::new();

    let health_state = Arc::new(HealthServerState::new(env!("CARGO_PKG_VERSION").to_string()));
    if config.health_port != 0 {
        let health_server = HealthServer::new(
            config.health_port,
            Arc::clone(&health_state),
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    let restarter = Arc::new(ExecRestarter::current().context("resolve current executable")?);
    let supervisor = Supervisor::new(config.market_hours, config.supervisor, restarter)
        .with_observer(health_state);

    tokio::spawn(await_shutdown(shutdown_token.clone()));

    tracing::info!("Quote ingestor ready");

    let stats = supervisor.run(&controller, shutdown_token.clone()).await;
    shutdown_token.cancel();

    tracing::info!(
        cycles_completed = stats.cycles_completed,
        cycles_failed = stats.cycles_failed,
        restarts = stats.restarts,
        "Quote ingestor stopped"
    );
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &IngestorConfig, tables: &CategoryTable) {
    let (window_secs, poll_interval_secs) = match &config.mode {
        IngestMode::Push { window, .. } => (Some(window.as_secs()), None),
        IngestMode::Poll { interval, .. } => (None, Some(interval.as_secs())),
    };

    tracing::info!(
        mode = config.mode.as_str(),
        window_secs,
        poll_interval_secs,
        timezone = %config.market_hours.timezone(),
        open_hour = config.market_hours.open_hour(),
        close_hour = config.market_hours.close_hour(),
        restart_after_secs = config.supervisor.restart_after.map(|d| d.as_secs()),
        health_port = config.health_port,
        tables_version = tables.version(),
        "Configuration loaded"
    );
    tracing::debug!(
        store_url = %config.store.base_url,
        feed_gateway = %config.feed.gateway_url,
        subscriptions = tables.subscriptions().len(),
        "Endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, finishing current cycle");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, finishing current cycle");
        }
    }

    shutdown_token.cancel();
}
