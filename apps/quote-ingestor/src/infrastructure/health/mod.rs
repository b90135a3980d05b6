//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for liveness, ingestion progress and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status: gate state, last cycle summary, failures
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /metrics` - Prometheus metrics in text format
//!
//! The state doubles as the supervisor's [`CycleObserver`], so the JSON
//! view is updated as cycles finish.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::CycleObserver;
use crate::application::services::{CycleError, CycleReport};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Ingestor version.
    pub version: String,
    /// Process uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Gate state at the last schedule check.
    pub market_open: bool,
    /// Cycles completed since start.
    pub cycles_completed: u64,
    /// Cycles failed since start.
    pub cycles_failed: u64,
    /// Failures since the last successful cycle.
    pub consecutive_failures: u32,
    /// Message of the most recent failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Most recent successful cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<CycleReport>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Last cycle succeeded.
    Healthy,
    /// Last cycle failed.
    Degraded,
    /// No cycle has run yet.
    Idle,
}

// =============================================================================
// Health Server State
// =============================================================================

#[derive(Debug, Default)]
struct Progress {
    market_open: bool,
    cycles_completed: u64,
    cycles_failed: u64,
    consecutive_failures: u32,
    last_error: Option<String>,
    last_cycle: Option<CycleReport>,
}

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    progress: RwLock<Progress>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            progress: RwLock::new(Progress::default()),
        }
    }

    /// Current health snapshot.
    #[must_use]
    pub fn snapshot(&self) -> HealthResponse {
        let progress = self.progress.read();
        let status = if progress.consecutive_failures > 0 {
            HealthStatus::Degraded
        } else if progress.last_cycle.is_some() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Idle
        };

        HealthResponse {
            status,
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            market_open: progress.market_open,
            cycles_completed: progress.cycles_completed,
            cycles_failed: progress.cycles_failed,
            consecutive_failures: progress.consecutive_failures,
            last_error: progress.last_error.clone(),
            last_cycle: progress.last_cycle.clone(),
        }
    }
}

impl CycleObserver for HealthServerState {
    fn gate_checked(&self, open: bool) {
        self.progress.write().market_open = open;
    }

    fn cycle_completed(&self, report: &CycleReport) {
        let mut progress = self.progress.write();
        progress.cycles_completed += 1;
        progress.consecutive_failures = 0;
        progress.last_cycle = Some(report.clone());
    }

    fn cycle_failed(&self, error: &CycleError) {
        let mut progress = self.progress.write();
        progress.cycles_failed += 1;
        progress.consecutive_failures = progress.consecutive_failures.saturating_add(1);
        progress.last_error = Some(error.to_string());
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes served by the health server.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.snapshot()))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
