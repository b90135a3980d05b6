#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::panic
    )
)]

//! Quote Ingestor - Market Data to Remote Store
//!
//! Collects quotes from the broker feed during market hours, routes each
//! instrument to its destination table and upserts the rows into the
//! remote store, one record per request.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure rules, no I/O
//!   - `category`: Destination tables and symbol classification
//!   - `normalize`: Raw feed rows to destination schema
//!   - `quote`: Feed batch and subscription types
//!   - `schedule`: Market-hours gate
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Feed, store, cycle and restart interfaces
//!   - `services`: Cycle controller and supervisor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: Feed gateway client
//!   - `store`: REST upsert client
//!   - `process`: Process re-exec
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Supervisor ─► Gate open? ─► CycleController
//!                                │
//!        feed session ─► queue ─►│─► normalize ─► classify ─► upsert ─► store
//!                                │
//!                                └─► CycleReport {category: count}
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Classification, normalization and scheduling rules.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::category::{Category, CategoryError, CategoryTable};
pub use domain::normalize::{NormalizeError, NormalizedRecord, Normalizer};
pub use domain::quote::{FeedBatch, InstrumentKind, RawRow, Subscription};
pub use domain::schedule::{MarketHours, ScheduleError};

// Ports
pub use application::ports::{
    CycleObserver, FeedConnector, FeedCredentials, FeedError, FeedSession, IngestionCycle,
    QuoteStore, RestartError, Restarter, StoreError, UpsertAck,
};

// Services
pub use application::services::{
    BatchIngestor, CycleController, CycleError, CycleReport, IngestMode, Supervisor,
    SupervisorSettings, SupervisorStats,
};

// Infrastructure
pub use infrastructure::config::{ConfigError, IngestorConfig};
pub use infrastructure::feed::GatewayConnector;
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::process::ExecRestarter;
pub use infrastructure::store::RestStore;
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
