//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `CycleController`: one bounded collect-and-deliver pass
//! - `Supervisor`: market-gated outer loop with periodic restart

/// Ingestion cycle controller.
pub mod cycle;

/// Process supervisor.
pub mod supervisor;

pub use cycle::{
    BatchIngestor, CycleController, CycleCounters, CycleError, CycleReport, IngestMode,
};
pub use supervisor::{Supervisor, SupervisorSettings, SupervisorStats};
