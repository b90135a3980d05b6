//! Port Interfaces
//!
//! Contracts between the ingestion services and the outside world,
//! following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FeedConnector` / `FeedSession`: the broker market-data feed
//! - `QuoteStore`: the remote tabular store (upsert by symbol)
//! - `Restarter`: whole-process restart
//!
//! ## Driver Ports (Inbound)
//!
//! - `IngestionCycle`: one bounded collect-and-deliver pass
//! - `CycleObserver`: supervisor progress notifications

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::application::services::cycle::{CycleError, CycleReport};
use crate::domain::category::Category;
use crate::domain::normalize::NormalizedRecord;
use crate::domain::quote::{FeedBatch, InstrumentKind, Subscription};

// =============================================================================
// Feed
// =============================================================================

/// Login identity for the broker feed.
#[derive(Clone)]
pub struct FeedCredentials {
    broker_id: u32,
    dni: String,
    user: String,
    password: String,
}

impl FeedCredentials {
    /// Create credentials.
    #[must_use]
    pub const fn new(broker_id: u32, dni: String, user: String, password: String) -> Self {
        Self {
            broker_id,
            dni,
            user,
            password,
        }
    }

    /// Numeric broker identifier.
    #[must_use]
    pub const fn broker_id(&self) -> u32 {
        self.broker_id
    }

    /// National ID of the account holder.
    #[must_use]
    pub fn dni(&self) -> &str {
        &self.dni
    }

    /// Login user name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Login password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for FeedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedCredentials")
            .field("broker_id", &self.broker_id)
            .field("dni", &"[REDACTED]")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Errors reported by the feed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    /// Login rejected.
    #[error("feed authentication failed: {0}")]
    Authentication(String),

    /// Transport failure talking to the feed.
    #[error("feed connection failed: {0}")]
    Connection(String),

    /// Feed answered with something unexpected.
    #[error("feed protocol error: {0}")]
    Protocol(String),
}

/// Opens authenticated feed sessions.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Log in and return a fresh session.
    async fn login(&self, credentials: &FeedCredentials) -> Result<Box<dyn FeedSession>, FeedError>;
}

/// One authenticated feed session, owned by a single cycle.
#[async_trait]
pub trait FeedSession: Send {
    /// Start push delivery; batches for active subscriptions go to `sink`.
    async fn connect(&mut self, sink: mpsc::Sender<FeedBatch>) -> Result<(), FeedError>;

    /// Subscribe to one board.
    async fn subscribe(&mut self, subscription: &Subscription) -> Result<(), FeedError>;

    /// Blocking snapshot query for the given symbols.
    async fn query(
        &mut self,
        kind: InstrumentKind,
        symbols: &[String],
        settlement: &str,
    ) -> Result<FeedBatch, FeedError>;

    /// Why push delivery stopped, once the sink given to `connect` has closed.
    ///
    /// `Ok` means the feed ended the stream cleanly.
    async fn delivery_outcome(&mut self) -> Result<(), FeedError> {
        Ok(())
    }

    /// Stop delivery and release every feed resource.
    async fn disconnect(&mut self) -> Result<(), FeedError>;
}

// =============================================================================
// Store
// =============================================================================

/// Successful upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertAck {
    /// HTTP status returned by the store.
    pub status: u16,
}

/// Failed upsert.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Store answered with a non-2xx status.
    #[error("store rejected upsert with status {status}: {body}")]
    Rejected {
        /// HTTP status.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Transport failure.
    #[error("store request failed: {0}")]
    Network(String),

    /// Record could not be encoded.
    #[error("failed to encode record: {0}")]
    Encode(String),
}

/// Remote store with native insert-or-update by symbol.
#[async_trait]
pub trait QuoteStore: Send + Sync {
    /// Upsert one record into the category's table.
    async fn upsert(
        &self,
        category: Category,
        record: &NormalizedRecord,
    ) -> Result<UpsertAck, StoreError>;
}

// =============================================================================
// Cycles
// =============================================================================

/// One bounded pass of collection and delivery.
#[async_trait]
pub trait IngestionCycle: Send + Sync {
    /// Run a single cycle.
    async fn run_cycle(&self) -> Result<CycleReport, CycleError>;
}

/// Receives supervisor progress. All methods default to no-ops.
pub trait CycleObserver: Send + Sync {
    /// Gate state observed on a schedule check.
    fn gate_checked(&self, _open: bool) {}

    /// A cycle finished successfully.
    fn cycle_completed(&self, _report: &CycleReport) {}

    /// A cycle failed; the supervisor carries on.
    fn cycle_failed(&self, _error: &CycleError) {}
}

// =============================================================================
// Process
// =============================================================================

/// Restart failure.
#[derive(Debug, thiserror::Error)]
pub enum RestartError {
    /// Could not locate or re-execute the current binary.
    #[error("process restart failed: {0}")]
    Exec(#[from] std::io::Error),
}

/// Performs a whole-process restart.
///
/// Implementations that replace the process never return `Ok`.
pub trait Restarter: Send + Sync {
    /// Restart the process.
    fn restart(&self) -> Result<(), RestartError>;
}
