//! Feed Gateway Wire Types
//!
//! JSON bodies exchanged with the feed gateway. The gateway owns the broker
//! SDK session; these types only mirror what it accepts and returns.

use serde::{Deserialize, Serialize};

use crate::domain::quote::{FeedBatch, InstrumentKind, RawRow};

/// `POST /v1/sessions` body.
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    /// Numeric broker identifier.
    pub broker_id: u32,
    /// National ID of the account holder.
    pub dni: &'a str,
    /// Login user name.
    pub user: &'a str,
    /// Login password.
    pub password: &'a str,
}

/// `POST /v1/sessions` response.
#[derive(Debug, Deserialize)]
pub struct SessionResponse {
    /// Opaque session handle used in every later path.
    pub session_id: String,
}

/// `POST /v1/sessions/{id}/quotes` body.
#[derive(Debug, Serialize)]
pub struct QueryRequest<'a> {
    /// Instrument kind to query.
    pub kind: InstrumentKind,
    /// Symbols to quote.
    pub symbols: &'a [String],
    /// Settlement term.
    pub settlement: &'a str,
}

/// `POST /v1/sessions/{id}/quotes` response.
#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    /// One row per quoted instrument.
    #[serde(default)]
    pub rows: Vec<RawRow>,
}

/// `GET /v1/sessions/{id}/events` response.
///
/// The gateway holds the request open until batches arrive or the wait
/// elapses, then answers with whatever it has (possibly nothing).
#[derive(Debug, Default, Deserialize)]
pub struct EventsResponse {
    /// Batches pushed since the previous poll, in arrival order.
    #[serde(default)]
    pub batches: Vec<FeedBatch>,
    /// Set once the broker side of the session has ended.
    #[serde(default)]
    pub closed: bool,
}

/// Error body returned on non-2xx answers.
#[derive(Debug, Deserialize)]
pub struct GatewayErrorBody {
    /// Human-readable reason.
    pub error: String,
}
