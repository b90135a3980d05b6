//! Quote Feed Types
//!
//! Shapes of the data handed over by the market-data feed. Rows are kept
//! as loose field-name → value maps because the column set varies by
//! instrument kind; the normalizer turns them into typed records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One raw row as delivered by the feed.
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// Source collection a batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    /// Equities, bonds, bills, futures (board quotes).
    Securities,
    /// Repo / caution instruments.
    Repos,
    /// Listed options.
    Options,
}

impl InstrumentKind {
    /// Name used on the wire and in log fields.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Securities => "securities",
            Self::Repos => "repos",
            Self::Options => "options",
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A batch of rows of a single kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedBatch {
    /// Kind of every row in the batch.
    pub kind: InstrumentKind,
    /// Rows in feed order.
    #[serde(default)]
    pub rows: Vec<RawRow>,
    /// Settlement the batch was queried at, for rows that omit their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement: Option<String>,
}

impl FeedBatch {
    /// Create a batch.
    #[must_use]
    pub const fn new(kind: InstrumentKind, rows: Vec<RawRow>) -> Self {
        Self {
            kind,
            rows,
            settlement: None,
        }
    }

    /// Tag the batch with the settlement it was queried at.
    #[must_use]
    pub fn with_settlement(mut self, settlement: impl Into<String>) -> Self {
        self.settlement = Some(settlement.into());
        self
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the batch carries no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A push-mode subscription: one board of one kind at one settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Instrument kind to subscribe to.
    pub kind: InstrumentKind,
    /// Board (segment) name understood by the feed.
    pub board: String,
    /// Settlement term, absent for kinds that do not take one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement: Option<String>,
}
