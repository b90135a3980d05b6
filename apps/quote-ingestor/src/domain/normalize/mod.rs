//! Record Normalization
//!
//! Turns raw feed rows into the destination schema of each table kind.
//!
//! # Rules
//!
//! | Kind       | Key                         | Rescaled (÷100)                         | Dropped                                  |
//! |------------|-----------------------------|-----------------------------------------|------------------------------------------|
//! | securities | `symbol - settlement`       | `change`                                | -                                        |
//! | repos      | settlement term             | `last`, `change`, rates, `previous_close` | open, high, low, volume, operations, datetime |
//! | options    | `symbol`                    | `change`                                | expiration, strike, kind                 |
//!
//! Repo rows whose symbol lacks the currency marker are filtered out.
//! A row with no resolvable key is kept under [`MISSING_SYMBOL`] so
//! aggregate rows are not lost.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

use crate::domain::category::COMPOSITE_SEPARATOR;
use crate::domain::quote::{InstrumentKind, RawRow};

/// Key assigned to rows with no symbol.
pub const MISSING_SYMBOL: &str = "N/A";

/// Repo rows are kept only when their symbol contains this marker.
pub const REPO_CURRENCY_MARKER: &str = "PESOS";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

// =============================================================================
// Errors
// =============================================================================

/// A row that cannot be normalized. Fails that row only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// Numeric field holds something that is not a number.
    #[error("field {field} is not numeric: {value}")]
    InvalidNumber {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// Timestamp field is absent or null.
    #[error("field {field} is missing")]
    MissingTimestamp {
        /// Field name.
        field: &'static str,
    },

    /// Timestamp field cannot be parsed.
    #[error("field {field} is not a timestamp: {value}")]
    InvalidTimestamp {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: String,
    },
}

// =============================================================================
// Normalized Records
// =============================================================================

/// Board quote (equities, bonds, bills, futures).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityRecord {
    /// Composite key `SYMBOL - SETTLEMENT`.
    pub symbol: String,
    /// Instrument description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Settlement term.
    pub settlement: Option<String>,
    /// Size on the best bid.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub bid_size: Option<Decimal>,
    /// Best bid.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub bid: Option<Decimal>,
    /// Best ask.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub ask: Option<Decimal>,
    /// Size on the best ask.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub ask_size: Option<Decimal>,
    /// Last traded price.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub last: Option<Decimal>,
    /// Daily change as a fraction.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub change: Option<Decimal>,
    /// Session open.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub open: Option<Decimal>,
    /// Session high.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub high: Option<Decimal>,
    /// Session low.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub low: Option<Decimal>,
    /// Previous close.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub previous_close: Option<Decimal>,
    /// Traded amount.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub turnover: Option<Decimal>,
    /// Traded nominal volume.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub volume: Option<Decimal>,
    /// Number of trades.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub operations: Option<Decimal>,
    /// Feed event time.
    pub datetime: DateTime<Utc>,
}

/// Repo rate for one settlement term.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepoRecord {
    /// Settlement term, used as key.
    pub symbol: String,
    /// Last rate as a fraction.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub last: Option<Decimal>,
    /// Rate change as a fraction.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub change: Option<Decimal>,
    /// Amount on the bid side.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub bid_amount: Option<Decimal>,
    /// Bid rate as a fraction.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub bid_rate: Option<Decimal>,
    /// Ask rate as a fraction.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub ask_rate: Option<Decimal>,
    /// Amount on the ask side.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub ask_amount: Option<Decimal>,
    /// Previous closing rate as a fraction.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub previous_close: Option<Decimal>,
    /// Traded amount.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub turnover: Option<Decimal>,
}

/// Option quote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionRecord {
    /// Option symbol.
    pub symbol: String,
    /// Size on the best bid.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub bid_volume: Option<Decimal>,
    /// Best bid.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub bid: Option<Decimal>,
    /// Best ask.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub ask: Option<Decimal>,
    /// Size on the best ask.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub ask_volume: Option<Decimal>,
    /// Last premium.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub last: Option<Decimal>,
    /// Daily change as a fraction.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub change: Option<Decimal>,
    /// Session open.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub open: Option<Decimal>,
    /// Session high.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub high: Option<Decimal>,
    /// Session low.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub low: Option<Decimal>,
    /// Previous close.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub previous_close: Option<Decimal>,
    /// Traded amount.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub turnover: Option<Decimal>,
    /// Contracts traded.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub volume: Option<Decimal>,
    /// Number of trades.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub operations: Option<Decimal>,
    /// Feed event time.
    pub datetime: DateTime<Utc>,
}

/// A row in destination schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NormalizedRecord {
    /// From a securities batch.
    Security(SecurityRecord),
    /// From a repos batch.
    Repo(RepoRecord),
    /// From an options batch.
    Option(OptionRecord),
}

impl NormalizedRecord {
    /// Upsert key.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Security(r) => &r.symbol,
            Self::Repo(r) => &r.symbol,
            Self::Option(r) => &r.symbol,
        }
    }

    /// Kind of the source batch.
    #[must_use]
    pub const fn kind(&self) -> InstrumentKind {
        match self {
            Self::Security(_) => InstrumentKind::Securities,
            Self::Repo(_) => InstrumentKind::Repos,
            Self::Option(_) => InstrumentKind::Options,
        }
    }
}

/// Record plus the transmission timestamp, as sent to the store.
#[derive(Debug, Serialize)]
pub struct UpsertPayload<'a> {
    /// Normalized fields.
    #[serde(flatten)]
    pub record: &'a NormalizedRecord,
    /// Time of transmission.
    pub updated_at: DateTime<Utc>,
}

impl<'a> UpsertPayload<'a> {
    /// Stamp a record with the current time.
    #[must_use]
    pub fn stamped_now(record: &'a NormalizedRecord) -> Self {
        Self {
            record,
            updated_at: Utc::now(),
        }
    }
}

// =============================================================================
// Normalizer
// =============================================================================

/// Converts raw rows into [`NormalizedRecord`]s.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    timezone: Tz,
}

impl Normalizer {
    /// Create a normalizer. Naive feed timestamps are read in `timezone`.
    #[must_use]
    pub const fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    /// Normalize one row.
    ///
    /// Returns `Ok(None)` when the row is filtered out by kind rules.
    ///
    /// # Errors
    ///
    /// Returns an error when a numeric or timestamp field is malformed.
    pub fn normalize(
        &self,
        kind: InstrumentKind,
        row: &RawRow,
    ) -> Result<Option<NormalizedRecord>, NormalizeError> {
        self.normalize_with_settlement(kind, row, None)
    }

    /// Normalize one row, using `settlement` for a security row that has
    /// no settlement of its own.
    ///
    /// # Errors
    ///
    /// Returns an error when a numeric or timestamp field is malformed.
    pub fn normalize_with_settlement(
        &self,
        kind: InstrumentKind,
        row: &RawRow,
        settlement: Option<&str>,
    ) -> Result<Option<NormalizedRecord>, NormalizeError> {
        match kind {
            InstrumentKind::Securities => self
                .security(row, settlement)
                .map(|r| Some(NormalizedRecord::Security(r))),
            InstrumentKind::Repos => repo(row).map(|r| r.map(NormalizedRecord::Repo)),
            InstrumentKind::Options => self.option(row).map(|r| Some(NormalizedRecord::Option(r))),
        }
    }

    fn security(
        &self,
        row: &RawRow,
        fallback_settlement: Option<&str>,
    ) -> Result<SecurityRecord, NormalizeError> {
        let base = text(row, "symbol").unwrap_or_else(|| MISSING_SYMBOL.to_string());
        let settlement =
            text(row, "settlement").or_else(|| fallback_settlement.map(str::to_string));
        let symbol = match &settlement {
            Some(term) => format!("{base}{COMPOSITE_SEPARATOR}{term}"),
            None => base,
        };

        Ok(SecurityRecord {
            symbol,
            description: text(row, "description"),
            settlement,
            bid_size: decimal(row, "bid_size")?,
            bid: decimal(row, "bid")?,
            ask: decimal(row, "ask")?,
            ask_size: decimal(row, "ask_size")?,
            last: decimal(row, "last")?,
            change: percent(row, "change")?,
            open: decimal(row, "open")?,
            high: decimal(row, "high")?,
            low: decimal(row, "low")?,
            previous_close: decimal(row, "previous_close")?,
            turnover: decimal(row, "turnover")?,
            volume: decimal(row, "volume")?,
            operations: decimal(row, "operations")?,
            datetime: self.timestamp(row, "datetime")?,
        })
    }

    fn option(&self, row: &RawRow) -> Result<OptionRecord, NormalizeError> {
        Ok(OptionRecord {
            symbol: text(row, "symbol").unwrap_or_else(|| MISSING_SYMBOL.to_string()),
            bid_volume: decimal(row, "bid_size")?,
            bid: decimal(row, "bid")?,
            ask: decimal(row, "ask")?,
            ask_volume: decimal(row, "ask_size")?,
            last: decimal(row, "last")?,
            change: percent(row, "change")?,
            open: decimal(row, "open")?,
            high: decimal(row, "high")?,
            low: decimal(row, "low")?,
            previous_close: decimal(row, "previous_close")?,
            turnover: decimal(row, "turnover")?,
            volume: decimal(row, "volume")?,
            operations: decimal(row, "operations")?,
            datetime: self.timestamp(row, "datetime")?,
        })
    }

    fn timestamp(&self, row: &RawRow, field: &'static str) -> Result<DateTime<Utc>, NormalizeError> {
        let invalid = |value: &Value| NormalizeError::InvalidTimestamp {
            field,
            value: value.to_string(),
        };

        match row.get(field) {
            None | Some(Value::Null) => Err(NormalizeError::MissingTimestamp { field }),
            Some(value @ Value::Number(n)) => n
                .as_i64()
                .and_then(DateTime::from_timestamp_millis)
                .ok_or_else(|| invalid(value)),
            Some(value @ Value::String(s)) => {
                let s = s.trim();
                if s.is_empty() {
                    return Err(NormalizeError::MissingTimestamp { field });
                }
                if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                    return Ok(dt.with_timezone(&Utc));
                }
                NAIVE_FORMATS
                    .iter()
                    .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                    .and_then(|naive| self.timezone.from_local_datetime(&naive).earliest())
                    .map(|local| local.with_timezone(&Utc))
                    .ok_or_else(|| invalid(value))
            }
            Some(value) => Err(invalid(value)),
        }
    }
}

fn repo(row: &RawRow) -> Result<Option<RepoRecord>, NormalizeError> {
    let Some(symbol) = text(row, "symbol") else {
        return Ok(None);
    };
    if !symbol.to_uppercase().contains(REPO_CURRENCY_MARKER) {
        return Ok(None);
    }

    Ok(Some(RepoRecord {
        symbol: text(row, "settlement").unwrap_or_else(|| MISSING_SYMBOL.to_string()),
        last: percent(row, "last")?,
        change: percent(row, "change")?,
        bid_amount: decimal(row, "bid_amount")?,
        bid_rate: percent(row, "bid_rate")?,
        ask_rate: percent(row, "ask_rate")?,
        ask_amount: decimal(row, "ask_amount")?,
        previous_close: percent(row, "previous_close")?,
        turnover: decimal(row, "turnover")?,
    }))
}

// =============================================================================
// Field Helpers
// =============================================================================

fn text(row: &RawRow, field: &str) -> Option<String> {
    match row.get(field)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn decimal(row: &RawRow, field: &'static str) -> Result<Option<Decimal>, NormalizeError> {
    let invalid = |value: String| NormalizeError::InvalidNumber { field, value };

    match row.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => parse_decimal(&n.to_string())
            .map(Some)
            .ok_or_else(|| invalid(n.to_string())),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() || s.eq_ignore_ascii_case("nan") {
                return Ok(None);
            }
            parse_decimal(s).map(Some).ok_or_else(|| invalid(s.to_string()))
        }
        Some(other) => Err(invalid(other.to_string())),
    }
}

fn percent(row: &RawRow, field: &'static str) -> Result<Option<Decimal>, NormalizeError> {
    Ok(decimal(row, field)?.map(|v| v / Decimal::ONE_HUNDRED))
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

// =============================================================================
// Tests
// =============================================================================
