//! Domain Layer - Classification, normalization and scheduling rules.
//!
//! Pure logic with no I/O. Everything here is deterministic for a given
//! input and static configuration.

/// Destination categories and symbol classification.
pub mod category;

/// Record normalization into destination schemas.
pub mod normalize;

/// Feed-side quote types.
pub mod quote;

/// Market-hours gate.
pub mod schedule;
