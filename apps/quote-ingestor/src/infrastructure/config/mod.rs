//! Configuration Module
//!
//! Environment-driven configuration for the ingestor. Classification
//! tables are not configured here; they ship embedded in the binary.

mod settings;

pub use settings::{ConfigError, FeedSettings, IngestorConfig, StoreSettings};
