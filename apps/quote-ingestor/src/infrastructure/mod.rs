//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus process-wide concerns.

/// Configuration loading.
pub mod config;

/// Feed gateway adapter.
pub mod feed;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Process re-exec.
pub mod process;

/// REST upsert client for the remote store.
pub mod store;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
