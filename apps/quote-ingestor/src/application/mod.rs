//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the cycle controller, the supervisor and the port
//! interfaces that define how they reach the feed, the store and the
//! operating system.

/// Port interfaces for external systems (feed, store, process).
pub mod ports;

/// Application services for cycle orchestration and supervision.
pub mod services;
