//! Feed Adapter
//!
//! The broker SDK is reached through an HTTP gateway; this module is the
//! client side of that bridge.

/// Gateway-backed feed connector and session.
pub mod gateway;

/// Gateway request and response bodies.
pub mod messages;

pub use gateway::{GatewayConnector, GatewaySession};
