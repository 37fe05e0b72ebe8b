//! # ClawLink
//!
//! Async client for an agent gateway speaking JSON envelopes over WebSocket.
//!
//! ## Features
//!
//! - **Request/response correlation:** concurrent requests matched to replies by id, each with its own timeout
//! - **Streaming:** chunked replies delivered to callbacks, cancellable at any point
//! - **Events:** type-keyed subscriptions that survive reconnects
//! - **Resilience:** exponential-backoff reconnect with a bounded attempt budget
//! - **Typed operations:** sessions, agent messaging, skills, nodes, browser and canvas helpers

pub mod config;
pub mod error;
pub mod gateway;

pub use config::Config;
pub use error::{Error, Result};
pub use gateway::{ConnectionState, GatewayClient, StreamCallbacks, StreamHandle, Subscription};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
