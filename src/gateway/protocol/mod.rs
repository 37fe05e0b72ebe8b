//! Gateway Protocol - WebSocket message envelope and payloads
//!
//! ## Protocol Overview
//!
//! - **JSON envelopes** over WebSocket text frames
//! - **Request-response pattern** with unique message IDs echoed by replies
//! - **Events** without an id, routed by their `type`
//! - **Streams**: chunk frames followed by one completion frame, sharing the
//!   request id

pub mod schema;
pub mod types;

pub use schema::{decode, encode, Envelope};
pub use types::*;
