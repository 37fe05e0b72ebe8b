//! Gateway module - WebSocket client for the agent gateway
//!
//! ## Architecture
//!
//! ```text
//!   GatewayClient (clone) ──┐
//!   GatewayClient (clone) ──┼── commands ──▶ ┌──────────────────────┐
//!   StreamHandle / timers ──┘                │   connection actor   │
//!                                            │  correlation table   │◀── transport link
//!                                            │  event bus           │    ws://127.0.0.1:18789
//!                                            │  reconnect policy    │
//!                                            └──────────────────────┘
//! ```
//!
//! Replies are matched to requests by id; everything inbound is also
//! published on the event bus by its `type`.

mod client;
mod connection;
mod correlation;
pub mod events;
mod operations;
pub mod protocol;
pub mod reconnect;
pub mod stream;
pub mod transport;

pub use client::GatewayClient;
pub use events::{EventBus, EventCallback, Subscription};
pub use operations::code_skills;
pub use reconnect::{backoff_delay, ConnectionState, ReconnectPolicy};
pub use stream::{StreamCallbacks, StreamHandle};
pub use transport::{Outbound, Transport, TransportEvent, TransportLink, WebSocketTransport};

pub use protocol::{decode, encode, Envelope};
pub use protocol::types::{
    events as event_names, AgentMessage, BrowserAction, BrowserSnapshot, CanvasElement,
    CodeContext, Collaboration, GatewayStatus, MessageOptions, Node, SendOptions, Session, Skill,
    SkillExecutionRequest, SkillExecutionResult, SkillInfo,
};
