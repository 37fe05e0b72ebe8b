//! Connection lifecycle state and reconnect backoff

use std::fmt;
use std::time::Duration;

use crate::config::GatewayConfig;

/// Lifecycle of the gateway connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Never connected, or explicitly disconnected
    Idle,
    /// A connect attempt is in flight
    Connecting,
    /// Link open; requests may be sent
    Connected,
    /// Explicit disconnect in progress
    Closing,
    /// Link lost; a reconnect may be scheduled
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delay before reconnect attempt `attempt` (1-based): `base * 2^(attempt-1)`
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor)
}

/// Counts consecutive reconnect attempts since the last successful connect
#[derive(Debug, Default, Clone)]
pub struct ReconnectPolicy {
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts scheduled since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Called after a successful connect
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Delay for the next attempt, or `None` when reconnecting is disabled
    /// or the attempt budget is spent.
    pub fn next_delay(&mut self, config: &GatewayConfig) -> Option<Duration> {
        if !config.auto_connect || self.attempts >= config.reconnect.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(backoff_delay(config.reconnect.base_delay, self.attempts))
    }
}
