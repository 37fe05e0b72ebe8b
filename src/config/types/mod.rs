//! Configuration types module
//!
//! Core client settings live here; feature toggles are in `features`.

pub mod features;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default gateway endpoint
pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:18789";

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Master switch for the gateway client
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Default thinking level for agent messages
    #[serde(default)]
    pub default_thinking_level: ThinkingLevel,

    /// Default model for agent messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Gateway connection settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Skills feature
    #[serde(default)]
    pub skills: features::SkillsConfig,

    /// Browser control feature
    #[serde(default)]
    pub browser: features::BrowserConfig,

    /// Canvas feature
    #[serde(default)]
    pub canvas: features::CanvasConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            enabled: true,
            default_thinking_level: ThinkingLevel::default(),
            default_model: None,
            gateway: GatewayConfig::default(),
            skills: features::SkillsConfig::default(),
            browser: features::BrowserConfig::default(),
            canvas: features::CanvasConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables and files
    ///
    /// Loads from:
    /// 1. Default values
    /// 2. Config file (if present)
    /// 3. Environment variable overrides
    pub fn from_env() -> crate::error::Result<Self> {
        crate::config::load_config()
    }

    /// Apply a partial update in place
    pub fn apply(&mut self, update: ConfigUpdate) {
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(url) = update.gateway_url {
            self.gateway.url = url;
        }
        if let Some(auto_connect) = update.auto_connect {
            self.gateway.auto_connect = auto_connect;
        }
        if let Some(timeout) = update.request_timeout {
            self.gateway.request_timeout = timeout;
        }
        if let Some(timeout) = update.connect_timeout {
            self.gateway.connect_timeout = timeout;
        }
        if let Some(delay) = update.reconnect_base_delay {
            self.gateway.reconnect.base_delay = delay;
        }
        if let Some(attempts) = update.max_reconnect_attempts {
            self.gateway.reconnect.max_attempts = attempts;
        }
        if let Some(level) = update.default_thinking_level {
            self.default_thinking_level = level;
        }
        if let Some(model) = update.default_model {
            self.default_model = Some(model);
        }
        if let Some(enabled) = update.skills_enabled {
            self.skills.enabled = enabled;
        }
        if let Some(enabled) = update.browser_enabled {
            self.browser.enabled = enabled;
        }
        if let Some(enabled) = update.canvas_enabled {
            self.canvas.enabled = enabled;
        }
    }
}

/// Gateway connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// WebSocket endpoint
    #[serde(default = "default_url")]
    pub url: String,
    /// Reconnect automatically after a lost connection
    #[serde(default)]
    pub auto_connect: bool,
    /// Default budget for correlated requests
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Budget for a single connect attempt
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Reconnection policy
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            url: default_url(),
            auto_connect: false,
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Port component of the endpoint, falling back to the default port
    pub fn port(&self) -> u16 {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.port_or_known_default())
            .unwrap_or(18789)
    }
}

/// Exponential backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    /// Attempts allowed since the last successful connect
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first attempt; doubled for each further attempt
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> Duration {
    Duration::from_millis(1000)
}

/// Thinking/reasoning level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    /// No extended thinking
    Off,
    /// Minimal thinking
    Minimal,
    /// Low thinking
    Low,
    /// Medium thinking (default)
    #[default]
    Medium,
    /// High thinking
    High,
    /// Extra high thinking
    XHigh,
}

impl std::str::FromStr for ThinkingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(ThinkingLevel::Off),
            "minimal" => Ok(ThinkingLevel::Minimal),
            "low" => Ok(ThinkingLevel::Low),
            "medium" => Ok(ThinkingLevel::Medium),
            "high" => Ok(ThinkingLevel::High),
            "xhigh" => Ok(ThinkingLevel::XHigh),
            other => Err(format!("unknown thinking level '{}'", other)),
        }
    }
}

/// Partial configuration update
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub enabled: Option<bool>,
    pub gateway_url: Option<String>,
    pub auto_connect: Option<bool>,
    pub request_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub reconnect_base_delay: Option<Duration>,
    pub max_reconnect_attempts: Option<u32>,
    pub default_thinking_level: Option<ThinkingLevel>,
    pub default_model: Option<String>,
    pub skills_enabled: Option<bool>,
    pub browser_enabled: Option<bool>,
    pub canvas_enabled: Option<bool>,
}
