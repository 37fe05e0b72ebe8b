//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use super::types::Config;
use crate::error::{Error, Result};

/// On-disk configuration formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON5; also accepts plain JSON
    Json5,
    Toml,
}

impl ConfigFormat {
    /// Pick a format from the file extension. `None` means "try both".
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" | "json5" => Some(ConfigFormat::Json5),
            "toml" => Some(ConfigFormat::Toml),
            _ => None,
        }
    }

    fn parse(self, content: &str) -> Result<Config> {
        match self {
            ConfigFormat::Json5 => json5::from_str(content)
                .map_err(|e| Error::Config(format!("invalid JSON5: {}", e))),
            ConfigFormat::Toml => {
                toml::from_str(content).map_err(|e| Error::Config(format!("invalid TOML: {}", e)))
            }
        }
    }

    fn render(self, config: &Config) -> Result<String> {
        match self {
            ConfigFormat::Json5 => Ok(serde_json::to_string_pretty(config)?),
            ConfigFormat::Toml => toml::to_string_pretty(config)
                .map_err(|e| Error::Config(format!("cannot encode TOML: {}", e))),
        }
    }
}

fn parse_any(path: &Path, content: &str) -> Result<Config> {
    match ConfigFormat::from_path(path) {
        Some(format) => format.parse(content),
        None => ConfigFormat::Json5
            .parse(content)
            .or_else(|_| ConfigFormat::Toml.parse(content)),
    }
}

/// State of a config file on disk, for `config show` style reporting
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub path: PathBuf,
    pub exists: bool,
    pub raw: Option<String>,
    /// Parsed file content, before environment overrides
    pub config: Option<Config>,
    pub issues: Vec<String>,
}

/// Defaults, then the config file if present, then `CLAWLINK_*` variables
pub fn load_config() -> Result<Config> {
    let path = super::paths::config_path();
    let mut config = match path.is_file() {
        true => load_config_from_path(&path)?,
        false => Config::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse one config file; no environment overrides are applied
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
    parse_any(path, &content)
}

fn env_value<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}: cannot parse '{}'", key, raw);
            None
        }
    }
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| parse_flag(&v))
}

fn env_millis(key: &str) -> Option<Duration> {
    env_value::<u64>(key).map(Duration::from_millis)
}

/// Overlay `CLAWLINK_*` environment variables (after loading `.env`)
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();

    if let Some(enabled) = env_flag("CLAWLINK_ENABLED") {
        config.enabled = enabled;
    }
    if let Ok(url) = std::env::var("CLAWLINK_GATEWAY_URL") {
        config.gateway.url = url;
    }
    if let Some(auto_connect) = env_flag("CLAWLINK_AUTO_CONNECT") {
        config.gateway.auto_connect = auto_connect;
    }
    if let Some(timeout) = env_millis("CLAWLINK_REQUEST_TIMEOUT_MS") {
        config.gateway.request_timeout = timeout;
    }
    if let Some(timeout) = env_millis("CLAWLINK_CONNECT_TIMEOUT_MS") {
        config.gateway.connect_timeout = timeout;
    }
    if let Some(attempts) = env_value("CLAWLINK_RECONNECT_MAX_ATTEMPTS") {
        config.gateway.reconnect.max_attempts = attempts;
    }
    if let Some(delay) = env_millis("CLAWLINK_RECONNECT_BASE_DELAY_MS") {
        config.gateway.reconnect.base_delay = delay;
    }
    if let Some(level) = env_value("CLAWLINK_THINKING_LEVEL") {
        config.default_thinking_level = level;
    }
    if let Ok(model) = std::env::var("CLAWLINK_DEFAULT_MODEL") {
        config.default_model = Some(model);
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Write `config` to `path`, creating parent directories. TOML for
/// `.toml` paths, pretty JSON otherwise.
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let format = ConfigFormat::from_path(path).unwrap_or(ConfigFormat::Json5);
    let content = format.render(config)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, content)?;
    debug!("Saved configuration to {}", path.display());
    Ok(())
}

/// Inspect a config file without failing
pub fn read_config_snapshot(path: &Path) -> ConfigSnapshot {
    let mut snapshot = ConfigSnapshot {
        path: path.to_path_buf(),
        exists: path.exists(),
        raw: None,
        config: None,
        issues: Vec::new(),
    };
    if !snapshot.exists {
        snapshot.issues.push("file does not exist".to_string());
        return snapshot;
    }

    match std::fs::read_to_string(path) {
        Ok(raw) => {
            match parse_any(path, &raw) {
                Ok(config) => snapshot.config = Some(config),
                Err(e) => snapshot.issues.push(e.to_string()),
            }
            snapshot.raw = Some(raw);
        }
        Err(e) => snapshot.issues.push(format!("cannot read file: {}", e)),
    }
    snapshot
}
