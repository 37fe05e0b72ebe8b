//! Configuration module - Modular configuration management
//!
//! - types/mod.rs: Core configuration types (Config, GatewayConfig, etc.)
//! - types/features.rs: Skills, browser and canvas toggles
//! - io.rs: Configuration loading and saving
//! - validation.rs: Configuration validation
//! - paths.rs: Configuration file paths

mod io;
mod paths;
mod types;
mod validation;

// Re-export core config types
pub use types::{
    Config, ConfigUpdate, GatewayConfig, ReconnectConfig, ThinkingLevel, DEFAULT_GATEWAY_URL,
};

// Re-export feature types
pub use types::features::{BrowserConfig, CanvasConfig, SkillsConfig};

// Re-export IO and utilities
pub use io::{
    apply_env_overrides, load_config, load_config_from_path, read_config_snapshot, save_config,
    ConfigFormat, ConfigSnapshot,
};
pub use paths::{config_dir, config_path};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
