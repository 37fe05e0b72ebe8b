//! Feature toggle configuration
//!
//! Skills, browser control and canvas can each be switched off; the
//! matching gateway helpers refuse to run when their feature is disabled.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Skills configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Workspace skills directory on the gateway host
    #[serde(default = "default_workspace_path")]
    pub workspace_path: PathBuf,
    /// Let the gateway discover workspace skills automatically
    #[serde(default = "default_true")]
    pub auto_discover: bool,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        SkillsConfig {
            enabled: true,
            workspace_path: default_workspace_path(),
            auto_discover: true,
        }
    }
}

fn default_workspace_path() -> PathBuf {
    PathBuf::from("~/.openclaw/workspace/skills")
}

fn default_true() -> bool {
    true
}

/// Browser control configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub headless: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        BrowserConfig {
            enabled: false,
            headless: true,
        }
    }
}

/// Canvas configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasConfig {
    #[serde(default)]
    pub enabled: bool,
}
