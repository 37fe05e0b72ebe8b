//! Where configuration lives on disk
//!
//! `CLAWLINK_CONFIG` names the file outright; otherwise the file is
//! `config.json` inside `CLAWLINK_CONFIG_DIR`, or the platform config
//! directory (`~/.config/clawlink` on Linux).

use std::path::PathBuf;

const APP_DIR: &str = "clawlink";
const FILE_NAME: &str = "config.json";

fn resolve_dir(override_dir: Option<String>, platform_dir: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    platform_dir
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .map(|base| base.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(format!(".{}", APP_DIR)))
}

/// Directory holding the config file
pub fn config_dir() -> PathBuf {
    resolve_dir(std::env::var("CLAWLINK_CONFIG_DIR").ok(), dirs::config_dir())
}

/// Full path of the config file
pub fn config_path() -> PathBuf {
    match std::env::var("CLAWLINK_CONFIG") {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => config_dir().join(FILE_NAME),
    }
}
