//! CLI command implementations.

pub mod classify;
pub mod config;
pub mod ledger;
pub mod run;

use std::path::{Path, PathBuf};

use stmtflow_core::models::config::StmtflowConfig;

/// Per-user configuration file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stmtflow")
        .join("config.json")
}

/// The file a command reads its configuration from.
pub fn config_file(config_path: Option<&str>) -> PathBuf {
    config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path)
}

/// Load the explicit config file, else the per-user file, else defaults.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<StmtflowConfig> {
    if let Some(path) = config_path {
        let path = Path::new(path);
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        return Ok(StmtflowConfig::from_file(path)?);
    }

    let path = default_config_path();
    if path.exists() {
        Ok(StmtflowConfig::from_file(&path)?)
    } else {
        Ok(StmtflowConfig::default())
    }
}
