//! Configuration loader for Stepwise.
//!
//! Resolution order: explicit path (from `--config`), then `$STEPWISE_CONFIG`,
//! then `~/.stepwise/config.toml`. A missing default file yields
//! [`StepwiseConfig::default()`]; a file the user named explicitly must exist
//! and parse.

use std::path::{Path, PathBuf};

use stepwise_types::config::StepwiseConfig;
use stepwise_types::error::ConfigError;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "STEPWISE_CONFIG";

/// `~/.stepwise/config.toml`, if a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".stepwise").join("config.toml"))
}

/// Load configuration, see module docs for the lookup order.
pub async fn load_config(explicit: Option<&Path>) -> Result<StepwiseConfig, ConfigError> {
    if let Some(path) = explicit {
        return read_config(path).await;
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return read_config(Path::new(&path)).await;
    }
    match default_config_path() {
        Some(path) => load_optional(&path).await,
        None => Ok(StepwiseConfig::default()),
    }
}

/// Read `path`, returning defaults if it does not exist.
pub async fn load_optional(path: &Path) -> Result<StepwiseConfig, ConfigError> {
    match tokio::fs::try_exists(path).await {
        Ok(true) => read_config(path).await,
        _ => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            Ok(StepwiseConfig::default())
        }
    }
}

async fn read_config(path: &Path) -> Result<StepwiseConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
