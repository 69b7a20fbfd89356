pub mod error;
pub mod project;

pub use error::*;
pub use project::{
    DEFAULT_TOKEN_ENV, ProjectConfig, RateLimitConfig, ResourceConfig, RetryConfig, TimeoutConfig,
    load,
};

use std::path::PathBuf;

pub const CONFIG_PATH_ENV: &str = "STRATOFLOW_CONFIG_PATH";

const CANDIDATES: [&str; 4] = [
    "strato.local.yaml",
    ".strato.local.yaml",
    "strato.yaml",
    ".strato.yaml",
];

/// Global StratoFlow config directory, created on first use
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("stratoflow");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locate the project configuration file
///
/// Search order:
/// 1. `STRATOFLOW_CONFIG_PATH`
/// 2. current directory: strato.local.yaml, .strato.local.yaml, strato.yaml, .strato.yaml
/// 3. `./.stratoflow/`, same order
/// 4. `<config dir>/stratoflow/strato.yaml`
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;

    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    let project_dir = current_dir.join(".stratoflow");
    if project_dir.is_dir() {
        for filename in &CANDIDATES {
            let path = project_dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("stratoflow").join("strato.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}
