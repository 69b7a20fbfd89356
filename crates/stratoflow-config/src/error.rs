use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "No configuration file found. Looked in:\n\
        - current directory: strato.local.yaml, .strato.local.yaml, strato.yaml, .strato.yaml\n\
        - ./.stratoflow/\n\
        - <config dir>/stratoflow/strato.yaml\n\
        Set STRATOFLOW_CONFIG_PATH to point at a file directly"
    )]
    ConfigFileNotFound,

    #[error("Invalid configuration in {path}: {message}")]
    Invalid { path: String, message: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
