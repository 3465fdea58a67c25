use std::path::PathBuf;

use navtrial::config::ConfigError;
use navtrial::logger::LogError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("log streams unavailable: {0}")]
    Log(#[from] LogError),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("bad input script: {0}")]
    Script(String),
}
