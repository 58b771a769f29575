use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Loading or validating `kamishibai.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read channel config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("channel config {path} is not valid TOML: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("config key `{key}` {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
