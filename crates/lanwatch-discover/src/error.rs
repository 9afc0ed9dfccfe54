//! Error types for the lanwatch-discover crate.

use thiserror::Error;

use lanwatch_core::error::ConfigError;
use lanwatch_store::StoreError;

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A pass is already active; the request was rejected, not queued.
    #[error("Scan already running")]
    SessionBusy,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DiscoverError>;
