//! Startup and configuration errors

use thiserror::Error;

/// Errors raised while assembling the daemon's configuration.
///
/// These are the only errors that abort the process; everything that
/// happens after startup is recovered by the scheduler.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Shorthand for a missing required setting.
    pub fn missing(setting: &str) -> Self {
        Error::Config(format!("{setting} is required"))
    }
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
