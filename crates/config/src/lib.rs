//! Configuration for the voice streaming gateway
//!
//! Settings are read from the process environment (or any source the `config`
//! crate can layer underneath). Provider credentials are carried opaquely and
//! never interpreted by the core.

pub mod settings;

pub use settings::{load_settings, PacingSettings, RateLimitSettings, Settings};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Read(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Read(err.to_string())
    }
}
