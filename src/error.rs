//! Error types for the dunebugger starter
//!
//! Each layer owns a focused error enum (`ConfigError`, `GpioError`,
//! `MqttError`); `StarterError` is the crate-wide wrapper used at the
//! lifecycle and CLI level.

use thiserror::Error;

/// Main error type for starter operations
#[derive(Debug, Error)]
pub enum StarterError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("GPIO error: {0}")]
    Gpio(#[from] crate::gpio::GpioError),

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Publishing to '{subject}' failed")]
    PublishFailed { subject: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl StarterError {
    /// Create transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create publish failure error
    pub fn publish_failed<S: Into<String>>(subject: S) -> Self {
        Self::PublishFailed {
            subject: subject.into(),
        }
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type for starter operations
pub type StarterResult<T> = Result<T, StarterError>;
