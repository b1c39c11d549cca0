//! Actuation capability and its backends
//!
//! The dispatcher and trigger watcher only see the [`ActionExecutor`] and
//! [`InputReader`] traits. Which backend sits behind them is decided once
//! at startup from configuration and injected.

use crate::config::{ActuationConfig, GpioBackendKind};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub mod simulated;
pub mod status;
pub mod sysfs;

pub use simulated::SimulatedGpio;
pub use status::{pin_label, LineState, PinMode, PinStatus, SwitchState};
pub use sysfs::SysfsGpio;

/// Logical level of a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinLevel {
    Low,
    High,
}

impl PinLevel {
    pub fn as_bit(self) -> u8 {
        match self {
            PinLevel::Low => 0,
            PinLevel::High => 1,
        }
    }
}

/// Input pull resistor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    Up,
    Down,
}

/// Per-pin setup derived from the configured channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinSetup {
    Output { initial: PinLevel },
    Input { pull: Pull },
}

impl PinSetup {
    pub fn is_output(&self) -> bool {
        matches!(self, PinSetup::Output { .. })
    }
}

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("GPIO pin {0} is not configured")]
    NotConfigured(u32),
    /// Pin number too large to name any line
    #[error("GPIO pin {0} is not configured")]
    UnknownLine(String),
    #[error("GPIO pin {0} is not configured as OUTPUT")]
    NotOutput(u32),
    #[error("Error setting GPIO {pin}: {source}")]
    Io {
        pin: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("Unexpected value '{value}' read from GPIO {pin}")]
    InvalidValue { pin: u32, value: String },
}

/// Drives output lines
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Set an output; failures are descriptive strings, never panics
    async fn set_output(&self, pin: u32, value: PinLevel) -> Result<(), String>;
}

/// Samples input lines
#[async_trait]
pub trait InputReader: Send + Sync {
    async fn read_input(&self, pin: u32) -> Result<PinLevel, String>;
}

/// Backend selected from configuration
#[derive(Clone)]
pub enum GpioBackend {
    Sysfs(Arc<SysfsGpio>),
    Simulated(Arc<SimulatedGpio>),
}

impl GpioBackend {
    /// Open the configured backend and apply the pin table
    pub async fn open(config: &ActuationConfig) -> Result<Self, GpioError> {
        match config.backend {
            GpioBackendKind::Sysfs => {
                let gpio = SysfsGpio::open(config.sysfs_root.clone(), config.pins.clone()).await?;
                Ok(GpioBackend::Sysfs(Arc::new(gpio)))
            }
            GpioBackendKind::Simulated => Ok(GpioBackend::Simulated(Arc::new(
                SimulatedGpio::new(config.pins.clone()),
            ))),
        }
    }

    pub fn executor(&self) -> Arc<dyn ActionExecutor> {
        match self {
            GpioBackend::Sysfs(gpio) => gpio.clone(),
            GpioBackend::Simulated(gpio) => gpio.clone(),
        }
    }

    pub fn reader(&self) -> Arc<dyn InputReader> {
        match self {
            GpioBackend::Sysfs(gpio) => gpio.clone(),
            GpioBackend::Simulated(gpio) => gpio.clone(),
        }
    }

    /// Configured pin table
    pub fn pins(&self) -> &BTreeMap<u32, PinSetup> {
        match self {
            GpioBackend::Sysfs(gpio) => gpio.pins(),
            GpioBackend::Simulated(gpio) => gpio.pins(),
        }
    }

    pub fn kind(&self) -> GpioBackendKind {
        match self {
            GpioBackend::Sysfs(_) => GpioBackendKind::Sysfs,
            GpioBackend::Simulated(_) => GpioBackendKind::Simulated,
        }
    }

    /// Give the lines back to the system
    pub async fn release(&self) {
        if let GpioBackend::Sysfs(gpio) = self {
            gpio.release().await;
        }
    }
}

/// Shared validation for output writes
pub(crate) fn check_output(pins: &BTreeMap<u32, PinSetup>, pin: u32) -> Result<(), GpioError> {
    match pins.get(&pin) {
        None => Err(GpioError::NotConfigured(pin)),
        Some(setup) if !setup.is_output() => Err(GpioError::NotOutput(pin)),
        Some(_) => Ok(()),
    }
}
