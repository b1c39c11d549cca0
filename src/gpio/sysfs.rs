//! Hardware backend over the Linux sysfs GPIO interface
//!
//! Each configured pin is exported under `<root>/gpioN`, given a direction,
//! and then driven through its `value` file. Pull resistors cannot be set
//! through sysfs; they are expected to be configured by the board overlay.

use super::{check_output, ActionExecutor, GpioError, InputReader, PinLevel, PinSetup};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

pub struct SysfsGpio {
    root: PathBuf,
    pins: BTreeMap<u32, PinSetup>,
}

impl SysfsGpio {
    /// Export and configure every pin in the table.
    ///
    /// On failure the pins exported so far are unexported again.
    pub async fn open(root: PathBuf, pins: BTreeMap<u32, PinSetup>) -> Result<Self, GpioError> {
        let gpio = Self { root, pins };

        let mut exported = Vec::with_capacity(gpio.pins.len());
        for (pin, setup) in &gpio.pins {
            let configured = match gpio.export(*pin).await {
                Ok(()) => {
                    exported.push(*pin);
                    gpio.set_direction(*pin, setup).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = configured {
                warn!(pin, error = %e, "GPIO setup failed, releasing exported pins");
                gpio.unexport(exported).await;
                return Err(e);
            }
        }

        info!(
            root = %gpio.root.display(),
            pins = gpio.pins.len(),
            "Sysfs GPIO initialized"
        );
        Ok(gpio)
    }

    pub fn pins(&self) -> &BTreeMap<u32, PinSetup> {
        &self.pins
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    async fn export(&self, pin: u32) -> Result<(), GpioError> {
        if fs::metadata(self.pin_dir(pin)).await.is_ok() {
            return Ok(());
        }
        write_attr(&self.root.join("export"), &pin.to_string())
            .await
            .map_err(|source| GpioError::Io { pin, source })
    }

    async fn set_direction(&self, pin: u32, setup: &PinSetup) -> Result<(), GpioError> {
        // Writing "high"/"low" sets direction and initial value in one step
        let direction = match setup {
            PinSetup::Output {
                initial: PinLevel::High,
            } => "high",
            PinSetup::Output {
                initial: PinLevel::Low,
            } => "low",
            PinSetup::Input { .. } => "in",
        };
        write_attr(&self.pin_dir(pin).join("direction"), direction)
            .await
            .map_err(|source| GpioError::Io { pin, source })?;
        debug!(pin, direction, "GPIO pin configured");
        Ok(())
    }

    async fn unexport(&self, pins: impl IntoIterator<Item = u32>) {
        for pin in pins {
            if let Err(e) = write_attr(&self.root.join("unexport"), &pin.to_string()).await {
                warn!(pin, error = %e, "Failed to unexport GPIO pin");
            }
        }
    }

    /// Unexport all configured pins
    pub async fn release(&self) {
        self.unexport(self.pins.keys().copied()).await;
        info!("GPIO pins released");
    }
}

async fn write_attr(path: &Path, value: &str) -> std::io::Result<()> {
    fs::write(path, value.as_bytes()).await
}

fn parse_level(pin: u32, raw: &str) -> Result<PinLevel, GpioError> {
    match raw.trim() {
        "0" => Ok(PinLevel::Low),
        "1" => Ok(PinLevel::High),
        other => Err(GpioError::InvalidValue {
            pin,
            value: other.to_string(),
        }),
    }
}

#[async_trait]
impl ActionExecutor for SysfsGpio {
    async fn set_output(&self, pin: u32, value: PinLevel) -> Result<(), String> {
        check_output(&self.pins, pin).map_err(|e| e.to_string())?;

        write_attr(
            &self.pin_dir(pin).join("value"),
            &value.as_bit().to_string(),
        )
        .await
        .map_err(|source| GpioError::Io { pin, source }.to_string())?;

        debug!(pin, level = value.as_bit(), "GPIO output set");
        Ok(())
    }
}

#[async_trait]
impl InputReader for SysfsGpio {
    async fn read_input(&self, pin: u32) -> Result<PinLevel, String> {
        if !self.pins.contains_key(&pin) {
            return Err(GpioError::NotConfigured(pin).to_string());
        }

        let raw = fs::read_to_string(self.pin_dir(pin).join("value"))
            .await
            .map_err(|source| GpioError::Io { pin, source }.to_string())?;
        parse_level(pin, &raw).map_err(|e| e.to_string())
    }
}
