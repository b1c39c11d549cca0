//! In-memory actuation backend

use super::{check_output, ActionExecutor, GpioError, InputReader, PinLevel, PinSetup, Pull};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::debug;

/// Simulated GPIO with the same validation rules as the hardware backend
pub struct SimulatedGpio {
    pins: BTreeMap<u32, PinSetup>,
    levels: Mutex<HashMap<u32, PinLevel>>,
}

impl SimulatedGpio {
    pub fn new(pins: BTreeMap<u32, PinSetup>) -> Self {
        let levels = pins
            .iter()
            .map(|(pin, setup)| {
                let level = match setup {
                    PinSetup::Output { initial } => *initial,
                    PinSetup::Input { pull: Pull::Up } => PinLevel::High,
                    PinSetup::Input { pull: Pull::Down } => PinLevel::Low,
                };
                (*pin, level)
            })
            .collect();

        Self {
            pins,
            levels: Mutex::new(levels),
        }
    }

    pub fn pins(&self) -> &BTreeMap<u32, PinSetup> {
        &self.pins
    }

    /// Current level of a configured pin
    pub fn level(&self, pin: u32) -> Option<PinLevel> {
        self.levels.lock().ok()?.get(&pin).copied()
    }

    /// Drive a simulated input line
    pub fn simulate_input(&self, pin: u32, level: PinLevel) -> Result<(), GpioError> {
        match self.pins.get(&pin) {
            Some(PinSetup::Input { .. }) => {
                if let Ok(mut levels) = self.levels.lock() {
                    levels.insert(pin, level);
                }
                Ok(())
            }
            Some(PinSetup::Output { .. }) => Err(GpioError::InvalidValue {
                pin,
                value: "input simulated on an output".to_string(),
            }),
            None => Err(GpioError::NotConfigured(pin)),
        }
    }
}

#[async_trait]
impl ActionExecutor for SimulatedGpio {
    async fn set_output(&self, pin: u32, value: PinLevel) -> Result<(), String> {
        check_output(&self.pins, pin).map_err(|e| e.to_string())?;

        if let Ok(mut levels) = self.levels.lock() {
            levels.insert(pin, value);
        }
        debug!(pin, level = value.as_bit(), "Simulated GPIO output set");
        Ok(())
    }
}

#[async_trait]
impl InputReader for SimulatedGpio {
    async fn read_input(&self, pin: u32) -> Result<PinLevel, String> {
        if !self.pins.contains_key(&pin) {
            return Err(GpioError::NotConfigured(pin).to_string());
        }
        self.level(pin)
            .ok_or_else(|| GpioError::NotConfigured(pin).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pins() -> BTreeMap<u32, PinSetup> {
        let mut pins = BTreeMap::new();
        pins.insert(
            5,
            PinSetup::Output {
                initial: PinLevel::High,
            },
        );
        pins.insert(21, PinSetup::Input { pull: Pull::Down });
        pins
    }

    #[tokio::test]
    async fn test_initial_levels() {
        let gpio = SimulatedGpio::new(pins());
        assert_eq!(gpio.level(5), Some(PinLevel::High));
        assert_eq!(gpio.read_input(21).await, Ok(PinLevel::Low));
    }

    #[tokio::test]
    async fn test_set_output() {
        let gpio = SimulatedGpio::new(pins());
        gpio.set_output(5, PinLevel::Low).await.unwrap();
        assert_eq!(gpio.level(5), Some(PinLevel::Low));
    }

    #[tokio::test]
    async fn test_set_output_rejects_unknown_and_input_pins() {
        let gpio = SimulatedGpio::new(pins());
        assert_eq!(
            gpio.set_output(9, PinLevel::Low).await,
            Err("GPIO pin 9 is not configured".to_string())
        );
        assert_eq!(
            gpio.set_output(21, PinLevel::Low).await,
            Err("GPIO pin 21 is not configured as OUTPUT".to_string())
        );
    }

    #[tokio::test]
    async fn test_simulate_input() {
        let gpio = SimulatedGpio::new(pins());
        gpio.simulate_input(21, PinLevel::High).unwrap();
        assert_eq!(gpio.read_input(21).await, Ok(PinLevel::High));
        assert!(gpio.simulate_input(5, PinLevel::High).is_err());
        assert!(gpio.simulate_input(9, PinLevel::High).is_err());
    }
}
