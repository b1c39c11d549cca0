//! Per-pin status report

use super::{GpioBackend, PinLevel, PinSetup};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Configured direction of a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PinMode {
    Input,
    Output,
}

/// Level as reported; `Error` when the line could not be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LineState {
    High,
    Low,
    Error,
}

/// Relay view of the level; lines are active-low
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SwitchState {
    On,
    Off,
    Error,
}

/// One row of the status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PinStatus {
    pub pin: u32,
    pub label: String,
    pub mode: PinMode,
    pub state: LineState,
    pub switch: SwitchState,
}

impl PinStatus {
    pub fn new(pin: u32, label: String, setup: &PinSetup, level: Option<PinLevel>) -> Self {
        let mode = if setup.is_output() {
            PinMode::Output
        } else {
            PinMode::Input
        };
        let (state, switch) = match level {
            Some(PinLevel::High) => (LineState::High, SwitchState::Off),
            Some(PinLevel::Low) => (LineState::Low, SwitchState::On),
            None => (LineState::Error, SwitchState::Error),
        };
        Self {
            pin,
            label,
            mode,
            state,
            switch,
        }
    }
}

/// Configured label for `pin`, or `GPIO_<pin>`
pub fn pin_label(labels: &BTreeMap<u32, String>, pin: u32) -> String {
    labels
        .get(&pin)
        .cloned()
        .unwrap_or_else(|| format!("GPIO_{pin}"))
}

impl GpioBackend {
    /// Read every configured line, in pin order
    pub async fn status(&self, labels: &BTreeMap<u32, String>) -> Vec<PinStatus> {
        let reader = self.reader();
        let pins = self.pins();
        let mut report = Vec::with_capacity(pins.len());

        for (pin, setup) in pins {
            let level = match reader.read_input(*pin).await {
                Ok(level) => Some(level),
                Err(e) => {
                    warn!(pin, error = %e, "Failed to read GPIO state");
                    None
                }
            };
            report.push(PinStatus::new(*pin, pin_label(labels, *pin), setup, level));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::{Pull, SimulatedGpio};
    use std::sync::Arc;

    fn backend() -> (GpioBackend, Arc<SimulatedGpio>) {
        let mut pins = BTreeMap::new();
        pins.insert(
            6,
            PinSetup::Output {
                initial: PinLevel::High,
            },
        );
        pins.insert(
            5,
            PinSetup::Output {
                initial: PinLevel::High,
            },
        );
        pins.insert(21, PinSetup::Input { pull: Pull::Down });
        let gpio = Arc::new(SimulatedGpio::new(pins));
        (GpioBackend::Simulated(gpio.clone()), gpio)
    }

    #[test]
    fn test_pin_label_fallback() {
        let mut labels = BTreeMap::new();
        labels.insert(5, "relay_pump".to_string());
        assert_eq!(pin_label(&labels, 5), "relay_pump");
        assert_eq!(pin_label(&labels, 6), "GPIO_6");
    }

    #[tokio::test]
    async fn test_status_reports_every_pin_in_order() {
        let (backend, gpio) = backend();
        let mut labels = BTreeMap::new();
        labels.insert(5, "relay_pump".to_string());

        backend.executor().set_output(5, PinLevel::Low).await.unwrap();
        gpio.simulate_input(21, PinLevel::High).unwrap();

        let report = backend.status(&labels).await;
        let pins: Vec<u32> = report.iter().map(|row| row.pin).collect();
        assert_eq!(pins, vec![5, 6, 21]);

        assert_eq!(
            report[0],
            PinStatus {
                pin: 5,
                label: "relay_pump".to_string(),
                mode: PinMode::Output,
                state: LineState::Low,
                switch: SwitchState::On,
            }
        );
        assert_eq!(report[1].label, "GPIO_6");
        assert_eq!(report[1].switch, SwitchState::Off);
        assert_eq!(report[2].mode, PinMode::Input);
        assert_eq!(report[2].state, LineState::High);
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let row = PinStatus::new(
            5,
            "GPIO_5".to_string(),
            &PinSetup::Output {
                initial: PinLevel::High,
            },
            None,
        );
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "pin": 5,
                "label": "GPIO_5",
                "mode": "OUTPUT",
                "state": "ERROR",
                "switch": "ERROR"
            })
        );
    }
}
