//! Configuration system for the dunebugger starter
//!
//! Configuration is read once from a TOML file at process start, validated,
//! and then handed to each component as an immutable value. Nothing in the
//! crate looks configuration up globally.

use crate::connection::ConnectionConfig;
use crate::gpio::{PinLevel, PinSetup, Pull};
use crate::transport::endpoint::Endpoint;
use crate::transport::mqtt::MqttSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main starter configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StarterConfig {
    #[serde(default)]
    pub general: GeneralSection,
    pub bus: BusSection,
    #[serde(default)]
    pub gpio: GpioSection,
    #[serde(default)]
    pub trigger: TriggerSection,
}

/// General section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralSection {
    /// Client identifier (must match [a-zA-Z0-9._-]+)
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Raises the default log level to DEBUG
    #[serde(default)]
    pub debug_mode: bool,
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            debug_mode: false,
        }
    }
}

/// Message bus section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Ordered list of broker endpoints, e.g. `mqtt://localhost:1883`
    pub servers: Vec<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    /// Wait between the transport's own reconnection attempts
    #[serde(default = "default_reconnect_wait")]
    pub reconnect_wait_secs: u64,
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_secs: u64,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    /// Subject the trigger event is published on
    #[serde(default = "default_event_subject")]
    pub event_subject: String,
    /// Body of the trigger event
    #[serde(default = "default_event_message")]
    pub event_message: String,
    /// Subjects carrying inbound commands
    #[serde(default = "default_command_subjects")]
    pub command_subjects: Vec<String>,
    /// First segment of reply subjects
    #[serde(default = "default_subject_root")]
    pub subject_root: String,
    /// Recipient segment of reply subjects; replies are dropped when unset
    pub reply_recipient: Option<String>,
}

/// GPIO section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpioSection {
    /// When false the simulated backend is used regardless of `backend`
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub backend: GpioBackendKind,
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelConfig>,
    /// Display names for pins in the status report, label to pin
    #[serde(default)]
    pub labels: BTreeMap<String, u32>,
}

impl Default for GpioSection {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: GpioBackendKind::default(),
            sysfs_root: default_sysfs_root(),
            channels: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }
}

/// Actuation backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GpioBackendKind {
    Sysfs,
    #[default]
    Simulated,
}

/// A named group of pins sharing one setup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelConfig {
    pub mode: ChannelMode,
    pub initial: InitialState,
    pub pins: Vec<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    Out,
    In,
}

/// Initial level for outputs, pull resistor for inputs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InitialState {
    High,
    Low,
    Up,
    Down,
}

/// Trigger input section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_trigger_pin")]
    pub pin: u32,
    #[serde(default = "default_bounce_threshold")]
    pub bounce_threshold_secs: f64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for TriggerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            pin: default_trigger_pin(),
            bounce_threshold_secs: default_bounce_threshold(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_client_id() -> String {
    "dunebugger-starter".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

fn default_reconnect_wait() -> u64 {
    10
}

fn default_publish_timeout() -> u64 {
    5
}

fn default_health_check_interval() -> u64 {
    1
}

fn default_probe_timeout() -> u64 {
    3
}

fn default_event_subject() -> String {
    "dunebugger.core.dunebugger_set".to_string()
}

fn default_event_message() -> String {
    "c".to_string()
}

fn default_command_subjects() -> Vec<String> {
    vec!["dunebugger.starter.dunebugger_set".to_string()]
}

fn default_subject_root() -> String {
    "dunebugger".to_string()
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}

fn default_trigger_pin() -> u32 {
    21
}

fn default_bounce_threshold() -> f64 {
    0.2
}

fn default_poll_interval() -> u64 {
    10
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid client ID format: {0}")]
    InvalidClientId(String),
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Pin table plus backend selection, derived from the `[gpio]` and `[trigger]` sections
#[derive(Debug, Clone, PartialEq)]
pub struct ActuationConfig {
    pub backend: GpioBackendKind,
    pub sysfs_root: PathBuf,
    pub pins: BTreeMap<u32, PinSetup>,
}

/// Trigger watcher settings
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerConfig {
    pub pin: u32,
    pub bounce: Duration,
    pub poll_interval: Duration,
}

impl StarterConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: StarterConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_client_id(&self.general.client_id)?;

        if self.bus.enabled {
            if self.bus.servers.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "bus.servers must list at least one endpoint".to_string(),
                ));
            }
            if self.bus.max_retries == 0 {
                return Err(ConfigError::InvalidConfig(
                    "bus.max_retries must be at least 1".to_string(),
                ));
            }
            self.endpoints()?;
        }

        if Duration::try_from_secs_f64(self.trigger.bounce_threshold_secs).is_err() {
            return Err(ConfigError::InvalidConfig(
                "trigger.bounce_threshold_secs must be a non-negative number of seconds"
                    .to_string(),
            ));
        }
        if self.trigger.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "trigger.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        self.pin_table()?;
        self.pin_labels()?;
        Ok(())
    }

    /// Parse the configured server list into endpoints
    pub fn endpoints(&self) -> Result<Vec<Endpoint>, ConfigError> {
        self.bus
            .servers
            .iter()
            .map(|raw| {
                Endpoint::parse(raw).map_err(|e| ConfigError::InvalidEndpoint(e.to_string()))
            })
            .collect()
    }

    /// Immutable connection policy for the connection manager
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        Ok(ConnectionConfig {
            servers: self.endpoints()?,
            client_id: self.general.client_id.clone(),
            connect_timeout: Duration::from_secs(self.bus.connect_timeout_secs),
            max_retries: self.bus.max_retries,
            retry_delay: Duration::from_secs(self.bus.retry_delay_secs),
            probe_timeout: Duration::from_secs(self.bus.probe_timeout_secs),
        })
    }

    /// Transport-level settings for the MQTT client
    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            username_env: self.bus.username_env.clone(),
            password_env: self.bus.password_env.clone(),
            reconnect_wait: Duration::from_secs(self.bus.reconnect_wait_secs),
            ..MqttSettings::default()
        }
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.bus.publish_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.bus.health_check_interval_secs.max(1))
    }

    /// Actuation settings; a disabled GPIO section always selects the simulated backend
    pub fn actuation_config(&self) -> Result<ActuationConfig, ConfigError> {
        let backend = if self.gpio.enabled {
            self.gpio.backend
        } else {
            GpioBackendKind::Simulated
        };
        Ok(ActuationConfig {
            backend,
            sysfs_root: self.gpio.sysfs_root.clone(),
            pins: self.pin_table()?,
        })
    }

    pub fn trigger_config(&self) -> TriggerConfig {
        TriggerConfig {
            pin: self.trigger.pin,
            bounce: Duration::try_from_secs_f64(self.trigger.bounce_threshold_secs)
                .unwrap_or_default(),
            poll_interval: Duration::from_millis(self.trigger.poll_interval_ms),
        }
    }

    /// Labels keyed by pin; a pin may carry at most one label
    pub fn pin_labels(&self) -> Result<BTreeMap<u32, String>, ConfigError> {
        let mut labels = BTreeMap::new();
        for (label, pin) in &self.gpio.labels {
            if let Some(existing) = labels.insert(*pin, label.clone()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "GPIO pin {pin} is labeled both '{existing}' and '{label}'"
                )));
            }
        }
        Ok(labels)
    }

    /// Flatten channel groups into a per-pin setup table.
    ///
    /// The trigger pin is added as a pulled-down input unless a channel
    /// already declares it as an input.
    pub fn pin_table(&self) -> Result<BTreeMap<u32, PinSetup>, ConfigError> {
        let mut table = BTreeMap::new();

        for (name, channel) in &self.gpio.channels {
            let setup = match (channel.mode, channel.initial) {
                (ChannelMode::Out, InitialState::High) => PinSetup::Output {
                    initial: PinLevel::High,
                },
                (ChannelMode::Out, InitialState::Low) => PinSetup::Output {
                    initial: PinLevel::Low,
                },
                (ChannelMode::In, InitialState::Up) => PinSetup::Input { pull: Pull::Up },
                (ChannelMode::In, InitialState::Down) => PinSetup::Input { pull: Pull::Down },
                (mode, initial) => {
                    return Err(ConfigError::InvalidConfig(format!(
                        "channel '{name}': initial state {initial:?} is not valid for mode {mode:?}"
                    )));
                }
            };

            for pin in &channel.pins {
                if table.insert(*pin, setup).is_some() {
                    return Err(ConfigError::InvalidConfig(format!(
                        "GPIO pin {pin} is declared by more than one channel"
                    )));
                }
            }
        }

        if self.trigger.enabled {
            match table.get(&self.trigger.pin) {
                Some(PinSetup::Output { .. }) => {
                    return Err(ConfigError::InvalidConfig(format!(
                        "trigger pin {} is configured as an output",
                        self.trigger.pin
                    )));
                }
                Some(PinSetup::Input { .. }) => {}
                None => {
                    table.insert(self.trigger.pin, PinSetup::Input { pull: Pull::Down });
                }
            }
        }

        Ok(table)
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[general]
client_id = "test-starter"

[bus]
servers = ["mqtt://localhost:1883"]
reply_recipient = "remote"

[gpio.channels.relays]
mode = "out"
initial = "high"
pins = [5, 6]
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Validate client ID format
fn validate_client_id(client_id: &str) -> Result<(), ConfigError> {
    let valid_chars = client_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if client_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidClientId(format!(
            "Client ID '{client_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}
