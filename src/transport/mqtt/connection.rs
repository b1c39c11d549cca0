//! Pure connection configuration for the MQTT transport
//!
//! This module contains the transport settings, error type, and the
//! function turning an endpoint plus settings into rumqttc options.

use crate::transport::endpoint::Endpoint;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;

/// Transport-level MQTT settings
#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Wait between the event loop's own reconnection attempts
    pub reconnect_wait: Duration,
    pub keep_alive: Duration,
    /// Bounded request channel capacity for the rumqttc client
    pub channel_capacity: usize,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            username_env: None,
            password_env: None,
            reconnect_wait: Duration::from_secs(10),
            keep_alive: Duration::from_secs(30),
            channel_capacity: 64,
        }
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("No broker endpoints to connect to")]
    NoCandidates,
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },
    #[error("ConnAck timeout - no connection confirmation received")]
    HandshakeTimeout,
    #[error("Publishing to '{topic}' failed")]
    PublishFailed {
        topic: String,
        #[source]
        source: rumqttc::v5::ClientError,
    },
    #[error("Subscribing to '{topic}' failed")]
    SubscriptionFailed {
        topic: String,
        #[source]
        source: rumqttc::v5::ClientError,
    },
    #[error("Not connected")]
    NotConnected,
}

/// Build rumqttc options for one endpoint
pub fn configure_mqtt_options(
    client_id: &str,
    endpoint: &Endpoint,
    settings: &MqttSettings,
) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(client_id, endpoint.host(), endpoint.port());

    if endpoint.is_tls() {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username_env) = &settings.username_env {
        if let Ok(username) = std::env::var(username_env) {
            let password = settings
                .password_env
                .as_ref()
                .and_then(|env_name| std::env::var(env_name).ok())
                .unwrap_or_default();
            mqtt_options.set_credentials(username, password);
        }
    }

    mqtt_options.set_keep_alive(settings.keep_alive);
    mqtt_options.set_clean_start(true);
    mqtt_options
}
