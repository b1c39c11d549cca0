//! MQTT transport over rumqttc
//!
//! Dot-delimited bus subjects are used verbatim as MQTT topic names.
//!
//! # Architecture
//!
//! - [`connection`] - Transport settings, errors and option construction
//! - [`message_handler`] - Pure event routing plus inbound forwarding
//! - [`client`] - The event loop task and the [`BusTransport`](crate::transport::BusTransport) impl
//!
//! # Usage
//!
//! ```rust,no_run
//! use dunebugger_starter::transport::mqtt::{MqttSettings, MqttTransport};
//! use dunebugger_starter::transport::{BusTransport, Endpoint};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let transport = MqttTransport::new(MqttSettings::default());
//! let endpoint = Endpoint::parse("mqtt://localhost:1883")?;
//! transport
//!     .connect(&[endpoint], "dunebugger-starter", Duration::from_secs(10))
//!     .await?;
//! transport.subscribe("dunebugger.starter.dunebugger_set").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttTransport;
pub use connection::{configure_mqtt_options, MqttError, MqttSettings};
pub use message_handler::{EventRoute, MessageForwarder, MessageHandler};
