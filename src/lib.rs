//! Dunebugger starter
//!
//! Edge agent that bridges a physical trigger and a set of switchable
//! outputs to a pub/sub message bus:
//!
//! - a rising edge on the trigger pin is published as an event envelope
//!   `{"body", "sender"}`
//! - `sw <pin> <on|off>` commands arriving on the command subjects drive the
//!   outputs, and a reply `{"body", "subject", "source"}` reports the outcome
//!
//! The [`connection::ConnectionManager`] owns connection policy (reachability
//! probing, throttled connects with exponential backoff, guarded publishing)
//! over a [`transport::BusTransport`]; the [`dispatch::CommandDispatcher`]
//! turns inbound envelopes into actuation calls.
//!
//! # Quick Start
//!
//! ```rust
//! use dunebugger_starter::dispatch::CommandDispatcher;
//! use dunebugger_starter::gpio::{PinLevel, PinSetup, SimulatedGpio};
//! use dunebugger_starter::protocol::InboundEnvelope;
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let mut pins = BTreeMap::new();
//! pins.insert(5, PinSetup::Output { initial: PinLevel::High });
//! let gpio = Arc::new(SimulatedGpio::new(pins));
//!
//! let dispatcher = CommandDispatcher::new(gpio.clone(), "dunebugger-starter");
//! let envelope = InboundEnvelope::new(
//!     "dunebugger.starter.dunebugger_set",
//!     r#"{"body": "sw 5 on"}"#,
//! );
//!
//! let outcome = dispatcher.dispatch(&envelope).await.unwrap();
//! assert!(outcome.result.success);
//! assert_eq!(gpio.level(5), Some(PinLevel::Low));
//! # });
//! ```

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod gpio;
pub mod observability;
pub mod protocol;
pub mod starter;
pub mod testing;
pub mod transport;
pub mod trigger;

pub use config::StarterConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use dispatch::CommandDispatcher;
pub use error::{StarterError, StarterResult};
pub use starter::StarterLifecycle;
