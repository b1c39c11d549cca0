//! Transport layer for bus communication
//!
//! This module provides the transport abstraction the connection manager
//! drives, plus the MQTT implementation used in production.

use crate::protocol::InboundEnvelope;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

pub mod endpoint;
pub mod mqtt;

pub use endpoint::{Endpoint, EndpointError};

/// Session lifecycle events reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// First successful handshake of a session
    Connected,
    /// An established session lost its connection
    Disconnected,
    /// The transport restored a lost session on its own
    Reconnected,
}

/// Raw bus session capability
///
/// Owns the network session. Lifecycle policy (probing, throttling,
/// backoff, publish guarding) lives in the connection manager on top of it.
#[async_trait::async_trait]
pub trait BusTransport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Perform one protocol handshake against the candidate endpoints.
    ///
    /// Replaces any existing session. Once this succeeds the transport keeps
    /// the session alive on its own, reconnecting without bound.
    async fn connect(
        &self,
        candidates: &[Endpoint],
        client_id: &str,
        timeout: Duration,
    ) -> Result<(), Self::Error>;

    /// Close the session if one exists
    async fn close(&self) -> Result<(), Self::Error>;

    /// Publish raw bytes on a subject
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), Self::Error>;

    /// Subscribe to a subject; remembered and re-applied on every (re)connection
    async fn subscribe(&self, subject: &str) -> Result<(), Self::Error>;

    /// Set the channel inbound messages are forwarded to
    async fn set_inbound_sender(&self, sender: mpsc::Sender<InboundEnvelope>);

    /// Register for lifecycle events
    fn events(&self) -> broadcast::Receiver<TransportEvent>;

    /// True while an established session is in its own reconnect cycle
    fn is_recovering(&self) -> bool;
}
