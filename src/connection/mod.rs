//! Connection lifecycle management
//!
//! [`ConnectionManager`] owns the policy layered over a
//! [`BusTransport`](crate::transport::BusTransport): reachability probing,
//! throttled and backed-off connect attempts, state tracking, and guarded
//! publishing. Recovery of an established session that drops is left to
//! the transport.

use crate::transport::Endpoint;
use std::fmt;
use std::time::Duration;

pub mod manager;
pub mod policy;
pub mod probe;

pub use manager::ConnectionManager;
pub use probe::{ReachabilityProbe, TcpProbe};

/// Connection state as seen by the rest of the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Last connect() exhausted its candidates or retries
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Immutable connection policy
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Ordered broker endpoints
    pub servers: Vec<Endpoint>,
    pub client_id: String,
    /// Bound on each handshake attempt
    pub connect_timeout: Duration,
    /// Handshake attempts per connect(), at least 1
    pub max_retries: u32,
    /// Throttle window and backoff base
    pub retry_delay: Duration,
    pub probe_timeout: Duration,
}
