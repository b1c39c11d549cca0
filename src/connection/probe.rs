//! Reachability probing
//!
//! A probe is a TCP connect-and-close with a short timeout, run before any
//! protocol handshake so unreachable brokers are skipped cheaply.

use crate::transport::Endpoint;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// True if the endpoint accepted a TCP connection within `timeout`
    async fn is_reachable(&self, endpoint: &Endpoint, timeout: Duration) -> bool;
}

/// Non-blocking TCP probe on the tokio reactor
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProbe;

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn is_reachable(&self, endpoint: &Endpoint, timeout: Duration) -> bool {
        let address = (endpoint.host(), endpoint.port());
        match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                true
            }
            Ok(Err(e)) => {
                debug!(%endpoint, error = %e, "Endpoint refused connection");
                false
            }
            Err(_) => {
                debug!(%endpoint, "Endpoint probe timed out");
                false
            }
        }
    }
}
