//! Pure connection policy: state transitions, backoff math, reconnect decisions

use super::ConnectionState;
use crate::transport::TransportEvent;
use std::time::Duration;
use tracing::{error, info, warn};

/// Backoff before the retry following `attempt_index` (0-based): `base * 2^attempt_index`
pub fn backoff_delay(base: Duration, attempt_index: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt_index).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

/// Total backoff spent by a connect() that exhausts `max_retries` handshakes
pub fn total_backoff(base: Duration, max_retries: u32) -> Duration {
    (0..max_retries.saturating_sub(1))
        .map(|i| backoff_delay(base, i))
        .fold(Duration::ZERO, Duration::saturating_add)
}

/// Map a transport lifecycle event to the next state (pure function)
pub fn state_after_event(event: TransportEvent) -> ConnectionState {
    match event {
        TransportEvent::Connected | TransportEvent::Reconnected => ConnectionState::Connected,
        TransportEvent::Disconnected => ConnectionState::Disconnected,
    }
}

/// Check if connection state allows publishing (pure function)
pub fn can_publish(state: ConnectionState) -> bool {
    matches!(state, ConnectionState::Connected)
}

/// Whether the health check should invoke connect() (pure function)
///
/// A session the transport is already restoring is left alone, as is an
/// attempt already in flight.
pub fn should_trigger_reconnect(state: ConnectionState, transport_recovering: bool) -> bool {
    matches!(
        state,
        ConnectionState::Disconnected | ConnectionState::Failed
    ) && !transport_recovering
}

/// Log connection state transition (pure logging function)
pub fn log_state_transition(from: ConnectionState, to: ConnectionState) {
    match (from, to) {
        (ConnectionState::Connecting, ConnectionState::Connected) => {
            info!("Bus connection established");
        }
        (ConnectionState::Connected, ConnectionState::Disconnected) => {
            warn!("Bus connection lost");
        }
        (ConnectionState::Disconnected, ConnectionState::Connected) => {
            info!("Bus connection restored");
        }
        (_, ConnectionState::Failed) => {
            error!("Bus connection failed");
        }
        (from, to) if from != to => {
            info!("Bus connection state: {} -> {}", from, to);
        }
        _ => {}
    }
}
