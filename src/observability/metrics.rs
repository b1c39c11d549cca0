//! Thread-safe metrics collection
//!
//! Atomic counters for the bus connection, command dispatch, and the
//! trigger, shared process-wide through [`metrics()`].

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics
pub struct MetricsCollector {
    // Connection metrics
    bus_connected: AtomicBool,
    connect_attempts: AtomicU64,
    connect_throttled: AtomicU64,
    handshake_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    connection_start_time: AtomicU64,

    // Message metrics
    messages_received: AtomicU64,
    messages_dropped: AtomicU64,
    commands_succeeded: AtomicU64,
    commands_failed: AtomicU64,
    replies_published: AtomicU64,
    events_published: AtomicU64,
    publish_failures: AtomicU64,

    // Trigger metrics
    triggers_fired: AtomicU64,
    last_trigger: AtomicU64,

    // Lifecycle metrics
    connection_state: Mutex<String>,
    uptime_start: AtomicU64,
    state_transitions: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            bus_connected: AtomicBool::new(false),
            connect_attempts: AtomicU64::new(0),
            connect_throttled: AtomicU64::new(0),
            handshake_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            commands_succeeded: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            replies_published: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            triggers_fired: AtomicU64::new(0),
            last_trigger: AtomicU64::new(0),
            connection_state: Mutex::new("disconnected".to_string()),
            uptime_start: AtomicU64::new(current_timestamp()),
            state_transitions: AtomicU64::new(0),
        }
    }

    // Connection metrics
    pub fn connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connect_throttled(&self) {
        self.connect_throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_attempt(&self) {
        self.handshake_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.bus_connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.bus_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.bus_connected.store(false, Ordering::Relaxed);
    }

    pub fn set_connection_state(&self, state: &str) {
        if let Ok(mut current_state) = self.connection_state.lock() {
            if *current_state != state {
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
                *current_state = state.to_string();
            }
        }
        self.bus_connected
            .store(state == "connected", Ordering::Relaxed);
    }

    // Message metrics
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_completed(&self, success: bool) {
        if success {
            self.commands_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn reply_published(&self) {
        self.replies_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Trigger metrics
    pub fn trigger_fired(&self) {
        self.triggers_fired.fetch_add(1, Ordering::Relaxed);
        self.last_trigger
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.connect_attempts,
            &self.connect_throttled,
            &self.handshake_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.connections_lost,
            &self.connection_start_time,
            &self.messages_received,
            &self.messages_dropped,
            &self.commands_succeeded,
            &self.commands_failed,
            &self.replies_published,
            &self.events_published,
            &self.publish_failures,
            &self.triggers_fired,
            &self.last_trigger,
            &self.state_transitions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.bus_connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut state) = self.connection_state.lock() {
            *state = "disconnected".to_string();
        }
    }

    fn connection_duration(&self, now: u64) -> u64 {
        if !self.bus_connected.load(Ordering::Relaxed) {
            return 0;
        }
        match self.connection_start_time.load(Ordering::Relaxed) {
            0 => 0,
            start => now.saturating_sub(start),
        }
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let current_state = self
            .connection_state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| "unknown".to_string());

        MetricsSnapshot {
            connection: ConnectionMetrics {
                connected: self.bus_connected.load(Ordering::Relaxed),
                state: current_state,
                connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
                connect_throttled: self.connect_throttled.load(Ordering::Relaxed),
                handshake_attempts: self.handshake_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
                connection_duration_seconds: self.connection_duration(now),
            },
            messages: MessageMetrics {
                messages_received: self.messages_received.load(Ordering::Relaxed),
                messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
                commands_succeeded: self.commands_succeeded.load(Ordering::Relaxed),
                commands_failed: self.commands_failed.load(Ordering::Relaxed),
                replies_published: self.replies_published.load(Ordering::Relaxed),
                events_published: self.events_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
            },
            trigger: TriggerMetrics {
                triggers_fired: self.triggers_fired.load(Ordering::Relaxed),
                last_trigger: self.last_trigger.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub connection: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub trigger: TriggerMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct ConnectionMetrics {
    pub connected: bool,
    pub state: String,
    pub connect_attempts: u64,
    pub connect_throttled: u64,
    pub handshake_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub state_transitions: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct MessageMetrics {
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub commands_succeeded: u64,
    pub commands_failed: u64,
    pub replies_published: u64,
    pub events_published: u64,
    pub publish_failures: u64,
}

#[derive(Debug, Serialize)]
pub struct TriggerMetrics {
    pub triggers_fired: u64,
    pub last_trigger: u64,
}

pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_connection_metrics() {
        let collector = MetricsCollector::new();

        collector.connect_attempt();
        collector.handshake_attempt();
        collector.handshake_attempt();
        collector.connection_established();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.connection.connect_attempts, 1);
        assert_eq!(metrics.connection.handshake_attempts, 2);
        assert_eq!(metrics.connection.connections_established, 1);
        assert!(metrics.connection.connected);

        collector.connection_lost();
        assert!(!collector.get_metrics().connection.connected);
    }

    #[test]
    fn test_command_metrics() {
        let collector = MetricsCollector::new();

        collector.message_received();
        collector.message_received();
        collector.message_dropped();
        collector.command_completed(true);
        collector.reply_published();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.messages.messages_received, 2);
        assert_eq!(metrics.messages.messages_dropped, 1);
        assert_eq!(metrics.messages.commands_succeeded, 1);
        assert_eq!(metrics.messages.commands_failed, 0);
        assert_eq!(metrics.messages.replies_published, 1);
    }

    #[test]
    fn test_state_transitions_counted_once_per_change() {
        let collector = MetricsCollector::new();

        collector.set_connection_state("connecting");
        collector.set_connection_state("connecting");
        collector.set_connection_state("connected");

        let metrics = collector.get_metrics();
        assert_eq!(metrics.connection.state_transitions, 2);
        assert_eq!(metrics.connection.state, "connected");
        assert!(metrics.connection.connected);
    }

    #[test]
    fn test_reset() {
        let collector = MetricsCollector::new();
        collector.trigger_fired();
        collector.publish_failed();
        collector.reset();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.trigger.triggers_fired, 0);
        assert_eq!(metrics.messages.publish_failures, 0);
        assert_eq!(metrics.connection.state, "disconnected");
    }

    #[test]
    fn test_concurrent_updates() {
        let collector = Arc::new(MetricsCollector::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let collector = collector.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        collector.message_received();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(collector.get_metrics().messages.messages_received, 400);
    }

    #[test]
    fn test_snapshot_serializes() {
        let collector = MetricsCollector::new();
        let json = serde_json::to_value(collector.get_metrics()).unwrap();
        assert!(json["connection"]["connect_attempts"].is_u64());
        assert!(json["trigger"]["triggers_fired"].is_u64());
    }
}
