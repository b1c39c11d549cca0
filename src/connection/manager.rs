//! Connection manager: lifecycle policy over a bus transport
//!
//! connect() probes every endpoint, hands the reachable ones to the
//! transport for up to `max_retries` handshakes with exponential backoff,
//! and is throttled so tight caller loops never reach the network. State
//! changes reported by the transport after that are mirrored into the
//! shared [`ConnectionState`] and nothing else.

use super::policy::{
    backoff_delay, can_publish, log_state_transition, state_after_event, total_backoff,
};
use super::probe::{ReachabilityProbe, TcpProbe};
use super::{ConnectionConfig, ConnectionState};
use crate::observability::metrics::metrics;
use crate::protocol::{EventEnvelope, InboundEnvelope, OutboundEnvelope};
use crate::transport::{BusTransport, Endpoint, TransportEvent};
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Outer bound on a handshake beyond `connect_timeout`
const HANDSHAKE_BUFFER: Duration = Duration::from_secs(2);
const INBOUND_CHANNEL_CAPACITY: usize = 100;

pub struct ConnectionManager<T: BusTransport> {
    config: ConnectionConfig,
    transport: Arc<T>,
    probe: Arc<dyn ReachabilityProbe>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    /// Start of the last connect() that was not throttled
    last_attempt: Mutex<Option<Instant>>,
    /// Serializes connect() so two callers never race handshakes
    connect_guard: tokio::sync::Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundEnvelope>>>,
    listener: JoinHandle<()>,
}

impl<T: BusTransport + 'static> ConnectionManager<T> {
    /// Create a manager probing endpoints over TCP
    pub async fn new(config: ConnectionConfig, transport: Arc<T>) -> Self {
        Self::with_probe(config, transport, Arc::new(TcpProbe)).await
    }

    /// Create a manager with an explicit reachability probe
    pub async fn with_probe(
        config: ConnectionConfig,
        transport: Arc<T>,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        transport.set_inbound_sender(inbound_tx).await;

        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let state_tx = Arc::new(state_tx);
        let (shutdown_tx, _) = watch::channel(false);

        // Registered exactly once; events only ever update state
        let listener = tokio::spawn(Self::listen_for_events(
            transport.events(),
            state_tx.clone(),
            shutdown_tx.subscribe(),
        ));

        Self {
            config,
            transport,
            probe,
            state_tx,
            last_attempt: Mutex::new(None),
            connect_guard: tokio::sync::Mutex::new(()),
            shutdown_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            listener,
        }
    }

    async fn listen_for_events(
        mut events: broadcast::Receiver<TransportEvent>,
        state_tx: Arc<watch::Sender<ConnectionState>>,
        shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    debug!(?event, "Transport lifecycle event");
                    if *shutdown_rx.borrow() {
                        debug!(?event, "Shut down, ignoring transport event");
                        continue;
                    }
                    if event == TransportEvent::Disconnected {
                        metrics().connection_lost();
                    }
                    apply_state(&state_tx, state_after_event(event));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed transport lifecycle events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Establish a session; returns true once the transport is connected.
    ///
    /// Never errors: every failure ends as `false` plus a log line.
    pub async fn connect(&self) -> bool {
        if *self.shutdown_tx.borrow() {
            debug!("Connect requested after shutdown, ignoring");
            return false;
        }

        let Ok(_guard) = self.connect_guard.try_lock() else {
            debug!("Connect already in progress");
            return false;
        };

        if !self.begin_attempt() {
            debug!(
                retry_delay_secs = self.config.retry_delay.as_secs_f64(),
                "Connect throttled"
            );
            metrics().connect_throttled();
            return false;
        }

        metrics().connect_attempt();
        self.set_state(ConnectionState::Connecting);

        let candidates = self.reachable_endpoints().await;
        if candidates.is_empty() {
            error!(
                servers = self.config.servers.len(),
                "No bus endpoint is reachable"
            );
            metrics().connection_failed();
            self.set_state(ConnectionState::Failed);
            return false;
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let max_retries = self.config.max_retries.max(1);
        debug!(
            candidates = candidates.len(),
            max_retries,
            backoff_budget_secs = total_backoff(self.config.retry_delay, max_retries).as_secs_f64(),
            "Starting bus handshake"
        );

        for attempt in 0..max_retries {
            metrics().handshake_attempt();
            let handshake = self.transport.connect(
                &candidates,
                &self.config.client_id,
                self.config.connect_timeout,
            );

            match tokio::time::timeout(self.config.connect_timeout + HANDSHAKE_BUFFER, handshake)
                .await
            {
                Ok(Ok(())) if *shutdown_rx.borrow() => {
                    // shutdown() ran while the handshake was in flight
                    info!("Shutdown requested during handshake, closing new session");
                    if let Err(e) = self.transport.close().await {
                        warn!(error = %e, "Error closing bus session");
                    }
                    self.set_state(ConnectionState::Disconnected);
                    return false;
                }
                Ok(Ok(())) => {
                    metrics().connection_established();
                    self.set_state(ConnectionState::Connected);
                    info!(
                        client_id = %self.config.client_id,
                        attempt = attempt + 1,
                        "Connected to bus"
                    );
                    return true;
                }
                Ok(Err(e)) => {
                    warn!(
                        attempt = attempt + 1,
                        max_retries,
                        error = %e,
                        "Bus handshake failed"
                    );
                }
                Err(_) => {
                    warn!(attempt = attempt + 1, max_retries, "Bus handshake timed out");
                }
            }

            if attempt + 1 < max_retries {
                let delay = backoff_delay(self.config.retry_delay, attempt);
                info!(
                    delay_secs = delay.as_secs_f64(),
                    "Retrying bus connection after backoff"
                );
                if !sleep_unless_shutdown(&mut shutdown_rx, delay).await {
                    info!("Shutdown requested during connection backoff");
                    self.set_state(ConnectionState::Disconnected);
                    return false;
                }
            }
        }

        error!(max_retries, "Failed to connect to bus after all attempts");
        metrics().connection_failed();
        self.set_state(ConnectionState::Failed);
        false
    }

    /// Record the attempt start unless the throttle window is still open
    fn begin_attempt(&self) -> bool {
        let now = Instant::now();
        let Ok(mut last_attempt) = self.last_attempt.lock() else {
            return false;
        };
        if let Some(previous) = *last_attempt {
            if now.duration_since(previous) < self.config.retry_delay {
                return false;
            }
        }
        *last_attempt = Some(now);
        true
    }

    /// Probe every endpoint concurrently, keeping configured order
    async fn reachable_endpoints(&self) -> Vec<Endpoint> {
        let probes = self.config.servers.iter().map(|endpoint| async move {
            let reachable = self
                .probe
                .is_reachable(endpoint, self.config.probe_timeout)
                .await;
            if !reachable {
                warn!(%endpoint, "Bus endpoint unreachable, skipping");
            }
            (endpoint, reachable)
        });

        join_all(probes)
            .await
            .into_iter()
            .filter(|(_, reachable)| *reachable)
            .map(|(endpoint, _)| endpoint.clone())
            .collect()
    }

    /// Close the session if one exists; always ends Disconnected
    pub async fn disconnect(&self) {
        if self.state() == ConnectionState::Connected || self.transport.is_recovering() {
            if let Err(e) = self.transport.close().await {
                warn!(error = %e, "Error closing bus session");
            }
            info!("Disconnected from bus");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Cancel any in-flight backoff and disconnect; later connect() calls return false
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        self.disconnect().await;
    }

    /// Publish an event envelope `{body, sender}` on `subject`
    pub async fn send(&self, subject: &str, body: &str, timeout: Duration) -> bool {
        let envelope = OutboundEnvelope::Event(EventEnvelope {
            body: body.to_string(),
            sender: self.config.client_id.clone(),
        });
        self.publish_envelope(subject, &envelope, timeout).await
    }

    /// Publish a prepared envelope; false when not connected, on error, or on timeout
    pub async fn publish_envelope(
        &self,
        subject: &str,
        envelope: &OutboundEnvelope,
        timeout: Duration,
    ) -> bool {
        let state = self.state();
        if !can_publish(state) {
            error!(subject, %state, "Cannot publish, not connected to bus");
            metrics().publish_failed();
            return false;
        }

        let payload = match envelope.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(subject, error = %e, "Failed to serialize envelope");
                metrics().publish_failed();
                return false;
            }
        };

        match tokio::time::timeout(timeout, self.transport.publish(subject, payload)).await {
            Ok(Ok(())) => {
                debug!(subject, "Published message");
                true
            }
            Ok(Err(e)) => {
                error!(subject, error = %e, "Publish failed");
                metrics().publish_failed();
                false
            }
            Err(_) => {
                // The session stays up; only this message is lost
                warn!(
                    subject,
                    timeout_secs = timeout.as_secs_f64(),
                    "Publish timed out"
                );
                metrics().publish_failed();
                false
            }
        }
    }

    /// Subscribe through the transport; kept across reconnections
    pub async fn subscribe(&self, subject: &str) -> bool {
        match self.transport.subscribe(subject).await {
            Ok(()) => true,
            Err(e) => {
                error!(subject, error = %e, "Subscribe failed");
                false
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// True while the transport is restoring a lost session on its own
    pub fn is_recovering(&self) -> bool {
        self.transport.is_recovering()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Take the inbound message stream; only the first caller gets it
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<InboundEnvelope>> {
        self.inbound_rx.lock().ok()?.take()
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn set_state(&self, next: ConnectionState) {
        apply_state(&self.state_tx, next);
    }
}

impl<T: BusTransport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

fn apply_state(state_tx: &watch::Sender<ConnectionState>, next: ConnectionState) {
    let previous = state_tx.send_replace(next);
    if previous != next {
        log_state_transition(previous, next);
        metrics().set_connection_state(&next.to_string());
    }
}

/// Returns false if shutdown was signalled before `delay` elapsed
async fn sleep_unless_shutdown(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
    }
}
