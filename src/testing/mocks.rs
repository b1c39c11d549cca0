//! Mock implementations for testing
//!
//! Provides a mock bus transport, reachability probe, actuation executor and
//! reply sink so the connection manager, dispatcher and lifecycle can be
//! exercised without a broker or GPIO hardware.

use crate::dispatch::ReplySink;
use crate::error::{StarterError, StarterResult};
use crate::gpio::{ActionExecutor, PinLevel};
use crate::protocol::{InboundEnvelope, OutboundEnvelope, ReplyEnvelope};
use crate::transport::{BusTransport, Endpoint, TransportEvent};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::Instant;

pub type PublishedMessage = (String, Vec<u8>);

/// Connect failures remaining when every attempt should fail
const ALWAYS: u32 = u32::MAX;

/// One recorded handshake
#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    pub at: Instant,
    pub candidates: Vec<Endpoint>,
}

/// Mock transport for testing
pub struct MockTransport {
    connect_attempts: Mutex<Vec<ConnectAttempt>>,
    connect_count: AtomicUsize,
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: Mutex<Vec<String>>,
    close_count: AtomicUsize,
    connect_failures: AtomicU32,
    connect_delay: Option<Duration>,
    publish_delay: Option<Duration>,
    fail_publish: AtomicBool,
    recovering: AtomicBool,
    events_tx: broadcast::Sender<TransportEvent>,
    inbound: Mutex<Option<mpsc::Sender<InboundEnvelope>>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        let (events_tx, _) = broadcast::channel(16);
        Self {
            connect_attempts: Mutex::new(Vec::new()),
            connect_count: AtomicUsize::new(0),
            published: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            close_count: AtomicUsize::new(0),
            connect_failures: AtomicU32::new(0),
            connect_delay: None,
            publish_delay: None,
            fail_publish: AtomicBool::new(false),
            recovering: AtomicBool::new(false),
            events_tx,
            inbound: Mutex::new(None),
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every handshake fails
    pub fn failing_connect() -> Self {
        Self::fail_first(ALWAYS)
    }

    /// The first `n` handshakes fail, later ones succeed
    pub fn fail_first(n: u32) -> Self {
        Self {
            connect_failures: AtomicU32::new(n),
            ..Default::default()
        }
    }

    /// Handshakes take `delay` before completing
    pub fn with_connect_delay(delay: Duration) -> Self {
        Self {
            connect_delay: Some(delay),
            ..Default::default()
        }
    }

    /// Publishes take `delay` before completing
    pub fn with_publish_delay(delay: Duration) -> Self {
        Self {
            publish_delay: Some(delay),
            ..Default::default()
        }
    }

    /// Publishes return an error
    pub fn with_publish_failure() -> Self {
        Self {
            fail_publish: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub async fn connect_attempts(&self) -> Vec<ConnectAttempt> {
        self.connect_attempts.lock().await.clone()
    }

    /// Handshakes so far, readable without awaiting
    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    /// Published payloads decoded as outbound envelopes
    pub async fn published_envelopes(&self) -> Vec<(String, OutboundEnvelope)> {
        self.published
            .lock()
            .await
            .iter()
            .filter_map(|(subject, payload)| {
                OutboundEnvelope::from_payload(payload)
                    .ok()
                    .map(|envelope| (subject.clone(), envelope))
            })
            .collect()
    }

    /// Published payloads as raw JSON values
    pub async fn published_json(&self) -> Vec<(String, serde_json::Value)> {
        self.published
            .lock()
            .await
            .iter()
            .filter_map(|(subject, payload)| {
                serde_json::from_slice(payload)
                    .ok()
                    .map(|value| (subject.clone(), value))
            })
            .collect()
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().await.clone()
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Report a lifecycle event as the real transport would
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn set_recovering(&self, recovering: bool) {
        self.recovering.store(recovering, Ordering::SeqCst);
    }

    /// Deliver an inbound message; false when no receiver is registered
    pub async fn inject(&self, subject: &str, payload: impl Into<bytes::Bytes>) -> bool {
        let sender = self.inbound.lock().await.clone();
        match sender {
            Some(sender) => sender
                .send(InboundEnvelope::new(subject, payload))
                .await
                .is_ok(),
            None => false,
        }
    }

    pub async fn clear_history(&self) {
        self.connect_attempts.lock().await.clear();
        self.published.lock().await.clear();
    }

    fn take_connect_failure(&self) -> bool {
        self.connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| match remaining {
                0 => None,
                ALWAYS => Some(ALWAYS),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

#[async_trait]
impl BusTransport for MockTransport {
    type Error = StarterError;

    async fn connect(
        &self,
        candidates: &[Endpoint],
        _client_id: &str,
        _timeout: Duration,
    ) -> Result<(), Self::Error> {
        self.connect_attempts.lock().await.push(ConnectAttempt {
            at: Instant::now(),
            candidates: candidates.to_vec(),
        });
        self.connect_count.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.take_connect_failure() {
            return Err(StarterError::transport("mock handshake refused"));
        }

        self.recovering.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::Connected);
        Ok(())
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.recovering.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        if let Some(delay) = self.publish_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(StarterError::transport("mock publish failure"));
        }

        self.published
            .lock()
            .await
            .push((subject.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<(), Self::Error> {
        let mut subscriptions = self.subscriptions.lock().await;
        if !subscriptions.iter().any(|existing| existing == subject) {
            subscriptions.push(subject.to_string());
        }
        Ok(())
    }

    async fn set_inbound_sender(&self, sender: mpsc::Sender<InboundEnvelope>) {
        *self.inbound.lock().await = Some(sender);
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events_tx.subscribe()
    }

    fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::SeqCst)
    }
}

/// Reachability probe answering from a fixed host list
#[derive(Debug, Default)]
pub struct MockProbe {
    /// `None` means every host is reachable
    reachable: Option<HashSet<String>>,
    probes: AtomicUsize,
}

impl MockProbe {
    pub fn all_up() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn all_down() -> Arc<Self> {
        Self::reachable(&[])
    }

    pub fn reachable(hosts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            reachable: Some(hosts.iter().map(|host| host.to_string()).collect()),
            probes: AtomicUsize::new(0),
        })
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl crate::connection::ReachabilityProbe for MockProbe {
    async fn is_reachable(&self, endpoint: &Endpoint, _timeout: Duration) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        match &self.reachable {
            None => true,
            Some(hosts) => hosts.contains(endpoint.host()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ExecutorMode {
    #[default]
    Succeed,
    Fail,
    Panic,
}

/// Action executor recording every call
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<(u32, PinLevel)>>,
    mode: ExecutorMode,
    failure: String,
}

impl RecordingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call returns `message` as its failure
    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            mode: ExecutorMode::Fail,
            failure: message.to_string(),
            ..Default::default()
        })
    }

    /// Every call panics with `message`
    pub fn panicking(message: &str) -> Arc<Self> {
        Arc::new(Self {
            mode: ExecutorMode::Panic,
            failure: message.to_string(),
            ..Default::default()
        })
    }

    pub async fn calls(&self) -> Vec<(u32, PinLevel)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn set_output(&self, pin: u32, value: PinLevel) -> Result<(), String> {
        self.calls.lock().await.push((pin, value));
        match self.mode {
            ExecutorMode::Succeed => Ok(()),
            ExecutorMode::Fail => Err(self.failure.clone()),
            ExecutorMode::Panic => panic!("{}", self.failure),
        }
    }
}

/// One reply captured by [`RecordingReplySink`]
#[derive(Debug, Clone, PartialEq)]
pub struct SentReply {
    pub envelope: ReplyEnvelope,
    pub recipient: String,
    pub reply_subject: Option<String>,
}

/// Reply sink recording every reply
#[derive(Debug, Default)]
pub struct RecordingReplySink {
    replies: Mutex<Vec<SentReply>>,
    should_fail: bool,
}

impl RecordingReplySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_failure() -> Arc<Self> {
        Arc::new(Self {
            should_fail: true,
            ..Default::default()
        })
    }

    pub async fn replies(&self) -> Vec<SentReply> {
        self.replies.lock().await.clone()
    }
}

#[async_trait]
impl ReplySink for RecordingReplySink {
    async fn send(
        &self,
        envelope: &ReplyEnvelope,
        recipient: &str,
        reply_subject: Option<&str>,
    ) -> StarterResult<()> {
        self.replies.lock().await.push(SentReply {
            envelope: envelope.clone(),
            recipient: recipient.to_string(),
            reply_subject: reply_subject.map(str::to_string),
        });
        if self.should_fail {
            return Err(StarterError::publish_failed(recipient));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ReachabilityProbe;

    fn endpoint(raw: &str) -> Endpoint {
        Endpoint::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_mock_transport_records_publish() {
        let transport = MockTransport::new();
        transport
            .publish("a.b.c", b"{\"body\":\"x\",\"sender\":\"s\"}".to_vec())
            .await
            .unwrap();

        let published = transport.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "a.b.c");
        assert_eq!(transport.published_envelopes().await[0].1.body(), "x");
    }

    #[tokio::test]
    async fn test_fail_first_then_succeed() {
        let transport = MockTransport::fail_first(2);
        let candidates = vec![endpoint("mqtt://localhost:1883")];
        let timeout = Duration::from_secs(1);

        assert!(transport.connect(&candidates, "id", timeout).await.is_err());
        assert!(transport.connect(&candidates, "id", timeout).await.is_err());
        assert!(transport.connect(&candidates, "id", timeout).await.is_ok());
        assert_eq!(transport.connect_attempts().await.len(), 3);
    }

    #[tokio::test]
    async fn test_failing_connect_never_succeeds() {
        let transport = MockTransport::failing_connect();
        let candidates = vec![endpoint("mqtt://localhost:1883")];
        for _ in 0..5 {
            assert!(transport
                .connect(&candidates, "id", Duration::from_secs(1))
                .await
                .is_err());
        }
    }

    #[tokio::test]
    async fn test_inject_without_receiver() {
        let transport = MockTransport::new();
        assert!(!transport.inject("a.b.c", "{}").await);

        let (tx, mut rx) = mpsc::channel(1);
        transport.set_inbound_sender(tx).await;
        assert!(transport.inject("a.b.c", "{}").await);
        assert_eq!(rx.recv().await.unwrap().subject, "a.b.c");
    }

    #[tokio::test]
    async fn test_mock_probe_hosts() {
        let probe = MockProbe::reachable(&["broker-b"]);
        let timeout = Duration::from_secs(1);
        assert!(!probe.is_reachable(&endpoint("mqtt://broker-a"), timeout).await);
        assert!(probe.is_reachable(&endpoint("mqtt://broker-b"), timeout).await);
        assert_eq!(probe.probe_count(), 2);

        let probe = MockProbe::all_down();
        assert!(!probe.is_reachable(&endpoint("mqtt://broker-a"), timeout).await);
    }

    #[tokio::test]
    async fn test_recording_executor_failure() {
        let executor = RecordingExecutor::failing("GPIO pin 9 is not configured");
        let result = executor.set_output(9, PinLevel::Low).await;
        assert_eq!(result, Err("GPIO pin 9 is not configured".to_string()));
        assert_eq!(executor.calls().await, vec![(9, PinLevel::Low)]);
    }
}
