//! Impure I/O operations for the MQTT transport
//!
//! This module owns the rumqttc client and its event loop task. A session
//! is only reported established after the broker's ConnAck; from then on
//! the event loop re-polls after errors, which is rumqttc's own reconnect.

use super::connection::{configure_mqtt_options, MqttError, MqttSettings};
use super::message_handler::{EventRoute, MessageForwarder, MessageHandler};
use crate::protocol::InboundEnvelope;
use crate::transport::{BusTransport, Endpoint, TransportEvent};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 16;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// A live client plus the task polling its event loop
struct Session {
    client: AsyncClient,
    endpoint: Endpoint,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// State shared with the event loop task
#[derive(Clone)]
struct EventLoopContext {
    client: AsyncClient,
    endpoint: Endpoint,
    subscriptions: Arc<Mutex<Vec<String>>>,
    forwarder: Arc<Mutex<MessageForwarder>>,
    events_tx: broadcast::Sender<TransportEvent>,
    recovering: Arc<AtomicBool>,
    reconnect_wait: Duration,
}

/// MQTT implementation of [`BusTransport`]
pub struct MqttTransport {
    settings: MqttSettings,
    session: Mutex<Option<Session>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    forwarder: Arc<Mutex<MessageForwarder>>,
    events_tx: broadcast::Sender<TransportEvent>,
    recovering: Arc<AtomicBool>,
}

impl MqttTransport {
    pub fn new(settings: MqttSettings) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            settings,
            session: Mutex::new(None),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            forwarder: Arc::new(Mutex::new(MessageForwarder::new())),
            events_tx,
            recovering: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start an event loop against one endpoint and wait for its ConnAck
    async fn try_endpoint(
        &self,
        endpoint: &Endpoint,
        client_id: &str,
        deadline: Instant,
    ) -> Result<Session, MqttError> {
        let options = configure_mqtt_options(client_id, endpoint, &self.settings);
        let (client, event_loop) = AsyncClient::new(options, self.settings.channel_capacity);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = oneshot::channel();

        let context = EventLoopContext {
            client: client.clone(),
            endpoint: endpoint.clone(),
            subscriptions: self.subscriptions.clone(),
            forwarder: self.forwarder.clone(),
            events_tx: self.events_tx.clone(),
            recovering: self.recovering.clone(),
            reconnect_wait: self.settings.reconnect_wait,
        };
        let handle = tokio::spawn(run_event_loop(event_loop, context, ready_tx, shutdown_rx));

        match tokio::time::timeout_at(deadline, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(Session {
                client,
                endpoint: endpoint.clone(),
                shutdown_tx,
                handle,
            }),
            Ok(Ok(Err(reason))) => {
                handle.abort();
                Err(MqttError::ConnectionFailed {
                    endpoint: endpoint.to_string(),
                    reason,
                })
            }
            Ok(Err(_)) => {
                handle.abort();
                Err(MqttError::ConnectionFailed {
                    endpoint: endpoint.to_string(),
                    reason: "event loop stopped before ConnAck".to_string(),
                })
            }
            Err(_) => {
                let _ = shutdown_tx.send(true);
                handle.abort();
                Err(MqttError::HandshakeTimeout)
            }
        }
    }

    /// Tear down the current session, waiting briefly for the event loop to stop
    async fn close_session(&self) -> Result<(), MqttError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };

        let _ = session.shutdown_tx.send(true);
        if let Err(e) = session.client.try_disconnect() {
            debug!("Disconnect request not queued: {}", e);
        }
        self.recovering.store(false, Ordering::SeqCst);

        match tokio::time::timeout(CLOSE_GRACE, session.handle).await {
            Ok(Ok(())) => info!(endpoint = %session.endpoint, "MQTT session closed"),
            Ok(Err(e)) if !e.is_cancelled() => {
                warn!("Event loop task ended with error: {}", e);
            }
            Err(_) => warn!("Event loop task didn't shut down gracefully"),
            _ => {}
        }
        Ok(())
    }
}

/// Poll the event loop until shutdown
async fn run_event_loop(
    mut event_loop: EventLoop,
    context: EventLoopContext,
    ready_tx: oneshot::Sender<Result<(), String>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ready_tx = Some(ready_tx);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Shutdown signal received, stopping event loop");
                    break;
                }
            }
            polled = event_loop.poll() => match polled {
                Ok(event) => {
                    let route = MessageHandler::route_mqtt_event(&event);
                    process_event_route(route, &context, &mut ready_tx).await;
                }
                Err(e) => {
                    if let Some(tx) = ready_tx.take() {
                        // Handshake never completed; connect() reports the failure
                        let _ = tx.send(Err(e.to_string()));
                        break;
                    }

                    if !context.recovering.swap(true, Ordering::SeqCst) {
                        warn!(endpoint = %context.endpoint, error = %e, "MQTT connection lost");
                        let _ = context.events_tx.send(TransportEvent::Disconnected);
                    } else {
                        debug!(endpoint = %context.endpoint, error = %e, "MQTT reconnection attempt failed");
                    }

                    if !interruptible_sleep(shutdown_rx.clone(), context.reconnect_wait).await {
                        break;
                    }
                }
            }
        }
    }

    debug!(endpoint = %context.endpoint, "MQTT event loop stopped");
}

async fn process_event_route(
    route: EventRoute,
    context: &EventLoopContext,
    ready_tx: &mut Option<oneshot::Sender<Result<(), String>>>,
) {
    match route {
        EventRoute::ConnectionAcknowledged => {
            context.recovering.store(false, Ordering::SeqCst);
            resubscribe_to_topics(&context.client, &context.subscriptions).await;

            if let Some(tx) = ready_tx.take() {
                let _ = tx.send(Ok(()));
                let _ = context.events_tx.send(TransportEvent::Connected);
            } else {
                info!(endpoint = %context.endpoint, "MQTT session restored");
                let _ = context.events_tx.send(TransportEvent::Reconnected);
            }
        }
        EventRoute::MessageReceived {
            topic,
            payload,
            retain,
        } => {
            let subscriptions = context.subscriptions.lock().await.clone();
            if !MessageHandler::should_process_message(&topic, retain, &subscriptions) {
                return;
            }

            let forwarder = context.forwarder.lock().await;
            if let Err(e) = forwarder
                .forward(InboundEnvelope::new(topic, payload))
                .await
            {
                error!("{}", e);
            }
        }
        EventRoute::Disconnected => {
            debug!(endpoint = %context.endpoint, "Broker sent disconnect");
        }
        EventRoute::SubscriptionConfirmed { packet_id } => {
            debug!(target: "mqtt_transport", "Subscription confirmed: {}", packet_id);
        }
        EventRoute::InfrastructureEvent(event) => {
            debug!(target: "mqtt_transport", "MQTT event: {}", event);
        }
        EventRoute::OutgoingEvent => {}
    }
}

async fn resubscribe_to_topics(client: &AsyncClient, subscriptions: &Arc<Mutex<Vec<String>>>) {
    let topics = subscriptions.lock().await.clone();
    for topic in topics {
        // The event loop task is the one draining this channel, so never block on it
        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
            error!("Failed to re-subscribe to {}: {}", topic, e);
        } else {
            debug!(target: "mqtt_transport", "Re-subscribed to: {}", topic);
        }
    }
}

/// Perform interruptible sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(delay) => true,
    }
}

#[async_trait]
impl BusTransport for MqttTransport {
    type Error = MqttError;

    async fn connect(
        &self,
        candidates: &[Endpoint],
        client_id: &str,
        timeout: Duration,
    ) -> Result<(), Self::Error> {
        if candidates.is_empty() {
            return Err(MqttError::NoCandidates);
        }

        self.close_session().await?;

        let deadline = Instant::now() + timeout;
        let mut last_error = MqttError::HandshakeTimeout;

        for endpoint in candidates {
            if Instant::now() >= deadline {
                break;
            }
            debug!(%endpoint, "Attempting MQTT handshake");

            match self.try_endpoint(endpoint, client_id, deadline).await {
                Ok(session) => {
                    info!(%endpoint, client_id, "MQTT handshake complete");
                    *self.session.lock().await = Some(session);
                    return Ok(());
                }
                Err(e) => {
                    warn!(%endpoint, error = %e, "MQTT handshake failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.close_session().await
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        let client = match self.session.lock().await.as_ref() {
            Some(session) => session.client.clone(),
            None => return Err(MqttError::NotConnected),
        };

        client
            .publish(subject, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|source| MqttError::PublishFailed {
                topic: subject.to_string(),
                source,
            })
    }

    async fn subscribe(&self, subject: &str) -> Result<(), Self::Error> {
        {
            let mut subscriptions = self.subscriptions.lock().await;
            if !subscriptions.iter().any(|s| s == subject) {
                subscriptions.push(subject.to_string());
            }
        }

        let client = self
            .session
            .lock()
            .await
            .as_ref()
            .map(|session| session.client.clone());

        match client {
            Some(client) => {
                client
                    .subscribe(subject, QoS::AtLeastOnce)
                    .await
                    .map_err(|source| MqttError::SubscriptionFailed {
                        topic: subject.to_string(),
                        source,
                    })?;
                info!("Subscribed to: {}", subject);
            }
            None => debug!("No session yet, {} will be subscribed on connect", subject),
        }
        Ok(())
    }

    async fn set_inbound_sender(&self, sender: mpsc::Sender<InboundEnvelope>) {
        self.forwarder.lock().await.set_sender(sender);
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events_tx.subscribe()
    }

    fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::SeqCst)
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        // No async in Drop; close() is the graceful path
        if let Some(session) = self.session.get_mut().take() {
            let _ = session.shutdown_tx.send(true);
            session.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_session_fails() {
        let transport = MqttTransport::new(MqttSettings::default());
        let result = transport.publish("a.b.c", b"{}".to_vec()).await;
        assert!(matches!(result, Err(MqttError::NotConnected)));
    }

    #[tokio::test]
    async fn test_close_without_session() {
        let transport = MqttTransport::new(MqttSettings::default());
        assert!(transport.close().await.is_ok());
        assert!(transport.session.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_without_candidates() {
        let transport = MqttTransport::new(MqttSettings::default());
        let result = transport
            .connect(&[], "test-starter", Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(MqttError::NoCandidates)));
    }

    #[tokio::test]
    async fn test_subscribe_without_session_is_remembered() {
        let transport = MqttTransport::new(MqttSettings::default());
        transport.subscribe("a.b.c").await.unwrap();
        transport.subscribe("a.b.c").await.unwrap();
        assert_eq!(*transport.subscriptions.lock().await, vec!["a.b.c"]);
    }

    #[tokio::test]
    async fn test_connect_refused_endpoint_fails() {
        // Bind then drop to get a local port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = MqttTransport::new(MqttSettings::default());
        let endpoint = Endpoint::parse(&format!("mqtt://127.0.0.1:{port}")).unwrap();
        let result = transport
            .connect(&[endpoint], "test-starter", Duration::from_secs(2))
            .await;

        assert!(result.is_err());
        assert!(!transport.is_recovering());
        assert!(transport.session.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });

        assert!(!interruptible_sleep(shutdown_rx, Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        assert!(interruptible_sleep(shutdown_rx, Duration::from_millis(5)).await);
    }
}
