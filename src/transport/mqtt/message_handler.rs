//! Pure message routing for MQTT events
//!
//! Event-loop output is classified here before any I/O happens; forwarding
//! to the dispatcher channel is the only impure piece.

use crate::protocol::InboundEnvelope;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::Event;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Classifies event-loop output without side effects
pub struct MessageHandler;

impl MessageHandler {
    /// True when a publish should reach the dispatcher
    pub fn should_process_message(topic: &str, retain: bool, subscriptions: &[String]) -> bool {
        // Retained messages would replay a stale command on every reconnect
        if retain {
            debug!("Ignoring retained message on topic: {}", topic);
            return false;
        }

        if !subscriptions.iter().any(|s| s == topic) {
            debug!("Ignoring message on unsubscribed topic: {}", topic);
            return false;
        }

        true
    }

    /// Map one event-loop item to what the loop should do with it
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.clone(),
                    retain: publish.retain,
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }
}

/// What the event loop does with one polled item
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// ConnAck: the session is usable
    ConnectionAcknowledged,
    /// Inbound publish
    MessageReceived {
        topic: String,
        payload: bytes::Bytes,
        retain: bool,
    },
    /// Broker sent a disconnect
    Disconnected,
    SubscriptionConfirmed { packet_id: u16 },
    /// Keepalives, acks and other housekeeping
    InfrastructureEvent(String),
    /// Our own outgoing packets
    OutgoingEvent,
}

/// Forwards inbound envelopes to the dispatcher channel
#[derive(Default)]
pub struct MessageForwarder {
    sender: Option<mpsc::Sender<InboundEnvelope>>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self { sender: None }
    }

    pub fn set_sender(&mut self, sender: mpsc::Sender<InboundEnvelope>) {
        self.sender = Some(sender);
    }

    pub async fn forward(&self, envelope: InboundEnvelope) -> Result<(), String> {
        match &self.sender {
            Some(sender) => sender
                .send(envelope)
                .await
                .map_err(|e| format!("Failed to forward inbound message: {e}")),
            None => {
                warn!(
                    subject = %envelope.subject,
                    "Received message but no inbound sender configured - message dropped"
                );
                Err("No inbound sender configured".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, ConnectReturnCode, Publish};
    use rumqttc::v5::mqttbytes::QoS;

    fn subscriptions() -> Vec<String> {
        vec!["dunebugger.starter.dunebugger_set".to_string()]
    }

    #[test]
    fn test_should_process_message() {
        let subs = subscriptions();
        assert!(MessageHandler::should_process_message(
            "dunebugger.starter.dunebugger_set",
            false,
            &subs
        ));
        assert!(!MessageHandler::should_process_message(
            "dunebugger.starter.dunebugger_set",
            true,
            &subs
        ));
        assert!(!MessageHandler::should_process_message(
            "dunebugger.other.dunebugger_set",
            false,
            &subs
        ));
    }

    #[test]
    fn test_route_publish_event() {
        let event = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("dunebugger.starter.dunebugger_set"),
            pkid: 1,
            payload: Bytes::from(r#"{"body":"sw 5 on"}"#),
            properties: None,
        }));

        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                assert_eq!(topic, "dunebugger.starter.dunebugger_set");
                assert_eq!(payload, Bytes::from_static(br#"{"body":"sw 5 on"}"#));
                assert!(!retain);
            }
            other => panic!("Expected MessageReceived, got {other:?}"),
        }
    }

    #[test]
    fn test_route_connack_event() {
        let connack = ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        };
        let event = Event::Incoming(Packet::ConnAck(connack));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&event),
            EventRoute::ConnectionAcknowledged
        ));
    }

    #[tokio::test]
    async fn test_forwarder_without_sender() {
        let forwarder = MessageForwarder::new();
        let result = forwarder
            .forward(InboundEnvelope::new("a.b.c", Bytes::new()))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_forwarder_delivers() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut forwarder = MessageForwarder::new();
        forwarder.set_sender(tx);

        forwarder
            .forward(InboundEnvelope::new("a.b.c", Bytes::from_static(b"{}")))
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.subject, "a.b.c");
    }
}
