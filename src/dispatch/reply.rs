//! Reply delivery for dispatched commands

use crate::connection::ConnectionManager;
use crate::error::{StarterError, StarterResult};
use crate::observability::metrics::metrics;
use crate::protocol::{reply_subject, OutboundEnvelope, ReplyEnvelope};
use crate::transport::BusTransport;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Sends reply envelopes to a recipient
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Deliver `envelope` to `recipient`, on `reply_subject` when given
    async fn send(
        &self,
        envelope: &ReplyEnvelope,
        recipient: &str,
        reply_subject: Option<&str>,
    ) -> StarterResult<()>;
}

/// Publishes replies through the connection manager
///
/// Without an explicit reply subject, replies go to
/// `{subject_root}.{recipient}.{routing_key}`.
pub struct BusReplySink<T: BusTransport> {
    manager: Arc<ConnectionManager<T>>,
    subject_root: String,
    publish_timeout: Duration,
}

impl<T: BusTransport + 'static> BusReplySink<T> {
    pub fn new(
        manager: Arc<ConnectionManager<T>>,
        subject_root: impl Into<String>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            subject_root: subject_root.into(),
            publish_timeout,
        }
    }
}

#[async_trait]
impl<T: BusTransport + 'static> ReplySink for BusReplySink<T> {
    async fn send(
        &self,
        envelope: &ReplyEnvelope,
        recipient: &str,
        reply_subject_override: Option<&str>,
    ) -> StarterResult<()> {
        let subject = match reply_subject_override {
            Some(subject) => subject.to_string(),
            None => reply_subject(&self.subject_root, recipient, &envelope.subject),
        };

        let outbound = OutboundEnvelope::Reply(envelope.clone());
        if self
            .manager
            .publish_envelope(&subject, &outbound, self.publish_timeout)
            .await
        {
            metrics().reply_published();
            Ok(())
        } else {
            Err(StarterError::publish_failed(subject))
        }
    }
}
