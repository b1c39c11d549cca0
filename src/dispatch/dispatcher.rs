//! Command dispatch pipeline
//!
//! Turns one inbound envelope into at most one [`CommandResult`]:
//!
//! 1. payload must be UTF-8 JSON holding an object
//! 2. subject must have at least three segments; the third is the routing key
//! 3. the routing key must be recognized
//! 4. the object must have a `body` field
//! 5. the body is tokenized and executed
//!
//! Failures in steps 1-4 drop the message with a log line and no reply.
//! Failures in step 5 are user-facing and come back as a result with
//! `success: false`. Nothing panics or errors past [`CommandDispatcher::dispatch`].

use super::reply::ReplySink;
use crate::command_span;
use crate::gpio::{ActionExecutor, GpioError, PinLevel};
use crate::observability::metrics::metrics;
use crate::protocol::{
    is_recognized_routing_key, routing_key, CommandResult, InboundEnvelope, ParsedCommand,
    ReplyEnvelope, SWITCH_ROUTING_KEY,
};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn, Instrument};

/// Result of a dispatched command plus the routing key it answers
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub routing_key: String,
    pub result: CommandResult,
}

/// Validation failures of the `sw` command
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SwitchError {
    #[error("Incorrect number of arguments for sw command. Usage: sw <pin> <on|off>")]
    WrongArity,
    #[error("Invalid GPIO number")]
    InvalidPin,
    #[error("Invalid action for sw command, must be 'on' or 'off'")]
    InvalidAction,
}

/// Validated `sw <pin> <on|off>` command
///
/// `pin` is all ASCII digits but may be too large for any line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchCommand {
    pub pin: String,
    pub on: bool,
}

impl SwitchCommand {
    pub fn parse(args: &[String]) -> Result<Self, SwitchError> {
        let [pin, action] = args else {
            return Err(SwitchError::WrongArity);
        };

        if pin.is_empty() || !pin.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SwitchError::InvalidPin);
        }

        let on = match action.as_str() {
            "on" => true,
            "off" => false,
            _ => return Err(SwitchError::InvalidAction),
        };

        Ok(Self {
            pin: pin.clone(),
            on,
        })
    }

    /// Line number, or None when it does not fit any line
    pub fn pin_number(&self) -> Option<u32> {
        self.pin.parse().ok()
    }

    /// Lines are active-low: "on" drives the pin low
    pub fn level(&self) -> PinLevel {
        if self.on {
            PinLevel::Low
        } else {
            PinLevel::High
        }
    }

    pub fn action(&self) -> &'static str {
        if self.on {
            "on"
        } else {
            "off"
        }
    }
}

struct ReplyChannel {
    sink: Arc<dyn ReplySink>,
    recipient: String,
}

pub struct CommandDispatcher {
    executor: Arc<dyn ActionExecutor>,
    client_id: String,
    reply: Option<ReplyChannel>,
}

impl CommandDispatcher {
    /// Dispatcher with replies disabled
    pub fn new(executor: Arc<dyn ActionExecutor>, client_id: impl Into<String>) -> Self {
        Self {
            executor,
            client_id: client_id.into(),
            reply: None,
        }
    }

    /// Enable replies through `sink` addressed to `recipient`
    pub fn with_reply_sink(
        mut self,
        sink: Arc<dyn ReplySink>,
        recipient: impl Into<String>,
    ) -> Self {
        self.reply = Some(ReplyChannel {
            sink,
            recipient: recipient.into(),
        });
        self
    }

    pub fn has_reply_channel(&self) -> bool {
        self.reply.is_some()
    }

    /// Decode, validate and execute one envelope
    pub async fn dispatch(&self, envelope: &InboundEnvelope) -> Option<DispatchOutcome> {
        metrics().message_received();

        let Some(record) = decode_payload(envelope) else {
            metrics().message_dropped();
            return None;
        };

        let key = match routing_key(&envelope.subject) {
            Ok(key) => key,
            Err(e) => {
                error!(subject = %envelope.subject, "{}", e);
                metrics().message_dropped();
                return None;
            }
        };

        if !is_recognized_routing_key(key) {
            warn!(
                subject = %envelope.subject,
                routing_key = key,
                "Unknown subject, ignoring message"
            );
            metrics().message_dropped();
            return None;
        }

        let Some(body) = record.get("body") else {
            error!(
                subject = %envelope.subject,
                message = %preview(&record),
                "Message has no body field"
            );
            metrics().message_dropped();
            return None;
        };

        debug!(routing_key = key, message = %preview(&record), "Processing message");

        let result = match AssertUnwindSafe(self.execute(key, body))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let description = panic_description(panic.as_ref());
                error!("Command processing error: {}", description);
                CommandResult::error(format!("Command processing error: {description}"))
            }
        };

        metrics().command_completed(result.success);
        Some(DispatchOutcome {
            routing_key: key.to_string(),
            result,
        })
    }

    async fn execute(&self, key: &str, body: &Value) -> CommandResult {
        let Some(command) = body.as_str() else {
            error!("Command processing error: body must be a string");
            return CommandResult::error("Command processing error: body must be a string");
        };

        let Some(parsed) = ParsedCommand::parse(command) else {
            return CommandResult::error("Empty command");
        };

        match (key, parsed.verb.as_str()) {
            (SWITCH_ROUTING_KEY, "sw") => self.handle_switch(&parsed.args).await,
            (_, verb) => CommandResult::warning(format!("Unknown command: {verb}")),
        }
    }

    async fn handle_switch(&self, args: &[String]) -> CommandResult {
        let command = match SwitchCommand::parse(args) {
            Ok(command) => command,
            Err(e) => return CommandResult::error(e.to_string()),
        };

        let Some(pin) = command.pin_number() else {
            let message = GpioError::UnknownLine(command.pin.clone()).to_string();
            error!(pin = %command.pin, "Failed to set GPIO {}: {}", command.pin, message);
            return CommandResult::error(message);
        };

        match self.executor.set_output(pin, command.level()).await {
            Ok(()) => {
                let message = format!("GPIO {} set to {}", pin, command.action());
                info!(pin, action = command.action(), "{}", message);
                CommandResult::info(message)
            }
            Err(message) => {
                error!(pin, "Failed to set GPIO {}: {}", pin, message);
                CommandResult::error(message)
            }
        }
    }

    /// Dispatch and, when a reply channel is configured, send the reply
    pub async fn handle(&self, envelope: &InboundEnvelope) -> Option<DispatchOutcome> {
        let outcome = self.dispatch(envelope).await?;

        match &self.reply {
            Some(channel) => {
                let reply = ReplyEnvelope {
                    body: outcome.result.message.clone(),
                    subject: outcome.routing_key.clone(),
                    source: self.client_id.clone(),
                };
                if let Err(e) = channel.sink.send(&reply, &channel.recipient, None).await {
                    warn!(recipient = %channel.recipient, error = %e, "Reply not delivered");
                }
            }
            None => {
                debug!(
                    routing_key = %outcome.routing_key,
                    "Replies disabled, not sending reply"
                );
            }
        }

        Some(outcome)
    }

    /// Handle envelopes in delivery order until the channel closes or shutdown
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<InboundEnvelope>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Command dispatcher started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                next = inbound.recv() => match next {
                    Some(envelope) => {
                        let span = command_span!(subject = %envelope.subject);
                        self.handle(&envelope).instrument(span).await;
                    }
                    None => break,
                },
            }
        }
        info!("Command dispatcher stopped");
    }
}

/// Payload bytes to a JSON object, logging why when that fails
fn decode_payload(envelope: &InboundEnvelope) -> Option<serde_json::Map<String, Value>> {
    let text = match std::str::from_utf8(&envelope.payload) {
        Ok(text) => text,
        Err(e) => {
            error!(
                subject = %envelope.subject,
                "Failed to decode message data: {}. Raw message: {:?}",
                e,
                envelope.payload
            );
            return None;
        }
    };

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(record)) => Some(record),
        Ok(other) => {
            error!(
                subject = %envelope.subject,
                "Message is not a JSON object: {}",
                other
            );
            None
        }
        Err(e) => {
            error!(
                subject = %envelope.subject,
                "Failed to parse message as JSON: {}. Raw message: {}",
                e,
                text
            );
            None
        }
    }
}

fn preview(record: &serde_json::Map<String, Value>) -> String {
    let rendered = Value::Object(record.clone()).to_string();
    rendered.chars().take(100).collect()
}

fn panic_description(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
