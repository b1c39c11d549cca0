//! Message types for the starter bus protocol
//!
//! This module defines the inbound envelope delivered by the transport,
//! the parsed command and its result, and the two outbound envelope shapes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Raw message delivered by the transport
///
/// Consumed exactly once by the command dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEnvelope {
    /// Dot-delimited subject the message arrived on
    pub subject: String,
    /// Undecoded payload bytes
    pub payload: Bytes,
}

impl InboundEnvelope {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
        }
    }
}

/// Severity attached to a command result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultLevel {
    Info,
    Warning,
    Error,
}

/// Outcome of a dispatched command
///
/// # Examples
/// ```
/// use dunebugger_starter::protocol::{CommandResult, ResultLevel};
///
/// let result = CommandResult::info("GPIO 5 set to on");
/// assert!(result.success);
/// assert_eq!(result.level, ResultLevel::Info);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    pub level: ResultLevel,
}

impl CommandResult {
    /// Successful result
    pub fn info<S: Into<String>>(message: S) -> Self {
        Self {
            success: true,
            message: message.into(),
            level: ResultLevel::Info,
        }
    }

    /// Failed result reported as a warning
    pub fn warning<S: Into<String>>(message: S) -> Self {
        Self {
            success: false,
            message: message.into(),
            level: ResultLevel::Warning,
        }
    }

    /// Failed result reported as an error
    pub fn error<S: Into<String>>(message: S) -> Self {
        Self {
            success: false,
            message: message.into(),
            level: ResultLevel::Error,
        }
    }
}

/// Command tokenized from an envelope body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Lower-cased first token
    pub verb: String,
    pub args: Vec<String>,
}

impl ParsedCommand {
    /// Split on whitespace; `None` when the body holds no tokens
    pub fn parse(body: &str) -> Option<Self> {
        let mut tokens = body.split_whitespace();
        let verb = tokens.next()?.to_lowercase();
        let args = tokens.map(str::to_string).collect();
        Some(Self { verb, args })
    }
}

/// Reply published for a dispatched command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub body: String,
    /// Routing key of the command being answered
    pub subject: String,
    /// Client ID of this starter
    pub source: String,
}

/// Event published directly when the trigger fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub body: String,
    /// Client ID of this starter
    pub sender: String,
}

/// Either outbound shape, serialized as a flat JSON object
///
/// The two shapes are told apart by their keys; they are not interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundEnvelope {
    Reply(ReplyEnvelope),
    Event(EventEnvelope),
}

impl OutboundEnvelope {
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn body(&self) -> &str {
        match self {
            OutboundEnvelope::Reply(reply) => &reply.body,
            OutboundEnvelope::Event(event) => &event.body,
        }
    }
}

impl From<ReplyEnvelope> for OutboundEnvelope {
    fn from(reply: ReplyEnvelope) -> Self {
        OutboundEnvelope::Reply(reply)
    }
}

impl From<EventEnvelope> for OutboundEnvelope {
    fn from(event: EventEnvelope) -> Self {
        OutboundEnvelope::Event(event)
    }
}
