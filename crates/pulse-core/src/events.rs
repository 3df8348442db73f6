//! Wire-format event envelopes.
//!
//! Every message a client receives is one of four JSON envelopes, tagged by
//! a literal `type` field: `sensor-data`, `broadcast`, `connection`, or
//! `echo`. Field names are camelCase on the wire and timestamps are
//! ISO-8601 with millisecond precision, matching what the dashboard
//! expects. The `protocol` field is stamped per transport immediately
//! before serialization, so one generated event yields one encoding per
//! transport kind.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ClientId, EventId};

/// Current UTC time as an ISO-8601 string with millisecond precision.
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The transport a message is delivered over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Server-Sent Events (long-lived HTTP stream, server to client).
    Sse,
    /// WebSocket (bidirectional, message-framed).
    Websocket,
}

impl Protocol {
    /// Human-readable transport name, as used in welcome messages.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Sse => "SSE",
            Self::Websocket => "WebSocket",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sse => f.write_str("sse"),
            Self::Websocket => f.write_str("websocket"),
        }
    }
}

/// Which transport kind(s) an operator broadcast targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastTarget {
    /// Both transports.
    All,
    /// Push-transport clients only.
    Sse,
    /// Socket-transport clients only.
    Websocket,
}

impl BroadcastTarget {
    /// Whether this target includes the given transport.
    #[must_use]
    pub fn includes(self, protocol: Protocol) -> bool {
        match self {
            Self::All => true,
            Self::Sse => protocol == Protocol::Sse,
            Self::Websocket => protocol == Protocol::Websocket,
        }
    }
}

/// One synthetic sensor reading, produced at most once per tick.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    /// Unique event id.
    pub id: EventId,
    /// ISO-8601 creation time.
    pub timestamp: String,
    /// Combined sent-message count across both transports at generation
    /// time. Informational, not a strict ordering guarantee.
    pub sequence: u64,
    /// Sensor value in `[0, 100)`.
    pub value: f64,
    /// Simulated network delay in milliseconds, `[0, 100)`. Metadata only;
    /// never applied to the actual send.
    pub network_delay: f64,
    /// Always `false` on delivered readings; lost readings are never built.
    pub packet_loss: bool,
    /// Literal `"sensor-data"`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Server clock at creation, epoch milliseconds.
    pub server_time: i64,
    /// Delivering transport, stamped just before serialization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
}

impl SensorReading {
    /// Build a reading with a fresh id and the current timestamps.
    #[must_use]
    pub fn new(sequence: u64, value: f64, network_delay: f64) -> Self {
        let now = Utc::now();
        Self {
            id: EventId::new(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            sequence,
            value,
            network_delay,
            packet_loss: false,
            event_type: "sensor-data".into(),
            server_time: now.timestamp_millis(),
            protocol: None,
        }
    }

    /// Stamp the delivering transport.
    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }
}

/// Operator-triggered notice delivered to every current member of the
/// targeted registries. Never stored, never counted as sensor traffic.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastNotice {
    /// Literal `"broadcast"`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Operator-supplied text.
    pub message: String,
    /// ISO-8601 creation time.
    pub timestamp: String,
    /// Unique event id.
    pub id: EventId,
    /// Delivering transport, stamped just before serialization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
}

impl BroadcastNotice {
    /// Build a notice with a fresh id and the current timestamp.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            event_type: "broadcast".into(),
            message: message.into(),
            timestamp: iso_timestamp(),
            id: EventId::new(),
            protocol: None,
        }
    }

    /// Stamp the delivering transport.
    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }
}

/// First message every client receives, carrying its assigned id.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    /// Literal `"connection"`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// The id assigned to the connecting client.
    pub id: ClientId,
    /// e.g. `"SSE connection established"`.
    pub message: String,
    /// ISO-8601 creation time.
    pub timestamp: String,
    /// The transport the client connected over.
    pub protocol: Protocol,
}

impl Welcome {
    /// Build the welcome for a newly assigned client id.
    #[must_use]
    pub fn new(id: ClientId, protocol: Protocol) -> Self {
        Self {
            event_type: "connection".into(),
            id,
            message: format!("{} connection established", protocol.label()),
            timestamp: iso_timestamp(),
            protocol,
        }
    }
}

/// Server reply to an inbound WebSocket message: the original payload
/// wrapped with a timestamp. Delivered only to the sender.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Echo {
    /// Literal `"echo"`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// The client's payload, verbatim.
    pub original: Value,
    /// ISO-8601 creation time.
    pub timestamp: String,
    /// Always [`Protocol::Websocket`]; only the socket transport is
    /// bidirectional.
    pub protocol: Protocol,
}

impl Echo {
    /// Wrap an inbound payload.
    #[must_use]
    pub fn new(original: Value) -> Self {
        Self {
            event_type: "echo".into(),
            original,
            timestamp: iso_timestamp(),
            protocol: Protocol::Websocket,
        }
    }
}
