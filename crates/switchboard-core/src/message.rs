//! The wire envelope, routing targets, and the reserved system vocabulary.
//!
//! Everything that crosses a channel is one JSON [`Envelope`]. The `action`
//! field is an application-defined discriminator, except for the reserved
//! `sys.` namespace which the fabric intercepts before user handlers ever
//! see it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::{AddressQuery, Category};
use crate::error::EnvelopeError;
use crate::types::{ConnectionId, EndpointId};

/// A routing descriptor selecting zero or more endpoints.
///
/// "Unaddressed" (broadcast to every registered endpoint) is represented as
/// `Option<Target>::None` on the envelope, not as a variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    /// Exactly one endpoint, by hub-assigned identity.
    Id { id: EndpointId },
    /// All endpoints of one category.
    Category { category: Category },
    /// All endpoints sharing a unit coordinate, regardless of category.
    Unit { unit: u64 },
    /// Exact category+unit match; omitting `sub_unit` means all sub-units
    /// under that unit.
    Address {
        category: Category,
        unit: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sub_unit: Option<u64>,
    },
}

impl Target {
    /// The registry query this target resolves through, or `None` for the
    /// single-identity mode (which is looked up directly).
    #[must_use]
    pub fn as_query(&self) -> Option<AddressQuery> {
        match self {
            Target::Id { .. } => None,
            Target::Category { category } => Some(AddressQuery::category(category.clone())),
            Target::Unit { unit } => Some(AddressQuery::unit(*unit)),
            Target::Address {
                category,
                unit,
                sub_unit,
            } => Some(AddressQuery::address(category.clone(), *unit, *sub_unit)),
        }
    }
}

/// An outbound message as application code builds it: an action
/// discriminator plus an opaque payload. Targets travel separately.
#[derive(Debug, Clone)]
pub struct Message {
    pub action: String,
    pub payload: Value,
}

impl Message {
    pub fn new(action: impl Into<String>, payload: Value) -> Self {
        Self {
            action: action.into(),
            payload,
        }
    }
}

/// The one message shape that crosses a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub action: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
    /// Present on relayed traffic; absent means "for the receiver".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
    /// Identity echo. Endpoints set this on every message after admission;
    /// the hub keys traffic by the channel binding and only warns on
    /// mismatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<EndpointId>,
}

impl Envelope {
    pub fn new(action: impl Into<String>, payload: Value) -> Self {
        Self {
            action: action.into(),
            payload,
            target: None,
            sender: None,
        }
    }

    pub fn with_target(mut self, target: Option<Target>) -> Self {
        self.target = target;
        self
    }

    pub fn with_sender(mut self, sender: EndpointId) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Whether the action lives in the reserved system namespace.
    #[must_use]
    pub fn is_system(&self) -> bool {
        system::is_system(&self.action)
    }

    /// Decode the payload into a typed system payload or application type.
    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        serde_json::from_value(self.payload.clone()).map_err(EnvelopeError::Payload)
    }
}

/// The reserved `sys.` action namespace.
///
/// These actions are intercepted by the fabric on both sides and never
/// delivered to user handlers.
pub mod system {
    /// Namespace prefix for all system actions.
    pub const PREFIX: &str = "sys.";

    /// Endpoint → hub, first message on a new channel.
    pub const INIT: &str = "sys.init";
    /// Hub → endpoint, admission confirmation with identity + snapshot.
    pub const HANDSHAKE: &str = "sys.handshake";
    /// Either direction, typed failure report.
    pub const ERROR: &str = "sys.error";
    /// Endpoint → hub, sent on first handler installation (and again after
    /// each reconnect) so the hub can flush buffered traffic.
    pub const HANDLERS_READY: &str = "sys.handlers-ready";
    /// Polite-close announcement, either direction.
    pub const DISCONNECT_NOTICE: &str = "sys.disconnect-notice";

    #[must_use]
    pub fn is_system(action: &str) -> bool {
        action.starts_with(PREFIX)
    }
}

/// Published view of one endpoint: all that other endpoints ever see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub id: EndpointId,
    pub address: crate::address::Address,
}

/// Payload of [`system::INIT`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitPayload {
    pub connection_id: ConnectionId,
}

/// Payload of [`system::HANDSHAKE`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub id: EndpointId,
    /// Every endpoint known to the hub at admission time.
    pub snapshot: Vec<EndpointInfo>,
}

/// Typed reason carried by [`system::ERROR`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Malformed channel name or namespace mismatch.
    InvalidAddress,
    /// Handshake watchdog expired.
    Timeout,
    /// First message was not a well-formed `init`.
    MalformedInit,
    /// A single-identity relay resolved to zero endpoints.
    InvalidTarget,
}

/// Payload of [`system::ERROR`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub detail: String,
}

// Convenience constructors for the system vocabulary.
impl Envelope {
    pub fn init(connection_id: ConnectionId) -> Self {
        Self::new(
            system::INIT,
            serde_json::json!({ "connection_id": connection_id }),
        )
    }

    pub fn handshake(payload: &HandshakePayload) -> Self {
        Self::new(
            system::HANDSHAKE,
            serde_json::to_value(payload).unwrap_or(Value::Null),
        )
    }

    pub fn error(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self::new(
            system::ERROR,
            serde_json::json!({ "kind": kind, "detail": detail.into() }),
        )
    }

    pub fn handlers_ready() -> Self {
        Self::new(system::HANDLERS_READY, Value::Null)
    }

    pub fn disconnect_notice() -> Self {
        Self::new(system::DISCONNECT_NOTICE, Value::Null)
    }
}
