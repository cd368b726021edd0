//! Endpoint side of the switchboard messaging fabric.
//!
//! [`connect`] opens a channel to the hub, runs the handshake, and hands
//! back an [`EndpointHandle`]. The handle owns the offline [`MessageQueue`]
//! and the reconnection manager: channel loss is detected, retried at a
//! fixed interval forever, and queued messages are replayed in enqueue order
//! once a fresh channel exists.

pub mod connector;
pub mod error;
pub mod queue;
mod reconnect;

pub use connector::{
    ConnectorConfig, EndpointHandle, HandlerId, InboundMessage, PostStatus, connect,
};
pub use error::ConnectError;
pub use queue::{MessageQueue, QueueEntry};
