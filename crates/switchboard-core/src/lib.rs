//! Shared vocabulary for the switchboard messaging fabric.
//!
//! This crate defines the identity tokens, structured addresses, routing
//! targets, the wire envelope, the reserved system-message vocabulary, and
//! the channel naming convention used by both the hub and endpoint sides.

pub mod address;
pub mod channel_name;
pub mod error;
pub mod message;
pub mod types;

pub use address::{Address, AddressQuery, Category};
pub use channel_name::ChannelName;
pub use error::{EnvelopeError, NameError};
pub use message::{
    Envelope, EndpointInfo, ErrorKind, ErrorPayload, HandshakePayload, InitPayload, Message,
    Target, system,
};
pub use types::{ConnectionId, EndpointId, InvalidToken};
