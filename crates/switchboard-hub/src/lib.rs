//! Hub side of the switchboard messaging fabric.
//!
//! This crate provides the endpoint registry, the admission (handshake)
//! protocol, the message router, and the [`Hub`] composition root that wires
//! them together over a host-provided incoming-channel stream.

pub mod admission;
pub mod classifier;
pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod registry;
pub mod router;

pub use admission::{Admitted, admit};
pub use classifier::{AddressClassifier, RoleEntry, RoleMapClassifier};
pub use config::{HubConfig, RoleConfig};
pub use error::{AdmissionError, ConfigError, PostError};
pub use hub::Hub;
pub use registry::{AddressHint, EndpointRegistry, RegistryEvent, ResolvedEndpoint};
pub use router::{HandlerId, InboundMessage, MessageRouter, PostOutcome};
pub use switchboard_core::Message;
