//! Hub-side error types.

use switchboard_channel::ChannelError;
use switchboard_core::{EndpointId, NameError};

/// Why a newly opened channel was refused admission.
///
/// Each variant maps to a distinct wire [`ErrorKind`] sent back on the
/// channel before it is closed, except [`AdmissionError::Closed`], where
/// there is no one left to tell.
///
/// [`ErrorKind`]: switchboard_core::ErrorKind
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("invalid channel address: {0}")]
    InvalidAddress(#[from] NameError),

    #[error("handshake watchdog expired")]
    InitTimeout,

    #[error("malformed init: {0}")]
    MalformedInit(String),

    #[error("channel closed during handshake")]
    Closed,

    #[error("channel error during handshake: {0}")]
    Channel(#[from] ChannelError),
}

/// Why a `post` could not deliver.
///
/// Only single-identity sends surface these; batch targets report
/// per-channel failures in the outcome instead.
#[derive(Debug, thiserror::Error)]
pub enum PostError {
    #[error("target not found: {0}")]
    TargetNotFound(EndpointId),

    #[error("send to {id} failed: {source}")]
    SendFailed {
        id: EndpointId,
        #[source]
        source: ChannelError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
