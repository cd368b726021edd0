//! Endpoint-side error types.

use switchboard_channel::ChannelError;
use switchboard_core::ErrorKind;

/// Why a connection attempt failed.
///
/// Fatal to that attempt only: the caller of `connect` sees this once, and
/// the reconnection manager absorbs it on every retry thereafter.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to open channel: {0}")]
    Open(#[from] ChannelError),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("handshake rejected ({kind:?}): {detail}")]
    Rejected { kind: ErrorKind, detail: String },

    #[error("channel closed during handshake")]
    ChannelClosed,

    #[error("handshake protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(ConnectError::HandshakeTimeout.to_string(), "handshake timed out");
        assert_eq!(
            ConnectError::ChannelClosed.to_string(),
            "channel closed during handshake"
        );

        let err = ConnectError::Rejected {
            kind: ErrorKind::InvalidAddress,
            detail: "namespace mismatch".to_string(),
        };
        assert!(err.to_string().contains("namespace mismatch"));
    }

    #[test]
    fn from_channel_error() {
        let err: ConnectError = ChannelError::Refused.into();
        assert!(matches!(err, ConnectError::Open(_)));
    }
}
