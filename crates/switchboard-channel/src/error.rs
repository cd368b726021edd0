//! Channel boundary error types.

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel not connected")]
    NotConnected,

    #[error("send failed: channel stale")]
    SendFailed,

    #[error("channel refused: no host accepting connections")]
    Refused,
}
