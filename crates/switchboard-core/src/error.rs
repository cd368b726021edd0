//! Core error types shared across the fabric.

#[derive(Debug, thiserror::Error)]
pub enum NameError {
    #[error("malformed channel name: {0}")]
    Malformed(String),

    #[error("namespace mismatch: expected {expected}, got {actual}")]
    NamespaceMismatch { expected: String, actual: String },
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed payload: {0}")]
    Payload(#[source] serde_json::Error),
}
