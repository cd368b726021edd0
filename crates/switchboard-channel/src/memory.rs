//! In-process channel host.
//!
//! [`MemoryHost`] is the [`ChannelOpener`] used by tests and single-process
//! embedders: `open()` mints a cross-wired pair and queues the far half onto
//! the hub's incoming stream.

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::ChannelError;
use crate::handle::{ChannelHandle, ChannelMeta, pair};
use crate::opener::ChannelOpener;

/// Incoming-channel queue depth on the hub side.
const ACCEPT_DEPTH: usize = 16;

/// An in-memory channel host connecting openers to one hub.
#[derive(Clone)]
pub struct MemoryHost {
    incoming: mpsc::Sender<ChannelHandle>,
}

impl MemoryHost {
    /// Create a host and the incoming-channel stream to hand to the hub.
    pub fn new() -> (Self, mpsc::Receiver<ChannelHandle>) {
        let (incoming, rx) = mpsc::channel(ACCEPT_DEPTH);
        (Self { incoming }, rx)
    }
}

impl ChannelOpener for MemoryHost {
    async fn open(&self, name: &str, meta: ChannelMeta) -> Result<ChannelHandle, ChannelError> {
        let (near, far) = pair(name, meta);
        if self.incoming.send(far).await.is_err() {
            debug!("{}: hub side is gone, refusing open", name);
            return Err(ChannelError::Refused);
        }
        Ok(near)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::message::Envelope;

    #[tokio::test]
    async fn open_delivers_far_half_to_hub() {
        let (host, mut incoming) = MemoryHost::new();

        let near = host
            .open("app:0011223344556677", ChannelMeta::default())
            .await
            .unwrap();
        let far = incoming.recv().await.unwrap();
        assert_eq!(far.name(), "app:0011223344556677");

        near.send(Envelope::new("ping", serde_json::Value::Null))
            .await
            .unwrap();
        assert_eq!(far.recv().await.unwrap().action, "ping");
    }

    #[tokio::test]
    async fn open_refused_when_hub_gone() {
        let (host, incoming) = MemoryHost::new();
        drop(incoming);

        let result = host.open("app:0011223344556677", ChannelMeta::default()).await;
        assert!(matches!(result, Err(ChannelError::Refused)));
    }

    #[tokio::test]
    async fn meta_travels_with_both_halves() {
        let (host, mut incoming) = MemoryHost::new();

        let meta = ChannelMeta::default()
            .with_origin("/pages/main.html")
            .with_coordinates(7, 0);
        let near = host.open("app:0011223344556677", meta).await.unwrap();
        let far = incoming.recv().await.unwrap();

        assert_eq!(near.meta().unit, Some(7));
        assert_eq!(far.meta().origin.as_deref(), Some("/pages/main.html"));
    }
}
