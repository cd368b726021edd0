//! The concrete duplex channel handle.
//!
//! A [`ChannelHandle`] is one side of a paired message pipe with a shared
//! liveness flag. Exactly one live channel exists per endpoint at a time;
//! `recv()` returning `None` is the close notification. `sever()` models the
//! failure the fabric is built for: a peer dying without its close
//! notification ever arriving.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};

use switchboard_core::message::Envelope;

use crate::error::ChannelError;

/// Buffered envelope capacity per direction.
pub(crate) const CHANNEL_DEPTH: usize = 64;

/// Host-supplied metadata attached to a channel at open time.
///
/// The hub's registry derives the endpoint's address from this; none of the
/// fields are required, and an empty meta yields a headless "unknown"
/// endpoint.
#[derive(Debug, Clone, Default)]
pub struct ChannelMeta {
    /// Originating location path, fed to the hub's address classifier.
    pub origin: Option<String>,
    /// Explicit category tag, taking precedence over origin classification.
    pub category_hint: Option<switchboard_core::address::Category>,
    /// Containing-unit coordinate (e.g. a tab id).
    pub unit: Option<u64>,
    /// Sub-unit coordinate within the unit (e.g. a frame id).
    pub sub_unit: Option<u64>,
}

impl ChannelMeta {
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_category(mut self, category: switchboard_core::address::Category) -> Self {
        self.category_hint = Some(category);
        self
    }

    pub fn with_coordinates(mut self, unit: u64, sub_unit: u64) -> Self {
        self.unit = Some(unit);
        self.sub_unit = Some(sub_unit);
        self
    }
}

/// One side of a bidirectional, named, message-oriented duplex connection.
pub struct ChannelHandle {
    name: String,
    meta: ChannelMeta,
    /// Outbound pipe (None once closed).
    tx: Mutex<Option<mpsc::Sender<Envelope>>>,
    /// Inbound pipe; single reader.
    rx: Mutex<mpsc::Receiver<Envelope>>,
    /// Liveness flag shared with the peer half.
    connected: Arc<AtomicBool>,
}

impl ChannelHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> &ChannelMeta {
        &self.meta
    }

    /// Whether the channel is live in both directions.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send one envelope to the peer.
    pub async fn send(&self, envelope: Envelope) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }

        let guard = self.tx.lock().await;
        let Some(sender) = guard.as_ref() else {
            return Err(ChannelError::NotConnected);
        };

        if sender.send(envelope).await.is_err() {
            // Peer receiver is gone; the channel is stale.
            self.connected.store(false, Ordering::SeqCst);
            return Err(ChannelError::SendFailed);
        }
        Ok(())
    }

    /// Receive the next envelope. `None` means the peer closed the channel.
    pub async fn recv(&self) -> Option<Envelope> {
        let envelope = self.rx.lock().await.recv().await;
        if envelope.is_none() {
            self.connected.store(false, Ordering::SeqCst);
        }
        envelope
    }

    /// Close the channel: the peer's `recv()` will observe `None`.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.tx.lock().await.take();
    }

    /// Mark the channel dead without notifying the peer.
    ///
    /// Models an abrupt peer death whose close notification is lost: sends
    /// fail on both halves, but the peer's `recv()` never wakes.
    pub fn sever(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        // Dropping the handle drops the outbound pipe, which delivers the
        // close notification to the peer.
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Create a cross-wired pair of channel halves sharing one liveness flag.
///
/// Both halves carry the same name and metadata; the host hands one half to
/// the opener and the other to the hub.
pub fn pair(name: impl Into<String>, meta: ChannelMeta) -> (ChannelHandle, ChannelHandle) {
    let name = name.into();
    let connected = Arc::new(AtomicBool::new(true));

    let (a_tx, b_rx) = mpsc::channel(CHANNEL_DEPTH);
    let (b_tx, a_rx) = mpsc::channel(CHANNEL_DEPTH);

    let a = ChannelHandle {
        name: name.clone(),
        meta: meta.clone(),
        tx: Mutex::new(Some(a_tx)),
        rx: Mutex::new(a_rx),
        connected: Arc::clone(&connected),
    };
    let b = ChannelHandle {
        name,
        meta,
        tx: Mutex::new(Some(b_tx)),
        rx: Mutex::new(b_rx),
        connected,
    };
    (a, b)
}
