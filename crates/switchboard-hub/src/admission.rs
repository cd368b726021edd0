//! The handshake protocol that admits newly opened channels.
//!
//! Per channel the protocol runs `Opened → AwaitingInit → Admitted`, or ends
//! in `Closed` after a typed rejection. Every rejection is reported back on
//! the channel as a `sys.error` (when the channel can still carry one) and
//! surfaced to the hub as an [`AdmissionError`]; nothing here can take the
//! hub down.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, trace};

use switchboard_channel::ChannelHandle;
use switchboard_core::{
    ChannelName, EndpointId, Envelope, ErrorKind, HandshakePayload, InitPayload, system,
};

use crate::error::AdmissionError;
use crate::registry::{AddressHint, EndpointRegistry};

/// Handshake progress, logged at trace level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    Opened,
    AwaitingInit,
    Admitted,
    Closed,
}

/// A successfully admitted channel.
pub struct Admitted {
    pub id: EndpointId,
    pub channel: Arc<ChannelHandle>,
}

/// Run the admission protocol on a freshly accepted channel.
///
/// On success the endpoint is registered and has received its `handshake`
/// confirmation (identity + full registry snapshot). On failure the channel
/// has been told why (best-effort) and closed.
pub async fn admit(
    channel: ChannelHandle,
    namespace: &str,
    init_timeout: Duration,
    registry: &EndpointRegistry,
) -> Result<Admitted, AdmissionError> {
    let mut state = HandshakeState::Opened;
    trace!("{}: handshake {state:?}", channel.name());

    let parsed = match ChannelName::parse(channel.name(), namespace) {
        Ok(parsed) => parsed,
        Err(e) => {
            reject(&channel, ErrorKind::InvalidAddress, &e.to_string()).await;
            return Err(e.into());
        }
    };

    state = HandshakeState::AwaitingInit;
    trace!("{}: handshake {state:?}", channel.name());

    let first = match timeout(init_timeout, channel.recv()).await {
        Ok(Some(envelope)) => envelope,
        Ok(None) => return Err(AdmissionError::Closed),
        Err(_) => {
            reject(&channel, ErrorKind::Timeout, "no init before watchdog").await;
            return Err(AdmissionError::InitTimeout);
        }
    };

    let init = match decode_init(&first) {
        Ok(init) => init,
        Err(detail) => {
            reject(&channel, ErrorKind::MalformedInit, &detail).await;
            return Err(AdmissionError::MalformedInit(detail));
        }
    };

    // The current naming scheme carries the correlation id; it must match
    // the one echoed in init. Legacy names carry a category instead.
    let mut hint = AddressHint::from_meta(channel.meta());
    match parsed {
        ChannelName::Connection(expected) => {
            if init.connection_id != expected {
                let detail = format!(
                    "correlation id mismatch: name {expected}, init {}",
                    init.connection_id
                );
                reject(&channel, ErrorKind::MalformedInit, &detail).await;
                return Err(AdmissionError::MalformedInit(detail));
            }
        }
        ChannelName::LegacyCategory(category) => {
            hint = hint.with_category(category);
        }
    }

    let channel = Arc::new(channel);
    let id = registry.add(Arc::clone(&channel), hint).await;
    let snapshot = registry.snapshot().await;

    let confirmation = Envelope::handshake(&HandshakePayload { id, snapshot });
    if let Err(e) = channel.send(confirmation).await {
        // The endpoint vanished between init and confirmation; undo.
        registry.remove(id).await;
        return Err(e.into());
    }

    state = HandshakeState::Admitted;
    trace!("{}: handshake {state:?} as {id:?}", channel.name());
    Ok(Admitted { id, channel })
}

fn decode_init(envelope: &Envelope) -> Result<InitPayload, String> {
    if envelope.action != system::INIT {
        return Err(format!(
            "first message was {:?}, expected {}",
            envelope.action,
            system::INIT
        ));
    }
    envelope
        .decode_payload::<InitPayload>()
        .map_err(|e| e.to_string())
}

/// Report a typed rejection and close the channel.
async fn reject(channel: &ChannelHandle, kind: ErrorKind, detail: &str) {
    debug!("{}: rejecting handshake: {detail}", channel.name());
    let _ = channel.send(Envelope::error(kind, detail)).await;
    channel.close().await;
    trace!("{}: handshake {:?}", channel.name(), HandshakeState::Closed);
}
