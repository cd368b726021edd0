//! Endpoint-side connection driving.
//!
//! [`connect`] opens a channel, runs the handshake, and returns an
//! [`EndpointHandle`] exposing `post`/`on_message` to application code. The
//! handle never raises on send: with no live channel (or a stale one) the
//! message goes to the offline queue and is replayed after reconnection.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use switchboard_channel::{
    ChannelHandle, ChannelMeta, ChannelOpener, ShutdownToken,
};
use switchboard_core::{
    Category, ChannelName, ConnectionId, EndpointId, EndpointInfo, Envelope, ErrorPayload,
    HandshakePayload, Message, Target, system,
};

use crate::error::ConnectError;
use crate::queue::MessageQueue;
use crate::reconnect::{self, LinkState};

/// Connector configuration. Construct with [`ConnectorConfig::new`] and
/// refine with the builder methods.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Channel-name namespace shared with the hub.
    pub namespace: String,
    /// Host metadata attached to every opened channel.
    pub meta: ChannelMeta,
    /// Handshake watchdog. Default: 5 s.
    pub handshake_timeout: Duration,
    /// Fixed retry interval of the reconnection manager. Default: 1 s.
    pub reconnect_interval: Duration,
    /// Offline queue capacity. Default: 64.
    pub queue_cap: usize,
    /// Offline queue max age. Default: 30 s.
    pub queue_max_age: Duration,
}

impl ConnectorConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            meta: ChannelMeta::default(),
            handshake_timeout: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(1),
            queue_cap: 64,
            queue_max_age: Duration::from_secs(30),
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.meta.category_hint = Some(category);
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.meta.origin = Some(origin.into());
        self
    }

    pub fn with_coordinates(mut self, unit: u64, sub_unit: u64) -> Self {
        self.meta.unit = Some(unit);
        self.meta.sub_unit = Some(sub_unit);
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_queue_limits(mut self, cap: usize, max_age: Duration) -> Self {
        self.queue_cap = cap;
        self.queue_max_age = max_age;
        self
    }
}

/// What happened to a `post` on the endpoint side. Queueing is success:
/// delivery is best-effort after reconnection, bounded by the queue policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostStatus {
    Sent,
    Queued,
}

/// An inbound message as endpoint handlers see it.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub action: String,
    pub payload: Value,
    /// Originating endpoint for relayed traffic; `None` for hub-originated
    /// messages.
    pub sender: Option<EndpointId>,
}

/// Handle for unsubscribing a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

type HandlerFn = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

struct HandlerEntry {
    id: u64,
    action: String,
    callback: HandlerFn,
}

pub(crate) struct HandlerTable {
    entries: Vec<HandlerEntry>,
    next_id: u64,
    /// Whether `on_message` has ever been called.
    installed: bool,
}

pub(crate) struct LifecycleCallbacks {
    pub(crate) on_disconnect: Vec<Arc<dyn Fn() + Send + Sync>>,
    pub(crate) on_reconnect: Vec<Arc<dyn Fn(EndpointId) + Send + Sync>>,
}

/// Shared connector state, owned by the handle and the reconnection task.
pub(crate) struct Inner<O: ChannelOpener> {
    pub(crate) opener: O,
    pub(crate) config: ConnectorConfig,
    pub(crate) state: Mutex<LinkState>,
    pub(crate) queue: Mutex<MessageQueue>,
    pub(crate) handlers: Mutex<HandlerTable>,
    pub(crate) callbacks: Mutex<LifecycleCallbacks>,
    pub(crate) shutdown: ShutdownToken,
}

/// One admitted connection: channel, identity, and the peer snapshot taken
/// at admission.
pub(crate) struct Session {
    pub(crate) channel: Arc<ChannelHandle>,
    pub(crate) identity: EndpointId,
    pub(crate) snapshot: Vec<EndpointInfo>,
}

/// Open a channel and drive one handshake to completion.
pub(crate) async fn attempt_connect<O: ChannelOpener>(
    opener: &O,
    config: &ConnectorConfig,
) -> Result<Session, ConnectError> {
    let connection_id = ConnectionId::random();
    let name = ChannelName::format(&config.namespace, connection_id);

    let channel = opener.open(&name, config.meta.clone()).await?;
    channel.send(Envelope::init(connection_id)).await?;

    let reply = match timeout(config.handshake_timeout, channel.recv()).await {
        Ok(Some(envelope)) => envelope,
        Ok(None) => return Err(ConnectError::ChannelClosed),
        Err(_) => return Err(ConnectError::HandshakeTimeout),
    };

    match reply.action.as_str() {
        system::HANDSHAKE => {
            let payload: HandshakePayload = reply
                .decode_payload()
                .map_err(|e| ConnectError::Protocol(e.to_string()))?;
            Ok(Session {
                channel: Arc::new(channel),
                identity: payload.id,
                snapshot: payload.snapshot,
            })
        }
        system::ERROR => {
            let payload: ErrorPayload = reply
                .decode_payload()
                .map_err(|e| ConnectError::Protocol(e.to_string()))?;
            Err(ConnectError::Rejected {
                kind: payload.kind,
                detail: payload.detail,
            })
        }
        other => Err(ConnectError::Protocol(format!(
            "unexpected handshake reply {other:?}"
        ))),
    }
}

/// Connect to the hub and return the application-facing handle.
///
/// Failure here is fatal to this attempt only; once connected, channel loss
/// is handled by the reconnection manager, not the caller.
pub async fn connect<O>(
    opener: O,
    config: ConnectorConfig,
) -> Result<EndpointHandle<O>, ConnectError>
where
    O: ChannelOpener + 'static,
{
    let session = attempt_connect(&opener, &config).await?;
    info!(
        "connected to {:?} as {:?}",
        config.namespace, session.identity
    );

    let inner = Arc::new(Inner {
        queue: Mutex::new(MessageQueue::new(config.queue_cap, config.queue_max_age)),
        opener,
        state: Mutex::new(LinkState::Connected {
            channel: session.channel,
            identity: session.identity,
            snapshot: session.snapshot,
        }),
        handlers: Mutex::new(HandlerTable {
            entries: Vec::new(),
            next_id: 1,
            installed: false,
        }),
        callbacks: Mutex::new(LifecycleCallbacks {
            on_disconnect: Vec::new(),
            on_reconnect: Vec::new(),
        }),
        shutdown: ShutdownToken::new(),
        config,
    });

    let task = tokio::spawn(reconnect::run(
        Arc::clone(&inner),
        inner.shutdown.subscribe(),
    ));
    inner.shutdown.add_task(task).await;

    Ok(EndpointHandle { inner })
}

/// Application-facing endpoint handle. Cheap to clone.
pub struct EndpointHandle<O: ChannelOpener> {
    inner: Arc<Inner<O>>,
}

impl<O: ChannelOpener> Clone for EndpointHandle<O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<O: ChannelOpener> EndpointHandle<O> {
    /// Send a message, or queue it when no live channel exists. A send
    /// failure on a stale channel also queues rather than raising.
    pub async fn post(&self, message: Message, target: Option<Target>) -> PostStatus {
        let envelope = Envelope::new(message.action, message.payload).with_target(target);

        let live = {
            match &*self.inner.state.lock().await {
                LinkState::Connected {
                    channel, identity, ..
                } => Some((Arc::clone(channel), *identity)),
                _ => None,
            }
        };

        match live {
            Some((channel, identity)) => {
                // The identity echo is attached at send time, never stored
                // in the queue, so a reconnection's reused-or-fresh identity
                // is always the one on the wire.
                match channel.send(envelope.clone().with_sender(identity)).await {
                    Ok(()) => PostStatus::Sent,
                    Err(e) => {
                        debug!("send failed ({e}), queueing {:?}", envelope.action);
                        self.inner.queue.lock().await.push(envelope);
                        PostStatus::Queued
                    }
                }
            }
            None => {
                self.inner.queue.lock().await.push(envelope);
                PostStatus::Queued
            }
        }
    }

    /// Register a handler for an action. Handlers accumulate; every match
    /// runs in registration order. The first installation announces
    /// `handlers-ready` to the hub.
    pub async fn on_message(
        &self,
        action: impl Into<String>,
        callback: impl Fn(&InboundMessage) + Send + Sync + 'static,
    ) -> HandlerId {
        let (handler_id, first) = {
            let mut handlers = self.inner.handlers.lock().await;
            let id = handlers.next_id;
            handlers.next_id += 1;
            handlers.entries.push(HandlerEntry {
                id,
                action: action.into(),
                callback: Arc::new(callback),
            });
            let first = !handlers.installed;
            handlers.installed = true;
            (HandlerId(id), first)
        };

        if first {
            send_handlers_ready(&self.inner).await;
        }
        handler_id
    }

    /// Remove a previously registered handler. Returns whether it existed.
    pub async fn remove_handler(&self, handler: HandlerId) -> bool {
        let mut handlers = self.inner.handlers.lock().await;
        let before = handlers.entries.len();
        handlers.entries.retain(|entry| entry.id != handler.0);
        handlers.entries.len() != before
    }

    /// Run a callback on every channel loss, before retrying starts.
    pub async fn on_disconnect(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.inner
            .callbacks
            .lock()
            .await
            .on_disconnect
            .push(Arc::new(callback));
    }

    /// Run a callback after every successful reconnection, with the
    /// (possibly reused) identity.
    pub async fn on_reconnect(&self, callback: impl Fn(EndpointId) + Send + Sync + 'static) {
        self.inner
            .callbacks
            .lock()
            .await
            .on_reconnect
            .push(Arc::new(callback));
    }

    /// The hub-assigned identity, when connected.
    pub async fn identity(&self) -> Option<EndpointId> {
        match &*self.inner.state.lock().await {
            LinkState::Connected { identity, .. } => Some(*identity),
            _ => None,
        }
    }

    /// The peer snapshot received at the most recent admission.
    pub async fn peers(&self) -> Vec<EndpointInfo> {
        match &*self.inner.state.lock().await {
            LinkState::Connected { snapshot, .. } => snapshot.clone(),
            _ => Vec::new(),
        }
    }

    pub async fn is_connected(&self) -> bool {
        match &*self.inner.state.lock().await {
            LinkState::Connected { channel, .. } => channel.is_connected(),
            _ => false,
        }
    }

    /// Messages currently parked in the offline queue.
    pub async fn queued(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    /// Politely close: announce `disconnect-notice`, close the channel, and
    /// stop the reconnection manager. Must not be called from inside a
    /// handler callback.
    pub async fn close(&self) {
        let previous = {
            let mut state = self.inner.state.lock().await;
            std::mem::replace(&mut *state, LinkState::Stopped)
        };
        if let LinkState::Connected {
            channel, identity, ..
        } = previous
        {
            let _ = channel
                .send(Envelope::disconnect_notice().with_sender(identity))
                .await;
            channel.close().await;
        }

        self.inner.shutdown.signal_stop();
        self.inner.shutdown.join_all().await;
        info!("endpoint closed");
    }
}

/// Announce handler readiness on the current channel, if any.
pub(crate) async fn send_handlers_ready<O: ChannelOpener>(inner: &Inner<O>) {
    let live = {
        match &*inner.state.lock().await {
            LinkState::Connected {
                channel, identity, ..
            } => Some((Arc::clone(channel), *identity)),
            _ => None,
        }
    };
    if let Some((channel, identity)) = live {
        let announcement = Envelope::handlers_ready().with_sender(identity);
        if let Err(e) = channel.send(announcement).await {
            debug!("handlers-ready announcement failed: {e}");
        }
    }
}

/// Whether any handler has ever been installed.
pub(crate) async fn handlers_installed<O: ChannelOpener>(inner: &Inner<O>) -> bool {
    inner.handlers.lock().await.installed
}

/// Dispatch one inbound envelope to the endpoint's handlers.
pub(crate) async fn dispatch_inbound<O: ChannelOpener>(inner: &Inner<O>, envelope: Envelope) {
    if envelope.is_system() {
        match envelope.action.as_str() {
            system::DISCONNECT_NOTICE => info!("hub announced disconnect"),
            system::ERROR => match envelope.decode_payload::<ErrorPayload>() {
                Ok(report) => warn!("hub reported error {:?}: {}", report.kind, report.detail),
                Err(_) => warn!("hub reported an undecodable error"),
            },
            other => debug!("unexpected system action {other:?}"),
        }
        return;
    }

    let matches: Vec<HandlerFn> = {
        let handlers = inner.handlers.lock().await;
        handlers
            .entries
            .iter()
            .filter(|entry| entry.action == envelope.action)
            .map(|entry| Arc::clone(&entry.callback))
            .collect()
    };

    if matches.is_empty() {
        debug!("no handler for action {:?}, dropping", envelope.action);
        return;
    }

    let message = InboundMessage {
        action: envelope.action,
        payload: envelope.payload,
        sender: envelope.sender,
    };
    for callback in matches {
        callback(&message);
    }
}
