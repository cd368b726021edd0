//! The hub composition root.
//!
//! A [`Hub`] owns its registry and router outright — one explicitly
//! constructed instance per namespace, wired together here and handed its
//! incoming-channel stream by the host. `start()` spawns the accept loop
//! (admission + one read loop per channel) and the event pump that feeds
//! registry events into the router; `stop()` announces shutdown to every
//! endpoint and joins the tasks.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use switchboard_channel::{ChannelHandle, ShutdownToken};
use switchboard_core::{EndpointId, Envelope, Message, Target};

use crate::admission;
use crate::classifier::{AddressClassifier, RoleMapClassifier};
use crate::config::HubConfig;
use crate::error::PostError;
use crate::registry::{EndpointRegistry, RegistryEvent};
use crate::router::{HandlerId, InboundMessage, MessageRouter, PostOutcome};

pub struct Hub {
    config: HubConfig,
    registry: Arc<EndpointRegistry>,
    router: Arc<MessageRouter>,
    /// Taken by `start()`.
    events: Mutex<Option<mpsc::Receiver<RegistryEvent>>>,
    shutdown: ShutdownToken,
}

impl Hub {
    /// Build a hub whose classifier comes from the config's role table.
    pub fn new(config: HubConfig) -> Self {
        let classifier = RoleMapClassifier::new(config.role_entries());
        Self::with_classifier(config, Box::new(classifier))
    }

    /// Build a hub with a custom injected address classifier.
    pub fn with_classifier(config: HubConfig, classifier: Box<dyn AddressClassifier>) -> Self {
        let (registry, events) = EndpointRegistry::new(classifier, config.event_capacity);
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&registry),
            config.pending_cap,
            config.pending_max_age(),
        ));

        Self {
            config,
            registry,
            router,
            events: Mutex::new(Some(events)),
            shutdown: ShutdownToken::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Post a message from hub application code. See
    /// [`MessageRouter::post`].
    pub async fn post(
        &self,
        message: Message,
        target: Option<Target>,
    ) -> Result<PostOutcome, PostError> {
        self.router.post(message, target).await
    }

    /// Register a hub-local handler. See [`MessageRouter::on_message`].
    pub async fn on_message(
        &self,
        action: impl Into<String>,
        callback: impl Fn(&InboundMessage) + Send + Sync + 'static,
    ) -> HandlerId {
        self.router.on_message(action, callback).await
    }

    pub async fn remove_handler(&self, handler: HandlerId) -> bool {
        self.router.remove_handler(handler).await
    }

    /// Start serving: accept channels from `incoming`, admit them, and pump
    /// registry events into the router.
    pub async fn start(&self, incoming: mpsc::Receiver<ChannelHandle>) {
        let Some(events) = self.events.lock().await.take() else {
            warn!("hub already started, ignoring");
            return;
        };

        let accept = tokio::spawn(accept_loop(
            incoming,
            Arc::clone(&self.registry),
            self.config.namespace.clone(),
            self.config.handshake_timeout(),
            self.shutdown.subscribe(),
        ));
        self.shutdown.add_task(accept).await;

        let pump = tokio::spawn(event_pump(
            events,
            Arc::clone(&self.router),
            self.shutdown.subscribe(),
        ));
        self.shutdown.add_task(pump).await;

        info!("hub serving namespace {:?}", self.config.namespace);
    }

    /// Announce shutdown to every endpoint, close their channels, and join
    /// the background tasks.
    pub async fn stop(&self) {
        for endpoint in self.registry.all().await {
            let _ = endpoint.channel.send(Envelope::disconnect_notice()).await;
            endpoint.channel.close().await;
        }
        self.shutdown.signal_stop();
        self.shutdown.join_all().await;
        info!("hub stopped");
    }
}

async fn accept_loop(
    mut incoming: mpsc::Receiver<ChannelHandle>,
    registry: Arc<EndpointRegistry>,
    namespace: String,
    handshake_timeout: std::time::Duration,
    mut stop_rx: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        let channel = tokio::select! {
            channel = incoming.recv() => {
                match channel {
                    Some(channel) => channel,
                    None => {
                        debug!("incoming channel stream ended");
                        break;
                    }
                }
            }
            _ = stop_rx.changed() => break,
        };

        let registry = Arc::clone(&registry);
        let namespace = namespace.clone();
        let stop_rx = stop_rx.clone();
        tokio::spawn(async move {
            match admission::admit(channel, &namespace, handshake_timeout, &registry).await {
                Ok(admitted) => {
                    read_loop(registry, admitted.id, admitted.channel, stop_rx).await;
                }
                Err(e) => {
                    warn!("admission failed: {e}");
                }
            }
        });
    }
}

/// Pull envelopes off one admitted channel until it closes, then tear the
/// entry down.
async fn read_loop(
    registry: Arc<EndpointRegistry>,
    id: EndpointId,
    channel: Arc<ChannelHandle>,
    mut stop_rx: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            envelope = channel.recv() => {
                match envelope {
                    Some(envelope) => registry.note_message(id, envelope).await,
                    None => {
                        registry.remove_channel(id, &channel).await;
                        break;
                    }
                }
            }
            _ = stop_rx.changed() => break,
        }
    }
}

/// Feed registry events into the router.
async fn event_pump(
    mut events: mpsc::Receiver<RegistryEvent>,
    router: Arc<MessageRouter>,
    mut stop_rx: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => event,
                    None => break,
                }
            }
            _ = stop_rx.changed() => break,
        };

        match event {
            RegistryEvent::EndpointAdded { id, address, reused } => {
                info!("endpoint {id:?} admitted at {address} (reused: {reused})");
            }
            RegistryEvent::EndpointMessage { id, envelope } => {
                router.dispatch(envelope, id).await;
            }
            RegistryEvent::EndpointRemoved { id, address } => {
                info!("endpoint {id:?} at {address} disconnected");
                router.forget(id).await;
            }
        }
    }
}
