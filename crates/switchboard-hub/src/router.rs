//! Hub-side message routing.
//!
//! The router consumes registry events and, for each inbound envelope,
//! either relays it toward its explicit target or fans it out to locally
//! registered handlers. Handlers accumulate: every handler whose action
//! matches runs, in registration order.
//!
//! Traffic for an endpoint that has not yet signalled `handlers-ready` is
//! buffered per endpoint (bounded and age-expired, the same policy shape as
//! the endpoint-side offline queue) and flushed in order on readiness. The
//! hub's own inbound gets the mirrored treatment: envelopes arriving before
//! the first local handler installation are buffered and replayed through
//! normal matching once a handler exists.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use switchboard_core::{
    Envelope, ErrorKind, ErrorPayload, EndpointId, Message, Target, system,
};

use crate::error::PostError;
use crate::registry::{EndpointRegistry, ResolvedEndpoint};

/// An inbound message as handlers see it.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender: EndpointId,
    pub action: String,
    pub payload: Value,
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

/// What happened to a `post`.
#[derive(Debug, Default)]
pub struct PostOutcome {
    /// Envelopes handed to live channels.
    pub sent: usize,
    /// Envelopes parked in a readiness buffer.
    pub buffered: usize,
    /// Endpoints whose individual send failed (batch targets only).
    pub failed: Vec<EndpointId>,
}

struct Buffered {
    envelope: Envelope,
    queued_at: Instant,
}

struct LocalBuffered {
    sender: EndpointId,
    envelope: Envelope,
    queued_at: Instant,
}

struct RouterState {
    handlers: Vec<HandlerEntry>,
    next_handler_id: u64,
    /// Whether `on_message` has ever been called.
    handlers_installed: bool,
    /// Inbound parked before the first handler installation.
    local_pending: VecDeque<LocalBuffered>,
    /// Endpoints that have signalled `handlers-ready`.
    ready: HashSet<EndpointId>,
    /// Outbound parked per not-yet-ready endpoint.
    pending: HashMap<EndpointId, VecDeque<Buffered>>,
}

/// The hub's dispatcher and fan-out engine.
pub struct MessageRouter {
    registry: Arc<EndpointRegistry>,
    state: Mutex<RouterState>,
    pending_cap: usize,
    pending_max_age: Duration,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<EndpointRegistry>,
        pending_cap: usize,
        pending_max_age: Duration,
    ) -> Self {
        Self {
            registry,
            state: Mutex::new(RouterState {
                handlers: Vec::new(),
                next_handler_id: 1,
                handlers_installed: false,
                local_pending: VecDeque::new(),
                ready: HashSet::new(),
                pending: HashMap::new(),
            }),
            pending_cap,
            pending_max_age,
        }
    }

    // -- Handler registration --

    /// Register a handler for an action. Handlers accumulate; every match
    /// runs in registration order.
    pub async fn on_message(
        &self,
        action: impl Into<String>,
        callback: impl Fn(&InboundMessage) + Send + Sync + 'static,
    ) -> HandlerId {
        let action = action.into();
        let (handler_id, parked) = {
            let mut state = self.state.lock().await;
            let id = state.next_handler_id;
            state.next_handler_id += 1;
            state.handlers.push(HandlerEntry {
                id,
                action,
                callback: Arc::new(callback),
            });

            if state.handlers_installed {
                (HandlerId(id), Vec::new())
            } else {
                state.handlers_installed = true;
                (HandlerId(id), state.local_pending.drain(..).collect())
            }
        };

        for entry in parked {
            if entry.queued_at.elapsed() > self.pending_max_age {
                debug!("dropping expired pre-handler message {:?}", entry.envelope.action);
                continue;
            }
            self.run_handlers(entry.envelope, entry.sender).await;
        }
        handler_id
    }

    /// Remove a previously registered handler. Returns whether it existed.
    pub async fn remove_handler(&self, handler: HandlerId) -> bool {
        let mut state = self.state.lock().await;
        let before = state.handlers.len();
        state.handlers.retain(|entry| entry.id != handler.0);
        state.handlers.len() != before
    }

    // -- Outbound --

    /// Post a message toward a target (or broadcast when `target` is
    /// `None`). Batch targets never fail as a whole; per-channel failures
    /// are reported in the outcome.
    pub async fn post(
        &self,
        message: Message,
        target: Option<Target>,
    ) -> Result<PostOutcome, PostError> {
        let envelope = Envelope::new(message.action, message.payload).with_target(target.clone());
        self.post_envelope(envelope, target.as_ref()).await
    }

    async fn post_envelope(
        &self,
        envelope: Envelope,
        target: Option<&Target>,
    ) -> Result<PostOutcome, PostError> {
        match target {
            // Single endpoint: resolution and send failures surface to the
            // caller.
            Some(Target::Id { id }) => {
                let Some(endpoint) = self.registry.get(*id).await else {
                    return Err(PostError::TargetNotFound(*id));
                };
                let mut outcome = PostOutcome::default();
                match self.deliver(&endpoint, envelope).await {
                    Delivery::Sent => outcome.sent = 1,
                    Delivery::Buffered => outcome.buffered = 1,
                    Delivery::Failed(source) => {
                        return Err(PostError::SendFailed { id: *id, source });
                    }
                }
                Ok(outcome)
            }
            // Broadcast and address-mode targets: zero or more endpoints,
            // each send isolated.
            _ => {
                let endpoints = match target.and_then(Target::as_query) {
                    Some(query) => self.registry.query(&query).await,
                    None => self.registry.all().await,
                };
                let mut outcome = PostOutcome::default();
                for endpoint in endpoints {
                    match self.deliver(&endpoint, envelope.clone()).await {
                        Delivery::Sent => outcome.sent += 1,
                        Delivery::Buffered => outcome.buffered += 1,
                        Delivery::Failed(e) => {
                            debug!("batch send to {:?} failed: {e}", endpoint.id);
                            outcome.failed.push(endpoint.id);
                        }
                    }
                }
                Ok(outcome)
            }
        }
    }

    /// Send to one endpoint, or park in its readiness buffer.
    async fn deliver(&self, endpoint: &ResolvedEndpoint, envelope: Envelope) -> Delivery {
        {
            let mut state = self.state.lock().await;
            if !state.ready.contains(&endpoint.id) {
                let queue = state.pending.entry(endpoint.id).or_default();
                expire(queue, self.pending_max_age);
                if queue.len() >= self.pending_cap {
                    debug!("readiness buffer full for {:?}, dropping oldest", endpoint.id);
                    queue.pop_front();
                }
                queue.push_back(Buffered {
                    envelope,
                    queued_at: Instant::now(),
                });
                return Delivery::Buffered;
            }
        }

        match endpoint.channel.send(envelope).await {
            Ok(()) => Delivery::Sent,
            Err(e) => Delivery::Failed(e),
        }
    }

    // -- Inbound --

    /// Dispatch one inbound envelope from a registered endpoint.
    ///
    /// System actions are intercepted first. An explicit target makes the
    /// envelope a relay: it goes to the target only, never to hub-local
    /// handlers. Everything else fans out to matching handlers.
    pub async fn dispatch(&self, envelope: Envelope, sender: EndpointId) {
        if envelope.is_system() {
            self.dispatch_system(envelope, sender).await;
        } else if envelope.target.is_some() {
            self.relay(envelope, sender).await;
        } else {
            self.dispatch_local(envelope, sender).await;
        }
    }

    /// Forget all readiness state for a removed endpoint.
    pub async fn forget(&self, id: EndpointId) {
        let mut state = self.state.lock().await;
        state.ready.remove(&id);
        if let Some(queue) = state.pending.remove(&id)
            && !queue.is_empty()
        {
            debug!("dropping {} undelivered buffered messages for {id:?}", queue.len());
        }
    }

    async fn dispatch_system(&self, envelope: Envelope, sender: EndpointId) {
        match envelope.action.as_str() {
            system::HANDLERS_READY => self.mark_ready(sender).await,
            system::DISCONNECT_NOTICE => {
                debug!("{sender:?} announced disconnect");
                if let Some(endpoint) = self.registry.get(sender).await {
                    endpoint.channel.close().await;
                }
                self.registry.remove(sender).await;
            }
            system::ERROR => match envelope.decode_payload::<ErrorPayload>() {
                Ok(report) => warn!("{sender:?} reported error {:?}: {}", report.kind, report.detail),
                Err(_) => warn!("{sender:?} reported an undecodable error"),
            },
            other => debug!("unexpected system action {other:?} from {sender:?}"),
        }
    }

    /// Mark an endpoint ready and flush its buffer in order.
    async fn mark_ready(&self, id: EndpointId) {
        let parked = {
            let mut state = self.state.lock().await;
            state.ready.insert(id);
            state.pending.remove(&id).unwrap_or_default()
        };
        if parked.is_empty() {
            return;
        }

        let Some(endpoint) = self.registry.get(id).await else {
            return;
        };
        trace!("flushing {} buffered messages to {id:?}", parked.len());
        for entry in parked {
            if entry.queued_at.elapsed() > self.pending_max_age {
                debug!("dropping expired buffered message {:?}", entry.envelope.action);
                continue;
            }
            if let Err(e) = endpoint.channel.send(entry.envelope).await {
                debug!("flush to {id:?} failed: {e}");
                break;
            }
        }
    }

    /// Forward a targeted envelope. Relays bypass hub-local handlers
    /// entirely; a single-identity miss is reported back to the sender as
    /// `sys.error { invalid-target }`.
    async fn relay(&self, envelope: Envelope, sender: EndpointId) {
        let target = envelope.target.clone();
        match self.post_envelope(envelope, target.as_ref()).await {
            Ok(outcome) => {
                trace!(
                    "relayed from {sender:?}: sent {}, buffered {}, failed {}",
                    outcome.sent,
                    outcome.buffered,
                    outcome.failed.len()
                );
            }
            Err(e) => {
                debug!("relay from {sender:?} failed: {e}");
                let kind = match e {
                    PostError::TargetNotFound(_) => ErrorKind::InvalidTarget,
                    PostError::SendFailed { .. } => return,
                };
                if let Some(endpoint) = self.registry.get(sender).await {
                    let _ = endpoint.channel.send(Envelope::error(kind, e.to_string())).await;
                }
            }
        }
    }

    async fn dispatch_local(&self, envelope: Envelope, sender: EndpointId) {
        {
            let mut state = self.state.lock().await;
            if !state.handlers_installed {
                expire_local(&mut state.local_pending, self.pending_max_age);
                if state.local_pending.len() >= self.pending_cap {
                    debug!("pre-handler buffer full, dropping oldest");
                    state.local_pending.pop_front();
                }
                state.local_pending.push_back(LocalBuffered {
                    sender,
                    envelope,
                    queued_at: Instant::now(),
                });
                return;
            }
        }
        self.run_handlers(envelope, sender).await;
    }

    async fn run_handlers(&self, envelope: Envelope, sender: EndpointId) {
        let matches: Vec<HandlerFn> = {
            let state = self.state.lock().await;
            state
                .handlers
                .iter()
                .filter(|entry| entry.action == envelope.action)
                .map(|entry| Arc::clone(&entry.callback))
                .collect()
        };

        if matches.is_empty() {
            // Unrecognized actions must never crash the router.
            debug!("no handler for action {:?} from {sender:?}, dropping", envelope.action);
            return;
        }

        let message = InboundMessage {
            sender,
            action: envelope.action,
            payload: envelope.payload,
        };
        for callback in matches {
            callback(&message);
        }
    }
}

enum Delivery {
    Sent,
    Buffered,
    Failed(switchboard_channel::ChannelError),
}

fn expire(queue: &mut VecDeque<Buffered>, max_age: Duration) {
    queue.retain(|entry| entry.queued_at.elapsed() <= max_age);
}

fn expire_local(queue: &mut VecDeque<LocalBuffered>, max_age: Duration) {
    queue.retain(|entry| entry.queued_at.elapsed() <= max_age);
}
