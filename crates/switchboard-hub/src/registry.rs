//! The authoritative map of connected endpoints.
//!
//! The registry owns every endpoint's identity, address, channel handle, and
//! timestamps, and emits the lifecycle events the message router consumes.
//! Identities are random tokens, so removal never renumbers siblings; the
//! only identity recovery is an address match against an entry whose channel
//! has already gone dead (the page-refresh reconnection case).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use switchboard_channel::{ChannelHandle, ChannelMeta};
use switchboard_core::{Address, AddressQuery, Category, EndpointId, EndpointInfo, Envelope};

use crate::classifier::AddressClassifier;

/// Lifecycle events emitted by the registry, consumed by the router.
#[derive(Debug)]
pub enum RegistryEvent {
    EndpointAdded {
        id: EndpointId,
        address: Address,
        /// Whether an existing identity was reused for a reconnection.
        reused: bool,
    },
    EndpointMessage {
        id: EndpointId,
        envelope: Envelope,
    },
    EndpointRemoved {
        id: EndpointId,
        address: Address,
    },
}

/// Address material gathered during admission.
#[derive(Debug, Clone, Default)]
pub struct AddressHint {
    /// Category declared out-of-band (legacy channel name or host metadata).
    pub category_hint: Option<Category>,
    /// Origin path for the injected classifier.
    pub origin: Option<String>,
    pub unit: Option<u64>,
    pub sub_unit: Option<u64>,
}

impl AddressHint {
    pub fn from_meta(meta: &ChannelMeta) -> Self {
        Self {
            category_hint: meta.category_hint.clone(),
            origin: meta.origin.clone(),
            unit: meta.unit,
            sub_unit: meta.sub_unit,
        }
    }

    /// Overrides any existing category hint.
    pub fn with_category(mut self, category: Category) -> Self {
        self.category_hint = Some(category);
        self
    }
}

/// A resolved view of one registered endpoint.
#[derive(Clone)]
pub struct ResolvedEndpoint {
    pub id: EndpointId,
    pub address: Address,
    pub channel: Arc<ChannelHandle>,
    pub created_at: Instant,
    pub last_active_at: Instant,
}

impl ResolvedEndpoint {
    pub fn info(&self) -> EndpointInfo {
        EndpointInfo {
            id: self.id,
            address: self.address.clone(),
        }
    }
}

struct Entry {
    address: Address,
    channel: Arc<ChannelHandle>,
    created_at: Instant,
    last_active_at: Instant,
}

struct Inner {
    endpoints: HashMap<EndpointId, Entry>,
    /// Unit allocator for endpoints with no host-supplied coordinates.
    next_headless_unit: u64,
}

/// Hub-side endpoint registry. Explicitly constructed and injected — one per
/// hub, never a process-wide singleton.
pub struct EndpointRegistry {
    classifier: Box<dyn AddressClassifier>,
    inner: Mutex<Inner>,
    events: mpsc::Sender<RegistryEvent>,
}

impl EndpointRegistry {
    /// Create a registry and the event stream its consumer will drain.
    pub fn new(
        classifier: Box<dyn AddressClassifier>,
        event_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<RegistryEvent>) {
        let (events, events_rx) = mpsc::channel(event_capacity);
        let registry = Arc::new(Self {
            classifier,
            inner: Mutex::new(Inner {
                endpoints: HashMap::new(),
                next_headless_unit: 1,
            }),
            events,
        });
        (registry, events_rx)
    }

    /// Admit a channel, deriving its address and resolving its identity.
    ///
    /// Never fails: with no derivable category the endpoint lands in
    /// [`Category::unknown`], and with no host coordinates it draws a unit
    /// from the headless counter. If a registered entry has the same address
    /// but a dead channel, its identity is reused (refresh reconnection);
    /// otherwise a fresh random identity is minted.
    pub async fn add(&self, channel: Arc<ChannelHandle>, hint: AddressHint) -> EndpointId {
        let mut inner = self.inner.lock().await;

        let category = hint
            .category_hint
            .or_else(|| {
                hint.origin
                    .as_deref()
                    .and_then(|origin| self.classifier.classify(origin))
            })
            .unwrap_or_else(Category::unknown);

        let (unit, sub_unit) = match hint.unit {
            Some(unit) => (unit, hint.sub_unit.unwrap_or(0)),
            None => {
                let unit = inner.next_headless_unit;
                inner.next_headless_unit += 1;
                (unit, 0)
            }
        };
        let address = Address::new(category, unit, sub_unit);

        let reusable = inner
            .endpoints
            .iter()
            .find(|(_, entry)| entry.address == address && !entry.channel.is_connected())
            .map(|(id, _)| *id);

        let now = Instant::now();
        let (id, reused) = match reusable {
            Some(id) => {
                // Same address, dead channel: the endpoint came back before
                // the old entry was torn down. Keep its identity.
                if let Some(entry) = inner.endpoints.get_mut(&id) {
                    entry.channel = channel;
                    entry.last_active_at = now;
                }
                (id, true)
            }
            None => {
                let id = EndpointId::random();
                inner.endpoints.insert(
                    id,
                    Entry {
                        address: address.clone(),
                        channel,
                        created_at: now,
                        last_active_at: now,
                    },
                );
                (id, false)
            }
        };
        drop(inner);

        debug!("registered endpoint {id:?} at {address} (reused: {reused})");
        self.emit(RegistryEvent::EndpointAdded {
            id,
            address,
            reused,
        })
        .await;
        id
    }

    /// Delete an entry outright. No reindexing, no grace period.
    pub async fn remove(&self, id: EndpointId) -> Option<Address> {
        let removed = self.inner.lock().await.endpoints.remove(&id);
        self.finish_remove(id, removed).await
    }

    /// Delete an entry only if it is still bound to `channel`.
    ///
    /// Channel teardown paths use this instead of [`remove`](Self::remove):
    /// when an identity was reused for a reconnection, the replaced entry
    /// must not be torn down by the old channel's late close notification.
    pub async fn remove_channel(
        &self,
        id: EndpointId,
        channel: &Arc<ChannelHandle>,
    ) -> Option<Address> {
        let removed = {
            let mut inner = self.inner.lock().await;
            match inner.endpoints.get(&id) {
                Some(entry) if Arc::ptr_eq(&entry.channel, channel) => {
                    inner.endpoints.remove(&id)
                }
                Some(_) => {
                    debug!("stale close for {id:?}, entry already rebound");
                    return None;
                }
                None => return None,
            }
        };
        self.finish_remove(id, removed).await
    }

    async fn finish_remove(&self, id: EndpointId, removed: Option<Entry>) -> Option<Address> {
        match removed {
            Some(entry) => {
                debug!("removed endpoint {id:?} at {}", entry.address);
                self.emit(RegistryEvent::EndpointRemoved {
                    id,
                    address: entry.address.clone(),
                })
                .await;
                Some(entry.address)
            }
            None => None,
        }
    }

    /// Record inbound activity and emit the message event.
    ///
    /// `id` is the channel→identity binding made at admission; the
    /// envelope's `sender` echo is checked but not trusted.
    pub async fn note_message(&self, id: EndpointId, envelope: Envelope) {
        {
            let mut inner = self.inner.lock().await;
            let Some(entry) = inner.endpoints.get_mut(&id) else {
                debug!("message from unregistered endpoint {id:?}, dropping");
                return;
            };
            entry.last_active_at = Instant::now();
        }

        if let Some(sender) = envelope.sender
            && sender != id
        {
            warn!("endpoint {id:?} echoed foreign identity {sender:?}");
        }

        self.emit(RegistryEvent::EndpointMessage { id, envelope }).await;
    }

    pub async fn get(&self, id: EndpointId) -> Option<ResolvedEndpoint> {
        let inner = self.inner.lock().await;
        inner.endpoints.get(&id).map(|entry| resolve(id, entry))
    }

    /// All endpoints whose address matches the query.
    pub async fn query(&self, query: &AddressQuery) -> Vec<ResolvedEndpoint> {
        let inner = self.inner.lock().await;
        inner
            .endpoints
            .iter()
            .filter(|(_, entry)| query.matches(&entry.address))
            .map(|(id, entry)| resolve(*id, entry))
            .collect()
    }

    pub async fn all(&self) -> Vec<ResolvedEndpoint> {
        let inner = self.inner.lock().await;
        inner
            .endpoints
            .iter()
            .map(|(id, entry)| resolve(*id, entry))
            .collect()
    }

    /// The published view of every endpoint (handshake snapshot).
    pub async fn snapshot(&self) -> Vec<EndpointInfo> {
        let inner = self.inner.lock().await;
        inner
            .endpoints
            .iter()
            .map(|(id, entry)| EndpointInfo {
                id: *id,
                address: entry.address.clone(),
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.endpoints.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.endpoints.is_empty()
    }

    async fn emit(&self, event: RegistryEvent) {
        if self.events.send(event).await.is_err() {
            debug!("registry event receiver gone, event dropped");
        }
    }
}

fn resolve(id: EndpointId, entry: &Entry) -> ResolvedEndpoint {
    ResolvedEndpoint {
        id,
        address: entry.address.clone(),
        channel: Arc::clone(&entry.channel),
        created_at: entry.created_at,
        last_active_at: entry.last_active_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{RoleEntry, RoleMapClassifier};
    use switchboard_channel::pair;

    fn test_registry() -> (Arc<EndpointRegistry>, mpsc::Receiver<RegistryEvent>) {
        let classifier = RoleMapClassifier::new(vec![RoleEntry {
            path_prefix: "/pages/".to_string(),
            category: Category::new("content"),
        }]);
        EndpointRegistry::new(Box::new(classifier), 32)
    }

    fn channel_with(meta: ChannelMeta) -> (Arc<ChannelHandle>, ChannelHandle) {
        let (hub_half, endpoint_half) = pair("app:0011223344556677", meta);
        (Arc::new(hub_half), endpoint_half)
    }

    #[tokio::test]
    async fn add_derives_address_from_meta() {
        let (registry, _events) = test_registry();
        let meta = ChannelMeta::default()
            .with_origin("/pages/main.html")
            .with_coordinates(7, 0);
        let (channel, peer) = channel_with(meta);

        let id = registry
            .add(channel, AddressHint::from_meta(peer.meta()))
            .await;
        let endpoint = registry.get(id).await.unwrap();
        assert_eq!(endpoint.address, Address::new(Category::new("content"), 7, 0));
    }

    #[tokio::test]
    async fn add_without_hints_is_headless_unknown() {
        let (registry, _events) = test_registry();
        let (first, _p1) = channel_with(ChannelMeta::default());
        let (second, _p2) = channel_with(ChannelMeta::default());

        let a = registry.add(first, AddressHint::default()).await;
        let b = registry.add(second, AddressHint::default()).await;

        let a = registry.get(a).await.unwrap();
        let b = registry.get(b).await.unwrap();
        assert!(a.address.category.is_unknown());
        assert_eq!(a.address.unit, 1);
        assert_eq!(b.address.unit, 2);
        assert_ne!(a.address, b.address);
    }

    #[tokio::test]
    async fn category_hint_beats_origin() {
        let (registry, _events) = test_registry();
        let meta = ChannelMeta::default().with_origin("/pages/main.html");
        let (channel, _peer) = channel_with(meta.clone());

        let hint = AddressHint::from_meta(&meta).with_category(Category::new("devtools"));
        let id = registry.add(channel, hint).await;
        let endpoint = registry.get(id).await.unwrap();
        assert_eq!(endpoint.address.category, Category::new("devtools"));
    }

    #[tokio::test]
    async fn identity_reused_for_dead_channel_with_same_address() {
        let (registry, _events) = test_registry();
        let meta = ChannelMeta::default()
            .with_origin("/pages/main.html")
            .with_coordinates(7, 0);

        let (first, _peer1) = channel_with(meta.clone());
        let id1 = registry.add(first, AddressHint::from_meta(&meta)).await;

        // The endpoint dies without its close notification arriving.
        registry.get(id1).await.unwrap().channel.sever();

        let (second, _peer2) = channel_with(meta.clone());
        let id2 = registry.add(second, AddressHint::from_meta(&meta)).await;
        assert_eq!(id1, id2);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn live_channel_blocks_identity_reuse() {
        let (registry, _events) = test_registry();
        let meta = ChannelMeta::default()
            .with_origin("/pages/main.html")
            .with_coordinates(7, 0);

        let (first, _peer1) = channel_with(meta.clone());
        let id1 = registry.add(first, AddressHint::from_meta(&meta)).await;

        let (second, _peer2) = channel_with(meta.clone());
        let id2 = registry.add(second, AddressHint::from_meta(&meta)).await;
        assert_ne!(id1, id2);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn no_reuse_after_removal() {
        let (registry, _events) = test_registry();
        let meta = ChannelMeta::default()
            .with_origin("/pages/main.html")
            .with_coordinates(7, 0);

        let (first, _peer1) = channel_with(meta.clone());
        let id1 = registry.add(first, AddressHint::from_meta(&meta)).await;
        registry.get(id1).await.unwrap().channel.sever();
        registry.remove(id1).await.unwrap();

        let (second, _peer2) = channel_with(meta.clone());
        let id2 = registry.add(second, AddressHint::from_meta(&meta)).await;
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn stale_close_does_not_remove_rebound_entry() {
        let (registry, _events) = test_registry();
        let meta = ChannelMeta::default()
            .with_origin("/pages/main.html")
            .with_coordinates(7, 0);

        let (old_channel, _old_peer) = channel_with(meta.clone());
        let id = registry
            .add(Arc::clone(&old_channel), AddressHint::from_meta(&meta))
            .await;
        old_channel.sever();

        // Refresh reconnection rebinds the identity to a new channel.
        let (new_channel, _new_peer) = channel_with(meta.clone());
        let reused = registry
            .add(Arc::clone(&new_channel), AddressHint::from_meta(&meta))
            .await;
        assert_eq!(reused, id);

        // The old channel's late close must not tear the live entry down.
        assert!(registry.remove_channel(id, &old_channel).await.is_none());
        assert!(registry.get(id).await.is_some());

        assert!(registry.remove_channel(id, &new_channel).await.is_some());
        assert!(registry.get(id).await.is_none());
    }

    #[tokio::test]
    async fn query_by_unit_crosses_categories() {
        let (registry, _events) = test_registry();

        let m1 = ChannelMeta::default()
            .with_category(Category::new("content"))
            .with_coordinates(7, 0);
        let m2 = ChannelMeta::default()
            .with_category(Category::new("devtools"))
            .with_coordinates(7, 1);
        let m3 = ChannelMeta::default()
            .with_category(Category::new("content"))
            .with_coordinates(8, 0);

        let mut peers = Vec::new();
        for meta in [m1, m2, m3] {
            let (channel, peer) = channel_with(meta.clone());
            registry.add(channel, AddressHint::from_meta(&meta)).await;
            peers.push(peer);
        }

        let hits = registry.query(&AddressQuery::unit(7)).await;
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|e| e.address.unit == 7));
    }

    #[tokio::test]
    async fn remove_deletes_outright() {
        let (registry, mut events) = test_registry();
        let (channel, _peer) = channel_with(ChannelMeta::default());
        let id = registry.add(channel, AddressHint::default()).await;

        assert!(registry.remove(id).await.is_some());
        assert!(registry.get(id).await.is_none());
        assert!(registry.remove(id).await.is_none());

        // Added then Removed, in order.
        assert!(matches!(
            events.recv().await.unwrap(),
            RegistryEvent::EndpointAdded { reused: false, .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            RegistryEvent::EndpointRemoved { .. }
        ));
    }

    #[tokio::test]
    async fn note_message_requires_registration() {
        let (registry, mut events) = test_registry();
        registry
            .note_message(
                EndpointId::random(),
                Envelope::new("ping", serde_json::Value::Null),
            )
            .await;

        // No event emitted for unregistered senders.
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn note_message_emits_event() {
        let (registry, mut events) = test_registry();
        let (channel, _peer) = channel_with(ChannelMeta::default());
        let id = registry.add(channel, AddressHint::default()).await;
        let _ = events.recv().await;

        registry
            .note_message(id, Envelope::new("ping", serde_json::Value::Null))
            .await;
        match events.recv().await.unwrap() {
            RegistryEvent::EndpointMessage { id: got, envelope } => {
                assert_eq!(got, id);
                assert_eq!(envelope.action, "ping");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn snapshot_publishes_only_id_and_address() {
        let (registry, _events) = test_registry();
        let meta = ChannelMeta::default()
            .with_category(Category::new("content"))
            .with_coordinates(7, 0);
        let (channel, _peer) = channel_with(meta.clone());
        let id = registry.add(channel, AddressHint::from_meta(&meta)).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);
        assert_eq!(snapshot[0].address.unit, 7);
    }
}
