//! End-to-end admission tests: a real hub fed by the in-memory host, driven
//! from the raw channel side.

use std::time::Duration;

use switchboard_channel::{ChannelHandle, ChannelMeta, ChannelOpener, MemoryHost};
use switchboard_core::{
    Category, ChannelName, ConnectionId, Envelope, ErrorKind, ErrorPayload, HandshakePayload,
    system,
};
use switchboard_hub::{AdmissionError, Hub, HubConfig, RoleMapClassifier, admit};

async fn started_hub() -> (Hub, MemoryHost) {
    let (host, incoming) = MemoryHost::new();
    let hub = Hub::new(HubConfig::new("app"));
    hub.start(incoming).await;
    (hub, host)
}

async fn open_and_init(host: &MemoryHost, meta: ChannelMeta) -> ChannelHandle {
    let connection_id = ConnectionId::random();
    let channel = host
        .open(&ChannelName::format("app", connection_id), meta)
        .await
        .unwrap();
    channel.send(Envelope::init(connection_id)).await.unwrap();
    channel
}

#[tokio::test]
async fn handshake_confirms_identity_and_snapshot() {
    let (hub, host) = started_hub().await;

    let meta = ChannelMeta::default()
        .with_category(Category::new("content"))
        .with_coordinates(7, 0);
    let channel = open_and_init(&host, meta).await;

    let reply = channel.recv().await.unwrap();
    assert_eq!(reply.action, system::HANDSHAKE);

    let payload: HandshakePayload = reply.decode_payload().unwrap();
    assert_eq!(payload.snapshot.len(), 1);
    assert_eq!(payload.snapshot[0].id, payload.id);
    assert_eq!(payload.snapshot[0].address.unit, 7);

    assert_eq!(hub.registry().len().await, 1);
}

#[tokio::test]
async fn snapshot_grows_with_each_admission() {
    let (_hub, host) = started_hub().await;

    let first = open_and_init(
        &host,
        ChannelMeta::default().with_category(Category::new("content")),
    )
    .await;
    let _ = first.recv().await.unwrap();

    let second = open_and_init(
        &host,
        ChannelMeta::default().with_category(Category::new("popup")),
    )
    .await;
    let reply = second.recv().await.unwrap();
    let payload: HandshakePayload = reply.decode_payload().unwrap();
    assert_eq!(payload.snapshot.len(), 2);
}

#[tokio::test]
async fn foreign_namespace_is_rejected() {
    let (hub, host) = started_hub().await;

    let connection_id = ConnectionId::random();
    let channel = host
        .open(
            &ChannelName::format("other", connection_id),
            ChannelMeta::default(),
        )
        .await
        .unwrap();

    let reply = channel.recv().await.unwrap();
    assert_eq!(reply.action, system::ERROR);
    let payload: ErrorPayload = reply.decode_payload().unwrap();
    assert_eq!(payload.kind, ErrorKind::InvalidAddress);

    // The channel is closed after the rejection.
    assert!(channel.recv().await.is_none());
    assert_eq!(hub.registry().len().await, 0);
}

#[tokio::test]
async fn garbled_channel_name_is_rejected() {
    let (_hub, host) = started_hub().await;

    let channel = host
        .open("app:not-a-connection-id", ChannelMeta::default())
        .await
        .unwrap();

    let reply = channel.recv().await.unwrap();
    let payload: ErrorPayload = reply.decode_payload().unwrap();
    assert_eq!(payload.kind, ErrorKind::InvalidAddress);
    assert!(channel.recv().await.is_none());
}

#[tokio::test]
async fn non_init_first_message_is_rejected() {
    let (_hub, host) = started_hub().await;

    let connection_id = ConnectionId::random();
    let channel = host
        .open(
            &ChannelName::format("app", connection_id),
            ChannelMeta::default(),
        )
        .await
        .unwrap();
    channel
        .send(Envelope::new("ping", serde_json::Value::Null))
        .await
        .unwrap();

    let reply = channel.recv().await.unwrap();
    let payload: ErrorPayload = reply.decode_payload().unwrap();
    assert_eq!(payload.kind, ErrorKind::MalformedInit);
    assert!(channel.recv().await.is_none());
}

#[tokio::test]
async fn correlation_id_mismatch_is_rejected() {
    let (_hub, host) = started_hub().await;

    let channel = host
        .open(
            &ChannelName::format("app", ConnectionId::random()),
            ChannelMeta::default(),
        )
        .await
        .unwrap();
    // Echo a different correlation id than the channel name carries.
    channel
        .send(Envelope::init(ConnectionId::random()))
        .await
        .unwrap();

    let reply = channel.recv().await.unwrap();
    let payload: ErrorPayload = reply.decode_payload().unwrap();
    assert_eq!(payload.kind, ErrorKind::MalformedInit);
}

#[tokio::test]
async fn legacy_channel_name_carries_the_category() {
    let (hub, host) = started_hub().await;

    let channel = host.open("app-popup", ChannelMeta::default()).await.unwrap();
    channel
        .send(Envelope::init(ConnectionId::random()))
        .await
        .unwrap();

    let reply = channel.recv().await.unwrap();
    assert_eq!(reply.action, system::HANDSHAKE);
    let payload: HandshakePayload = reply.decode_payload().unwrap();

    let endpoint = hub.registry().get(payload.id).await.unwrap();
    assert_eq!(endpoint.address.category, Category::new("popup"));
}

#[tokio::test]
async fn watchdog_expires_without_init() {
    let (registry, _events) =
        switchboard_hub::EndpointRegistry::new(Box::new(RoleMapClassifier::new(Vec::new())), 16);

    let (hub_half, endpoint_half) = switchboard_channel::pair(
        ChannelName::format("app", ConnectionId::random()),
        ChannelMeta::default(),
    );

    let result = admit(hub_half, "app", Duration::from_millis(50), &registry).await;
    assert!(matches!(result, Err(AdmissionError::InitTimeout)));

    let reply = endpoint_half.recv().await.unwrap();
    let payload: ErrorPayload = reply.decode_payload().unwrap();
    assert_eq!(payload.kind, ErrorKind::Timeout);
    assert!(endpoint_half.recv().await.is_none());
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn channel_closed_before_init_is_not_registered() {
    let (registry, _events) =
        switchboard_hub::EndpointRegistry::new(Box::new(RoleMapClassifier::new(Vec::new())), 16);

    let (hub_half, endpoint_half) = switchboard_channel::pair(
        ChannelName::format("app", ConnectionId::random()),
        ChannelMeta::default(),
    );
    endpoint_half.close().await;

    let result = admit(hub_half, "app", Duration::from_secs(1), &registry).await;
    assert!(matches!(result, Err(AdmissionError::Closed)));
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn stop_announces_disconnect_and_refuses_new_channels() {
    let (hub, host) = started_hub().await;

    let channel = open_and_init(
        &host,
        ChannelMeta::default().with_category(Category::new("content")),
    )
    .await;
    let _ = channel.recv().await.unwrap();

    hub.stop().await;

    let notice = channel.recv().await.unwrap();
    assert_eq!(notice.action, system::DISCONNECT_NOTICE);
    assert!(channel.recv().await.is_none());

    let refused = host
        .open(
            &ChannelName::format("app", ConnectionId::random()),
            ChannelMeta::default(),
        )
        .await;
    assert!(refused.is_err());
}
