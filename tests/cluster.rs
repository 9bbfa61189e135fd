use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::mpsc;
use trellis::config::Config;
use trellis::{
    ClientSub, ClientSubOrUnsubMsg, InternalMessage, LoopbackBus, MemoryStore, Qos,
    SubscriptionService, SubscriptionStore, WireFormat, SUB_UNSUB_CHANNEL,
};

fn clustered_config(broker_id: &str, cache: bool) -> Config {
    let mut config = Config::standalone(broker_id);
    config.cluster.enable = true;
    config.cache.enable_inner_cache = cache;
    config
}

async fn broker(
    broker_id: &str,
    cache: bool,
    bus: &LoopbackBus,
    store: Arc<MemoryStore>,
) -> SubscriptionService<MemoryStore> {
    SubscriptionService::new(
        &clustered_config(broker_id, cache),
        store,
        Some(Arc::new(bus.clone())),
    )
    .await
    .expect("broker construction")
}

async fn collect(mut rx: mpsc::Receiver<ClientSub>) -> Vec<ClientSub> {
    let mut out = Vec::new();
    while let Some(sub) = rx.recv().await {
        out.push(sub);
    }
    out
}

#[tokio::test]
async fn ephemeral_subscribe_propagates_without_rebroadcast() {
    let bus = LoopbackBus::new(16);
    let mut rx = bus.subscribe();
    let b1 = broker("b1", false, &bus, Arc::new(MemoryStore::new())).await;
    let b2 = broker("b2", false, &bus, Arc::new(MemoryStore::new())).await;

    b1.subscribe(ClientSub::new("c1", Qos::AtLeastOnce, "t", true, None))
        .await
        .unwrap();

    let (channel, payload) = rx.recv().await.unwrap();
    assert_eq!(channel, SUB_UNSUB_CHANNEL);
    b2.apply_cluster_event(&payload).await.unwrap();

    let subs = collect(b2.search_subscribers("t")).await;
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].client_id, "c1");

    // applying a peer event must not emit a new one
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn same_origin_events_are_dropped() {
    let bus = LoopbackBus::new(16);
    let mut rx = bus.subscribe();
    let b1 = broker("b1", false, &bus, Arc::new(MemoryStore::new())).await;

    b1.subscribe(ClientSub::new("c1", Qos::AtMostOnce, "t", true, None))
        .await
        .unwrap();
    let (_, payload) = rx.recv().await.unwrap();

    // the transport echoed our own envelope back; it must be ignored
    b1.apply_cluster_event(&payload).await.unwrap();
    assert_eq!(collect(b1.search_subscribers("t")).await.len(), 1);
}

#[tokio::test]
async fn unsubscribe_propagates_and_converges() {
    let bus = LoopbackBus::new(16);
    let mut rx = bus.subscribe();
    let b1 = broker("b1", false, &bus, Arc::new(MemoryStore::new())).await;
    let b2 = broker("b2", false, &bus, Arc::new(MemoryStore::new())).await;

    b1.subscribe(ClientSub::new("c1", Qos::AtMostOnce, "t", true, None))
        .await
        .unwrap();
    let (_, sub_payload) = rx.recv().await.unwrap();
    b2.apply_cluster_event(&sub_payload).await.unwrap();

    b1.unsubscribe("c1", true, vec!["t".to_string()]).await.unwrap();
    let (_, unsub_payload) = rx.recv().await.unwrap();
    b2.apply_cluster_event(&unsub_payload).await.unwrap();

    assert!(collect(b2.search_subscribers("t")).await.is_empty());
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn durable_events_mirror_into_peer_cache() {
    // both brokers share the durable store, as in a real cluster
    let store = Arc::new(MemoryStore::new());
    let bus = LoopbackBus::new(16);
    let mut rx = bus.subscribe();
    let b1 = broker("b1", true, &bus, Arc::clone(&store)).await;
    let b2 = broker("b2", true, &bus, Arc::clone(&store)).await;

    b1.subscribe(ClientSub::new(
        "c1",
        Qos::AtLeastOnce,
        "d/t",
        false,
        Some("g".into()),
    ))
    .await
    .unwrap();
    let (_, payload) = rx.recv().await.unwrap();
    b2.apply_cluster_event(&payload).await.unwrap();

    // b2 answers from its cache; the shared group survived the wire trip
    let subs = collect(b2.search_subscribers("d/t")).await;
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].share_group.as_deref(), Some("g"));
}

#[tokio::test]
async fn cluster_unsubscribe_updates_cache_but_leaves_peers_writes_alone() {
    let store = Arc::new(MemoryStore::new());
    let bus = LoopbackBus::new(16);
    let mut rx = bus.subscribe();
    let b1 = broker("b1", true, &bus, Arc::clone(&store)).await;
    let b2 = broker("b2", true, &bus, Arc::clone(&store)).await;

    b1.subscribe(ClientSub::new("c1", Qos::AtMostOnce, "d/t", false, None))
        .await
        .unwrap();
    let (_, p1) = rx.recv().await.unwrap();
    b2.apply_cluster_event(&p1).await.unwrap();

    b1.subscribe(ClientSub::new("c2", Qos::AtMostOnce, "d/t", false, None))
        .await
        .unwrap();
    let (_, p2) = rx.recv().await.unwrap();
    b2.apply_cluster_event(&p2).await.unwrap();

    // c1 leaves; c2's subscription must survive everywhere
    b1.unsubscribe("c1", false, vec!["d/t".to_string()]).await.unwrap();
    let (_, p3) = rx.recv().await.unwrap();
    b2.apply_cluster_event(&p3).await.unwrap();

    assert_eq!(
        store.set_members("mqtt:topics").await.unwrap(),
        vec!["d/t".to_string()]
    );
    let subs = collect(b2.search_subscribers("d/t")).await;
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].client_id, "c2");
}

#[tokio::test]
async fn malformed_events_are_rejected_without_crashing() {
    let bus = LoopbackBus::new(16);
    let b1 = broker("b1", false, &bus, Arc::new(MemoryStore::new())).await;

    assert!(b1.apply_cluster_event(b"not an envelope").await.is_err());

    // unknown event types are errors too
    let mut msg = ClientSubOrUnsubMsg::unsub("c1", true, vec!["t".to_string()]);
    msg.kind = 9;
    let payload = WireFormat::Json
        .encode(&InternalMessage::new(msg, "b2"))
        .unwrap();
    assert!(b1.apply_cluster_event(&payload).await.is_err());

    // the service keeps working afterwards
    b1.subscribe(ClientSub::new("c1", Qos::AtMostOnce, "t", true, None))
        .await
        .unwrap();
    assert_eq!(collect(b1.search_subscribers("t")).await.len(), 1);
}

#[tokio::test]
async fn binary_wire_format_round_trips_between_brokers() {
    let bus = LoopbackBus::new(16);
    let mut rx = bus.subscribe();
    let mut c1 = clustered_config("b1", false);
    c1.wire_format = WireFormat::Binary;
    let mut c2 = clustered_config("b2", false);
    c2.wire_format = WireFormat::Binary;

    let b1 = SubscriptionService::new(
        &c1,
        Arc::new(MemoryStore::new()),
        Some(Arc::new(bus.clone())),
    )
    .await
    .unwrap();
    let b2 = SubscriptionService::new(
        &c2,
        Arc::new(MemoryStore::new()),
        Some(Arc::new(bus.clone())),
    )
    .await
    .unwrap();

    b1.subscribe(ClientSub::new("c1", Qos::ExactlyOnce, "t/+", true, None))
        .await
        .unwrap();
    let (_, payload) = rx.recv().await.unwrap();
    b2.apply_cluster_event(&payload).await.unwrap();

    let subs = collect(b2.search_subscribers("t/x")).await;
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].qos, Qos::ExactlyOnce);
}
