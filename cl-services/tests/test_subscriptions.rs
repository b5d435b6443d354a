//! Integration tests for event delivery through a connected client.
//!
//! Frames pushed by the in-memory server travel through the connection
//! actor, the codec and the registry before reaching subscribers.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cl_services::ChatClient;
use cl_socket::{ChannelId, EventFilter, EventKind, ServerPeer, SubscriptionHandle};
use serde_json::json;

async fn connected_client() -> (ChatClient, ServerPeer) {
    let (client, transport) = common::create_test_client(common::create_test_config());
    client
        .connect(cl_socket::Credentials::anonymous("alice"))
        .await
        .unwrap();
    let peer = common::accept(&transport, "conn-1", common::me("alice")).await;
    client.wait_until_connected(common::WAIT).await.unwrap();
    (client, peer)
}

async fn wait_for_len<T>(log: &Mutex<Vec<T>>, len: usize) {
    tokio::time::timeout(common::WAIT, async {
        while log.lock().unwrap().len() < len {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("events were not delivered in time");
}

// ---- Overlapping filters ----

#[tokio::test]
async fn overlapping_filters_receive_matching_events_in_order() {
    let (client, peer) = connected_client().await;
    let general: ChannelId = "messaging:general".parse().unwrap();
    let log: Arc<Mutex<Vec<(&'static str, u64)>>> = Arc::new(Mutex::new(Vec::new()));

    let record = |name: &'static str| {
        let log = log.clone();
        move |event: &cl_socket::Event| {
            let seq = event.data["seq"].as_u64().unwrap_or_default();
            log.lock().unwrap().push((name, seq));
        }
    };

    let _a = client.subscribe(EventFilter::kind(EventKind::MessageNew), record("a"));
    let _b = client.subscribe(EventFilter::all().in_channel(general.clone()), record("b"));
    let _c = client.subscribe(
        EventFilter::kinds([EventKind::MessageNew, EventKind::MessageRead]).in_channel(general),
        record("c"),
    );

    peer.send_event(json!({"type": "message.new", "seq": 1, "cid": "messaging:general",
        "message": {"id": "m1", "user": {"id": "bob"}}}))
        .await;
    peer.send_event(json!({"type": "message.read", "seq": 2, "cid": "messaging:general",
        "user": {"id": "bob"}}))
        .await;
    peer.send_event(json!({"type": "message.new", "seq": 3, "cid": "messaging:random",
        "message": {"id": "m2", "user": {"id": "bob"}}}))
        .await;
    peer.send_event(json!({"type": "typing.start", "seq": 4, "cid": "messaging:general"}))
        .await;

    wait_for_len(&log, 7).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            ("a", 1),
            ("b", 1),
            ("c", 1),
            ("b", 2),
            ("c", 2),
            ("a", 3),
            ("b", 4),
        ]
    );
}

#[tokio::test]
async fn unknown_event_kinds_are_delivered_and_garbage_is_dropped() {
    let (client, peer) = connected_client().await;
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let _all = {
        let kinds = kinds.clone();
        client.subscribe(EventFilter::all(), move |event| {
            kinds.lock().unwrap().push(event.kind.as_str().to_string());
        })
    };

    peer.send_frame("{not json").await;
    peer.send_event(json!({"type": "poll.vote_casted", "cid": "messaging:general"}))
        .await;
    peer.send_event(json!({"type": "channel.updated", "cid": "messaging:general"}))
        .await;

    wait_for_len(&kinds, 2).await;
    assert_eq!(
        *kinds.lock().unwrap(),
        vec!["poll.vote_casted".to_string(), "channel.updated".to_string()]
    );
    assert!(client.manager().is_connected());
}

// ---- Cancellation during delivery ----

#[tokio::test]
async fn cancel_inside_own_callback_stops_further_delivery() {
    let (client, peer) = connected_client().await;
    let first = Arc::new(Mutex::new(Vec::new()));
    let sibling = Arc::new(Mutex::new(Vec::new()));
    let own: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));

    let handle = {
        let first = first.clone();
        let own = own.clone();
        client.subscribe(EventFilter::kind(EventKind::TypingStart), move |event| {
            first.lock().unwrap().push(event.data["seq"].as_u64().unwrap_or_default());
            if let Some(handle) = own.lock().unwrap().as_ref() {
                handle.cancel();
            }
        })
    };
    *own.lock().unwrap() = Some(handle.clone());

    let _sibling = {
        let sibling = sibling.clone();
        client.subscribe(EventFilter::kind(EventKind::TypingStart), move |event| {
            sibling.lock().unwrap().push(event.data["seq"].as_u64().unwrap_or_default());
        })
    };

    for seq in 1..=3 {
        peer.send_event(json!({"type": "typing.start", "seq": seq, "cid": "messaging:general"}))
            .await;
    }

    wait_for_len(&sibling, 3).await;
    assert_eq!(*first.lock().unwrap(), vec![1]);
    assert_eq!(*sibling.lock().unwrap(), vec![1, 2, 3]);
    assert!(!handle.is_active());
}

#[tokio::test]
async fn subscribe_once_fires_a_single_time() {
    let (client, peer) = connected_client().await;
    let calls = Arc::new(Mutex::new(Vec::new()));
    let witness = Arc::new(Mutex::new(Vec::new()));

    let _once = {
        let calls = calls.clone();
        client
            .registry()
            .subscribe_once(EventFilter::kind(EventKind::ChannelUpdated), move |event| {
                calls.lock().unwrap().push(event.data["seq"].as_u64().unwrap_or_default());
            })
    };
    let _witness = {
        let witness = witness.clone();
        client.subscribe(EventFilter::kind(EventKind::ChannelUpdated), move |_| {
            witness.lock().unwrap().push(());
        })
    };

    for seq in 1..=2 {
        peer.send_event(json!({"type": "channel.updated", "seq": seq, "cid": "messaging:general"}))
            .await;
    }

    wait_for_len(&witness, 2).await;
    assert_eq!(*calls.lock().unwrap(), vec![1]);
}
