mod common;

use chatterbox_core::connection::RealtimeConnectionManager;
use chatterbox_core::error::ChatResult;
use chatterbox_core::protocol::{OutboundMessage, WireMessage};
use chatterbox_core::sync::{MessageStatus, MessageSyncEngine, RoomChannel};
use chatterbox_core::transport::TransportConfig;
use common::*;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Default)]
struct LoopbackChannel {
    sends: Mutex<Vec<OutboundMessage>>,
}

impl RoomChannel for LoopbackChannel {
    fn is_connected(&self) -> bool {
        true
    }

    fn join_room(&self, _user_id: &str, _peer_id: &str) -> ChatResult<()> {
        Ok(())
    }

    fn send_message(&self, message: OutboundMessage) -> ChatResult<()> {
        self.sends.lock().push(message);
        Ok(())
    }
}

fn engine_with_history() -> (
    Arc<MessageSyncEngine>,
    tokio::sync::mpsc::UnboundedReceiver<(String, HistoryReply)>,
) {
    let (history, requests) = FakeHistory::new();
    let engine = MessageSyncEngine::new("u1", Arc::new(LoopbackChannel::default()), history);
    (Arc::new(engine), requests)
}

fn echo_of(client_msg_id: &str, id: &str, body: &str) -> WireMessage {
    let mut msg = wire(id, "u1", "u2", body, 100);
    msg.client_msg_id = Some(client_msg_id.to_string());
    msg
}

#[tokio::test]
async fn test_send_then_echo_reconciles_in_place() {
    let (engine, mut requests) = engine_with_history();
    let loaded = engine.set_active_conversation("u2");
    let (_, reply) = next_history_request(&mut requests).await;
    reply.send(Ok(vec![wire("m1", "u2", "u1", "hi", 0)])).unwrap();
    loaded.await.unwrap();

    let cid = engine.send("hello").unwrap();
    let messages = engine.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].status, MessageStatus::Pending);

    engine.on_inbound_message(wire("m0", "u2", "u1", "later", 200));
    assert!(engine.on_inbound_message(echo_of(&cid, "m2", "hello")));

    let messages = engine.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].id.as_deref(), Some("m2"));
    assert_eq!(messages[1].status, MessageStatus::Sent);
    assert_eq!(messages[2].id.as_deref(), Some("m0"));
}

#[tokio::test]
async fn test_failure_is_terminal() {
    let (engine, _requests) = engine_with_history();
    engine.activate("u2");

    let cid = engine.send("hello").unwrap();
    assert!(engine.on_message_failed(&cid));
    assert!(!engine.on_inbound_message(echo_of(&cid, "m2", "hello")));

    let messages = engine.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, MessageStatus::Failed);
    assert_eq!(messages[0].id, None);

    // a reconciled message cannot fail afterwards
    let cid = engine.send("again").unwrap();
    engine.on_inbound_message(echo_of(&cid, "m3", "again"));
    assert!(!engine.on_message_failed(&cid));
    assert_eq!(engine.messages()[1].status, MessageStatus::Sent);
}

#[tokio::test]
async fn test_stale_history_does_not_touch_new_conversation() {
    let (engine, mut requests) = engine_with_history();

    let loading_a = engine.set_active_conversation("u2");
    let (peer_a, reply_a) = next_history_request(&mut requests).await;
    assert_eq!(peer_a, "u2");

    let loading_b = engine.set_active_conversation("u3");
    let (peer_b, reply_b) = next_history_request(&mut requests).await;
    assert_eq!(peer_b, "u3");

    reply_b
        .send(Ok(vec![wire("b1", "u3", "u1", "from b", 0)]))
        .unwrap();
    loading_b.await.unwrap();

    reply_a
        .send(Ok(vec![
            wire("a1", "u2", "u1", "from a", 0),
            wire("a2", "u1", "u2", "to a", 1),
        ]))
        .unwrap();
    loading_a.await.unwrap();

    let ids: Vec<String> = engine.messages().into_iter().filter_map(|m| m.id).collect();
    assert_eq!(ids, vec!["b1".to_string()]);
    assert_eq!(engine.active_conversation().unwrap().peer_id, "u3");

    // live traffic for the abandoned conversation is dropped too
    assert!(!engine.on_inbound_message(wire("a3", "u2", "u1", "late", 2)));
}

#[tokio::test]
async fn test_sends_before_history_survive_it() {
    let (engine, mut requests) = engine_with_history();
    let loaded = engine.set_active_conversation("u2");
    let (_, reply) = next_history_request(&mut requests).await;

    let cid = engine.send("quick").unwrap();
    reply
        .send(Ok(vec![
            wire("m2", "u1", "u2", "second", 20),
            wire("m1", "u2", "u1", "first", 10),
        ]))
        .unwrap();
    loaded.await.unwrap();

    let messages = engine.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].id.as_deref(), Some("m1"));
    assert_eq!(messages[1].id.as_deref(), Some("m2"));
    assert_eq!(messages[2].client_msg_id.as_deref(), Some(cid.as_str()));
    assert_eq!(messages[2].status, MessageStatus::Pending);
}

#[tokio::test]
async fn test_history_error_keeps_live_sequence() {
    let (engine, mut requests) = engine_with_history();
    let loaded = engine.set_active_conversation("u2");
    let (_, reply) = next_history_request(&mut requests).await;

    engine.on_inbound_message(wire("m5", "u2", "u1", "live", 50));
    reply
        .send(Err(chatterbox_core::ChatError::network("boom")))
        .unwrap();
    loaded.await.unwrap();

    assert_eq!(engine.messages().len(), 1);
}

/// u1 talks to u2 end to end over a fake transport
#[tokio::test]
async fn test_conversation_round_trip() {
    let session = signed_in("u1", &token_for("u1", 3600));
    let (transport, mut opened) = FakeTransport::new();
    let manager = Arc::new(RealtimeConnectionManager::new(
        TransportConfig::default(),
        transport,
        session,
    ));
    let (history, mut requests) = FakeHistory::new();
    let engine = Arc::new(MessageSyncEngine::new("u1", manager.clone(), history));
    let _events = engine.spawn_event_loop(manager.subscribe());

    manager.connect().unwrap();
    let mut server = next_connection(&mut opened).await;
    server.establish().await;
    assert!(wait_until(|| engine.connected()).await);

    let loaded = engine.set_active_conversation("u2");
    let (name, payload) = server.recv_event().await;
    assert_eq!(name, "joinRoom");
    assert_eq!(payload, json!({ "userId": "u1", "receiverId": "u2" }));

    let (_, reply) = next_history_request(&mut requests).await;
    reply.send(Ok(vec![wire("m1", "u2", "u1", "hi", 0)])).unwrap();
    loaded.await.unwrap();
    assert_eq!(engine.messages().len(), 1);

    let cid = engine.send("yo").unwrap();
    let messages = engine.messages();
    assert_eq!(messages[1].status, MessageStatus::Pending);
    assert_eq!(messages[1].body, "yo");

    let (name, payload) = server.recv_event().await;
    assert_eq!(name, "sendMessage");
    assert_eq!(payload["clientMsgId"], json!(cid));

    server.emit("roomJoined", json!({ "roomId": "room_u1_u2" }));
    server.emit(
        "receiveMessage",
        json!({ "_id": "x1", "sender": "u3", "receiver": "u1", "message": "psst" }),
    );
    server.emit(
        "receiveMessage",
        json!({
            "_id": "m2",
            "clientMsgId": cid,
            "sender": "u1",
            "receiver": "u2",
            "message": "yo",
            "createdAt": "2024-05-01T10:00:00.000Z"
        }),
    );

    assert!(wait_until(|| engine.messages()[1].status == MessageStatus::Sent).await);
    let messages = engine.messages();
    let ids: Vec<Option<&str>> = messages.iter().map(|m| m.id.as_deref()).collect();
    assert_eq!(ids, vec![Some("m1"), Some("m2")]);
    assert_eq!(
        engine.active_conversation().unwrap().room_id.as_deref(),
        Some("room_u1_u2")
    );
}

#[derive(Debug, Clone)]
enum Op {
    Inbound { id: u8, peer: u8, echo: Option<u8> },
    Send,
    Fail(u8),
    History(Vec<u8>),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6, 0u8..3, proptest::option::of(0u8..4))
            .prop_map(|(id, peer, echo)| Op::Inbound { id, peer, echo }),
        Just(Op::Send),
        (0u8..4).prop_map(Op::Fail),
        proptest::collection::vec(0u8..6, 0..6).prop_map(Op::History),
    ]
}

proptest! {
    #[test]
    fn prop_sequence_stays_consistent(ops in proptest::collection::vec(op(), 1..40)) {
        let (history, _requests) = FakeHistory::new();
        let engine = MessageSyncEngine::new("u1", Arc::new(LoopbackChannel::default()), history);
        let epoch = engine.activate("u2");

        let mut sent: Vec<String> = Vec::new();
        let mut failed: HashSet<String> = HashSet::new();

        for op in ops {
            match op {
                Op::Inbound { id, peer, echo } => {
                    let peer = ["u2", "u3", "u4"][peer as usize];
                    let mut msg = wire(&format!("m{}", id), peer, "u1", "x", id as i64);
                    if let Some(cid) = echo.and_then(|k| sent.get(k as usize)) {
                        msg.client_msg_id = Some(cid.clone());
                    }
                    engine.on_inbound_message(msg);
                }
                Op::Send => sent.push(engine.send("hello").unwrap()),
                Op::Fail(k) => {
                    if let Some(cid) = sent.get(k as usize) {
                        if engine.on_message_failed(cid) {
                            failed.insert(cid.clone());
                        }
                    }
                }
                Op::History(ids) => {
                    let list = ids
                        .iter()
                        .map(|id| wire(&format!("m{}", id), "u2", "u1", "h", *id as i64))
                        .collect();
                    engine.on_history_loaded(epoch, list);
                }
            }
        }

        let messages = engine.messages();
        let mut seen = HashSet::new();
        for msg in &messages {
            if let Some(id) = &msg.id {
                prop_assert!(seen.insert(id.clone()), "duplicate id {}", id);
            }
            prop_assert!(msg.sender_id == "u2" || msg.receiver_id == "u2");
            if let Some(cid) = &msg.client_msg_id {
                if failed.contains(cid) {
                    prop_assert_eq!(msg.status, MessageStatus::Failed);
                }
            }
        }
    }
}
