//! End-to-end tests against a real listener and a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use ama_core::RoomId;
use ama_server::{start, ServerConfig, ServerHandle};
use ama_store::{Database, SqliteRoomStore};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn boot_server() -> ServerHandle {
    let store = Arc::new(SqliteRoomStore::new(Database::in_memory().unwrap()));
    let config = ServerConfig {
        port: 0,
        ..ServerConfig::default()
    };
    start(config, store).await.unwrap()
}

fn http_url(server: &ServerHandle, path: &str) -> String {
    format!("http://{}{}", server.addr(), path)
}

async fn create_room(client: &reqwest::Client, server: &ServerHandle, theme: &str) -> String {
    let resp: Value = client
        .post(http_url(server, "/api/rooms"))
        .json(&json!({ "theme": theme }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    resp["id"].as_str().unwrap().to_owned()
}

async fn post_message(client: &reqwest::Client, server: &ServerHandle, room: &str, text: &str) -> String {
    let resp = client
        .post(http_url(server, &format!("/api/rooms/{room}/messages")))
        .json(&json!({ "message": text }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    body["id"].as_str().unwrap().to_owned()
}

/// Connect and wait until the registry has picked the socket up.
async fn subscribe(server: &ServerHandle, room: &str) -> WsStream {
    let room_id = RoomId::parse(room).unwrap();
    let before = server.registry().subscriber_count(&room_id).await;
    let (ws, _) = connect_async(format!("ws://{}/subscribe/{room}", server.addr()))
        .await
        .unwrap();
    wait_for_subscribers(server, &room_id, before + 1).await;
    ws
}

async fn wait_for_subscribers(server: &ServerHandle, room: &RoomId, expected: usize) {
    for _ in 0..200 {
        if server.registry().subscriber_count(room).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("room never reached {expected} subscribers");
}

async fn next_event(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn new_message_is_pushed_to_subscribers() {
    let server = boot_server().await;
    let client = reqwest::Client::new();
    let room = create_room(&client, &server, "Rust AMA").await;
    let mut first = subscribe(&server, &room).await;
    let mut second = subscribe(&server, &room).await;

    let id = post_message(&client, &server, &room, "Why is the borrow checker so strict?").await;

    for ws in [&mut first, &mut second] {
        let event = next_event(ws).await;
        assert_eq!(event["kind"], "message_created");
        assert_eq!(event["value"]["id"], id.as_str());
        assert_eq!(event["value"]["message"], "Why is the borrow checker so strict?");
    }
}

#[tokio::test]
async fn reactions_are_pushed_with_new_count() {
    let server = boot_server().await;
    let client = reqwest::Client::new();
    let room = create_room(&client, &server, "AMA").await;
    let mut ws = subscribe(&server, &room).await;

    let id = post_message(&client, &server, &room, "q").await;
    assert_eq!(next_event(&mut ws).await["kind"], "message_created");

    let react_url = http_url(&server, &format!("/api/rooms/{room}/messages/{id}/react"));
    let body: Value = client.patch(&react_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["reaction_count"], 1);

    let event = next_event(&mut ws).await;
    assert_eq!(event["kind"], "message_reaction_increased");
    assert_eq!(event["value"], json!({ "id": id, "count": 1 }));

    client.delete(&react_url).send().await.unwrap();
    let event = next_event(&mut ws).await;
    assert_eq!(event["kind"], "message_reaction_decreased");
    assert_eq!(event["value"]["count"], 0);
}

#[tokio::test]
async fn events_stay_in_their_room() {
    let server = boot_server().await;
    let client = reqwest::Client::new();
    let room_a = create_room(&client, &server, "a").await;
    let room_b = create_room(&client, &server, "b").await;
    let mut in_a = subscribe(&server, &room_a).await;
    let mut in_b = subscribe(&server, &room_b).await;

    post_message(&client, &server, &room_b, "for b").await;

    assert_eq!(next_event(&mut in_b).await["value"]["message"], "for b");
    assert!(timeout(Duration::from_millis(200), in_a.next()).await.is_err());
}

#[tokio::test]
async fn answering_does_not_broadcast() {
    let server = boot_server().await;
    let client = reqwest::Client::new();
    let room = create_room(&client, &server, "AMA").await;
    let mut ws = subscribe(&server, &room).await;

    let id = post_message(&client, &server, &room, "q").await;
    next_event(&mut ws).await;

    let resp = client
        .patch(http_url(&server, &format!("/api/rooms/{room}/messages/{id}/answer")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);
    assert!(timeout(Duration::from_millis(200), ws.next()).await.is_err());
}

#[tokio::test]
async fn subscribing_to_unknown_room_is_rejected() {
    let server = boot_server().await;

    let err = connect_async(format!("ws://{}/subscribe/{}", server.addr(), RoomId::new()))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 404),
        other => panic!("expected http error, got {other:?}"),
    }

    let err = connect_async(format!("ws://{}/subscribe/not-a-room", server.addr()))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 400),
        other => panic!("expected http error, got {other:?}"),
    }
}

#[tokio::test]
async fn client_disconnect_deregisters() {
    let server = boot_server().await;
    let client = reqwest::Client::new();
    let room = create_room(&client, &server, "AMA").await;
    let room_id = RoomId::parse(&room).unwrap();
    let mut ws = subscribe(&server, &room).await;

    ws.close(None).await.unwrap();
    drop(ws);
    wait_for_subscribers(&server, &room_id, 0).await;

    // Broadcasting to the now-empty room is harmless.
    post_message(&client, &server, &room, "anyone?").await;
}

#[tokio::test]
async fn broken_subscriber_does_not_block_others() {
    let server = boot_server().await;
    let client = reqwest::Client::new();
    let room = create_room(&client, &server, "AMA").await;
    let room_id = RoomId::parse(&room).unwrap();
    let dropped = subscribe(&server, &room).await;
    let mut alive = subscribe(&server, &room).await;

    // Vanish without a close handshake.
    drop(dropped);

    for i in 0..3 {
        post_message(&client, &server, &room, &format!("q{i}")).await;
        assert_eq!(next_event(&mut alive).await["value"]["message"], format!("q{i}"));
    }
    wait_for_subscribers(&server, &room_id, 1).await;
}

#[tokio::test]
async fn shutdown_closes_subscriptions() {
    let server = boot_server().await;
    let client = reqwest::Client::new();
    let room = create_room(&client, &server, "AMA").await;
    let room_id = RoomId::parse(&room).unwrap();
    let mut ws = subscribe(&server, &room).await;
    let registry = Arc::clone(server.registry());

    server.shutdown(Some(TIMEOUT)).await;

    let ended = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok());
    assert_eq!(registry.subscriber_count(&room_id).await, 0);
}
