//! Integration test: boots the real router on an ephemeral port, connects
//! WebSocket clients through tokio-tungstenite, and drives the join and
//! walk lifecycle end to end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use st_domain::config::{Config, MemberEntry};
use st_gateway::{api, bootstrap};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn member(id: &str, name: &str, token: &str, friends: &[&str]) -> MemberEntry {
    MemberEntry {
        id: id.into(),
        display_name: name.into(),
        token_env: None,
        token_sha256: Some(hex::encode(Sha256::digest(token.as_bytes()))),
        friends: friends.iter().map(|f| f.to_string()).collect(),
    }
}

/// Start the gateway with a three-member roster: ava is friends with ben
/// and cal; cal is not friends with ben.
async fn start_gateway() -> SocketAddr {
    let mut config = Config::default();
    config.persistence.enabled = false;
    config.server.join_timeout_secs = 5;
    config.identity.members = vec![
        member("ava", "Ava", "ava-secret", &["ben", "cal"]),
        member("ben", "Ben", "ben-secret", &["ava"]),
        member("cal", "Cal", "cal-secret", &["ava"]),
    ];

    let state = bootstrap::build_app_state(Arc::new(config)).unwrap();
    let app = api::router(state.clone()).with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _resp) = tokio_tungstenite::connect_async(format!("ws://{addr}/v1/ws"))
        .await
        .unwrap();
    ws
}

async fn send(ws: &mut Client, frame: Value) {
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

/// Read frames until one with the given event name arrives.
async fn expect_event(ws: &mut Client, event: &str) -> Value {
    let wait = async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let v: Value = serde_json::from_str(&text).unwrap();
                    if v["event"] == event {
                        return v["data"].clone();
                    }
                }
                Some(Ok(_)) => continue,
                other => panic!("stream ended waiting for {event}: {other:?}"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {event}"))
}

async fn join_member(addr: SocketAddr, token: &str) -> Client {
    let mut ws = connect(addr).await;
    send(&mut ws, json!({"event": "join", "data": {"credential": token}})).await;
    expect_event(&mut ws, "joined-ack").await;
    ws
}

#[tokio::test]
async fn member_and_guest_join() {
    let addr = start_gateway().await;

    let mut ava = connect(addr).await;
    send(&mut ava, json!({"event": "join", "data": {"credential": "ava-secret"}})).await;
    let ack = expect_event(&mut ava, "joined-ack").await;
    assert_eq!(ack["identity"]["id"], "ava");
    assert_eq!(ack["identity"]["displayName"], "Ava");

    let mut guest = connect(addr).await;
    send(&mut guest, json!({"event": "join", "data": {"username": "Dana"}})).await;
    let ack = expect_event(&mut guest, "joined-ack").await;
    assert_eq!(ack["identity"]["displayName"], "Dana");
    assert_ne!(ack["identity"]["id"], "ava");

    send(&mut guest, json!({"event": "ping", "data": {"timestamp": 42}})).await;
    let pong = expect_event(&mut guest, "pong").await;
    assert_eq!(pong["timestamp"], 42);
}

#[tokio::test]
async fn bad_credential_is_rejected_and_closed() {
    let addr = start_gateway().await;
    let mut ws = connect(addr).await;
    send(&mut ws, json!({"event": "join", "data": {"credential": "nope"}})).await;

    let err = expect_event(&mut ws, "error").await;
    assert_eq!(err["kind"], "authentication-failure");

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
                Some(Ok(_)) => continue,
                _ => return None,
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(closed, Some(1008));
}

#[tokio::test]
async fn malformed_frame_gets_error_and_connection_survives() {
    let addr = start_gateway().await;
    let mut ava = join_member(addr, "ava-secret").await;

    ava.send(Message::Text("{not json".into())).await.unwrap();
    let err = expect_event(&mut ava, "error").await;
    assert_eq!(err["kind"], "malformed-message");

    send(&mut ava, json!({"event": "ping", "data": {"timestamp": 7}})).await;
    expect_event(&mut ava, "pong").await;
}

#[tokio::test]
async fn walk_lifecycle_reaches_only_the_circle() {
    let addr = start_gateway().await;
    let mut ava = join_member(addr, "ava-secret").await;
    let mut ben = join_member(addr, "ben-secret").await;
    let mut cal = join_member(addr, "cal-secret").await;

    send(
        &mut ava,
        json!({"event": "walk-start", "data": {"circle": ["ben"], "destination": "Home"}}),
    )
    .await;
    let started = expect_event(&mut ava, "walk-started").await;
    let session_id = started["sessionId"].as_str().unwrap().to_string();

    let added = expect_event(&mut ben, "walk-added-you").await;
    assert_eq!(added["walkerId"], "ava");
    assert_eq!(added["destination"], "Home");
    assert_eq!(added["sessionId"], session_id);

    send(
        &mut ava,
        json!({"event": "walk-location", "data": {"point": {"lat": 51.5, "lng": -0.12}}}),
    )
    .await;
    let update = expect_event(&mut ben, "walk-location-update").await;
    assert_eq!(update["point"]["lat"], 51.5);

    send(&mut ava, json!({"event": "walk-complete", "data": {}})).await;
    let ended = expect_event(&mut ben, "walk-ended").await;
    assert_eq!(ended["status"], "safe");

    // Cal was online the whole time but outside the circle; the next thing
    // cal sees is the reply to its own ping.
    send(&mut cal, json!({"event": "ping", "data": {"timestamp": 1}})).await;
    let next = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(Ok(Message::Text(text))) = cal.next().await {
                let v: Value = serde_json::from_str(&text).unwrap();
                let event = v["event"].as_str().unwrap_or_default().to_string();
                if event.starts_with("walk-") || event == "pong" {
                    return event;
                }
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(next, "pong");
}

#[tokio::test]
async fn walker_drop_alerts_circle() {
    let addr = start_gateway().await;
    let mut ava = join_member(addr, "ava-secret").await;
    let mut ben = join_member(addr, "ben-secret").await;

    send(
        &mut ava,
        json!({"event": "walk-start", "data": {"circle": ["ben"], "destination": "Gym"}}),
    )
    .await;
    expect_event(&mut ava, "walk-started").await;
    expect_event(&mut ben, "walk-added-you").await;

    ava.close(None).await.unwrap();
    drop(ava);

    let alert = expect_event(&mut ben, "walk-emergency-received").await;
    assert_eq!(alert["walkerId"], "ava");
    assert_eq!(alert["type"], "disconnect");

    let ended = expect_event(&mut ben, "walk-ended").await;
    assert_eq!(ended["status"], "disconnected");
}

#[tokio::test]
async fn circle_outside_friends_is_rejected() {
    let addr = start_gateway().await;
    let mut ben = join_member(addr, "ben-secret").await;

    send(
        &mut ben,
        json!({"event": "walk-start", "data": {"circle": ["cal"], "destination": "Home"}}),
    )
    .await;
    let err = expect_event(&mut ben, "error").await;
    assert_eq!(err["kind"], "invalid-circle");
}
