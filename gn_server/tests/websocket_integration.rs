//! WebSocket integration tests for the realtime session channel.
//!
//! A real listener is bound on a loopback port and the upgrade handshake is
//! written by hand over a TCP stream. No database is needed: the pool is lazy
//! and events are published straight into the distributor.

use game_night::{DatabaseConfig, EventKind, db::config::DEFAULT_DATABASE_URL};
use gn_server::api::{AppState, create_router};
use gn_server::config::{RealtimeConfig, ServerConfig};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const SECRET: &str = "test_secret_for_testing_only";

/// Serve the router on an ephemeral port
async fn spawn_server() -> (SocketAddr, AppState) {
    let pool = sqlx::PgPool::connect_lazy(DEFAULT_DATABASE_URL).expect("Invalid database URL");
    let config = ServerConfig {
        bind: "127.0.0.1:0".parse().unwrap(),
        database: DatabaseConfig::development(),
        api_secret: SECRET.to_string(),
        realtime: RealtimeConfig {
            heartbeat_secs: 60,
            subscriber_buffer: 8,
        },
        metrics_bind: None,
    };
    let state = AppState::new(Arc::new(pool), config);
    let app = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

/// Send the upgrade request and return the stream with the status line
async fn handshake(addr: SocketAddr, path: &str) -> (TcpStream, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
         \r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    // Read the response head byte by byte so no frame data is consumed
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        let byte = stream.read_u8().await.unwrap();
        head.push(byte);
    }
    let head = String::from_utf8(head).unwrap();
    let status_line = head.lines().next().unwrap_or_default().to_string();

    (stream, status_line)
}

/// Read one unmasked server text frame and decode it
async fn read_frame(stream: &mut TcpStream) -> Value {
    let first = stream.read_u8().await.unwrap();
    assert_eq!(first & 0x0f, 0x1, "expected a text frame");

    let len = match stream.read_u8().await.unwrap() & 0x7f {
        126 => stream.read_u16().await.unwrap() as usize,
        127 => stream.read_u64().await.unwrap() as usize,
        len => len as usize,
    };

    let mut payload = vec![0; len];
    stream.read_exact(&mut payload).await.unwrap();
    serde_json::from_slice(&payload).unwrap()
}

#[tokio::test]
async fn test_websocket_without_token_fails() {
    let (addr, _) = spawn_server().await;

    let (_, status) = handshake(addr, "/ws/sessions/1").await;

    assert!(status.starts_with("HTTP/1.1 400"), "{status}");
}

#[tokio::test]
async fn test_websocket_with_invalid_token_fails() {
    let (addr, state) = spawn_server().await;

    let (_, status) = handshake(addr, "/ws/sessions/1?token=not_the_secret").await;

    assert!(status.starts_with("HTTP/1.1 401"), "{status}");
    assert_eq!(state.events.subscriber_count(1).await, 0);
}

#[tokio::test]
async fn test_websocket_receives_ready_then_events() {
    let (addr, state) = spawn_server().await;

    let (mut stream, status) = handshake(addr, &format!("/ws/sessions/7?token={SECRET}")).await;
    assert!(status.starts_with("HTTP/1.1 101"), "{status}");

    let ready = timeout(Duration::from_secs(5), read_frame(&mut stream))
        .await
        .unwrap();
    assert_eq!(ready["type"], "READY");
    assert_eq!(ready["sessionId"], 7);

    let delivered = state
        .events
        .publish(7, EventKind::HandAdded, &json!({ "hand_number": 3 }))
        .await;
    assert_eq!(delivered, 1);

    let event = timeout(Duration::from_secs(5), read_frame(&mut stream))
        .await
        .unwrap();
    assert_eq!(event["type"], "HAND_ADDED");
    assert_eq!(event["sessionId"], 7);
    assert_eq!(event["payload"]["hand_number"], 3);

    // Other sessions are not delivered to this connection
    assert_eq!(
        state
            .events
            .publish(8, EventKind::HandAdded, &json!({}))
            .await,
        0
    );
}

#[tokio::test]
async fn test_websocket_disconnect_unsubscribes() {
    let (addr, state) = spawn_server().await;

    let (mut stream, status) = handshake(addr, &format!("/ws/sessions/9?token={SECRET}")).await;
    assert!(status.starts_with("HTTP/1.1 101"), "{status}");
    timeout(Duration::from_secs(5), read_frame(&mut stream))
        .await
        .unwrap();
    assert_eq!(state.events.subscriber_count(9).await, 1);

    drop(stream);

    let cleaned = timeout(Duration::from_secs(5), async {
        while state.events.subscriber_count(9).await > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(cleaned.is_ok());
    assert_eq!(state.events.channel_count().await, 0);
}
