//! Integration tests for the transport socket
//!
//! These tests run against a local echo server.

mod common;

use common::MockWsServer;
use gatesocket::{SocketError, TransportSocket};
use serde_json::{json, Value};

#[tokio::test]
async fn test_send_envelope_and_receive_echo() {
    let server = MockWsServer::start().await;
    let mut socket = TransportSocket::new();

    socket.connect(&server.ws_url()).await.unwrap();
    assert!(socket.is_open());

    socket.send(1, &json!(42)).await.unwrap();
    let text = socket.receive().await.unwrap();
    verbose_println!("  Echoed: {}", text);

    let value: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value["op"], json!(1));
    assert_eq!(value["d"], json!(42));

    let metrics = socket.metrics();
    assert_eq!(metrics.messages_sent, 1);
    assert_eq!(metrics.messages_received, 1);
    assert_eq!(metrics.connects, 1);
}

#[tokio::test]
async fn test_null_payload_is_serialized() {
    let server = MockWsServer::start().await;
    let mut socket = TransportSocket::new();
    socket.connect(&server.ws_url()).await.unwrap();

    socket.send(1, &Option::<u64>::None).await.unwrap();
    let text = socket.receive().await.unwrap();
    assert_eq!(text, r#"{"op":1,"d":null}"#);
}

#[tokio::test]
async fn test_peer_close_surfaces_close_code() {
    let server = MockWsServer::start().await;
    let mut socket = TransportSocket::new();
    socket.connect(&server.ws_url()).await.unwrap();

    socket.send_text("close:4009".to_string()).await.unwrap();
    let err = socket.receive().await.unwrap_err();

    assert!(err.is_connection_ended());
    assert_eq!(err.close_code(), Some(4009));
}

#[tokio::test]
async fn test_receive_without_connection() {
    let mut socket = TransportSocket::new();
    let err = socket.receive().await.unwrap_err();
    assert!(matches!(err, SocketError::NotConnected));
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    let mut socket = TransportSocket::new();
    // Port 9 (discard) is not listening on loopback in test environments
    let err = socket.connect("ws://127.0.0.1:9").await.unwrap_err();
    assert!(matches!(err, SocketError::Connect { .. }));
    assert!(!socket.is_open());
}

#[tokio::test]
async fn test_reconnect_replaces_previous_socket() {
    let first = MockWsServer::start().await;
    let second = MockWsServer::start().await;
    let mut socket = TransportSocket::new();

    socket.connect(&first.ws_url()).await.unwrap();
    socket.connect(&second.ws_url()).await.unwrap();

    assert_eq!(socket.url(), Some(second.ws_url().as_str()));
    assert_eq!(socket.metrics().connects, 2);

    socket.send_text("still alive".to_string()).await.unwrap();
    assert_eq!(socket.receive().await.unwrap(), "still alive");
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let server = MockWsServer::start().await;
    let mut socket = TransportSocket::new();
    socket.connect(&server.ws_url()).await.unwrap();

    socket.close().await;
    assert!(!socket.is_open());
    socket.close().await;
    socket.close_with(4000, "resume").await;
    assert!(!socket.is_open());

    let err = socket.send_text("after close".to_string()).await.unwrap_err();
    assert!(matches!(err, SocketError::NotConnected));
}
