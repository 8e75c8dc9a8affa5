//! End-to-end tests for the WebSocket server over real loopback sockets.
//!
//! WebSocket messages carry `id + body` with no length header, so the
//! payloads sent here are exactly what the router sees.

mod common;

use common::{next_event, payload, WAIT};
use futures_util::{SinkExt, StreamExt};
use gate_core::{AgentEvent, FrameParser};
use gate_net::{ListeningServer, WsServer, WsServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

fn config(max_conn_num: usize) -> WsServerConfig {
    WsServerConfig {
        max_conn_num,
        ..WsServerConfig::new("127.0.0.1:0")
    }
}

fn server(config: WsServerConfig) -> (WsServer<Vec<u8>>, common::Notices) {
    let (dispatcher, notices) = common::dispatcher();
    let server = WsServer::new(config)
        .with_router(common::router())
        .with_parser(FrameParser::default())
        .with_dispatcher(dispatcher);
    (server, notices)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_binary_message_is_echoed() {
    // Arrange
    let (mut server, mut notices) = server(config(10));
    let addr = server.start().await.expect("server starts");
    let (mut client, _) = connect_async(format!("ws://{addr}/")).await.expect("handshake");

    // Act
    client.send(Message::Binary(payload(9, b"ping"))).await.unwrap();
    let reply = tokio::time::timeout(WAIT, client.next()).await.unwrap();

    // Assert
    assert_eq!(reply.unwrap().unwrap(), Message::Binary(payload(9, b"ping")));
    assert_eq!(next_event(&mut notices).await, AgentEvent::NewAgent);
    server.close().await;
}

#[tokio::test]
async fn test_dispatcher_is_optional() {
    let mut server: WsServer<Vec<u8>> = WsServer::new(config(10))
        .with_router(common::router())
        .with_parser(FrameParser::default());
    let addr = server.start().await.expect("server starts without dispatcher");

    let (mut client, _) = connect_async(format!("ws://{addr}/")).await.expect("handshake");
    client.send(Message::Binary(payload(1, b"x"))).await.unwrap();
    let reply = tokio::time::timeout(WAIT, client.next()).await.unwrap();

    assert_eq!(reply.unwrap().unwrap(), Message::Binary(payload(1, b"x")));
    server.close().await;
}

#[tokio::test]
async fn test_handshake_past_capacity_fails_until_a_slot_frees() {
    // Arrange
    let (mut server, mut notices) = server(config(1));
    let addr = server.start().await.expect("server starts");
    let url = format!("ws://{addr}/");
    let (first, _) = connect_async(&url).await.expect("first handshake");
    assert_eq!(next_event(&mut notices).await, AgentEvent::NewAgent);

    // Act / Assert: the second link is dropped before any HTTP exchange.
    let second = tokio::time::timeout(WAIT, connect_async(&url)).await.unwrap();
    assert!(second.is_err(), "second handshake must fail");
    assert_eq!(server.remaining_capacity(), Some(0));

    // Act / Assert: freeing the slot lets a new client in.
    drop(first);
    assert_eq!(next_event(&mut notices).await, AgentEvent::CloseAgent);
    let third = tokio::time::timeout(WAIT, connect_async(&url)).await.unwrap();
    assert!(third.is_ok(), "third handshake succeeds");
    assert_eq!(next_event(&mut notices).await, AgentEvent::NewAgent);
    server.close().await;
}

#[tokio::test]
async fn test_non_get_request_is_answered_with_405() {
    let (mut server, mut notices) = server(config(10));
    let addr = server.start().await.expect("server starts");
    let mut client = TcpStream::connect(addr).await.unwrap();

    client
        .write_all(b"POST / HTTP/1.1\r\nHost: gate\r\nContent-Length: 0\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    tokio::time::timeout(WAIT, client.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 405"), "got {response:?}");
    assert!(notices.try_recv().is_err(), "no agent for a refused request");
    server.close().await;
}

#[tokio::test]
async fn test_message_above_max_msg_len_closes_the_connection() {
    let (mut server, mut notices) = server(WsServerConfig {
        max_msg_len: 16,
        ..config(10)
    });
    let addr = server.start().await.expect("server starts");
    let (mut client, _) = connect_async(format!("ws://{addr}/")).await.expect("handshake");
    assert_eq!(next_event(&mut notices).await, AgentEvent::NewAgent);

    let _ = client.send(Message::Binary(payload(1, &[0xAB; 64]))).await;

    assert_eq!(next_event(&mut notices).await, AgentEvent::CloseAgent);
    server.close().await;
}

#[tokio::test]
async fn test_close_disconnects_open_clients() {
    let (mut server, mut notices) = server(config(10));
    let addr = server.start().await.expect("server starts");
    let (mut client, _) = connect_async(format!("ws://{addr}/")).await.expect("handshake");
    assert_eq!(next_event(&mut notices).await, AgentEvent::NewAgent);

    tokio::time::timeout(WAIT, server.close()).await.expect("drain completes");

    assert_eq!(next_event(&mut notices).await, AgentEvent::CloseAgent);
    let next = tokio::time::timeout(WAIT, client.next()).await.unwrap();
    assert!(
        matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))),
        "client sees the connection end"
    );
}
