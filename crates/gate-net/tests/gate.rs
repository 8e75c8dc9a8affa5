//! Integration tests for the composed gate: one configuration document,
//! three transports, one shutdown.

mod common;

use common::{frame, next_event, payload, read_frame, WAIT};
use futures_util::{SinkExt, StreamExt};
use gate_core::AgentEvent;
use gate_net::{Gate, GateConfig, Transport};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;

const CONFIG: &str = r#"
tcp_addr = "127.0.0.1:0"
kcp_addr = "127.0.0.1:0"
ws_addr = "127.0.0.1:0"
max_conn_num = 8

[frame]
len_msg_len = 2
len_msg_id = 2
"#;

#[tokio::test]
async fn test_gate_serves_every_configured_transport() {
    // Arrange
    let config = GateConfig::from_toml_str(CONFIG).expect("config parses");
    let parser = config.build_parser().expect("valid widths");
    let (dispatcher, mut notices) = common::dispatcher();
    let gate = Gate::new(config, common::router(), parser).with_dispatcher(dispatcher);

    // Act
    let running = gate.start().await;

    // Assert: every transport is bound.
    assert_eq!(
        running.transports(),
        vec![Transport::Tcp, Transport::Kcp, Transport::WebSocket]
    );
    let tcp_addr = running.local_addr(Transport::Tcp).expect("tcp bound");
    let ws_addr = running.local_addr(Transport::WebSocket).expect("ws bound");
    assert!(running.local_addr(Transport::Kcp).is_some());

    // Assert: the same router answers on TCP and WebSocket.
    let mut tcp = TcpStream::connect(tcp_addr).await.unwrap();
    tcp.write_all(&frame(2, b"tcp")).await.unwrap();
    assert_eq!(read_frame(&mut tcp).await, payload(2, b"tcp"));
    assert_eq!(next_event(&mut notices).await, AgentEvent::NewAgent);

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{ws_addr}/"))
        .await
        .expect("handshake");
    ws.send(Message::Binary(payload(3, b"ws"))).await.unwrap();
    let reply = tokio::time::timeout(WAIT, ws.next()).await.unwrap();
    assert_eq!(reply.unwrap().unwrap(), Message::Binary(payload(3, b"ws")));
    assert_eq!(next_event(&mut notices).await, AgentEvent::NewAgent);

    // Act: one close drains both sessions.
    tokio::time::timeout(WAIT, running.close()).await.expect("gate drains");

    // Assert
    assert_eq!(next_event(&mut notices).await, AgentEvent::CloseAgent);
    assert_eq!(next_event(&mut notices).await, AgentEvent::CloseAgent);
}

#[tokio::test]
async fn test_bind_failure_is_isolated_to_its_transport() {
    // Arrange: occupy a port, then point the TCP transport at it.
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = GateConfig {
        tcp_addr: taken.local_addr().unwrap().to_string(),
        ws_addr: "127.0.0.1:0".into(),
        ..GateConfig::default()
    };
    let (dispatcher, _notices) = common::dispatcher();
    let gate = Gate::new(config, common::router(), Default::default())
        .with_dispatcher(dispatcher);

    // Act
    let running = gate.start().await;

    // Assert
    assert_eq!(running.transports(), vec![Transport::WebSocket]);
    running.close().await;
}
