//! WebSocket upgrade and frame relay through the engine.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

mod common;

#[tokio::test]
async fn messages_round_trip_through_the_relay() {
    let backend = common::start_websocket_echo().await;
    let relay = common::start_relay(backend).await;

    let (mut ws, response) = tokio_tungstenite::connect_async(format!("ws://{}/chat", relay.addr))
        .await
        .expect("upgrade through relay");
    assert_eq!(response.status(), 101);

    ws.send(Message::Text("hello".into())).await.unwrap();
    assert_eq!(ws.next().await.unwrap().unwrap(), Message::Text("hello".into()));

    let big = vec![7u8; 70_000];
    ws.send(Message::Binary(big.clone().into())).await.unwrap();
    assert_eq!(ws.next().await.unwrap().unwrap(), Message::Binary(big.into()));

    assert!(relay.ctx.sessions.snapshot().iter().any(|s| s.websocket));

    ws.close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "done".into(),
    }))
    .await
    .unwrap();
    // the close reply comes back from the origin through the relay
    match ws.next().await {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Normal),
        Some(Ok(Message::Close(None))) | None => {}
        other => panic!("unexpected frame after close: {other:?}"),
    }
    relay.shutdown.trigger();
}

#[tokio::test]
async fn unmasked_client_frame_is_rejected_with_protocol_error() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let backend = common::start_websocket_echo().await;
    let relay = common::start_relay(backend).await;

    let mut stream = tokio::net::TcpStream::connect(relay.addr).await.unwrap();
    stream
        .write_all(
            b"GET / HTTP/1.1\r\nHost: relay\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
              Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .await
        .unwrap();

    // read the 101 head
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    assert!(head.starts_with("HTTP/1.1 101"), "{head}");
    assert!(head.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="), "{head}");

    // a client must mask; send an unmasked text frame
    stream.write_all(&[0x81, 0x02, b'h', b'i']).await.unwrap();

    let mut frame = [0u8; 4];
    stream.read_exact(&mut frame).await.unwrap();
    assert_eq!(frame[0], 0x88, "expected a close frame");
    assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), 1002);
    relay.shutdown.trigger();
}

#[tokio::test]
async fn upstream_with_wrong_accept_key_gets_502() {
    let backend = common::start_backend(|_, _| {
        let headers = vec![
            ("Upgrade".into(), "websocket".into()),
            ("Connection".into(), "Upgrade".into()),
            ("Sec-WebSocket-Accept".into(), "bm90IHRoZSByaWdodCBrZXk=".into()),
        ];
        (101, headers, Vec::new())
    })
    .await;
    let relay = common::start_relay(backend).await;

    let response = common::raw_exchange(
        relay.addr,
        b"GET /chat HTTP/1.1\r\nHost: relay\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
          Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 502 Bad Gateway"), "{response}");
    assert!(!relay.ctx.sessions.snapshot().iter().any(|s| s.websocket));
    relay.shutdown.trigger();
}

#[tokio::test]
async fn upgrade_without_key_is_rejected() {
    let backend = common::start_websocket_echo().await;
    let relay = common::start_relay(backend).await;

    let response = common::raw_exchange(
        relay.addr,
        b"GET /chat HTTP/1.1\r\nHost: relay\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request"), "{response}");
    relay.shutdown.trigger();
}
