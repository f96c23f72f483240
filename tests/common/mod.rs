//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use relay_engine::chunked::ChunkedReader;
use relay_engine::config::ProxyConfig;
use relay_engine::lifecycle::Shutdown;
use relay_engine::net::Listener;
use relay_engine::proxy::head::{read_request_head, BodyKind, RequestHead};
use relay_engine::proxy::{ProxyContext, RelayServer};
use relay_engine::throttle::Throttler;

/// A relay bound to an ephemeral port.
pub struct TestRelay {
    pub addr: SocketAddr,
    pub ctx: ProxyContext,
    pub shutdown: Shutdown,
}

/// Start a relay forwarding to `upstream` with otherwise default settings.
pub async fn start_relay(upstream: SocketAddr) -> TestRelay {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.upstream.address = upstream.to_string();
    config.upstream.retries.max_attempts = 2;
    config.upstream.retries.base_delay_ms = 10;
    config.upstream.retries.max_delay_ms = 20;
    config.observability.metrics_enabled = false;
    start_relay_with(config).await
}

pub async fn start_relay_with(config: ProxyConfig) -> TestRelay {
    let throttler = Throttler::initialize(config.throttle.rule_sets.len());
    relay_engine::config::watcher::apply_throttle(&config, &throttler);

    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let ctx = ProxyContext::new(Arc::new(ArcSwap::from_pointee(config)), throttler);
    let shutdown = Shutdown::new();

    let server = RelayServer::new(ctx.clone());
    let stop = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, stop).await;
    });

    TestRelay { addr, ctx, shutdown }
}

/// Read one request (head and body) the way an origin server would.
pub async fn read_request(reader: &mut BufReader<TcpStream>) -> Option<(RequestHead, Vec<u8>)> {
    let head = read_request_head(reader).await.ok()??;
    let mut body = Vec::new();
    match head.body_kind().ok()? {
        BodyKind::Empty | BodyKind::UntilClose => {}
        BodyKind::ContentLength(n) => {
            body.resize(n as usize, 0);
            reader.read_exact(&mut body).await.ok()?;
        }
        BodyKind::Chunked => {
            let mut chunked = ChunkedReader::new(&mut *reader);
            let mut buf = [0u8; 4096];
            while !chunked.is_ended() {
                let n = chunked.read(&mut buf).await.ok()?;
                body.extend_from_slice(&buf[..n]);
            }
        }
    }
    Some((head, body))
}

/// Origin that answers every request with `handler(head, body)` as a
/// Content-Length response, keeping the connection alive.
pub async fn start_backend<F>(handler: F) -> SocketAddr
where
    F: Fn(&RequestHead, &[u8]) -> (u16, Vec<(String, String)>, Vec<u8>) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let mut reader = BufReader::new(socket);
                while let Some((head, body)) = read_request(&mut reader).await {
                    let (status, headers, response_body) = handler(&head, &body);
                    let mut out = format!("HTTP/1.1 {} OK\r\nContent-Length: {}\r\n", status, response_body.len());
                    for (name, value) in headers {
                        out.push_str(&format!("{}: {}\r\n", name, value));
                    }
                    out.push_str("\r\n");
                    let socket = reader.get_mut();
                    if socket.write_all(out.as_bytes()).await.is_err()
                        || socket.write_all(&response_body).await.is_err()
                    {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// Origin that answers a single request per connection and then hangs up
/// without announcing `Connection: close`.
pub async fn start_one_shot_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut reader = BufReader::new(socket);
                if let Some((head, _)) = read_request(&mut reader).await {
                    let out = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                        head.target.len(),
                        head.target
                    );
                    let _ = reader.get_mut().write_all(out.as_bytes()).await;
                }
            });
        }
    });
    addr
}

/// Origin that replies to every request with a fixed chunked body.
pub async fn start_chunked_backend(chunks: &'static [&'static str]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut reader = BufReader::new(socket);
                while read_request(&mut reader).await.is_some() {
                    let mut out = String::from("HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n");
                    for chunk in chunks {
                        out.push_str(&format!("{:x}\r\n{}\r\n", chunk.len(), chunk));
                    }
                    out.push_str("0\r\n\r\n");
                    if reader.get_mut().write_all(out.as_bytes()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// WebSocket origin that echoes every data message.
pub async fn start_websocket_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(socket).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_text() || message.is_binary() {
                        if ws.send(message).await.is_err() {
                            break;
                        }
                    }
                }
            });
        }
    });
    addr
}

/// Address with nothing listening on it.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Send raw bytes and read until the relay closes the connection.
pub async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut out = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out)).await;
    String::from_utf8_lossy(&out).into_owned()
}
