//! End-to-end HTTP relay behaviour.

use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use relay_engine::config::schema::RuleSetConfig;
use relay_engine::config::ProxyConfig;
use relay_engine::proxy::head::read_response_head;

mod common;

#[tokio::test]
async fn forwards_request_and_adds_forwarded_for() {
    let backend = common::start_backend(|head, _| {
        let xff = head.headers.get("x-forwarded-for").unwrap_or("-").to_string();
        (200, vec![("X-Seen-For".into(), xff)], b"hello from upstream".to_vec())
    })
    .await;
    let relay = common::start_relay(backend).await;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let res = client
        .get(format!("http://{}/greeting", relay.addr))
        .header("X-Forwarded-For", "10.0.0.9")
        .send()
        .await
        .expect("relay unreachable");

    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-seen-for"], "10.0.0.9, 127.0.0.1");
    assert_eq!(res.text().await.unwrap(), "hello from upstream");
    relay.shutdown.trigger();
}

#[tokio::test]
async fn chunked_request_body_is_re_encoded() {
    let backend = common::start_backend(|head, body| {
        let te = head.headers.get("transfer-encoding").unwrap_or("-").to_string();
        (200, vec![("X-Upstream-Te".into(), te)], body.to_vec())
    })
    .await;
    let relay = common::start_relay(backend).await;

    let response = common::raw_exchange(
        relay.addr,
        b"POST /upload HTTP/1.1\r\nHost: relay\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n\
          4;name=value\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: dropped\r\n\r\n",
    )
    .await;

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains("X-Upstream-Te: chunked"), "{response}");
    assert!(response.ends_with("\r\n\r\nWikipedia"), "{response}");
    relay.shutdown.trigger();
}

#[tokio::test]
async fn chunked_response_reaches_client() {
    let backend = common::start_chunked_backend(&["stream", "ing ", "body"]).await;
    let relay = common::start_relay(backend).await;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let res = client.get(format!("http://{}/", relay.addr)).send().await.unwrap();
    assert_eq!(res.headers()["transfer-encoding"], "chunked");
    assert_eq!(res.text().await.unwrap(), "streaming body");
    relay.shutdown.trigger();
}

#[tokio::test]
async fn keep_alive_serves_several_requests_on_one_connection() {
    let backend = common::start_backend(|head, _| (200, vec![], head.target.clone().into_bytes())).await;
    let relay = common::start_relay(backend).await;

    let stream = TcpStream::connect(relay.addr).await.unwrap();
    let mut stream = BufReader::new(stream);
    for path in ["/one", "/two", "/three"] {
        let request = format!("GET {} HTTP/1.1\r\nHost: relay\r\n\r\n", path);
        stream.get_mut().write_all(request.as_bytes()).await.unwrap();

        let head = read_response_head(&mut stream).await.unwrap();
        assert_eq!(head.status, 200);
        let len: usize = head.headers.get("content-length").unwrap().parse().unwrap();
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();
        assert_eq!(body, path.as_bytes());
    }

    let sessions = relay.ctx.sessions.snapshot();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].requests, 3);
    relay.shutdown.trigger();
}

#[tokio::test]
async fn malformed_request_gets_400() {
    let backend = common::start_backend(|_, _| (200, vec![], Vec::new())).await;
    let relay = common::start_relay(backend).await;

    let response = common::raw_exchange(relay.addr, b"NOT AN HTTP REQUEST\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request"), "{response}");
    relay.shutdown.trigger();
}

#[tokio::test]
async fn unreachable_upstream_gets_502() {
    let upstream = common::unused_addr().await;
    let relay = common::start_relay(upstream).await;

    let response = common::raw_exchange(relay.addr, b"GET / HTTP/1.1\r\nHost: relay\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 502 Bad Gateway"), "{response}");
    relay.shutdown.trigger();
}

#[tokio::test]
async fn stale_pooled_upstream_is_replaced() {
    let backend = common::start_one_shot_backend().await;
    let relay = common::start_relay(backend).await;

    let stream = TcpStream::connect(relay.addr).await.unwrap();
    let mut stream = BufReader::new(stream);
    for path in ["/first", "/second"] {
        let request = format!("GET {} HTTP/1.1\r\nHost: relay\r\n\r\n", path);
        stream.get_mut().write_all(request.as_bytes()).await.unwrap();

        let head = read_response_head(&mut stream).await.unwrap();
        assert_eq!(head.status, 200, "{path}");
        let len: usize = head.headers.get("content-length").unwrap().parse().unwrap();
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();
        assert_eq!(body, path.as_bytes());
        // let the origin's close reach the relay
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    relay.shutdown.trigger();
}

fn throttled_config(upstream: std::net::SocketAddr) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.upstream.address = upstream.to_string();
    config.observability.metrics_enabled = false;
    config.throttle.burst_interval_ms = 100;
    config.throttle.rule_sets = vec![RuleSetConfig {
        name: "down".into(),
        bytes_per_second: 1000,
    }];
    config.throttle.download_rule_set = Some("down".into());
    config
}

#[tokio::test]
async fn download_budget_does_not_pace_uploads() {
    let backend = common::start_backend(|_, body| (200, vec![], body.len().to_string().into_bytes())).await;
    let relay = common::start_relay_with(throttled_config(backend)).await;

    let mut request = b"POST /upload HTTP/1.1\r\nHost: relay\r\nContent-Length: 4000\r\nConnection: close\r\n\r\n".to_vec();
    request.extend_from_slice(&[b'u'; 4000]);

    let start = Instant::now();
    let response = common::raw_exchange(relay.addr, &request).await;
    assert!(response.ends_with("\r\n\r\n4000"), "{response}");
    assert!(start.elapsed() < Duration::from_secs(2), "upload was paced: {:?}", start.elapsed());
    relay.shutdown.trigger();
}

#[tokio::test]
async fn download_budget_paces_responses() {
    let backend = common::start_backend(|_, _| (200, vec![], vec![b'd'; 2500])).await;
    let relay = common::start_relay_with(throttled_config(backend)).await;

    let start = Instant::now();
    let response = common::raw_exchange(
        relay.addr,
        b"GET / HTTP/1.1\r\nHost: relay\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.ends_with(&"d".repeat(2500)));
    // 2.5 KB plus the head at 1 KB/s
    assert!(start.elapsed() >= Duration::from_millis(2000), "{:?}", start.elapsed());
    relay.shutdown.trigger();
}
