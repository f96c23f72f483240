//! One client connection: the keep-alive request loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::Instrument;
use uuid::Uuid;

use super::body::relay_body;
use super::head::{read_request_head, read_response_head, BodyKind, RequestHead, ResponseHead};
use super::recorder::{Direction, PayloadKind, Recorder, TrafficObserver};
use super::registry::{SessionHandle, SessionRegistry};
use super::ws_relay::relay_websocket;
use super::{upstream, ProxyError};
use crate::config::ProxyConfig;
use crate::io::Rewind;
use crate::observability::metrics;
use crate::throttle::{PeerId, RuleSetId, ThrottledStream, Throttler};
use crate::websocket::handshake::{accept_key, generate_client_key, verify_accept};

/// Everything a session needs from the running engine.
#[derive(Clone)]
pub struct ProxyContext {
    pub config: Arc<ArcSwap<ProxyConfig>>,
    pub throttler: Throttler,
    pub sessions: SessionRegistry,
    pub observer: Option<Arc<dyn TrafficObserver>>,
}

impl ProxyContext {
    pub fn new(config: Arc<ArcSwap<ProxyConfig>>, throttler: Throttler) -> Self {
        Self {
            config,
            throttler,
            sessions: SessionRegistry::new(),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn TrafficObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

/// What the loop does after one exchange.
enum Next {
    KeepAlive,
    Close,
    Upgrade(BufReader<ThrottledStream<TcpStream>>),
}

pub struct ProxySession<C> {
    ctx: ProxyContext,
    config: Arc<ProxyConfig>,
    client: BufReader<ThrottledStream<C>>,
    upstream: Option<BufReader<ThrottledStream<TcpStream>>>,
    handle: SessionHandle,
    recorder: Recorder,
    upload: RuleSetId,
}

impl<C> ProxySession<C>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an accepted (and, for TLS listeners, already decrypted) client stream.
    ///
    /// The configuration is snapshotted here; reloads apply to new sessions.
    pub fn new(ctx: &ProxyContext, client: C, peer: SocketAddr, tls: bool) -> Self {
        let config = ctx.config.load_full();
        let rule_set = |name: &Option<String>| {
            name.as_deref()
                .and_then(|n| config.throttle.index_of(n))
                .map(RuleSetId)
                .unwrap_or(RuleSetId::NONE)
        };
        let upload = rule_set(&config.throttle.upload_rule_set);
        let download = rule_set(&config.throttle.download_rule_set);

        let handle = ctx.sessions.register(peer, tls);
        let observer = if config.recording.enabled { ctx.observer.clone() } else { None };
        let recorder = Recorder::new(handle.id(), observer);
        // only writes are paced, so each direction draws from exactly one budget
        let client = ctx.throttler.wrap_split(client, RuleSetId::NONE, download, PeerId::Ip(peer.ip()));

        Self {
            ctx: ctx.clone(),
            config,
            client: BufReader::new(client),
            upstream: None,
            handle,
            recorder,
            upload,
        }
    }

    pub fn id(&self) -> Uuid {
        self.handle.id()
    }

    /// Serve requests until the client goes away, an exchange ends the
    /// connection, or the connection is upgraded and the relay finishes.
    pub async fn run(self) -> Result<(), ProxyError> {
        let span = tracing::info_span!("session", session_id = %self.id(), peer = %self.handle.peer());
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) -> Result<(), ProxyError> {
        tracing::debug!("Session opened");
        let result = loop {
            match self.exchange().await {
                Ok(Next::KeepAlive) => continue,
                Ok(Next::Close) => break Ok(()),
                Ok(Next::Upgrade(upstream)) => break self.relay_upgraded(upstream).await,
                Err(e) => break Err(e),
            }
        };

        match &result {
            Ok(()) => tracing::debug!("Session closed"),
            Err(e) if e.is_disconnect() => tracing::debug!(error = %e, "Peer disconnected"),
            Err(e) => tracing::warn!(error = %e, "Session failed"),
        }
        result
    }

    async fn exchange(&mut self) -> Result<Next, ProxyError> {
        let idle = Duration::from_secs(self.config.timeouts.idle_secs);
        let head = match tokio::time::timeout(idle, read_request_head(&mut self.client)).await {
            Err(_) => {
                tracing::debug!("Idle timeout");
                return Ok(Next::Close);
            }
            Ok(Ok(None)) => return Ok(Next::Close),
            Ok(Ok(Some(head))) => head,
            Ok(Err(e)) => return self.reject_malformed(e).await,
        };
        let request_body = match head.body_kind() {
            Ok(kind) => kind,
            Err(e) => return self.reject_malformed(e).await,
        };
        self.handle.record_request();

        let method = head.method.clone();
        let client_keep_alive = head.keep_alive();
        let client_version = head.version;
        let websocket = head.is_websocket_upgrade();
        let expects_continue = head.headers.has_token("expect", "100-continue");
        tracing::debug!(method = %head.method, target = %head.target, websocket, "Request");
        // the relay answers the client's key itself and sends its own upstream
        let ws_keys = if websocket {
            match head.headers.get("sec-websocket-key") {
                Some(key) => Some((key.trim().to_string(), generate_client_key())),
                None => {
                    let err = ProxyError::MalformedHead("WebSocket upgrade without Sec-WebSocket-Key".into());
                    return self.reject_malformed(err).await;
                }
            }
        } else {
            None
        };

        let pooled = self.upstream.take();
        let reused = pooled.is_some();
        let mut upstream = match pooled {
            Some(upstream) => upstream,
            None => self.connect_or_reject().await?,
        };

        let upstream_key = ws_keys.as_ref().map(|(_, key)| key.as_str());
        let forward = self.prepare_request(head, request_body, upstream_key);
        let head_bytes = forward.to_bytes();
        self.recorder.record(Direction::ToServer, PayloadKind::Head, &head_bytes);
        // a bodiless request can be replayed if the pooled connection went stale
        if reused && request_body == BodyKind::Empty {
            if !self.probe_pooled(&mut upstream, &head_bytes).await? {
                tracing::debug!("Pooled upstream connection was closed; reconnecting");
                upstream = self.connect_or_reject().await?;
                upstream.write_all(&head_bytes).await?;
            }
        } else {
            upstream.write_all(&head_bytes).await?;
        }
        if expects_continue {
            self.client.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
            self.client.flush().await?;
        }
        let recorder = &self.recorder;
        relay_body(request_body, &mut self.client, &mut upstream, |data| {
            recorder.record(Direction::ToServer, PayloadKind::Body, data)
        })
        .await?;

        let response = self.read_final_response(&mut upstream).await?;

        if response.status == 101 {
            let Some((client_key, upstream_key)) = ws_keys.filter(|_| response.is_websocket_upgrade()) else {
                self.send_error(502, "Bad Gateway").await;
                return Err(ProxyError::UnsupportedUpgrade);
            };
            if !verify_accept(&upstream_key, response.headers.get("sec-websocket-accept")) {
                self.send_error(502, "Bad Gateway").await;
                return Err(ProxyError::AcceptKeyMismatch);
            }
            let mut out = response;
            out.headers.strip_hop_by_hop();
            out.headers.append("Upgrade", "websocket");
            out.headers.append("Connection", "Upgrade");
            out.headers.set("Sec-WebSocket-Accept", accept_key(&client_key));
            self.write_response_head(&out).await?;
            self.client.flush().await?;
            metrics::record_request(101);
            self.handle.mark_websocket();
            return Ok(Next::Upgrade(upstream));
        }

        let response_body = match response.body_kind(&method) {
            Ok(kind) => kind,
            Err(e) => {
                self.send_error(502, "Bad Gateway").await;
                return Err(e);
            }
        };
        let upstream_reusable = response.keep_alive() && response_body != BodyKind::UntilClose;
        let keep_alive = client_keep_alive && response_body != BodyKind::UntilClose;

        let status = response.status;
        let mut out = response;
        out.headers.strip_hop_by_hop();
        if response_body == BodyKind::Chunked {
            out.headers.remove("content-length");
            out.headers.append("Transfer-Encoding", "chunked");
        }
        if !keep_alive {
            out.headers.append("Connection", "close");
        } else if client_version == 0 {
            out.headers.append("Connection", "keep-alive");
        }
        self.write_response_head(&out).await?;
        let recorder = &self.recorder;
        relay_body(response_body, &mut upstream, &mut self.client, |data| {
            recorder.record(Direction::ToClient, PayloadKind::Body, data)
        })
        .await?;
        metrics::record_request(status);

        if upstream_reusable && keep_alive {
            self.upstream = Some(upstream);
        }
        if keep_alive {
            Ok(Next::KeepAlive)
        } else {
            self.client.shutdown().await?;
            Ok(Next::Close)
        }
    }

    async fn connect_upstream(&self) -> Result<BufReader<ThrottledStream<TcpStream>>, ProxyError> {
        let timeout = Duration::from_secs(self.config.timeouts.connect_secs);
        let stream = upstream::connect(&self.config.upstream, timeout).await?;
        let peer = PeerId::Ip(self.handle.peer().ip());
        Ok(BufReader::new(self.ctx.throttler.wrap_split(stream, RuleSetId::NONE, self.upload, peer)))
    }

    async fn connect_or_reject(&mut self) -> Result<BufReader<ThrottledStream<TcpStream>>, ProxyError> {
        match self.connect_upstream().await {
            Ok(upstream) => Ok(upstream),
            Err(e) => {
                self.send_error(502, "Bad Gateway").await;
                Err(e)
            }
        }
    }

    /// Send `head` on a pooled connection and wait for the first response byte.
    ///
    /// `false` means the origin closed the connection while it sat idle.
    async fn probe_pooled(
        &mut self,
        upstream: &mut BufReader<ThrottledStream<TcpStream>>,
        head: &[u8],
    ) -> Result<bool, ProxyError> {
        let head_timeout = Duration::from_secs(self.config.timeouts.head_secs);
        let attempt = async {
            upstream.write_all(head).await?;
            upstream.flush().await?;
            Ok::<_, std::io::Error>(!upstream.fill_buf().await?.is_empty())
        };
        match tokio::time::timeout(head_timeout, attempt).await {
            Ok(Ok(alive)) => Ok(alive),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Pooled upstream connection failed");
                Ok(false)
            }
            Err(_) => {
                self.send_error(504, "Gateway Timeout").await;
                Err(ProxyError::Timeout("response head"))
            }
        }
    }

    /// Rewrite a client request for the upstream.
    ///
    /// `upstream_key` is set for WebSocket upgrades and replaces the client's key.
    fn prepare_request(&self, mut head: RequestHead, body: BodyKind, upstream_key: Option<&str>) -> RequestHead {
        head.headers.strip_hop_by_hop();
        head.headers.remove("expect");
        if body == BodyKind::Chunked {
            head.headers.remove("content-length");
            head.headers.append("Transfer-Encoding", "chunked");
        }
        if let Some(key) = upstream_key {
            // extensions would set RSV bits the relay does not understand
            head.headers.remove("sec-websocket-extensions");
            head.headers.set("Sec-WebSocket-Key", key);
            head.headers.append("Connection", "Upgrade");
            head.headers.append("Upgrade", "websocket");
        }

        let client_ip = self.handle.peer().ip().to_string();
        let forwarded_for = match head.headers.get("x-forwarded-for") {
            Some(existing) => format!("{}, {}", existing, client_ip),
            None => client_ip,
        };
        head.headers.set("X-Forwarded-For", forwarded_for);
        head
    }

    /// Skip interim responses; `101` is final for an upgrade.
    async fn read_final_response(
        &mut self,
        upstream: &mut BufReader<ThrottledStream<TcpStream>>,
    ) -> Result<ResponseHead, ProxyError> {
        let head_timeout = Duration::from_secs(self.config.timeouts.head_secs);
        loop {
            let response = match tokio::time::timeout(head_timeout, read_response_head(upstream)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    self.send_error(502, "Bad Gateway").await;
                    return Err(e);
                }
                Err(_) => {
                    self.send_error(504, "Gateway Timeout").await;
                    return Err(ProxyError::Timeout("response head"));
                }
            };
            if !response.is_informational() || response.status == 101 {
                return Ok(response);
            }
            // 100 Continue was already answered locally
            if response.status != 100 {
                self.write_response_head(&response).await?;
            }
        }
    }

    async fn write_response_head(&mut self, head: &ResponseHead) -> Result<(), ProxyError> {
        let bytes = head.to_bytes();
        self.recorder.record(Direction::ToClient, PayloadKind::Head, &bytes);
        self.client.write_all(&bytes).await?;
        Ok(())
    }

    async fn reject_malformed(&mut self, err: ProxyError) -> Result<Next, ProxyError> {
        if matches!(err, ProxyError::MalformedHead(_) | ProxyError::HeadTooLarge(_)) {
            self.send_error(400, "Bad Request").await;
        }
        Err(err)
    }

    /// Best-effort error response; the connection closes afterwards.
    async fn send_error(&mut self, status: u16, reason: &str) {
        let body = format!("{} {}\n", status, reason);
        let mut head = ResponseHead::new(status, reason);
        head.headers.append("Content-Type", "text/plain; charset=utf-8");
        head.headers.append("Content-Length", body.len().to_string());
        head.headers.append("Connection", "close");
        let mut bytes = head.to_bytes();
        bytes.extend_from_slice(body.as_bytes());

        let written = async {
            self.client.write_all(&bytes).await?;
            self.client.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::debug!(error = %e, status, "Failed to send error response");
        }
        metrics::record_request(status);
    }

    async fn relay_upgraded(
        self,
        upstream: BufReader<ThrottledStream<TcpStream>>,
    ) -> Result<(), ProxyError> {
        tracing::debug!("Connection upgraded to WebSocket");
        let client = unbuffer(self.client);
        let upstream = unbuffer(upstream);
        relay_websocket(client, upstream, self.config.websocket.max_message_size, &self.recorder).await
    }
}

/// Keep bytes already buffered past the head in front of the raw stream.
fn unbuffer<S: AsyncRead>(reader: BufReader<S>) -> Rewind<S> {
    let buffered = Bytes::copy_from_slice(reader.buffer());
    Rewind::new(buffered, reader.into_inner())
}
