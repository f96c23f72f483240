//! HTTP/1.1 relay toward a single upstream.
//!
//! # Data Flow
//! ```text
//! server.rs (accept, optional TLS via net::tls)
//!     → session.rs (per connection, keep-alive loop)
//!         → head.rs (read + parse request head, strip hop-by-hop, add X-Forwarded-For)
//!         → upstream.rs (connect with backoff, reused across keep-alive requests)
//!         → body.rs (Content-Length / chunked re-encode / until-close)
//!         → head.rs (response head) → body.rs (response body)
//!         → on 101 + websocket: ws_relay.rs (frame relay, server role to the
//!           client, client role to the upstream)
//!     writes toward the client draw from the download rule set and writes
//!     toward the upstream from the upload rule set, both keyed by the client IP
//! ```
//!
//! # Design Decisions
//! - One upstream per deployment; routing is out of scope
//! - A pooled upstream that closed while idle is replaced once for bodiless
//!   requests; requests with a body are never replayed
//! - Error responses are only sent before any response byte reached the client
//! - Ordinary disconnects are logged at debug; everything else at warn

pub mod body;
pub mod head;
pub mod recorder;
pub mod registry;
pub mod server;
pub mod session;
pub mod upstream;
pub mod ws_relay;

use std::io;

use thiserror::Error;

use crate::chunked::ChunkedError;
use crate::websocket::WsError;

pub use head::{BodyKind, Headers, RequestHead, ResponseHead};
pub use recorder::{Direction, PayloadKind, ProxyDataItem, Recorder, TracingObserver, TrafficObserver};
pub use registry::{SessionHandle, SessionRegistry, SessionSnapshot};
pub use server::RelayServer;
pub use session::{ProxyContext, ProxySession};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed message head: {0}")]
    MalformedHead(String),

    #[error("message head exceeds {0} bytes")]
    HeadTooLarge(usize),

    #[error("chunked body error: {0}")]
    Chunked(#[from] ChunkedError),

    #[error("WebSocket relay error: {0}")]
    WebSocket(#[from] WsError),

    #[error("upstream {address} unavailable after {attempts} attempts: {source}")]
    UpstreamUnavailable {
        address: String,
        attempts: u32,
        source: io::Error,
    },

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The upstream answered 101 to something other than a WebSocket upgrade.
    #[error("upstream switched to an unsupported protocol")]
    UnsupportedUpgrade,

    /// The upstream's `Sec-WebSocket-Accept` does not answer the key it was sent.
    #[error("upstream WebSocket accept key does not match")]
    AcceptKeyMismatch,
}

impl ProxyError {
    /// True for routine peer disconnects rather than genuine failures.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ProxyError::Io(e) => is_disconnect_kind(e.kind()),
            ProxyError::Chunked(ChunkedError::Io(e)) => is_disconnect_kind(e.kind()),
            ProxyError::Chunked(ChunkedError::UnexpectedEof) => true,
            ProxyError::WebSocket(e) => e.is_disconnect(),
            _ => false,
        }
    }
}

fn is_disconnect_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}
