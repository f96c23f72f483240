//! Embeddable HTTP relay engine: throttled byte streams, chunked transfer
//! codecs, TLS ClientHello sniffing, and a WebSocket codec, composed into an
//! HTTP/1.1 relay toward one upstream.

pub mod admin;
pub mod chunked;
pub mod config;
pub mod io;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod resilience;
pub mod throttle;
pub mod tls;
pub mod websocket;

pub use config::schema::ProxyConfig;
pub use lifecycle::Shutdown;
pub use proxy::{ProxyContext, RelayServer};
pub use throttle::{PeerId, RuleSetId, ThrottledStream, Throttler};
