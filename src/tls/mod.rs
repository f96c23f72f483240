//! TLS ClientHello sniffing.
//!
//! # Data Flow
//! ```text
//! Freshly accepted TCP stream
//!     → sniff.rs (read one plaintext record off the wire)
//!     → record.rs (5-byte record header)
//!     → handshake.rs (handshake header, ClientHello body)
//!     → extension.rs (server_name, ALPN, opaque others)
//!     → caller picks a certificate, replays the bytes to the TLS stack
//! ```
//!
//! # Design Decisions
//! - Only `client_hello` is interpretable; anything else is unsupported
//! - Length fields are trusted only after they are bounds-checked; any mismatch
//!   fails the whole parse so the caller can fail closed

pub mod extension;
pub mod handshake;
pub mod record;
pub mod sniff;

use thiserror::Error;

use crate::io::DecodeError;

pub use extension::{Extension, ExtensionType};
pub use handshake::{ClientHello, HandshakeType};
pub use record::{ContentType, ProtocolVersion, RecordHeader};
pub use sniff::{parse_client_hello, sniff};

/// ALPN token used by ACME TLS-ALPN-01 validation handshakes.
pub const ACME_TLS_ALPN: &str = "acme-tls/1";

/// Errors produced while sniffing a ClientHello.
#[derive(Debug, Error)]
pub enum SniffError {
    #[error("I/O error while sniffing: {0}")]
    Io(#[from] std::io::Error),

    #[error("truncated TLS data: {0}")]
    Truncated(#[from] DecodeError),

    /// The record is not a handshake record (e.g. plain HTTP on a TLS port).
    #[error("not a TLS handshake record (content type {0})")]
    NotHandshake(u8),

    #[error("unsupported handshake message: {0:?}")]
    Unsupported(HandshakeType),

    #[error("length mismatch: declared {declared} bytes, found {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("TLS record of {0} bytes exceeds the maximum fragment size")]
    RecordTooLarge(usize),

    #[error("malformed {kind:?} extension: {reason}")]
    InvalidExtension {
        kind: ExtensionType,
        reason: &'static str,
    },
}
