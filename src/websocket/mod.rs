//! WebSocket framing and connection state (RFC 6455).
//!
//! # Data Flow
//! ```text
//! Upgraded HTTP connection
//!     → frame.rs (header decode/encode, role-checked masking)
//!     → mask.rs (payload XOR)
//!     → connection.rs (state machine, fragment reassembly, close handshake)
//!     → Message to the caller
//! ```
//!
//! # Connection States
//! ```text
//! Connecting → Open → CloseSent ─────┐
//!                   → CloseReceived ─┴→ Closed
//! (any) → Errored
//! ```
//!
//! # Design Decisions
//! - Every protocol violation carries a close code; the same value terminates
//!   the state machine and composes the outgoing close frame
//! - Caller buffers are never masked in place
//! - Extensions are not negotiated, so RSV bits must be zero

pub mod close;
pub mod connection;
pub mod frame;
pub mod handshake;
pub mod mask;

use bytes::Bytes;
use thiserror::Error;

pub use close::CloseCode;
pub use connection::{ConnectionState, FrameReader, FrameWriter, WebSocket, DEFAULT_MAX_MESSAGE_SIZE};
pub use frame::{Frame, FrameHeader, OpCode};
pub use mask::apply_mask;

/// Which end of the connection this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends masked frames, expects unmasked ones.
    Client,
    /// Sends unmasked frames, expects masked ones.
    Server,
}

/// A complete message as presented to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    /// Close frame contents; `None` when the peer sent no status code.
    Close(Option<(CloseCode, String)>),
}

#[derive(Debug, Error)]
pub enum WsError {
    #[error("WebSocket I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A protocol violation; `code` is sent to the peer in the close frame.
    #[error("{reason} (close code {code})")]
    Protocol { code: CloseCode, reason: String },

    /// The operation is not allowed in the current connection state.
    #[error("operation not permitted in state {0:?}")]
    InvalidState(ConnectionState),
}

impl WsError {
    pub fn protocol(code: CloseCode, reason: impl Into<String>) -> Self {
        WsError::Protocol {
            code,
            reason: reason.into(),
        }
    }

    /// The close code that describes this failure.
    pub fn close_code(&self) -> CloseCode {
        match self {
            WsError::Io(_) => CloseCode::ConnectionLost,
            WsError::Protocol { code, .. } => *code,
            WsError::InvalidState(_) => CloseCode::InternalError,
        }
    }

    /// True for routine peer disconnects rather than genuine failures.
    pub fn is_disconnect(&self) -> bool {
        match self {
            WsError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
