//! Close codes (RFC 6455 §7.4).

use std::fmt;

/// Status codes carried by close frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    Normal,
    GoingAway,
    ProtocolError,
    UnacceptableData,
    /// No status code was present. Never sent on the wire.
    None,
    /// The connection dropped without a close frame. Never sent on the wire.
    ConnectionLost,
    DataFormat,
    PolicyViolation,
    MessageTooBig,
    MissingExtension,
    InternalError,
    /// TLS handshake failure. Never sent on the wire.
    TlsHandshakeFailed,
    /// Any other code, passed through as-is.
    Other(u16),
}

impl CloseCode {
    pub fn code(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnacceptableData => 1003,
            CloseCode::None => 1005,
            CloseCode::ConnectionLost => 1006,
            CloseCode::DataFormat => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::MissingExtension => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::TlsHandshakeFailed => 1015,
            CloseCode::Other(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::GoingAway,
            1002 => CloseCode::ProtocolError,
            1003 => CloseCode::UnacceptableData,
            1005 => CloseCode::None,
            1006 => CloseCode::ConnectionLost,
            1007 => CloseCode::DataFormat,
            1008 => CloseCode::PolicyViolation,
            1009 => CloseCode::MessageTooBig,
            1010 => CloseCode::MissingExtension,
            1011 => CloseCode::InternalError,
            1015 => CloseCode::TlsHandshakeFailed,
            other => CloseCode::Other(other),
        }
    }

    /// Whether the code may appear in a close frame on the wire.
    pub fn is_sendable(self) -> bool {
        match self {
            CloseCode::None | CloseCode::ConnectionLost | CloseCode::TlsHandshakeFailed => false,
            CloseCode::Other(code) => (1012..=1014).contains(&code) || (3000..=4999).contains(&code),
            _ => true,
        }
    }

    /// Human-readable description of the code.
    pub fn reason(self) -> &'static str {
        match self {
            CloseCode::Normal => "The connection was closed normally.",
            CloseCode::GoingAway => "The endpoint is going away.",
            CloseCode::ProtocolError => "A protocol error occurred.",
            CloseCode::UnacceptableData => "The endpoint received a data type it cannot accept.",
            CloseCode::None => "No reason was specified.",
            CloseCode::ConnectionLost => "The connection was lost without a close frame.",
            CloseCode::DataFormat => "The message data was inconsistent with its type.",
            CloseCode::PolicyViolation => "The message violated the endpoint's policy.",
            CloseCode::MessageTooBig => "The message is too big to process.",
            CloseCode::MissingExtension => "The server did not negotiate a required extension.",
            CloseCode::InternalError => "The endpoint encountered an unexpected condition.",
            CloseCode::TlsHandshakeFailed => "The TLS handshake failed.",
            CloseCode::Other(_) => "Application-defined close code.",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
