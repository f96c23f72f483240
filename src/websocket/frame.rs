//! Frame header codec (RFC 6455 §5.2).

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::mask::generate_key;
use super::{CloseCode, Role, WsError};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_BITS: u8 = 0x7F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: OpCode,
    /// Masking key; present exactly when the mask bit is set.
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

impl FrameHeader {
    /// Header for a frame sent by `role`: only clients mask.
    pub fn outgoing(opcode: OpCode, fin: bool, payload_len: u64, role: Role) -> Self {
        Self {
            fin,
            opcode,
            mask: match role {
                Role::Client => Some(generate_key()),
                Role::Server => None,
            },
            payload_len,
        }
    }

    /// Synthesize the header of a reassembled message from its first fragment.
    ///
    /// Opcode, fin and mask metadata are kept; only the length changes.
    pub fn from_fragments(first: &FrameHeader, combined_len: u64) -> Result<Self, WsError> {
        if first.opcode == OpCode::Continuation {
            return Err(WsError::protocol(
                CloseCode::ProtocolError,
                "a message cannot start with a continuation frame",
            ));
        }
        Ok(Self {
            payload_len: combined_len,
            ..*first
        })
    }

    /// Total header size on the wire.
    pub fn encoded_len(&self) -> usize {
        let ext = match self.payload_len {
            0..=125 => 0,
            126..=0xFFFF => 2,
            _ => 8,
        };
        2 + ext + if self.mask.is_some() { 4 } else { 0 }
    }

    /// Encode with the smallest length form that fits.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        let b0 = (if self.fin { FIN_BIT } else { 0 }) | self.opcode.as_u8();
        let mask_bit = if self.mask.is_some() { MASK_BIT } else { 0 };
        out.push(b0);

        match self.payload_len {
            len @ 0..=125 => out.push(mask_bit | len as u8),
            len @ 126..=0xFFFF => {
                out.push(mask_bit | 126);
                out.extend_from_slice(&(len as u16).to_be_bytes());
            }
            len => {
                out.push(mask_bit | 127);
                out.extend_from_slice(&len.to_be_bytes());
            }
        }

        if let Some(key) = self.mask {
            out.extend_from_slice(&key);
        }
        out
    }

    /// Read and validate a header sent to an endpoint acting as `role`.
    pub async fn decode<R>(reader: &mut R, role: Role) -> Result<Self, WsError>
    where
        R: AsyncRead + Unpin,
    {
        let mut head = [0u8; 2];
        reader.read_exact(&mut head).await?;

        if head[0] & RSV_BITS != 0 {
            return Err(WsError::protocol(
                CloseCode::ProtocolError,
                "reserved bits set without a negotiated extension",
            ));
        }
        let fin = head[0] & FIN_BIT != 0;
        let opcode = OpCode::from_u8(head[0] & OPCODE_BITS).ok_or_else(|| {
            WsError::protocol(CloseCode::ProtocolError, "unknown opcode")
        })?;
        let masked = head[1] & MASK_BIT != 0;

        let payload_len = match head[1] & LEN_BITS {
            126 => reader.read_u16().await? as u64,
            127 => {
                let len = reader.read_u64().await?;
                if len >> 63 != 0 {
                    return Err(WsError::protocol(
                        CloseCode::ProtocolError,
                        "payload length has the most significant bit set",
                    ));
                }
                len
            }
            len => len as u64,
        };

        match (role, masked) {
            (Role::Server, false) => {
                return Err(WsError::protocol(
                    CloseCode::ProtocolError,
                    "client frames must be masked",
                ))
            }
            (Role::Client, true) => {
                return Err(WsError::protocol(
                    CloseCode::ProtocolError,
                    "server frames must not be masked",
                ))
            }
            _ => {}
        }

        if opcode.is_control() {
            if !fin {
                return Err(WsError::protocol(
                    CloseCode::ProtocolError,
                    "control frames must not be fragmented",
                ));
            }
            if payload_len > MAX_CONTROL_PAYLOAD {
                return Err(WsError::protocol(
                    CloseCode::ProtocolError,
                    "control frame payload exceeds 125 bytes",
                ));
            }
        }

        let mask = if masked {
            let mut key = [0u8; 4];
            reader.read_exact(&mut key).await?;
            Some(key)
        } else {
            None
        };

        Ok(Self {
            fin,
            opcode,
            mask,
            payload_len,
        })
    }
}

/// A frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn opcode(&self) -> OpCode {
        self.header.opcode
    }

    pub fn is_final(&self) -> bool {
        self.header.fin
    }
}
