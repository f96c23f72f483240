//! TLS record layer header.

use std::fmt;

use crate::io::ByteReader;

use super::SniffError;

/// Size of the `TLSPlaintext` header on the wire.
pub const RECORD_HEADER_LEN: usize = 5;

/// Largest fragment accepted: 2^14 plus the expansion allowance TLS 1.2 permits.
pub const MAX_FRAGMENT_LEN: usize = (1 << 14) + 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Unknown(u8),
}

impl From<u8> for ContentType {
    fn from(v: u8) -> Self {
        match v {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            other => ContentType::Unknown(other),
        }
    }
}

impl From<ContentType> for u8 {
    fn from(v: ContentType) -> Self {
        match v {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub fn from_u16(v: u16) -> Self {
        let [major, minor] = v.to_be_bytes();
        Self { major, minor }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.major, self.minor) {
            (3, 0) => write!(f, "SSL 3.0"),
            (3, minor) => write!(f, "TLS 1.{}", minor - 1),
            (major, minor) => write!(f, "unknown {}.{}", major, minor),
        }
    }
}

/// The 5-byte header that precedes every TLS record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub length: usize,
}

impl RecordHeader {
    /// Decode and validate a record header; only handshake records are accepted.
    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self, SniffError> {
        let raw_type = reader.read_u8()?;
        let version = ProtocolVersion {
            major: reader.read_u8()?,
            minor: reader.read_u8()?,
        };
        let length = reader.read_u16_be()? as usize;

        let content_type = ContentType::from(raw_type);
        if content_type != ContentType::Handshake {
            return Err(SniffError::NotHandshake(raw_type));
        }
        if length > MAX_FRAGMENT_LEN {
            return Err(SniffError::RecordTooLarge(length));
        }

        Ok(Self {
            content_type,
            version,
            length,
        })
    }
}
