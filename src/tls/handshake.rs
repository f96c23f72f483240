//! Handshake message header and ClientHello body.

use crate::io::ByteReader;

use super::extension::Extension;
use super::record::ProtocolVersion;
use super::{SniffError, ACME_TLS_ALPN};

/// Handshake header: `[MsgType:1][Length:3]`.
pub const HANDSHAKE_HEADER_LEN: usize = 4;

const RANDOM_LEN: usize = 32;
const MAX_SESSION_ID_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeType {
    HelloRequest,
    ClientHello,
    ServerHello,
    Certificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    CertificateVerify,
    ClientKeyExchange,
    Finished,
    Unknown(u8),
}

impl From<u8> for HandshakeType {
    fn from(v: u8) -> Self {
        match v {
            0 => HandshakeType::HelloRequest,
            1 => HandshakeType::ClientHello,
            2 => HandshakeType::ServerHello,
            11 => HandshakeType::Certificate,
            12 => HandshakeType::ServerKeyExchange,
            13 => HandshakeType::CertificateRequest,
            14 => HandshakeType::ServerHelloDone,
            15 => HandshakeType::CertificateVerify,
            16 => HandshakeType::ClientKeyExchange,
            20 => HandshakeType::Finished,
            other => HandshakeType::Unknown(other),
        }
    }
}

/// The parts of a ClientHello needed before TLS negotiation starts.
///
/// Random, cipher suites and compression methods are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// Legacy version field; the negotiated version comes later.
    pub version: ProtocolVersion,
    pub session_id: Vec<u8>,
    pub extensions: Vec<Extension>,
}

impl ClientHello {
    /// Decode a handshake message that must fill `fragment` exactly.
    pub fn read_handshake(fragment: &[u8]) -> Result<Self, SniffError> {
        let mut reader = ByteReader::new(fragment);
        let msg_type = HandshakeType::from(reader.read_u8()?);
        if msg_type != HandshakeType::ClientHello {
            return Err(SniffError::Unsupported(msg_type));
        }

        let declared = reader.read_u24_be()? as usize;
        if declared != reader.remaining() {
            return Err(SniffError::LengthMismatch {
                declared,
                actual: reader.remaining(),
            });
        }

        Self::read_body(&mut reader)
    }

    fn read_body(reader: &mut ByteReader<'_>) -> Result<Self, SniffError> {
        let version = ProtocolVersion::from_u16(reader.read_u16_be()?);
        reader.skip(RANDOM_LEN)?;

        let session_id = reader.read_vec_u8()?;
        if session_id.len() > MAX_SESSION_ID_LEN {
            return Err(SniffError::LengthMismatch {
                declared: session_id.len(),
                actual: MAX_SESSION_ID_LEN,
            });
        }
        let session_id = session_id.to_vec();

        reader.read_vec_u16()?; // cipher_suites
        reader.read_vec_u8()?; // compression_methods

        let mut extensions = Vec::new();
        if reader.is_empty() {
            // pre-TLS 1.2 hellos may omit the extensions block
            return Ok(Self {
                version,
                session_id,
                extensions,
            });
        }

        let block = reader.read_vec_u16()?;
        if !reader.is_empty() {
            return Err(SniffError::LengthMismatch {
                declared: block.len(),
                actual: block.len() + reader.remaining(),
            });
        }

        let mut ext_reader = ByteReader::new(block);
        while !ext_reader.is_empty() {
            extensions.push(Extension::read(&mut ext_reader)?);
        }

        Ok(Self {
            version,
            session_id,
            extensions,
        })
    }

    /// Every hostname offered through SNI.
    pub fn server_names(&self) -> Vec<&str> {
        self.extensions
            .iter()
            .filter_map(|ext| match ext {
                Extension::ServerName(names) => Some(names),
                _ => None,
            })
            .flatten()
            .map(String::as_str)
            .collect()
    }

    /// The hostname used for certificate selection (TLS allows only one).
    pub fn server_name(&self) -> Option<&str> {
        self.server_names().into_iter().next()
    }

    pub fn alpn_protocols(&self) -> Vec<&str> {
        self.extensions
            .iter()
            .filter_map(|ext| match ext {
                Extension::Alpn(protocols) => Some(protocols),
                _ => None,
            })
            .flatten()
            .map(String::as_str)
            .collect()
    }

    /// True when the client is performing an ACME TLS-ALPN-01 validation.
    pub fn is_acme_tls(&self) -> bool {
        self.alpn_protocols().contains(&ACME_TLS_ALPN)
    }
}
