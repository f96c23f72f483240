//! Reading a ClientHello off a live connection.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::io::ByteReader;

use super::handshake::{ClientHello, HANDSHAKE_HEADER_LEN};
use super::record::{RecordHeader, RECORD_HEADER_LEN};
use super::SniffError;

/// Parse one complete `TLSPlaintext` record holding a ClientHello.
pub fn parse_client_hello(record: &[u8]) -> Result<ClientHello, SniffError> {
    let mut reader = ByteReader::new(record);
    let header = RecordHeader::read(&mut reader)?;
    let fragment = reader.read_bytes(header.length)?;
    if !reader.is_empty() {
        return Err(SniffError::LengthMismatch {
            declared: header.length,
            actual: header.length + reader.remaining(),
        });
    }
    if fragment.len() < HANDSHAKE_HEADER_LEN {
        return Err(SniffError::LengthMismatch {
            declared: HANDSHAKE_HEADER_LEN,
            actual: fragment.len(),
        });
    }
    ClientHello::read_handshake(fragment)
}

/// Read exactly one record from `stream` and parse it.
///
/// Returns the hello together with every byte consumed, so the caller can
/// replay them to the real TLS stack. Nothing past the record is read.
pub async fn sniff<S>(stream: &mut S) -> Result<(ClientHello, Vec<u8>), SniffError>
where
    S: AsyncRead + Unpin,
{
    let mut consumed = vec![0u8; RECORD_HEADER_LEN];
    stream.read_exact(&mut consumed).await?;

    let header = RecordHeader::read(&mut ByteReader::new(&consumed))?;
    consumed.resize(RECORD_HEADER_LEN + header.length, 0);
    stream.read_exact(&mut consumed[RECORD_HEADER_LEN..]).await?;

    let hello = parse_client_hello(&consumed)?;
    tracing::trace!(
        version = %hello.version,
        server_name = ?hello.server_name(),
        alpn = ?hello.alpn_protocols(),
        "ClientHello sniffed"
    );
    Ok((hello, consumed))
}
