//! ClientHello extensions.
//!
//! Every extension is read as a `(type, length, body)` triple. `server_name`
//! and `application_layer_protocol_negotiation` are decoded; the rest are kept
//! as opaque bytes.

use crate::io::ByteReader;

use super::SniffError;

/// Name type for DNS hostnames in the server_name extension.
const NAME_TYPE_HOST_NAME: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionType {
    ServerName,
    Alpn,
    Other(u16),
}

impl From<u16> for ExtensionType {
    fn from(v: u16) -> Self {
        match v {
            0 => ExtensionType::ServerName,
            16 => ExtensionType::Alpn,
            other => ExtensionType::Other(other),
        }
    }
}

impl From<ExtensionType> for u16 {
    fn from(v: ExtensionType) -> Self {
        match v {
            ExtensionType::ServerName => 0,
            ExtensionType::Alpn => 16,
            ExtensionType::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    /// Hostnames from the server_name list (non-hostname entries dropped).
    ServerName(Vec<String>),
    /// Protocol names in client preference order.
    Alpn(Vec<String>),
    Unknown { kind: u16, data: Vec<u8> },
}

impl Extension {
    /// Read one extension and dispatch on its type code.
    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self, SniffError> {
        let kind = reader.read_u16_be()?;
        let body = reader.read_vec_u16()?;

        match ExtensionType::from(kind) {
            ExtensionType::ServerName => decode_server_names(body).map(Extension::ServerName),
            ExtensionType::Alpn => decode_alpn(body).map(Extension::Alpn),
            ExtensionType::Other(kind) => Ok(Extension::Unknown {
                kind,
                data: body.to_vec(),
            }),
        }
    }

    pub fn kind(&self) -> ExtensionType {
        match self {
            Extension::ServerName(_) => ExtensionType::ServerName,
            Extension::Alpn(_) => ExtensionType::Alpn,
            Extension::Unknown { kind, .. } => ExtensionType::Other(*kind),
        }
    }
}

/// `[ListLength:2][{[NameType:1][NameLength:2][Name]}...]`
fn decode_server_names(body: &[u8]) -> Result<Vec<String>, SniffError> {
    let mut outer = ByteReader::new(body);
    let list = outer.read_vec_u16().map_err(|_| invalid(ExtensionType::ServerName, "list length exceeds body"))?;
    if !outer.is_empty() {
        return Err(invalid(ExtensionType::ServerName, "trailing bytes after name list"));
    }

    let mut names = Vec::new();
    let mut entries = ByteReader::new(list);
    while !entries.is_empty() {
        let name_type = entries
            .read_u8()
            .map_err(|_| invalid(ExtensionType::ServerName, "truncated entry"))?;
        let name = entries
            .read_vec_u16()
            .map_err(|_| invalid(ExtensionType::ServerName, "name length exceeds list"))?;
        if name_type == NAME_TYPE_HOST_NAME {
            names.push(ascii_lossy(name));
        }
    }
    Ok(names)
}

/// `[ListLength:2][{[NameLength:1][Name]}...]`
fn decode_alpn(body: &[u8]) -> Result<Vec<String>, SniffError> {
    let mut outer = ByteReader::new(body);
    let list = outer.read_vec_u16().map_err(|_| invalid(ExtensionType::Alpn, "list length exceeds body"))?;
    if !outer.is_empty() {
        return Err(invalid(ExtensionType::Alpn, "trailing bytes after protocol list"));
    }

    let mut protocols = Vec::new();
    let mut entries = ByteReader::new(list);
    while !entries.is_empty() {
        let name = entries
            .read_vec_u8()
            .map_err(|_| invalid(ExtensionType::Alpn, "protocol length exceeds list"))?;
        if name.is_empty() {
            return Err(invalid(ExtensionType::Alpn, "empty protocol name"));
        }
        protocols.push(ascii_lossy(name));
    }
    Ok(protocols)
}

fn invalid(kind: ExtensionType, reason: &'static str) -> SniffError {
    SniffError::InvalidExtension { kind, reason }
}

/// ASCII decode; bytes outside 7-bit ASCII become `?`.
fn ascii_lossy(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::primitives::put_u16_be;

    fn wrap(kind: u16, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        put_u16_be(&mut out, kind);
        put_u16_be(&mut out, body.len() as u16);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn decodes_server_name() {
        let host = b"example.com";
        let mut body = Vec::new();
        put_u16_be(&mut body, (3 + host.len()) as u16);
        body.push(0);
        put_u16_be(&mut body, host.len() as u16);
        body.extend_from_slice(host);

        let raw = wrap(0, &body);
        let ext = Extension::read(&mut ByteReader::new(&raw)).unwrap();
        assert_eq!(ext, Extension::ServerName(vec!["example.com".to_string()]));
    }

    #[test]
    fn decodes_alpn_in_order() {
        let body = [0x00, 0x0c, 0x02, b'h', b'2', 0x08, b'h', b't', b't', b'p', b'/', b'1', b'.', b'1'];
        let raw = wrap(16, &body);
        let ext = Extension::read(&mut ByteReader::new(&raw)).unwrap();
        assert_eq!(ext, Extension::Alpn(vec!["h2".into(), "http/1.1".into()]));
    }

    #[test]
    fn unknown_extension_is_opaque() {
        let raw = wrap(0x002b, &[0x02, 0x03, 0x04]);
        let ext = Extension::read(&mut ByteReader::new(&raw)).unwrap();
        assert_eq!(
            ext,
            Extension::Unknown {
                kind: 0x002b,
                data: vec![0x02, 0x03, 0x04]
            }
        );
        assert_eq!(ext.kind(), ExtensionType::Other(0x2b));
    }

    #[test]
    fn hostname_longer_than_list_is_an_error() {
        // list claims 5 bytes, entry claims a 20-byte hostname
        let body = [0x00, 0x05, 0x00, 0x00, 0x14, b'a', b'b'];
        let raw = wrap(0, &body);
        let err = Extension::read(&mut ByteReader::new(&raw)).unwrap_err();
        assert!(matches!(
            err,
            SniffError::InvalidExtension { kind: ExtensionType::ServerName, .. }
        ));
    }

    #[test]
    fn body_shorter_than_declared_is_an_error() {
        let raw = [0x00, 0x10, 0x00, 0x09, 0x00];
        assert!(matches!(
            Extension::read(&mut ByteReader::new(&raw)),
            Err(SniffError::Truncated(_))
        ));
    }
}
