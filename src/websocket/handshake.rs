//! Opening handshake helpers (RFC 6455 §4).

use base64::Engine;
use sha1::{Digest, Sha1};

const ACCEPT_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `Sec-WebSocket-Accept` value for a client's `Sec-WebSocket-Key`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(ACCEPT_GUID);
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Whether a server's `Sec-WebSocket-Accept` answers `client_key`.
pub fn verify_accept(client_key: &str, accept: Option<&str>) -> bool {
    matches!(accept, Some(value) if value.trim() == accept_key(client_key))
}

/// A fresh random `Sec-WebSocket-Key`.
pub fn generate_client_key() -> String {
    let nonce: [u8; 16] = rand::random();
    base64::engine::general_purpose::STANDARD.encode(nonce)
}

/// True if a comma-separated header value lists `token` (case-insensitive).
pub fn header_has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

/// Whether the `Connection` and `Upgrade` header values request a WebSocket
/// upgrade. Each argument yields every value of its header.
pub fn is_websocket_upgrade<'a>(
    connection: impl IntoIterator<Item = &'a str>,
    upgrade: impl IntoIterator<Item = &'a str>,
) -> bool {
    connection.into_iter().any(|c| header_has_token(c, "upgrade"))
        && upgrade.into_iter().any(|u| header_has_token(u, "websocket"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc_sample_accept_key() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn accept_verification() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        assert!(verify_accept(key, Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")));
        assert!(!verify_accept(key, Some("bm90IHRoZSByaWdodCBrZXk=")));
        assert!(!verify_accept(key, None));
    }

    #[test]
    fn generated_keys_decode_to_16_bytes() {
        let key = generate_client_key();
        let raw = base64::engine::general_purpose::STANDARD.decode(key).unwrap();
        assert_eq!(raw.len(), 16);
    }

    #[test]
    fn upgrade_detection() {
        assert!(is_websocket_upgrade(Some("keep-alive, Upgrade"), Some("WebSocket")));
        assert!(!is_websocket_upgrade(Some("keep-alive"), Some("websocket")));
        assert!(!is_websocket_upgrade(Some("upgrade"), Some("h2c")));
        assert!(!is_websocket_upgrade(None, Some("websocket")));
        assert!(is_websocket_upgrade(["keep-alive", "Upgrade"], ["websocket"]));
    }
}
