//! WebSocket handshake over HTTP/1.x Upgrade and RFC 8441 extended CONNECT
//! over HTTP/2.
//!
//! Key/accept derivation uses the `sha1` and `base64` crates rather than a
//! hand-rolled digest.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::error::{Error, ErrorKind, Result};
use crate::http1::HeaderField;

const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Generate a fresh `Sec-WebSocket-Key`.
#[must_use]
pub fn generate_key() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// `base64(SHA1(key + GUID))` (RFC 6455 §1.3), independently verifiable
/// against the canonical fixture (key `dGhlIHNhbXBsZSBub25jZQ==` -> accept
/// `s3pPLMBiTxaQ9kYGzzhZRbK+xOo=`).
#[must_use]
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Build the client-side HTTP/1.x upgrade request line + headers (spec
/// §4.M). The caller is responsible for the request line / `Host` header;
/// this only contributes the WebSocket-specific fields.
pub fn client_upgrade_headers(key: &str, protocols: &[String], extensions: &str) -> Vec<HeaderField> {
    let mut headers = vec![
        HeaderField::new("Upgrade", "websocket"),
        HeaderField::new("Connection", "Upgrade"),
        HeaderField::new("Sec-WebSocket-Key", key),
        HeaderField::new("Sec-WebSocket-Version", "13"),
    ];
    if !protocols.is_empty() {
        headers.push(HeaderField::new("Sec-WebSocket-Protocol", protocols.join(", ")));
    }
    if !extensions.is_empty() {
        headers.push(HeaderField::new("Sec-WebSocket-Extensions", extensions));
    }
    headers
}

/// Build the server's `101 Switching Protocols` response headers in answer
/// to a verified client upgrade request.
pub fn server_accept_headers(key: &str, protocol: Option<&str>, extensions: &str) -> Vec<HeaderField> {
    let mut headers = vec![
        HeaderField::new("Upgrade", "websocket"),
        HeaderField::new("Connection", "Upgrade"),
        HeaderField::new("Sec-WebSocket-Accept", accept_key(key)),
    ];
    if let Some(p) = protocol {
        headers.push(HeaderField::new("Sec-WebSocket-Protocol", p));
    }
    if !extensions.is_empty() {
        headers.push(HeaderField::new("Sec-WebSocket-Extensions", extensions));
    }
    headers
}

/// Server-side verification that an inbound request is a well-formed
/// WebSocket upgrade, returning the `Sec-WebSocket-Key` value to echo back
/// through [`accept_key`].
pub fn verify_client_upgrade(headers: &[HeaderField]) -> Result<String> {
    let find = |name: &str| {
        headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    };
    let upgrade_ok = find("Upgrade").map(|v| v.eq_ignore_ascii_case("websocket")).unwrap_or(false);
    let connection_ok = find("Connection")
        .map(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("upgrade")))
        .unwrap_or(false);
    let version_ok = find("Sec-WebSocket-Version") == Some("13");
    if !upgrade_ok || !connection_ok || !version_ok {
        return Err(Error::new(ErrorKind::InvalidProto));
    }
    find("Sec-WebSocket-Key")
        .map(str::to_owned)
        .ok_or_else(|| Error::new(ErrorKind::InvalidProto))
}

/// Client-side verification of the server's `101` response. Returns an error if the echoed accept
/// value does not match what [`accept_key`] would have produced for `key`.
pub fn verify_server_accept(headers: &[HeaderField], key: &str) -> Result<()> {
    let accept = headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("Sec-WebSocket-Accept"))
        .map(|h| h.value.as_str())
        .ok_or_else(|| Error::new(ErrorKind::InvalidProto))?;
    if accept != accept_key(key) {
        return Err(Error::new(ErrorKind::InvalidProto));
    }
    Ok(())
}

/// The pseudo/regular header set for an RFC 8441 extended CONNECT request
/// opening a WebSocket stream over HTTP/2: `:method=CONNECT`,
/// `:protocol=websocket`, plus `:scheme`/`:path`/`:authority` and the WS
/// headers minus `Upgrade`/`Connection`/`Sec-WebSocket-Key`/`Accept` (those
/// have no meaning once multiplexed over a single H2 connection).
#[must_use]
pub fn h2_connect_headers(
    scheme: &str,
    authority: &str,
    path: &str,
    protocols: &[String],
    extensions: &str,
) -> Vec<crate::h2::hpack::Header> {
    let mut headers = vec![
        crate::h2::hpack::Header::new(":method", "CONNECT"),
        crate::h2::hpack::Header::new(":protocol", "websocket"),
        crate::h2::hpack::Header::new(":scheme", scheme),
        crate::h2::hpack::Header::new(":path", path),
        crate::h2::hpack::Header::new(":authority", authority),
    ];
    if !protocols.is_empty() {
        headers.push(crate::h2::hpack::Header::new("sec-websocket-protocol", protocols.join(", ")));
    }
    if !extensions.is_empty() {
        headers.push(crate::h2::hpack::Header::new("sec-websocket-extensions", extensions));
    }
    headers
}

/// A server accepts an extended-CONNECT WebSocket stream with
/// `:status=200` rather than HTTP/1's `101`, and only once its
/// local `SETTINGS_ENABLE_CONNECT_PROTOCOL` has been both sent and
/// acknowledged by the peer as `1`.
#[must_use]
pub fn h2_accept_headers() -> Vec<crate::h2::hpack::Header> {
    vec![crate::h2::hpack::Header::new(":status", "200")]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_spec_scenario_4_accept_fixture() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn verify_client_upgrade_accepts_well_formed_request() {
        let headers = client_upgrade_headers("dGhlIHNhbXBsZSBub25jZQ==", &[], "");
        let key = verify_client_upgrade(&headers).unwrap();
        assert_eq!(key, "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[test]
    fn verify_client_upgrade_rejects_wrong_version() {
        let mut headers = client_upgrade_headers("key", &[], "");
        for h in &mut headers {
            if h.name == "Sec-WebSocket-Version" {
                h.value = "8".into();
            }
        }
        assert!(verify_client_upgrade(&headers).is_err());
    }

    #[test]
    fn verify_server_accept_round_trips_with_server_accept_headers() {
        let key = generate_key();
        let headers = server_accept_headers(&key, None, "");
        verify_server_accept(&headers, &key).unwrap();
    }

    #[test]
    fn verify_server_accept_rejects_wrong_key() {
        let headers = server_accept_headers("dGhlIHNhbXBsZSBub25jZQ==", None, "");
        assert!(verify_server_accept(&headers, "different-key").is_err());
    }

    #[test]
    fn h2_connect_headers_carry_protocol_pseudo_header() {
        let headers = h2_connect_headers("https", "example.com", "/chat", &[], "");
        assert!(headers.iter().any(|h| h.name == ":protocol" && h.value == "websocket"));
        assert!(headers.iter().any(|h| h.name == ":method" && h.value == "CONNECT"));
    }
}
