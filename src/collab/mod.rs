//! External collaborator seams: socket,
//! DNS resolver, proxy connector, and HTTP response cache. Concrete
//! implementations (a real TLS-capable socket, a real resolver, ...) are
//! explicitly out of scope for this crate; only the traits the
//! rest of the crate programs against live here.

use std::time::Duration;

use crate::error::Result;
use crate::http1::HeaderField;
use crate::reactor::RawFd;

/// Outcome of a non-blocking send/receive attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome {
    Transferred(usize),
    Again,
    Closed,
}

/// The socket collaborator. Readable/writable events drive the frame parser
/// and the outbound drain; this trait only covers the non-blocking
/// data-path operations plus registration bookkeeping (connection setup,
/// DNS, and TLS handshake negotiation live in other collaborators or on the
/// concrete implementation's construction path, not here).
pub trait Socket: Send {
    fn attach_fd(&mut self, fd: RawFd, init_buf: &[u8]) -> Result<()>;

    /// Non-blocking send; returns [`IoOutcome::Again`] rather than blocking
    /// when the socket send buffer is full.
    fn send(&mut self, buf: &[u8]) -> Result<IoOutcome>;

    /// Non-blocking receive into `buf`.
    fn receive(&mut self, buf: &mut [u8]) -> Result<IoOutcome>;

    fn pause(&mut self);
    fn resume(&mut self);
    fn close(&mut self);

    /// TLS-only; implementations over cleartext sockets return `Ok(())`
    /// without effect.
    fn set_alpn_protocols(&mut self, protocols: &[&str]) -> Result<()>;
    fn set_sni(&mut self, hostname: &str) -> Result<()>;
    fn get_alpn_selected(&self) -> Option<String>;
}

/// A cancellable handle returned by an asynchronous collaborator operation
///.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CancelToken(pub u64);

/// The DNS resolver collaborator.
pub trait DnsResolver: Send {
    /// Resolve `host` asynchronously; `cb` is invoked on this resolver's
    /// own thread/loop discipline, so callers marshal onto their own loop
    /// via [`crate::event_loop::Handle::post`] if the result must land
    /// elsewhere.
    fn resolve(
        &mut self,
        host: &str,
        port: u16,
        cb: Box<dyn FnOnce(Result<std::net::SocketAddr>) + Send>,
    ) -> CancelToken;

    /// A synchronous cache lookup, bypassing the async path when the
    /// address is already known.
    fn get_address(&self, host: &str) -> Option<std::net::SocketAddr>;

    fn cancel(&mut self, token: CancelToken);
}

/// HTTP authentication schemes a [`ProxyConnector`] negotiates from a 407's
/// `Proxy-Authenticate` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyAuthScheme {
    Basic,
    Digest,
    Ntlm,
    Negotiate,
}

/// Maximum CONNECT retries while stepping through a multi-round auth
/// challenge.
pub const MAX_PROXY_AUTH_ATTEMPTS: u8 = 5;

/// The proxy (CONNECT-over-HTTP) collaborator.
/// Presents the same data-path shape as [`Socket`] once connected; this
/// trait covers only the CONNECT handshake itself.
pub trait ProxyConnector: Send {
    /// Attempt the CONNECT handshake to `target` through this proxy,
    /// retrying with an escalating auth scheme on repeated 407 responses up
    /// to [`MAX_PROXY_AUTH_ATTEMPTS`] times.
    fn connect(
        &mut self,
        target_host: &str,
        target_port: u16,
        cb: Box<dyn FnOnce(Result<Box<dyn Socket>>) + Send>,
    );

    /// The auth scheme this connector last negotiated, if any (useful to
    /// reuse across connections to the same proxy).
    fn negotiated_scheme(&self) -> Option<ProxyAuthScheme>;
}

/// One cached response entry.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<HeaderField>,
    pub body: bytes::Bytes,
}

/// Cache-Control directives relevant to whether an entry may be stored or
/// served.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub max_age: Option<Duration>,
}

/// Parse the handful of `Cache-Control` directives this crate's cache
/// collaborator acts on; unrecognized directives are ignored.
#[must_use]
pub fn parse_cache_control(value: &str) -> CacheControl {
    let mut cc = CacheControl::default();
    for token in value.split(',') {
        let token = token.trim();
        if token.eq_ignore_ascii_case("no-store") {
            cc.no_store = true;
        } else if token.eq_ignore_ascii_case("no-cache") {
            cc.no_cache = true;
        } else if let Some(rest) = token
            .to_ascii_lowercase()
            .strip_prefix("max-age=")
            .map(str::to_owned)
        {
            if let Ok(secs) = rest.parse::<u64>() {
                cc.max_age = Some(Duration::from_secs(secs));
            }
        }
    }
    cc
}

/// The HTTP response cache collaborator.
pub trait ResponseCache: Send {
    fn get(&self, key: &str) -> Option<CachedResponse>;

    /// Store `response` under `key`, gated by the entry's own
    /// `Cache-Control` header. Implementations call
    /// [`parse_cache_control`] on the relevant header value before storing.
    fn put(&mut self, key: &str, response: CachedResponse, directives: CacheControl);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_no_store_and_no_cache() {
        let cc = parse_cache_control("no-store, no-cache");
        assert!(cc.no_store);
        assert!(cc.no_cache);
    }

    #[test]
    fn parses_max_age_in_seconds() {
        let cc = parse_cache_control("max-age=120");
        assert_eq!(cc.max_age, Some(Duration::from_secs(120)));
    }

    #[test]
    fn ignores_unknown_directives() {
        let cc = parse_cache_control("private, max-age=30");
        assert_eq!(cc.max_age, Some(Duration::from_secs(30)));
        assert!(!cc.no_store);
    }
}
