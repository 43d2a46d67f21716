//! Bridges application-thread callers to a [`Connection`] owned by a single
//! event-loop thread: a same-thread fast path versus `loop.post(...)`
//! marshaling, a queued-vs-inline `send_data` split, and push-client
//! adoption by cache key. Send/receive buffers are
//! [`crossbeam_queue::SegQueue`]s; cross-thread handoff goes through this
//! crate's own [`crate::event_loop::Handle`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, ErrorKind, Result};
use crate::event_loop::{Handle, WeakHandle};
use crate::h2::connection::Connection;
use crate::h2::hpack::Header;
use crate::h2::stream::{SendOutcome, StreamId};

/// A [`Connection`] wrapped for sharing between the loop thread that owns it
/// and any number of [`StreamProxy`]s on other threads. `Connection`'s
/// `Box<dyn HpackCodec>`/`Box<dyn StreamCallbacks>` fields are `Send` (see
/// those traits), which is what makes this legal.
pub type SharedConnection = Arc<Mutex<Connection>>;

/// The lifecycle states `H2StreamProxy` tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Idle,
    Connecting,
    Open,
    InError,
    Closed,
}

/// Cache key used to match an inbound PUSH_PROMISE against a later request
/// for the same resource: authority + path (+ `?query` when present).
#[must_use]
pub fn cache_key(authority: &str, path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{authority}{path}?{q}"),
        _ => format!("{authority}{path}"),
    }
}

/// Tracks promised streams still waiting for a matching client request
///. A thin, independently
/// lockable wrapper around the map so it can be shared across every
/// [`StreamProxy`] attached to one [`Connection`] without taking the
/// connection lock just to check for a push match.
#[derive(Debug, Default)]
pub struct PushRegistry {
    by_key: StdMutex<HashMap<String, StreamId>>,
}

impl PushRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: impl Into<String>, promised_id: StreamId) {
        self.by_key.lock().unwrap().insert(key.into(), promised_id);
    }

    /// Claim a previously-registered promise, if one is outstanding.
    pub fn adopt(&self, key: &str) -> Option<StreamId> {
        self.by_key.lock().unwrap().remove(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The four callbacks `H2StreamProxy` exposes to its owner, dispatched from
/// whichever thread the proxy was constructed on (never the connection-owning
/// thread directly — always marshaled through [`crate::event_loop::Handle::post`]).
pub trait StreamProxyCallbacks: Send {
    fn on_header(&mut self, headers: &[Header], end_stream: bool) {
        let _ = (headers, end_stream);
    }
    fn on_data(&mut self, data: &[u8], end_stream: bool) {
        let _ = (data, end_stream);
    }
    fn on_write_ready(&mut self) {}
    fn on_error(&mut self, reason: crate::h2::error::Reason) {
        let _ = reason;
    }
}

struct Inner {
    state: ProxyState,
    stream_id: Option<StreamId>,
    write_blocked: AtomicBool,
    callbacks: Option<Box<dyn StreamProxyCallbacks>>,
    recv_queue: crossbeam_queue::SegQueue<(Bytes, bool)>,
    send_queue: crossbeam_queue::SegQueue<(Bytes, bool)>,
}

/// One HTTP/2 request/response (or server-push) stream, addressable from an
/// application thread distinct from the one driving the underlying
/// [`Connection`].
///
/// A `StreamProxy` is cheap to clone: cloning shares the same underlying,
/// reference-counted stream state.
#[derive(Clone)]
pub struct StreamProxy {
    conn: SharedConnection,
    conn_loop: Handle,
    app_loop: Handle,
    inner: Arc<Mutex<Inner>>,
}

/// A non-owning reference to a [`StreamProxy`], for code that must not keep
/// the proxy (and transitively its connection) alive — e.g. a
/// [`PushRegistry`] entry recording a promise nobody has claimed yet.
#[derive(Clone)]
pub struct StreamProxyHandle {
    conn: std::sync::Weak<Mutex<Connection>>,
    conn_loop: WeakHandle,
    app_loop: WeakHandle,
    inner: std::sync::Weak<Mutex<Inner>>,
}

impl StreamProxy {
    /// Construct a proxy for a stream the application thread is about to
    /// open. `conn_loop` is the `Handle` of the loop that owns `conn`;
    /// `app_loop` is the calling thread's own loop, used to marshal
    /// callback dispatch back onto it from `conn_loop`.
    pub fn new(conn: SharedConnection, conn_loop: Handle, app_loop: Handle) -> Self {
        Self {
            conn,
            conn_loop,
            app_loop,
            inner: Arc::new(Mutex::new(Inner {
                state: ProxyState::Idle,
                stream_id: None,
                write_blocked: AtomicBool::new(false),
                callbacks: None,
                recv_queue: crossbeam_queue::SegQueue::new(),
                send_queue: crossbeam_queue::SegQueue::new(),
            })),
        }
    }

    #[must_use]
    pub fn downgrade(&self) -> StreamProxyHandle {
        StreamProxyHandle {
            conn: Arc::downgrade(&self.conn),
            conn_loop: self.conn_loop.downgrade(),
            app_loop: self.app_loop.downgrade(),
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn set_callbacks(&self, callbacks: Box<dyn StreamProxyCallbacks>) {
        self.inner.lock().callbacks = Some(callbacks);
    }

    #[must_use]
    pub fn state(&self) -> ProxyState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn stream_id(&self) -> Option<StreamId> {
        self.inner.lock().stream_id
    }

    /// `runOnLoopThread`: run `f` with the connection locked, inline if
    /// already on the loop thread, marshaled via `post` otherwise.
    fn on_conn_loop(&self, f: impl FnOnce(&mut Connection) + Send + 'static) {
        let conn = self.conn.clone();
        if self.conn_loop.is_loop_thread() {
            f(&mut conn.lock());
        } else {
            self.conn_loop.post(move || f(&mut conn.lock()));
        }
    }

    /// `sendHeader(headers, end_stream)`: opens the stream (if
    /// not already open) and queues a HEADERS frame, marshaling onto the
    /// connection's loop thread when the caller is elsewhere.
    pub fn send_header(&self, headers: Vec<Header>, end_stream: bool) {
        let inner = self.inner.clone();
        let stream_id_known = self.stream_id();
        self.on_conn_loop(move |conn| {
            let id = stream_id_known.unwrap_or_else(|| conn.create_stream());
            let mut guard = inner.lock();
            guard.stream_id = Some(id);
            guard.state = ProxyState::Open;
            drop(guard);
            let _ = conn.send_headers(id, &headers, end_stream);
        });
    }

    /// `send_data(buf, end_stream)`: same-thread calls send
    /// directly against the connection; cross-thread calls enqueue onto
    /// `send_queue` and post a drain task instead of copying data into the
    /// post closure itself.
    pub fn send_data(&self, data: Bytes, end_stream: bool) -> Result<()> {
        let Some(id) = self.stream_id() else {
            return Err(Error::new(ErrorKind::InvalidState));
        };
        if self.conn_loop.is_loop_thread() {
            let outcome = self.conn.lock().send_data(id, &data, end_stream);
            self.record_send_outcome(outcome);
            return Ok(());
        }
        self.inner.lock().send_queue.push((data, end_stream));
        let proxy = self.clone();
        self.conn_loop.post(move || proxy.drain_send_queue());
        Ok(())
    }

    fn drain_send_queue(&self) {
        let Some(id) = self.stream_id() else { return };
        while let Some((chunk, end_stream)) = self.inner.lock().send_queue.pop() {
            let outcome = self.conn.lock().send_data(id, &chunk, end_stream);
            self.record_send_outcome(outcome);
            if outcome == SendOutcome::Blocked {
                break;
            }
        }
    }

    fn record_send_outcome(&self, outcome: SendOutcome) {
        let inner = self.inner.lock();
        inner.write_blocked.store(outcome == SendOutcome::Blocked, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_write_blocked(&self) -> bool {
        self.inner.lock().write_blocked.load(Ordering::SeqCst)
    }

    /// Delivered by the connection's dispatch loop (always on the
    /// connection-owning thread); marshals onto `app_loop` before invoking
    /// the stored callback, so application code never runs on the
    /// connection thread.
    pub fn deliver_headers(&self, headers: Vec<Header>, end_stream: bool) {
        let inner = self.inner.clone();
        let dispatch = move || {
            if let Some(cb) = inner.lock().callbacks.as_mut() {
                cb.on_header(&headers, end_stream);
            }
        };
        if self.app_loop.is_loop_thread() {
            dispatch();
        } else {
            self.app_loop.post(dispatch);
        }
    }

    /// `deliver_data`: dispatches inline only when
    /// already on `app_loop`'s thread *and* `recv_queue` is empty; otherwise
    /// the buffer is cloned onto the queue and a drain task is posted, the
    /// same same-thread-fast-path-vs-queued split [`StreamProxy::send_data`]
    /// uses on the outbound side.
    pub fn deliver_data(&self, data: Bytes, end_stream: bool) {
        let same_thread = self.app_loop.is_loop_thread();
        let queue_was_empty = self.inner.lock().recv_queue.is_empty();
        if same_thread && queue_was_empty {
            if let Some(cb) = self.inner.lock().callbacks.as_mut() {
                cb.on_data(&data, end_stream);
            }
            return;
        }
        self.inner.lock().recv_queue.push((data, end_stream));
        if same_thread {
            self.drain_recv_queue();
        } else {
            let proxy = self.clone();
            self.app_loop.post(move || proxy.drain_recv_queue());
        }
    }

    fn drain_recv_queue(&self) {
        while let Some((chunk, end_stream)) = self.inner.lock().recv_queue.pop() {
            if let Some(cb) = self.inner.lock().callbacks.as_mut() {
                cb.on_data(&chunk, end_stream);
            }
        }
    }

    pub fn deliver_write_ready(&self) {
        self.inner.lock().write_blocked.store(false, Ordering::SeqCst);
        let inner = self.inner.clone();
        let dispatch = move || {
            if let Some(cb) = inner.lock().callbacks.as_mut() {
                cb.on_write_ready();
            }
        };
        if self.app_loop.is_loop_thread() {
            dispatch();
        } else {
            self.app_loop.post(dispatch);
        }
    }

    pub fn deliver_error(&self, reason: crate::h2::error::Reason) {
        self.inner.lock().state = ProxyState::InError;
        let inner = self.inner.clone();
        let dispatch = move || {
            if let Some(cb) = inner.lock().callbacks.as_mut() {
                cb.on_error(reason);
            }
        };
        if self.app_loop.is_loop_thread() {
            dispatch();
        } else {
            self.app_loop.post(dispatch);
        }
    }

    /// Adopt a server push by cache key: looks the key up in
    /// `registry`, and if found, attaches this proxy to the already-promised
    /// stream instead of opening a new one.
    pub fn adopt_push(&self, registry: &PushRegistry, key: &str) -> bool {
        let Some(id) = registry.adopt(key) else {
            return false;
        };
        let mut guard = self.inner.lock();
        guard.stream_id = Some(id);
        guard.state = ProxyState::Open;
        true
    }

    pub fn close(&self) {
        let mut guard = self.inner.lock();
        guard.state = ProxyState::Closed;
        let id = guard.stream_id;
        drop(guard);
        if let Some(id) = id {
            self.on_conn_loop(move |conn| conn.reset_stream(id, crate::h2::error::Reason::NO_ERROR));
        }
    }
}

impl StreamProxyHandle {
    #[must_use]
    pub fn upgrade(&self) -> Option<StreamProxy> {
        Some(StreamProxy {
            conn: self.conn.upgrade()?,
            conn_loop: self.conn_loop.upgrade()?,
            app_loop: self.app_loop.upgrade()?,
            inner: self.inner.upgrade()?,
        })
    }
}
