//! The per-thread poller: a uniform readiness interface over selectable OS
//! backends (epoll, kqueue, IOCP), each reporting whether it is
//! level-triggered. Built on `mio`, which already abstracts the per-OS
//! backends, rather than reimplementing them.

mod mio_backend;

pub use mio_backend::MioReactor;

use std::fmt;

use crate::error::{Error, ErrorKind, Result};

/// Readiness bits a registration can be interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Self = Self {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Self = Self {
        readable: false,
        writable: true,
    };

    #[must_use]
    pub fn readable() -> Self {
        Self::READABLE
    }

    #[must_use]
    pub fn writable() -> Self {
        Self::WRITABLE
    }

    #[must_use]
    pub fn add(self, other: Self) -> Self {
        Self {
            readable: self.readable || other.readable,
            writable: self.writable || other.writable,
        }
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        !self.readable && !self.writable
    }
}

/// The readiness event delivered to an I/O callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    /// On completion-based backends (IOCP), the number of bytes the
    /// completed operation moved; `None` on readiness-based backends.
    pub io_size: Option<usize>,
}

/// Whether a backend reports readiness once per state change (edge) or every
/// time it is polled while still ready (level). Level-triggered backends
/// require callers to toggle write-interest on and off as their send buffer
/// fills/drains; edge-triggered backends do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollType {
    LevelTriggered,
    EdgeTriggered,
    Completion,
}

/// A registration token identifying one descriptor inside a `Reactor`.
pub type Token = usize;

/// A uniform readiness/completion multiplexer.
///
/// Implementations must only be driven from the thread that owns them,
/// except for [`Reactor::notify`], which is explicitly safe to call from
/// another thread or a signal handler.
pub trait Reactor: fmt::Debug + Send {
    /// Whether this backend is level- or edge-triggered, or completion-based.
    fn poll_type(&self) -> PollType;

    /// Register a descriptor with an initial interest set. The returned
    /// token identifies the registration for `update`/`unregister`.
    fn register(&mut self, fd: RawFd, interest: Interest) -> Result<Token>;

    /// Change the subscribed interest for an already-registered descriptor.
    fn update(&mut self, token: Token, interest: Interest) -> Result<()>;

    /// Detach a descriptor. After this returns, no further readiness events
    /// for `token` may be delivered, even if they were already queued by the
    /// OS before this call (the backend must filter them out — the "destroy
    /// detector" contract: a callback must not touch a descriptor it just
    /// unregistered).
    fn unregister(&mut self, token: Token) -> Result<()>;

    /// Block up to `max_ms` (or indefinitely if `None`), then dispatch
    /// readiness to `on_ready` for each ready token. Returns once the wait
    /// completes (either because something became ready, the timeout
    /// elapsed, or `notify` unblocked it).
    fn wait(&mut self, max_ms: Option<u64>, on_ready: &mut dyn FnMut(Token, Readiness)) -> Result<()>;

    /// A handle that can wake a blocked `wait()` from another thread.
    fn notifier(&self) -> Box<dyn Notifier>;
}

/// A raw OS file descriptor / socket handle. Kept as a plain integer so this
/// trait does not need to depend on a particular socket collaborator's type.
#[cfg(unix)]
pub type RawFd = std::os::fd::RawFd;
#[cfg(windows)]
pub type RawFd = std::os::windows::io::RawSocket;

/// Cross-thread (or signal-handler) wakeup for a blocked `Reactor::wait`.
pub trait Notifier: Send + Sync {
    fn notify(&self);
}

/// Construct the best-available reactor for the host platform.
pub fn create_reactor() -> Result<Box<dyn Reactor>> {
    MioReactor::new()
        .map(|r| Box::new(r) as Box<dyn Reactor>)
        .map_err(|e| Error::with_cause(ErrorKind::PollError, e))
}
