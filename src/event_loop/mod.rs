//! The per-thread loop owning a [`Reactor`], a [`TimerWheel`], a cross-thread
//! task queue, and an observer list.
//!
//! Cross-task handoff uses `crossbeam_queue::SegQueue`, a paged lock-free
//! MPSC queue, and `parking_lot::{Mutex, Condvar}` for the one-shot
//! primitive backing [`EventLoop::sync`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;
use std::time::Instant;

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::error::{Error, ErrorKind, Result};
use crate::reactor::{create_reactor, Interest, Notifier, Reactor, Readiness, Token};
use crate::timer::{Tick, TimerWheel};

/// Negotiable values for constructing an [`EventLoop`], the loop-level counterpart to
/// [`crate::h2::H2Config`] and [`crate::ws::WsConfig`].
#[derive(Debug, Clone)]
pub struct EventLoopConfig {
    /// Upper bound passed to [`EventLoop::run`]/[`EventLoop::loop_once`]
    /// when the caller does not supply a tighter one of their own; `None`
    /// means block until I/O, a timer, or a posted task wakes the loop.
    pub default_max_wait_ms: Option<u64>,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self { default_max_wait_ms: None }
    }
}

/// A unit of work posted onto an [`EventLoop`]'s task queue. Always run on
/// the loop's owner thread, regardless of which thread posted it.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A token returned by [`EventLoop::append_observer`], used to cancel a
/// registered loop-exit observer before it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(usize);

/// State shared between an [`EventLoop`] and every [`Handle`] cloned from it;
/// the only part of a loop that is meaningfully `Send + Sync`.
struct Shared {
    tasks: SegQueue<Task>,
    notifier: Box<dyn Notifier>,
    stop: AtomicBool,
    owner: ThreadId,
}

/// A cheaply-cloneable, `Send + Sync` reference to a running [`EventLoop`],
/// used by code on other threads (or this crate's [`crate::h2::stream_proxy::StreamProxy`])
/// to post tasks without touching the loop's reactor or timer wheel directly
///.
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

/// A non-owning reference to a [`Handle`] that does not keep the loop alive,
/// used by a stream proxy that must not outlive its connection loop.
#[derive(Clone)]
pub struct WeakHandle {
    shared: Weak<Shared>,
}

impl Handle {
    #[must_use]
    pub fn downgrade(&self) -> WeakHandle {
        WeakHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    #[must_use]
    pub fn is_loop_thread(&self) -> bool {
        std::thread::current().id() == self.shared.owner
    }

    /// `post(task)`: enqueue onto the MPSC queue; if called from
    /// another thread, also notify the reactor so `wait()` unblocks.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.shared.tasks.push(Box::new(task));
        if !self.is_loop_thread() {
            self.shared.notifier.notify();
        }
    }

    /// `sync(task)`: post + wait-on-completion. Runs inline if already on
    /// the loop thread; otherwise blocks the calling thread on a one-shot
    /// condition until the loop thread has run `task`.
    pub fn sync(&self, task: impl FnOnce() + Send + 'static) {
        if self.is_loop_thread() {
            task();
            return;
        }
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let gate2 = gate.clone();
        self.post(move || {
            task();
            let (lock, cvar) = &*gate2;
            *lock.lock() = true;
            cvar.notify_all();
        });
        let (lock, cvar) = &*gate;
        let mut done = lock.lock();
        while !*done {
            cvar.wait(&mut done);
        }
    }

    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.notifier.notify();
    }
}

impl WeakHandle {
    #[must_use]
    pub fn upgrade(&self) -> Option<Handle> {
        self.shared.upgrade().map(|shared| Handle { shared })
    }
}

/// Per-thread event loop: owns a [`Reactor`], a [`TimerWheel`], the shared
/// task queue, and the observer list fired at loop exit.
pub struct EventLoop {
    reactor: Box<dyn Reactor>,
    timers: TimerWheel,
    shared: Arc<Shared>,
    observers: Vec<(ObserverToken, Box<dyn FnMut()>)>,
    next_observer_token: usize,
    epoch: Instant,
    config: EventLoopConfig,
}

impl EventLoop {
    /// Binds a reactor, captures the owning OS thread id, and installs the
    /// cross-thread notifier, folded into this fallible constructor per
    /// Rust convention rather than a separate `bool`-returning step.
    pub fn new() -> Result<Self> {
        Self::with_config(EventLoopConfig::default())
    }

    pub fn with_config(config: EventLoopConfig) -> Result<Self> {
        let reactor = create_reactor()?;
        let notifier = reactor.notifier();
        Ok(Self {
            reactor,
            timers: TimerWheel::new(),
            shared: Arc::new(Shared {
                tasks: SegQueue::new(),
                notifier,
                stop: AtomicBool::new(false),
                owner: std::thread::current().id(),
            }),
            observers: Vec::new(),
            next_observer_token: 0,
            epoch: Instant::now(),
            config,
        })
    }

    /// Idempotent; construction in [`EventLoop::new`] already performs the
    /// one-time binding this describes.
    #[must_use]
    pub fn init(&mut self) -> bool {
        true
    }

    #[must_use]
    pub fn handle(&self) -> Handle {
        Handle {
            shared: self.shared.clone(),
        }
    }

    fn assert_owner_thread(&self) {
        debug_assert_eq!(
            std::thread::current().id(),
            self.shared.owner,
            "EventLoop I/O and timer registration must happen on the owning thread"
        );
    }

    /// Current loop tick in milliseconds since this loop was constructed,
    /// fed to the [`TimerWheel`].
    #[must_use]
    pub fn now_tick(&self) -> Tick {
        self.epoch.elapsed().as_millis() as Tick
    }

    pub fn register_fd(&mut self, fd: crate::reactor::RawFd, interest: Interest) -> Result<Token> {
        self.assert_owner_thread();
        self.reactor.register(fd, interest)
    }

    pub fn update_fd(&mut self, token: Token, interest: Interest) -> Result<()> {
        self.assert_owner_thread();
        self.reactor.update(token, interest)
    }

    /// Always synchronous: the reactor is only ever touched on
    /// the owner thread, so there is no cross-thread marshaling to do here.
    pub fn unregister_fd(&mut self, token: Token) -> Result<()> {
        self.assert_owner_thread();
        self.reactor.unregister(token)
    }

    #[must_use]
    pub fn timer_manager(&mut self) -> &mut TimerWheel {
        &mut self.timers
    }

    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.handle().post(task);
    }

    pub fn sync(&self, task: impl FnOnce() + Send + 'static) {
        self.handle().sync(task);
    }

    pub fn stop(&self) {
        self.handle().stop();
    }

    #[must_use]
    pub fn append_observer(&mut self, cb: impl FnMut() + 'static) -> ObserverToken {
        let token = ObserverToken(self.next_observer_token);
        self.next_observer_token += 1;
        self.observers.push((token, Box::new(cb)));
        token
    }

    pub fn cancel_observer(&mut self, token: ObserverToken) {
        self.observers.retain(|(t, _)| *t != token);
    }

    /// [`EventLoop::run`] using this loop's configured
    /// [`EventLoopConfig::default_max_wait_ms`] instead of an explicit
    /// per-call timeout.
    pub fn run_default(&mut self) -> Result<()> {
        let max_wait_ms = self.config.default_max_wait_ms;
        self.run(max_wait_ms)
    }

    fn drain_tasks(&mut self) {
        while let Some(task) = self.shared.tasks.pop() {
            task();
        }
    }

    fn advance_timers(&mut self) -> Option<u64> {
        let (count, hint) = self.timers.check_expire(self.now_tick());
        if count > 0 {
            trace!(count, "timer wheel fired");
        }
        hint
    }

    /// A single iteration: drain the task queue, advance timers, then
    /// `wait` on the reactor.
    pub fn loop_once(&mut self, max_wait_ms: Option<u64>) -> Result<()> {
        self.drain_tasks();
        let timer_hint = self.advance_timers();
        let wait_ms = match (max_wait_ms, timer_hint) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, hint) => hint,
        };
        self.reactor.wait(wait_ms, &mut |_token, _readiness| {})
    }

    /// Runs until [`Handle::stop`] has been called and the task queue is
    /// empty; then fires every observer in registration order and clears
    /// the observer list.
    pub fn run(&mut self, max_wait_ms: Option<u64>) -> Result<()> {
        loop {
            self.drain_tasks();
            let timer_hint = self.advance_timers();
            if self.shared.stop.load(Ordering::SeqCst) && self.shared.tasks.is_empty() {
                break;
            }
            let wait_ms = match (max_wait_ms, timer_hint) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (Some(a), None) => Some(a),
                (None, hint) => hint,
            };
            let mut reactor = std::mem::replace(&mut self.reactor, NullReactor::boxed());
            let wait_result = reactor.wait(wait_ms, &mut |_token, _readiness| {});
            self.reactor = reactor;
            wait_result?;
        }
        for (_, mut cb) in self.observers.drain(..) {
            cb();
        }
        Ok(())
    }

    /// Runs [`EventLoop::loop_once`] with a dispatch callback invoked for
    /// every ready I/O registration, for callers (e.g. the HTTP/2 connection
    /// driver) that need to react to readiness themselves rather than
    /// registering per-fd callbacks inside the reactor.
    pub fn loop_once_with(
        &mut self,
        max_wait_ms: Option<u64>,
        on_ready: &mut dyn FnMut(Token, Readiness),
    ) -> Result<()> {
        self.drain_tasks();
        let timer_hint = self.advance_timers();
        let wait_ms = match (max_wait_ms, timer_hint) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, hint) => hint,
        };
        self.reactor.wait(wait_ms, on_ready)
    }
}

/// Placeholder reactor swapped in momentarily while `wait` borrows the real
/// one out of `self` (needed because `Reactor::wait` takes `&mut self` and
/// we cannot hold `&mut self.reactor` and `&mut self` simultaneously across
/// the call). Never actually polled.
#[derive(Debug)]
struct NullReactor;

impl NullReactor {
    fn boxed() -> Box<dyn Reactor> {
        Box::new(Self)
    }
}

impl Reactor for NullReactor {
    fn poll_type(&self) -> crate::reactor::PollType {
        crate::reactor::PollType::LevelTriggered
    }
    fn register(&mut self, _fd: crate::reactor::RawFd, _interest: Interest) -> Result<Token> {
        Err(Error::new(ErrorKind::InvalidState))
    }
    fn update(&mut self, _token: Token, _interest: Interest) -> Result<()> {
        Err(Error::new(ErrorKind::InvalidState))
    }
    fn unregister(&mut self, _token: Token) -> Result<()> {
        Err(Error::new(ErrorKind::InvalidState))
    }
    fn wait(&mut self, _max_ms: Option<u64>, _on_ready: &mut dyn FnMut(Token, Readiness)) -> Result<()> {
        Ok(())
    }
    fn notifier(&self) -> Box<dyn Notifier> {
        struct NullNotifier;
        impl Notifier for NullNotifier {
            fn notify(&self) {}
        }
        Box::new(NullNotifier)
    }
}

/// Convenience re-export so callers threading a timer through an event loop
/// don't need to import [`crate::timer::TimerHandle`] separately.
pub use crate::timer::TimerHandle as Timer;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn post_from_loop_thread_runs_on_next_drain() {
        let mut lp = EventLoop::new().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        lp.post(move || ran2.store(true, Ordering::SeqCst));
        lp.loop_once(Some(0)).unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn post_from_another_thread_is_drained_by_owner() {
        let mut lp = EventLoop::new().unwrap();
        let handle = lp.handle();
        let counter = Arc::new(AtomicI32::new(0));
        let counter2 = counter.clone();
        let worker = std::thread::spawn(move || {
            handle.post(move || {
                counter2.fetch_add(1, Ordering::SeqCst);
            });
        });
        worker.join().unwrap();
        // give the posting thread's task a chance to land before draining.
        lp.loop_once(Some(50)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sync_from_another_thread_blocks_until_run() {
        let mut lp = EventLoop::new().unwrap();
        let handle = lp.handle();
        let flag = Arc::new(AtomicBool::new(false));
        let flag2 = flag.clone();
        let worker = std::thread::spawn(move || {
            handle.sync(move || flag2.store(true, Ordering::SeqCst));
        });
        // the owner thread must service the queue for `sync` to return.
        while !worker.is_finished() {
            lp.loop_once(Some(5)).unwrap();
        }
        worker.join().unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_and_empty_queue_ends_run() {
        let mut lp = EventLoop::new().unwrap();
        let handle = lp.handle();
        handle.stop();
        lp.run(Some(10)).unwrap();
    }

    #[test]
    fn observers_fire_in_registration_order_on_exit() {
        let mut lp = EventLoop::new().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        lp.append_observer(move || o1.lock().push(1));
        lp.append_observer(move || o2.lock().push(2));
        lp.stop();
        lp.run(Some(10)).unwrap();
        assert_eq!(*order.lock(), vec![1, 2]);
        assert!(lp.observers.is_empty());
    }

    #[test]
    fn cancelled_observer_does_not_fire() {
        let mut lp = EventLoop::new().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let token = lp.append_observer(move || fired2.store(true, Ordering::SeqCst));
        lp.cancel_observer(token);
        lp.stop();
        lp.run(Some(10)).unwrap();
        assert!(!fired.load(Ordering::SeqCst));
    }
}
