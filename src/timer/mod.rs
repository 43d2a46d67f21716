//! Four-level cascading hashed timer wheel.
//!
//! 256 slots per level, four levels (`TV_COUNT = 4`, `TIMER_VECTOR_BITS =
//! 8`), a node re-bucketed into a coarser level as its deadline recedes and
//! cascaded back down into level 0 as the wheel's tick counter reaches it.
//! This wheel is only ever driven from the thread that owns its
//! [`crate::event_loop::EventLoop`], so there is no cross-thread mutex
//! around node state; a node is removed from the wheel before its callback
//! runs, which is what makes a callback cancelling its own handle during
//! execution a harmless no-op rather than requiring a separate
//! `running_node` lock dance to guard against use-after-free.

use slab::Slab;

use crate::error::{Error, ErrorKind, Result};

const VECTOR_BITS: u32 = 8;
const VECTOR_SIZE: usize = 1 << VECTOR_BITS;
const VECTOR_MASK: u64 = (VECTOR_SIZE as u64) - 1;
const TV_COUNT: usize = 4;

/// A monotonic millisecond tick counter. The wheel does not read the clock
/// itself; callers drive it by passing the current tick into
/// [`TimerWheel::check_expire`].
pub type Tick = u64;

/// An opaque handle to a scheduled timer, returned by [`TimerWheel::schedule`]
/// and passed back to [`TimerWheel::unschedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(usize);

struct Node {
    elapse_ms: u32,
    start_tick: Tick,
    repeat: bool,
    slot: Option<(usize, usize)>,
    callback: Box<dyn FnMut() -> bool>,
}

/// A cascading hashed timer wheel.
///
/// `last_tick` is intentionally left unseeded by [`TimerWheel::new`]: it is
/// only snapshotted on the first call to `schedule` that finds the wheel
/// empty, so a wheel that is constructed long before its owning loop starts
/// ticking does not under-report the elapsed time for its first timer.
pub struct TimerWheel {
    tv: [Vec<Vec<usize>>; TV_COUNT],
    nodes: Slab<Node>,
    last_tick: Option<Tick>,
    timer_count: usize,
}

impl std::fmt::Debug for TimerWheel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerWheel")
            .field("timer_count", &self.timer_count)
            .field("last_tick", &self.last_tick)
            .finish()
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerWheel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tv: std::array::from_fn(|_| (0..VECTOR_SIZE).map(|_| Vec::new()).collect()),
            nodes: Slab::new(),
            last_tick: None,
            timer_count: 0,
        }
    }

    /// Number of timers currently pending.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timer_count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timer_count == 0
    }

    /// Schedule `callback` to run `elapse_ms` after `now_tick`. If `repeat`
    /// is true, a callback that returns `true` is automatically rescheduled
    /// for another `elapse_ms` after it fires; returning `false` cancels the
    /// repeat. `elapse_ms` must fit in the wheel's four levels
    /// (`u32::MAX` ms, roughly 49 days); larger values are rejected.
    pub fn schedule(
        &mut self,
        now_tick: Tick,
        elapse_ms: u32,
        repeat: bool,
        callback: impl FnMut() -> bool + 'static,
    ) -> Result<TimerHandle> {
        if self.timer_count == 0 {
            self.last_tick = Some(now_tick);
        }
        let key = self.nodes.insert(Node {
            elapse_ms,
            start_tick: now_tick,
            repeat,
            slot: None,
            callback: Box::new(callback),
        });
        match self.add_node(key) {
            Ok(()) => {
                self.timer_count += 1;
                Ok(TimerHandle(key))
            }
            Err(e) => {
                self.nodes.remove(key);
                Err(e)
            }
        }
    }

    /// Cancel a pending timer. Unschedule is idempotent: cancelling a
    /// handle that already fired (and was not a repeat) or was already
    /// cancelled is a no-op.
    pub fn unschedule(&mut self, handle: TimerHandle) {
        if let Some(node) = self.nodes.get(handle.0) {
            if let Some((tv_idx, tl_idx)) = node.slot {
                self.tv[tv_idx][tl_idx].retain(|&k| k != handle.0);
                self.timer_count -= 1;
            }
            self.nodes.remove(handle.0);
        }
    }

    fn add_node(&mut self, key: usize) -> Result<()> {
        let last_tick = self.last_tick.expect("seeded by schedule before add_node is reachable");
        let node = &self.nodes[key];
        let mut fire_tick = node.start_tick.wrapping_add(u64::from(node.elapse_ms));
        if fire_tick.wrapping_sub(last_tick) > (u64::MAX >> 1) {
            // the deadline lies in the past relative to the wheel's clock;
            // fire it on the very next tick instead of wrapping around.
            fire_tick = last_tick;
        }
        if fire_tick == last_tick {
            fire_tick = fire_tick.wrapping_add(1);
        }
        let elapse_jiffies = fire_tick.wrapping_sub(last_tick);
        let (tv_idx, tl_idx) = if elapse_jiffies < VECTOR_SIZE as u64 {
            (0, (fire_tick & VECTOR_MASK) as usize)
        } else if elapse_jiffies < 1 << (2 * VECTOR_BITS) {
            (1, ((fire_tick >> VECTOR_BITS) & VECTOR_MASK) as usize)
        } else if elapse_jiffies < 1 << (3 * VECTOR_BITS) {
            (2, ((fire_tick >> (2 * VECTOR_BITS)) & VECTOR_MASK) as usize)
        } else if elapse_jiffies <= u64::from(u32::MAX) {
            (3, ((fire_tick >> (3 * VECTOR_BITS)) & VECTOR_MASK) as usize)
        } else {
            return Err(Error::new(ErrorKind::InvalidParam));
        };
        self.tv[tv_idx][tl_idx].push(key);
        self.nodes[key].slot = Some((tv_idx, tl_idx));
        Ok(())
    }

    fn cascade(&mut self, tv_idx: usize, tl_idx: usize) -> usize {
        let keys = std::mem::take(&mut self.tv[tv_idx][tl_idx]);
        for key in keys {
            self.nodes[key].slot = None;
            // re-bucketing does not change timer_count; ignore failure,
            // a node already validated at `schedule` time cannot overflow
            // a coarser level than the one it started in.
            let _ = self.add_node(key);
        }
        tl_idx
    }

    /// Advance the wheel to `now_tick`, firing every timer whose deadline
    /// has passed. Returns the number of callbacks invoked and a hint for
    /// how many milliseconds until the next scheduled fire (`None` if the
    /// wheel is now empty), the way an event loop's `wait()` timeout is
    /// derived. A no-op (and cheap) when the wheel holds no timers or
    /// `now_tick` has not moved since the last call.
    pub fn check_expire(&mut self, now_tick: Tick) -> (usize, Option<u64>) {
        if self.timer_count == 0 {
            return (0, None);
        }
        let Some(last_tick) = self.last_tick else {
            return (0, None);
        };
        if now_tick <= last_tick {
            return (0, self.next_fire_hint(last_tick));
        }
        let mut next_jiffies = last_tick.wrapping_add(1);
        self.last_tick = Some(now_tick);

        let mut due = Vec::new();
        while now_tick >= next_jiffies {
            let idx = (next_jiffies & VECTOR_MASK) as usize;
            if idx == 0 {
                let idx1 = ((next_jiffies >> VECTOR_BITS) & VECTOR_MASK) as usize;
                if self.cascade(1, idx1) == 0 {
                    let idx2 = ((next_jiffies >> (2 * VECTOR_BITS)) & VECTOR_MASK) as usize;
                    if self.cascade(2, idx2) == 0 {
                        let idx3 = ((next_jiffies >> (3 * VECTOR_BITS)) & VECTOR_MASK) as usize;
                        self.cascade(3, idx3);
                    }
                }
            }
            due.append(&mut self.tv[0][idx]);
            next_jiffies = next_jiffies.wrapping_add(1);
        }

        let mut count = 0;
        for key in due {
            if !self.nodes.contains(key) {
                continue;
            }
            self.nodes[key].slot = None;
            self.timer_count -= 1;
            let repeat = self.nodes[key].repeat;
            let keep_going = (self.nodes[key].callback)();
            count += 1;
            if repeat && keep_going && self.nodes.contains(key) {
                self.nodes[key].start_tick = now_tick;
                self.timer_count += 1;
                let _ = self.add_node(key);
            } else {
                self.nodes.remove(key);
            }
        }
        let hint = self.next_fire_hint(next_jiffies.wrapping_sub(1));
        (count, hint)
    }

    /// Nearest non-empty level-0 slot, scanned linearly rather than via a
    /// maintained find-first-set bitmap; `None` if no timer fires within
    /// one full level-0 sweep.
    fn next_fire_hint(&self, from_tick: Tick) -> Option<u64> {
        if self.timer_count == 0 {
            return None;
        }
        for offset in 0..VECTOR_SIZE as u64 {
            let idx = ((from_tick.wrapping_add(offset + 1)) & VECTOR_MASK) as usize;
            if !self.tv[0][idx].is_empty() {
                return Some(offset + 1);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn fires_after_elapsed_ticks() {
        let mut wheel = TimerWheel::new();
        let fired = Rc::new(RefCell::new(false));
        let fired2 = fired.clone();
        wheel
            .schedule(0, 10, false, move || {
                *fired2.borrow_mut() = true;
                false
            })
            .unwrap();
        assert_eq!(wheel.check_expire(5).0, 0);
        assert!(!*fired.borrow());
        assert_eq!(wheel.check_expire(10).0, 1);
        assert!(*fired.borrow());
        assert!(wheel.is_empty());
    }

    #[test]
    fn unschedule_before_fire_prevents_callback() {
        let mut wheel = TimerWheel::new();
        let fired = Rc::new(RefCell::new(false));
        let fired2 = fired.clone();
        let handle = wheel.schedule(0, 10, false, move || {
            *fired2.borrow_mut() = true;
            false
        }).unwrap();
        wheel.unschedule(handle);
        assert_eq!(wheel.check_expire(10).0, 0);
        assert!(!*fired.borrow());
    }

    #[test]
    fn repeat_reschedules_itself() {
        let mut wheel = TimerWheel::new();
        let count = Rc::new(RefCell::new(0));
        let count2 = count.clone();
        wheel
            .schedule(0, 5, true, move || {
                *count2.borrow_mut() += 1;
                *count2.borrow() < 3
            })
            .unwrap();
        let mut tick = 0;
        let mut total = 0;
        for _ in 0..20 {
            tick += 5;
            total += wheel.check_expire(tick).0;
        }
        assert_eq!(*count.borrow(), 3);
        assert_eq!(total, 3);
    }

    #[test]
    fn cascades_from_coarser_level() {
        let mut wheel = TimerWheel::new();
        let fired = Rc::new(RefCell::new(false));
        let fired2 = fired.clone();
        // elapse beyond one level-0 sweep forces this into tv[1].
        wheel
            .schedule(0, 1000, false, move || {
                *fired2.borrow_mut() = true;
                false
            })
            .unwrap();
        for tick in (0..=1000).step_by(50) {
            wheel.check_expire(tick);
        }
        wheel.check_expire(1000);
        assert!(*fired.borrow());
    }

    #[test]
    fn empty_wheel_does_not_seed_last_tick_until_first_schedule() {
        let wheel = TimerWheel::new();
        assert!(wheel.is_empty());
        // constructing the wheel long before the loop ticks must not make
        // the first real timer appear to have already elapsed.
        let mut wheel = wheel;
        let fired = Rc::new(RefCell::new(false));
        let fired2 = fired.clone();
        wheel
            .schedule(1_000_000, 10, false, move || {
                *fired2.borrow_mut() = true;
                false
            })
            .unwrap();
        assert_eq!(wheel.check_expire(1_000_005).0, 0);
        assert!(!*fired.borrow());
        assert_eq!(wheel.check_expire(1_000_010).0, 1);
        assert!(*fired.borrow());
    }
}
