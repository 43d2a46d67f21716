//! Per-owner (connection or stream) flow-control window accounting.

use tracing::warn;

use crate::error::{Error, ErrorKind, Result};

pub const MAX_WINDOW_SIZE: i64 = (1 << 31) - 1;
pub const DEFAULT_CONNECTION_WINDOW: i64 = 65_535;

/// Local-window low-water mark and refill step.
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdatePolicy {
    pub floor: i64,
    pub step: i64,
}

impl Default for WindowUpdatePolicy {
    fn default() -> Self {
        Self {
            floor: 32_768,
            step: DEFAULT_CONNECTION_WINDOW,
        }
    }
}

/// Tracks the local (how much this endpoint will still accept) and remote
/// (how much this endpoint may still send) windows for one connection or
/// stream.
#[derive(Debug, Clone)]
pub struct FlowControl {
    local_window: i64,
    remote_window: i64,
    policy: WindowUpdatePolicy,
    /// Bytes received since the last emitted WINDOW_UPDATE, pending refill.
    unacked: i64,
}

impl FlowControl {
    #[must_use]
    pub fn new(initial_local: i64, initial_remote: i64, policy: WindowUpdatePolicy) -> Self {
        Self {
            local_window: initial_local,
            remote_window: initial_remote,
            policy,
            unacked: 0,
        }
    }

    #[must_use]
    pub fn local_window(&self) -> i64 {
        self.local_window
    }

    #[must_use]
    pub fn remote_window(&self) -> i64 {
        self.remote_window
    }

    /// Deduct `n` bytes just handed to the socket for send. Saturates at
    /// zero with a warning rather than panicking on an accounting bug
    ///.
    pub fn bytes_sent(&mut self, n: u32) {
        let n = i64::from(n);
        if n > self.remote_window {
            warn!(n, remote_window = self.remote_window, "bytes_sent exceeds remote window, saturating");
            self.remote_window = 0;
        } else {
            self.remote_window -= n;
        }
    }

    /// Account for `n` bytes received from the peer. Returns `Some(delta)`
    /// once the local window has drained past the configured floor and
    /// should be topped back up by `delta` via a WINDOW_UPDATE.
    pub fn bytes_received(&mut self, n: u32) -> Option<u32> {
        let n = i64::from(n);
        self.local_window -= n;
        self.unacked += n;
        if self.local_window < self.policy.floor {
            let delta = self.unacked;
            if delta <= 0 {
                return None;
            }
            self.local_window += delta;
            self.unacked = 0;
            return Some(delta as u32);
        }
        None
    }

    /// Apply a signed delta to the remote window, as happens when
    /// `SETTINGS_INITIAL_WINDOW_SIZE` changes. Returns an error
    /// if the result would overflow the 2^31-1 ceiling.
    pub fn update_remote_window_size(&mut self, delta: i64) -> Result<()> {
        let updated = self.remote_window + delta;
        if updated > MAX_WINDOW_SIZE {
            return Err(Error::new(ErrorKind::ProtoError));
        }
        self.remote_window = updated;
        Ok(())
    }

    /// Apply an incoming WINDOW_UPDATE increment to the remote window.
    /// Returns `FLOW_CONTROL_ERROR` on overflow. Also reports whether this
    /// increment transitioned the window from non-positive to positive.
    pub fn recv_window_update(&mut self, increment: u32) -> Result<bool> {
        let was_non_positive = self.remote_window <= 0;
        let updated = self.remote_window + i64::from(increment);
        if updated > MAX_WINDOW_SIZE {
            return Err(Error::new(ErrorKind::ProtoError));
        }
        self.remote_window = updated;
        Ok(was_non_positive && self.remote_window > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_sent_saturates_at_zero() {
        let mut fc = FlowControl::new(0, 10, WindowUpdatePolicy::default());
        fc.bytes_sent(20);
        assert_eq!(fc.remote_window(), 0);
    }

    #[test]
    fn bytes_received_triggers_refill_below_floor() {
        let mut fc = FlowControl::new(
            65_535,
            0,
            WindowUpdatePolicy {
                floor: 32_768,
                step: 65_535,
            },
        );
        assert_eq!(fc.bytes_received(1_000), None);
        let delta = fc.bytes_received(40_000).unwrap();
        assert_eq!(delta, 41_000);
    }

    #[test]
    fn recv_window_update_overflow_is_flow_control_error() {
        let mut fc = FlowControl::new(0, MAX_WINDOW_SIZE - 1, WindowUpdatePolicy::default());
        let err = fc.recv_window_update(10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtoError);
    }

    #[test]
    fn recv_window_update_reports_zero_to_positive_transition() {
        let mut fc = FlowControl::new(0, 0, WindowUpdatePolicy::default());
        assert!(fc.recv_window_update(100).unwrap());
        // already positive: no transition reported even though it grew.
        assert!(!fc.recv_window_update(50).unwrap());
    }

    #[test]
    fn stream_flow_control_block_unblock_matches_spec_scenario_3() {
        let mut fc = FlowControl::new(0, 65_535, WindowUpdatePolicy::default());
        fc.bytes_sent(65_535);
        assert_eq!(fc.remote_window(), 0);
        assert!(fc.recv_window_update(100).unwrap());
        assert_eq!(fc.remote_window(), 100);
    }
}
