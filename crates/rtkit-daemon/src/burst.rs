//! Per-user burst limiter.
//!
//! Approximate sliding window: each user has a window start and a count.
//! A request after the window has elapsed starts a new window and is
//! allowed without being counted; inside the window up to
//! `BURST_MAX_ACTIONS` further requests are allowed. With the fixed
//! constants that is 26 allowed requests per window, the 27th is denied.
//!
//! Denials do not touch the state. State is in memory only.

use std::collections::HashMap;
use std::time::Instant;

use rtkit_core::identity::Uid;

/// Window length, in clock units (seconds for the default clock)
pub const BURST_INTERVAL: u64 = 20;

/// Counted requests allowed per window
pub const BURST_MAX_ACTIONS: u32 = 25;

/// Tracked users above which expired windows are pruned
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy, Default)]
struct BurstState {
    count: u32,
    /// `None` until the user's first request
    window_start: Option<u64>,
}

pub struct BurstLimiter {
    states: HashMap<Uid, BurstState>,
    clock: Box<dyn Fn() -> u64>,
    /// Prunes run at most once per `BURST_INTERVAL`
    last_prune: Option<u64>,
}

impl Default for BurstLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl BurstLimiter {
    /// Limiter on a monotonic clock counting whole seconds.
    pub fn new() -> Self {
        let origin = Instant::now();
        Self::with_clock(move || origin.elapsed().as_secs())
    }

    pub fn with_clock(clock: impl Fn() -> u64 + 'static) -> Self {
        Self {
            states: HashMap::new(),
            clock: Box::new(clock),
            last_prune: None,
        }
    }

    /// Record one elevation attempt by `uid`; false when over the limit.
    pub fn allow(&mut self, uid: Uid) -> bool {
        let now = (self.clock)();
        self.allow_at(uid, now)
    }

    pub fn allow_at(&mut self, uid: Uid, now: u64) -> bool {
        let prune_due = self
            .last_prune
            .map_or(true, |last| now >= last.saturating_add(BURST_INTERVAL));
        if prune_due && self.states.len() > PRUNE_THRESHOLD {
            self.prune(now);
        }

        let state = self.states.entry(uid).or_default();
        let expired = match state.window_start {
            None => true,
            Some(start) => now > start.saturating_add(BURST_INTERVAL),
        };

        if expired {
            state.count = 0;
            state.window_start = Some(now);
            return true;
        }
        if state.count >= BURST_MAX_ACTIONS {
            tracing::debug!(uid, count = state.count, "burst limit reached");
            return false;
        }
        state.count += 1;
        true
    }

    /// Number of users with burst state
    pub fn tracked_users(&self) -> usize {
        self.states.len()
    }

    /// Drop users whose window has elapsed; their next request resets anyway.
    fn prune(&mut self, now: u64) {
        self.last_prune = Some(now);
        let before = self.states.len();
        self.states.retain(|_, s| {
            s.window_start
                .is_some_and(|start| now <= start.saturating_add(BURST_INTERVAL))
        });
        tracing::debug!(removed = before - self.states.len(), "pruned burst state");
    }
}

impl std::fmt::Debug for BurstLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BurstLimiter")
            .field("tracked_users", &self.states.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_twenty_seventh_request_denied() {
        let mut b = BurstLimiter::with_clock(|| 0);
        for i in 0..26 {
            assert!(b.allow_at(1000, 100), "request {} should pass", i + 1);
        }
        assert!(!b.allow_at(1000, 100));
        assert!(!b.allow_at(1000, 120));
    }

    #[test]
    fn test_window_elapses() {
        let mut b = BurstLimiter::with_clock(|| 0);
        for _ in 0..26 {
            b.allow_at(7, 50);
        }
        assert!(!b.allow_at(7, 70));
        // now > start + interval: new window
        assert!(b.allow_at(7, 71));
        for _ in 0..25 {
            assert!(b.allow_at(7, 72));
        }
        assert!(!b.allow_at(7, 72));
    }

    #[test]
    fn test_users_are_independent() {
        let mut b = BurstLimiter::with_clock(|| 0);
        for _ in 0..27 {
            b.allow_at(1, 0);
        }
        assert!(!b.allow_at(1, 0));
        assert!(b.allow_at(2, 0));
        assert_eq!(b.tracked_users(), 2);
    }

    #[test]
    fn test_injected_clock() {
        let now = Rc::new(Cell::new(1_000u64));
        let clock = Rc::clone(&now);
        let mut b = BurstLimiter::with_clock(move || clock.get());

        for _ in 0..26 {
            assert!(b.allow(5));
        }
        assert!(!b.allow(5));
        now.set(1_021);
        assert!(b.allow(5));
    }

    #[test]
    fn test_prune_drops_expired_users() {
        let mut b = BurstLimiter::with_clock(|| 0);
        for uid in 0..=PRUNE_THRESHOLD as Uid {
            b.allow_at(uid, 0);
        }
        assert_eq!(b.tracked_users(), PRUNE_THRESHOLD + 1);
        b.allow_at(99_999, 1_000);
        assert_eq!(b.tracked_users(), 1);
    }

    #[test]
    fn test_prune_runs_once_per_interval() {
        let mut b = BurstLimiter::with_clock(|| 0);
        let base = PRUNE_THRESHOLD as Uid;
        for uid in 0..=base {
            b.allow_at(uid, 0);
        }

        // Everyone still inside the window: prunes, removes nothing
        b.allow_at(base + 1, 10);
        assert_eq!(b.tracked_users(), PRUNE_THRESHOLD + 2);

        // The first batch has expired, but the last prune was too recent
        b.allow_at(base + 2, 21);
        assert_eq!(b.tracked_users(), PRUNE_THRESHOLD + 3);

        // Interval since the last prune has passed
        b.allow_at(base + 3, 30);
        assert_eq!(b.tracked_users(), 3);
    }
}
