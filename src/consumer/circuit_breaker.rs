//! Per-family circuit breaker.
//!
//! Same three-state vocabulary as the graph module's edge breaker and
//! the teacher's session state machine: CLOSED/OPEN/HALF_OPEN. A 50%
//! failure rate over a 10-event sliding window opens the breaker for
//! 30s; in half-open, 3 probes decide whether it closes or reopens.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const WINDOW_SIZE: usize = 10;
const FAILURE_RATE_THRESHOLD: f64 = 0.5;
const OPEN_DURATION: Duration = Duration::from_secs(30);
const HALF_OPEN_PROBES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    recent: VecDeque<bool>,
    state: BreakerState,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    half_open_failures: u32,
}

impl Inner {
    fn new() -> Self {
        Self {
            recent: VecDeque::with_capacity(WINDOW_SIZE),
            state: BreakerState::Closed,
            opened_at: None,
            half_open_successes: 0,
            half_open_failures: 0,
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        let failures = self.recent.iter().filter(|ok| !**ok).count();
        failures as f64 / self.recent.len() as f64
    }
}

/// A single family's circuit breaker. Every handler invocation checks
/// `allow_request` first, then reports its outcome via `record_result`.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Whether a request should be dispatched to the handler right now.
    /// While open and the cooldown hasn't elapsed, callers should invoke
    /// the fallback path instead.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                if inner.opened_at.map(|t| t.elapsed() >= OPEN_DURATION).unwrap_or(false) {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.half_open_failures = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_result(&self, success: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.recent.push_back(success);
                if inner.recent.len() > WINDOW_SIZE {
                    inner.recent.pop_front();
                }
                if inner.recent.len() == WINDOW_SIZE && inner.failure_rate() >= FAILURE_RATE_THRESHOLD {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                if success {
                    inner.half_open_successes += 1;
                } else {
                    inner.half_open_failures += 1;
                }
                if inner.half_open_failures > 0 {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                } else if inner.half_open_successes >= HALF_OPEN_PROBES {
                    inner.state = BreakerState::Closed;
                    inner.recent.clear();
                }
            }
            BreakerState::Open => {
                // Results arriving while open (e.g. a race with the
                // cooldown) are ignored; `allow_request` gates entry.
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_failure_rate_threshold() {
        let breaker = CircuitBreaker::new();
        for _ in 0..5 {
            breaker.record_result(true);
        }
        for _ in 0..5 {
            breaker.record_result(false);
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn stays_closed_under_threshold() {
        let breaker = CircuitBreaker::new();
        for _ in 0..8 {
            breaker.record_result(true);
        }
        for _ in 0..2 {
            breaker.record_result(false);
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_closes_after_three_clean_probes() {
        let breaker = CircuitBreaker::new();
        for _ in 0..10 {
            breaker.record_result(false);
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        {
            let mut inner = breaker.inner.lock();
            inner.opened_at = Some(Instant::now() - Duration::from_secs(31));
        }
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_result(true);
        breaker.record_result(true);
        breaker.record_result(true);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_reopens_on_any_failure() {
        let breaker = CircuitBreaker::new();
        for _ in 0..10 {
            breaker.record_result(false);
        }
        {
            let mut inner = breaker.inner.lock();
            inner.opened_at = Some(Instant::now() - Duration::from_secs(31));
        }
        breaker.allow_request();
        breaker.record_result(true);
        breaker.record_result(false);
        assert_eq!(breaker.state(), BreakerState::Open);
    }
}
