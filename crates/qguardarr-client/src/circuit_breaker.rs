//! Three-state circuit breaker protecting the qBittorrent API from overload.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    failure_count: u32,
    opened_at: Option<Instant>,
}

/// Tracks consecutive API failures and trips open after a threshold, closing
/// again only after a successful call made once the recovery timeout elapses.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Build a breaker that opens after `failure_threshold` consecutive
    /// failures and allows a trial request after `recovery_timeout`.
    #[must_use]
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(Inner {
                state: State::Closed,
                failure_count: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a call may currently be attempted. Transitions `Open` to
    /// `HalfOpen` once the recovery timeout has elapsed.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let elapsed = inner.opened_at.is_some_and(|at| at.elapsed() > self.recovery_timeout);
                if elapsed {
                    inner.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call. Closes the breaker if it was half-open.
    pub fn on_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        if inner.state == State::HalfOpen {
            inner.state = State::Closed;
        }
        inner.failure_count = 0;
    }

    /// Record a failed call, tripping the breaker open once the failure
    /// threshold is reached.
    pub fn on_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.failure_count += 1;
        if inner.failure_count >= self.failure_threshold {
            inner.state = State::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    /// Whether the breaker is currently open (for the `/health` endpoint and
    /// the `qbittorrent_circuit_breaker_open` gauge).
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.lock().expect("circuit breaker mutex poisoned").state == State::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.on_failure();
        breaker.on_failure();
        assert!(breaker.can_execute());
        breaker.on_failure();
        assert!(!breaker.can_execute());
        assert!(breaker.is_open());
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.on_failure();
        breaker.on_failure();
        breaker.on_success();
        breaker.on_failure();
        breaker.on_failure();
        assert!(breaker.can_execute());
    }

    #[test]
    fn half_open_allows_a_trial_request_after_recovery_timeout() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(1));
        breaker.on_failure();
        assert!(!breaker.can_execute());
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.can_execute());
    }

    #[test]
    fn half_open_closes_on_success() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(1));
        breaker.on_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.can_execute());
        breaker.on_success();
        assert!(!breaker.is_open());
    }
}
