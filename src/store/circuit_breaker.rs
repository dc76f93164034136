//! Per-process circuit breaker guarding the Match Store (SPEC_FULL §2: the
//! Command Router's retry loop is generalized, in the teacher's
//! `service::communication::circuit_breaker` idiom, to short-circuit once
//! the store is consistently timing out rather than retrying forever).
//! Trimmed to what the Command Router needs: a single shared breaker (one
//! Postgres instance backs every match), no per-caller stats API.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    opened_at_epoch_secs: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            state: AtomicU8::new(State::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            opened_at_epoch_secs: AtomicU64::new(0),
        }
    }

    /// Whether a store call should be attempted right now.
    pub fn allow(&self) -> bool {
        match self.load_state() {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                if now_secs() - self.opened_at_epoch_secs.load(Ordering::SeqCst) >= self.recovery_timeout.as_secs() {
                    self.state.store(State::HalfOpen as u8, Ordering::SeqCst);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.state.store(State::Closed as u8, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            self.opened_at_epoch_secs.store(now_secs(), Ordering::SeqCst);
            self.state.store(State::Open as u8, Ordering::SeqCst);
        }
    }

    fn load_state(&self) -> State {
        match self.state.load(Ordering::SeqCst) {
            1 => State::Open,
            2 => State::HalfOpen,
            _ => State::Closed,
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.allow());
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.allow());
        breaker.record_failure();
        assert!(!breaker.allow());
    }

    #[test]
    fn success_resets_the_failure_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(breaker.allow());
    }
}
