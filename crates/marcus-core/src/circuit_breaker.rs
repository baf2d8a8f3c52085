//! Per-endpoint circuit breaker for `KanbanProvider` writes.
//!
//! After 5 consecutive failures the breaker opens for 60 s; while open,
//! callers fail fast with `MarcusError::KanbanUnavailable` instead of
//! hitting the remote, and the Scheduler returns `no_task` with retry=60.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const FAILURE_THRESHOLD: u32 = 5;
const OPEN_DURATION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
enum State {
    Closed { consecutive_failures: u32 },
    Open { opened_at: Instant },
}

/// Tracks breaker state per provider endpoint name (e.g. the provider's
/// `name()`).
pub struct CircuitBreaker {
    states: Mutex<HashMap<String, State>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Whether calls to `endpoint` should fail fast right now.
    pub fn is_open(&self, endpoint: &str) -> bool {
        let mut states = self.states.lock().unwrap();
        match states.get(endpoint) {
            Some(State::Open { opened_at }) => {
                if opened_at.elapsed() >= OPEN_DURATION {
                    states.insert(endpoint.to_string(), State::Closed { consecutive_failures: 0 });
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }

    /// Record a successful call, resetting the failure count.
    pub fn record_success(&self, endpoint: &str) {
        let mut states = self.states.lock().unwrap();
        states.insert(endpoint.to_string(), State::Closed { consecutive_failures: 0 });
    }

    /// Record a failed call. Opens the breaker once 5 consecutive failures
    /// accumulate.
    pub fn record_failure(&self, endpoint: &str) {
        let mut states = self.states.lock().unwrap();
        let next = match states.get(endpoint) {
            Some(State::Closed { consecutive_failures }) => consecutive_failures + 1,
            _ => 1,
        };
        if next >= FAILURE_THRESHOLD {
            states.insert(endpoint.to_string(), State::Open { opened_at: Instant::now() });
        } else {
            states.insert(endpoint.to_string(), State::Closed { consecutive_failures: next });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_by_default() {
        let cb = CircuitBreaker::new();
        assert!(!cb.is_open("github"));
    }

    #[test]
    fn opens_after_five_consecutive_failures() {
        let cb = CircuitBreaker::new();
        for _ in 0..4 {
            cb.record_failure("github");
            assert!(!cb.is_open("github"));
        }
        cb.record_failure("github");
        assert!(cb.is_open("github"));
    }

    #[test]
    fn success_resets_failure_count() {
        let cb = CircuitBreaker::new();
        for _ in 0..4 {
            cb.record_failure("github");
        }
        cb.record_success("github");
        cb.record_failure("github");
        assert!(!cb.is_open("github"));
    }

    #[test]
    fn separate_endpoints_are_independent() {
        let cb = CircuitBreaker::new();
        for _ in 0..5 {
            cb.record_failure("github");
        }
        assert!(cb.is_open("github"));
        assert!(!cb.is_open("linear"));
    }
}
