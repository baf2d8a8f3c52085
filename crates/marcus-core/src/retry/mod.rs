//! `RetryPlanner` -- computes how long an agent should sleep before
//! calling `request_next_task` again when nothing was assignable.
//!
//! Pure function over the set of blocking leases, so agents poll
//! intelligently instead of hammering the server.

use chrono::{DateTime, Utc};
use marcus_db::models::Lease;

const MIN_RETRY: i64 = 30;
const MAX_RETRY: i64 = 900;
const NO_BLOCKERS_RETRY: i64 = 900;

/// One blocking task's remaining estimate, as seen by the planner.
#[derive(Debug, Clone, Copy)]
pub struct Blocker {
    pub lease: Option<BlockerLease>,
    pub estimated_hours: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct BlockerLease {
    pub expires_at: DateTime<Utc>,
}

impl Blocker {
    pub fn from_lease(lease: &Lease, estimated_hours: f64) -> Self {
        Self {
            lease: Some(BlockerLease {
                expires_at: lease.expires_at,
            }),
            estimated_hours,
        }
    }
}

/// Compute `retry_after_seconds` for a `no_task` response.
///
/// `blockers` is the set of tasks blocking the candidate set (incomplete
/// dependencies of any TODO task the agent could otherwise do).
/// `unlocks_two_or_more` is true if any blocker's completion would unlock
/// at least 2 parallel-eligible tasks, halving the result.
pub fn compute_retry_after(now: DateTime<Utc>, blockers: &[Blocker], unlocks_two_or_more: bool) -> i64 {
    if blockers.is_empty() {
        return NO_BLOCKERS_RETRY;
    }

    let min_eta = blockers
        .iter()
        .map(|b| eta_seconds(now, b))
        .fold(i64::MAX, i64::min);

    let mut retry = ((0.6 * min_eta as f64).round() as i64).clamp(MIN_RETRY, MAX_RETRY);
    if unlocks_two_or_more {
        retry = (retry / 2).max(MIN_RETRY);
    }
    retry
}

fn eta_seconds(now: DateTime<Utc>, blocker: &Blocker) -> i64 {
    let half_estimate = (0.5 * blocker.estimated_hours * 3600.0) as i64;
    match blocker.lease {
        Some(lease) => {
            let remaining = (lease.expires_at - now).num_seconds().max(0);
            remaining.max(half_estimate)
        }
        None => half_estimate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn blocker(remaining_secs: i64, hours: f64) -> Blocker {
        let now = Utc::now();
        Blocker {
            lease: Some(BlockerLease {
                expires_at: now + Duration::seconds(remaining_secs),
            }),
            estimated_hours: hours,
        }
    }

    #[test]
    fn no_blockers_returns_max_retry() {
        assert_eq!(compute_retry_after(Utc::now(), &[], false), NO_BLOCKERS_RETRY);
    }

    #[test]
    fn retry_scales_with_min_eta() {
        let now = Utc::now();
        let b = blocker(100, 0.0);
        let retry = compute_retry_after(now, &[b], false);
        assert_eq!(retry, (0.6 * 100.0).round() as i64);
    }

    #[test]
    fn retry_clamped_to_minimum() {
        let now = Utc::now();
        let b = blocker(1, 0.0);
        assert_eq!(compute_retry_after(now, &[b], false), MIN_RETRY);
    }

    #[test]
    fn retry_clamped_to_maximum() {
        let now = Utc::now();
        let b = blocker(100_000, 0.0);
        assert_eq!(compute_retry_after(now, &[b], false), MAX_RETRY);
    }

    #[test]
    fn unlocking_two_tasks_halves_retry() {
        let now = Utc::now();
        let b = blocker(1000, 0.0);
        let without_boost = compute_retry_after(now, &[b], false);
        let with_boost = compute_retry_after(now, &[b], true);
        assert_eq!(with_boost, (without_boost / 2).max(MIN_RETRY));
    }

    #[test]
    fn eta_uses_larger_of_lease_remaining_and_half_estimate() {
        let now = Utc::now();
        // Lease remaining is tiny, but estimated_hours implies a longer ETA.
        let b = blocker(1, 10.0);
        let retry = compute_retry_after(now, &[b], false);
        let expected_eta = 0.5 * 10.0 * 3600.0;
        assert_eq!(retry, ((0.6 * expected_eta).round() as i64).clamp(MIN_RETRY, MAX_RETRY));
    }
}
