//! `AssignmentStore` -- the atomic core of the coordination kernel.
//!
//! Owns the lease lifecycle (try-claim/release/renew/list-expired) on top
//! of `marcus_db::queries::leases`. SQL-level atomicity comes from the
//! partial-unique-index `ON CONFLICT DO NOTHING` in
//! `marcus_db::queries::leases::try_insert_lease`; this module adds the
//! per-project serialization described in the concurrency model so that no
//! two agents ever observe the same task as assignable at once, and the
//! capacity check (agent already holding `capacity` live leases) is
//! consistent with the claim itself.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use marcus_db::models::{Lease, ReleaseReason};
use marcus_db::queries::leases;
use sqlx::PgPool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{MarcusError, Result};

const MIN_LEASE: Duration = Duration::minutes(30);
const MAX_LEASE: Duration = Duration::hours(24);

/// Compute lease duration from a task's estimated hours: `max(hours * 2,
/// 30 min)`, capped at 24 h.
pub fn lease_duration(estimated_hours: f64) -> Duration {
    let wanted = Duration::seconds((estimated_hours * 2.0 * 3600.0) as i64);
    wanted.clamp(MIN_LEASE, MAX_LEASE)
}

/// Outcome of a `try_claim` call.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed(Lease),
    Conflict,
    AgentAtCapacity,
}

/// Durable (agent -> task) lease store with per-project write
/// serialization.
///
/// Tasks in different projects never interfere: each project gets its own
/// `tokio::sync::Mutex`, created lazily on first use.
pub struct AssignmentStore {
    pool: PgPool,
    project_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl AssignmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            project_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, project_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.project_locks.lock().await;
        locks
            .entry(project_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Attempt to claim `task_id` for `agent_id`. Succeeds iff no live
    /// lease exists for the task and the agent is under capacity.
    ///
    /// The caller (Scheduler) is responsible for calling
    /// `KanbanProvider::assign_task` afterward and rolling back via
    /// `release` on failure.
    pub async fn try_claim(
        &self,
        project_id: Uuid,
        task_id: Uuid,
        agent_id: &str,
        capacity: i32,
        estimated_hours: f64,
    ) -> Result<ClaimOutcome> {
        let project_lock = self.lock_for(project_id).await;
        let _guard = project_lock.lock().await;

        let live_count = leases::count_live_leases_for_agent(&self.pool, agent_id)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))?;
        if live_count >= capacity as i64 {
            return Ok(ClaimOutcome::AgentAtCapacity);
        }

        let expires_at = Utc::now() + lease_duration(estimated_hours);
        let lease = leases::try_insert_lease(&self.pool, project_id, task_id, agent_id, expires_at)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))?;

        match lease {
            Some(lease) => Ok(ClaimOutcome::Claimed(lease)),
            None => Ok(ClaimOutcome::Conflict),
        }
    }

    /// Release the live lease on `task_id`, if any. Idempotent.
    pub async fn release(&self, task_id: Uuid, reason: ReleaseReason) -> Result<bool> {
        leases::release_lease(&self.pool, task_id, reason)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))
    }

    /// Renew the live lease's expiry. Only succeeds if `agent_id` holds
    /// the lease.
    pub async fn renew(
        &self,
        task_id: Uuid,
        agent_id: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<bool> {
        leases::renew_lease(&self.pool, task_id, agent_id, new_expiry)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))
    }

    /// All leases whose `expires_at` has passed `now`.
    pub async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Lease>> {
        leases::list_expired(&self.pool, now)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))
    }

    /// All live leases for a project, for the Scheduler's "is this task
    /// leased" filter and RetryPlanner's ETA computation.
    pub async fn list_live_for_project(&self, project_id: Uuid) -> Result<Vec<Lease>> {
        leases::list_live_for_project(&self.pool, project_id)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))
    }

    /// All live leases held by an agent, used by the Scheduler to compute
    /// a min-remaining-lease-time retry when the agent is already at
    /// capacity.
    pub async fn list_live_for_agent(&self, agent_id: &str) -> Result<Vec<Lease>> {
        leases::list_live_for_agent(&self.pool, agent_id)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))
    }

    pub async fn get_live_lease_for_task(&self, task_id: Uuid) -> Result<Option<Lease>> {
        leases::get_live_lease_for_task(&self.pool, task_id)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))
    }

    /// Verify `agent_id` holds the live lease on `task_id`, used before
    /// accepting `report_task_progress`/`log_decision`/`log_artifact`.
    pub async fn assert_owner(&self, task_id: Uuid, agent_id: &str) -> Result<()> {
        let lease = self.get_live_lease_for_task(task_id).await?;
        match lease {
            Some(l) if l.agent_id == agent_id => Ok(()),
            Some(_) | None => Err(MarcusError::NotTaskOwner {
                task_id,
                agent_id: agent_id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_duration_respects_minimum() {
        assert_eq!(lease_duration(0.0), MIN_LEASE);
        assert_eq!(lease_duration(0.1), MIN_LEASE);
    }

    #[test]
    fn lease_duration_scales_with_estimate() {
        assert_eq!(lease_duration(1.0), Duration::hours(2));
        assert_eq!(lease_duration(5.0), Duration::hours(10));
    }

    #[test]
    fn lease_duration_caps_at_24h() {
        assert_eq!(lease_duration(100.0), MAX_LEASE);
    }
}
