//! Database query functions for the `leases` table.
//!
//! These are the SQL-level primitives `AssignmentStore::try_claim` builds
//! on; the per-project serialization that makes `try_claim` atomic end to
//! end lives in `marcus-core`, not here. At the SQL layer, atomicity comes
//! from a single `INSERT ... SELECT ... WHERE NOT EXISTS` statement.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Lease, ReleaseReason};

/// Attempt to insert a lease for `task_id`, succeeding only if no live
/// lease already exists for that task. Returns `None` on conflict.
pub async fn try_insert_lease(
    pool: &PgPool,
    project_id: Uuid,
    task_id: Uuid,
    agent_id: &str,
    expires_at: DateTime<Utc>,
) -> Result<Option<Lease>> {
    let lease = sqlx::query_as::<_, Lease>(
        "INSERT INTO leases (project_id, task_id, agent_id, expires_at, generation) \
         SELECT $1, $2, $3, $4, COALESCE(MAX(generation), 0) + 1 \
         FROM leases WHERE task_id = $2 \
         ON CONFLICT (task_id) WHERE released_at IS NULL DO NOTHING \
         RETURNING *",
    )
    .bind(project_id)
    .bind(task_id)
    .bind(agent_id)
    .bind(expires_at)
    .fetch_optional(pool)
    .await
    .context("failed to insert lease")?;

    Ok(lease)
}

/// Count live leases held by an agent, for the capacity check in
/// `AssignmentStore::try_claim`.
pub async fn count_live_leases_for_agent(pool: &PgPool, agent_id: &str) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM leases WHERE agent_id = $1 AND released_at IS NULL",
    )
    .bind(agent_id)
    .fetch_one(pool)
    .await
    .context("failed to count live leases for agent")?;

    Ok(row.0)
}

/// Fetch the live lease (if any) for a task.
pub async fn get_live_lease_for_task(pool: &PgPool, task_id: Uuid) -> Result<Option<Lease>> {
    let lease = sqlx::query_as::<_, Lease>(
        "SELECT * FROM leases WHERE task_id = $1 AND released_at IS NULL",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch live lease for task")?;

    Ok(lease)
}

/// Release a lease. Idempotent: releasing an already-released lease is a
/// no-op success (returns `false` instead of erroring).
pub async fn release_lease(
    pool: &PgPool,
    task_id: Uuid,
    reason: ReleaseReason,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE leases \
         SET released_at = NOW(), release_reason = $1 \
         WHERE task_id = $2 AND released_at IS NULL",
    )
    .bind(reason)
    .bind(task_id)
    .execute(pool)
    .await
    .context("failed to release lease")?;

    Ok(result.rows_affected() > 0)
}

/// Renew a lease's expiry. Only succeeds if `agent_id` holds the live
/// lease; returns `false` on mismatch or if no live lease exists.
pub async fn renew_lease(
    pool: &PgPool,
    task_id: Uuid,
    agent_id: &str,
    new_expiry: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE leases \
         SET expires_at = $1, renewed_count = renewed_count + 1 \
         WHERE task_id = $2 AND agent_id = $3 AND released_at IS NULL",
    )
    .bind(new_expiry)
    .bind(task_id)
    .bind(agent_id)
    .execute(pool)
    .await
    .context("failed to renew lease")?;

    Ok(result.rows_affected() > 0)
}

/// List all live leases whose `expires_at` has passed `now`.
pub async fn list_expired(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<Lease>> {
    let leases = sqlx::query_as::<_, Lease>(
        "SELECT * FROM leases WHERE released_at IS NULL AND expires_at < $1",
    )
    .bind(now)
    .fetch_all(pool)
    .await
    .context("failed to list expired leases")?;

    Ok(leases)
}

/// List all live leases held by an agent, for the Scheduler's
/// min-remaining-lease-time retry computation when the agent is at
/// capacity.
pub async fn list_live_for_agent(pool: &PgPool, agent_id: &str) -> Result<Vec<Lease>> {
    let leases = sqlx::query_as::<_, Lease>(
        "SELECT * FROM leases WHERE agent_id = $1 AND released_at IS NULL",
    )
    .bind(agent_id)
    .fetch_all(pool)
    .await
    .context("failed to list live leases for agent")?;

    Ok(leases)
}

/// List all live leases for a project, for LeaseMonitor liveness-ping scans
/// and RetryPlanner ETA computation.
pub async fn list_live_for_project(pool: &PgPool, project_id: Uuid) -> Result<Vec<Lease>> {
    let leases = sqlx::query_as::<_, Lease>(
        "SELECT * FROM leases WHERE project_id = $1 AND released_at IS NULL",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list live leases for project")?;

    Ok(leases)
}
