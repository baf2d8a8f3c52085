//! Database query functions for the `agents` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::Agent;

/// Register or re-register an agent. Re-registration with the same id is
/// idempotent: the profile (name, role, skills, capacity) is updated and
/// `registered_at` is left untouched, but any outstanding lease is
/// unaffected (leases are keyed by agent id, not by registration row).
pub async fn upsert_agent(
    pool: &PgPool,
    id: &str,
    name: &str,
    role: &str,
    skills: &[String],
    capacity: i32,
) -> Result<Agent> {
    let agent = sqlx::query_as::<_, Agent>(
        "INSERT INTO agents (id, name, role, skills, capacity, last_seen_at) \
         VALUES ($1, $2, $3, $4, $5, NOW()) \
         ON CONFLICT (id) DO UPDATE \
         SET name = EXCLUDED.name, \
             role = EXCLUDED.role, \
             skills = EXCLUDED.skills, \
             capacity = EXCLUDED.capacity, \
             last_seen_at = NOW() \
         RETURNING *",
    )
    .bind(id)
    .bind(name)
    .bind(role)
    .bind(skills)
    .bind(capacity)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to register agent {id}"))?;

    Ok(agent)
}

/// Fetch an agent by id.
pub async fn get_agent(pool: &PgPool, id: &str) -> Result<Option<Agent>> {
    let agent = sqlx::query_as::<_, Agent>("SELECT * FROM agents WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch agent")?;

    Ok(agent)
}

/// Bump `last_seen_at` to now. Called on every tool call from the agent, so
/// the LeaseMonitor's liveness-ping check has an up-to-date signal.
pub async fn touch_agent(pool: &PgPool, id: &str) -> Result<()> {
    sqlx::query("UPDATE agents SET last_seen_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to touch agent")?;

    Ok(())
}

/// Remove an agent's registration. Does not touch outstanding leases; those
/// are reclaimed by the LeaseMonitor on expiry like any other stale lease.
pub async fn remove_agent(pool: &PgPool, id: &str) -> Result<()> {
    let result = sqlx::query("DELETE FROM agents WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to remove agent")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("agent {id} not found");
    }

    Ok(())
}
