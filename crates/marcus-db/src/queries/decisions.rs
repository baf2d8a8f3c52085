//! Database query functions for the append-only `decisions` log.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Decision;

/// Fields required to append a new decision. Decisions are immutable once
/// written; there is no update path.
#[derive(Debug, Clone)]
pub struct NewDecision {
    pub project_id: Uuid,
    pub task_id: Uuid,
    pub agent_id: String,
    pub what: String,
    pub why: String,
    pub impact: String,
    pub affects_tasks: Vec<Uuid>,
}

/// Append a new decision row. Returns the inserted row with
/// server-generated defaults (id, recorded_at).
pub async fn insert_decision(pool: &PgPool, new: &NewDecision) -> Result<Decision> {
    let decision = sqlx::query_as::<_, Decision>(
        "INSERT INTO decisions \
            (project_id, task_id, agent_id, what, why, impact, affects_tasks) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(new.project_id)
    .bind(new.task_id)
    .bind(&new.agent_id)
    .bind(&new.what)
    .bind(&new.why)
    .bind(&new.impact)
    .bind(&new.affects_tasks)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert decision for task {}", new.task_id))?;

    Ok(decision)
}

/// List decisions attached to a task, newest first.
pub async fn list_decisions_for_task(pool: &PgPool, task_id: Uuid) -> Result<Vec<Decision>> {
    let decisions = sqlx::query_as::<_, Decision>(
        "SELECT * FROM decisions WHERE task_id = $1 ORDER BY recorded_at DESC",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list decisions for task {task_id}"))?;

    Ok(decisions)
}

/// List decisions recorded against any task in `task_ids` that name
/// `affected_task` in their `affects_tasks` array, newest first. Used by
/// ContextService to find sibling-subtask decisions relevant to a task.
pub async fn list_decisions_affecting(
    pool: &PgPool,
    task_ids: &[Uuid],
    affected_task: Uuid,
) -> Result<Vec<Decision>> {
    let decisions = sqlx::query_as::<_, Decision>(
        "SELECT * FROM decisions \
         WHERE task_id = ANY($1) AND $2 = ANY(affects_tasks) \
         ORDER BY recorded_at DESC",
    )
    .bind(task_ids)
    .bind(affected_task)
    .fetch_all(pool)
    .await
    .with_context(|| format!("failed to list decisions affecting task {affected_task}"))?;

    Ok(decisions)
}
