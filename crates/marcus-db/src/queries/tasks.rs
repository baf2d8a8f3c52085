//! Database query functions for the `tasks` and `task_dependencies` tables.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Phase, Priority, Task, TaskStatus};

/// Fields required to insert a new task. `dependencies` are inserted as
/// separate `task_dependencies` rows by the caller after the insert, so the
/// task graph can be rebuilt incrementally rather than all-or-nothing.
#[allow(clippy::too_many_arguments)]
pub async fn insert_task(
    pool: &PgPool,
    project_id: Uuid,
    name: &str,
    description: &str,
    phase: Option<Phase>,
    priority: Priority,
    required_skills: &[String],
    estimated_hours: f64,
    parent_id: Option<Uuid>,
    subtask_index: Option<i32>,
) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks \
            (project_id, name, description, status, phase, priority, \
             required_skills, estimated_hours, parent_id, subtask_index) \
         VALUES ($1, $2, $3, 'todo', $4, $5, $6, $7, $8, $9) \
         RETURNING *",
    )
    .bind(project_id)
    .bind(name)
    .bind(description)
    .bind(phase)
    .bind(priority)
    .bind(required_skills)
    .bind(estimated_hours)
    .bind(parent_id)
    .bind(subtask_index)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// List all tasks for a given project, ordered by creation time.
pub async fn list_tasks_for_project(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE project_id = $1 ORDER BY created_at ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for project")?;

    Ok(tasks)
}

/// Unconditionally set a task's status. Used by the LeaseMonitor reaper and
/// by `KanbanProvider` reconciliation, which do not need the optimistic-lock
/// guard that task-owning transitions require.
pub async fn update_task_status(pool: &PgPool, id: Uuid, status: TaskStatus) -> Result<()> {
    let result = sqlx::query("UPDATE tasks SET status = $1, updated_at = NOW() WHERE id = $2")
        .bind(status)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update task status")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("task {id} not found");
    }

    Ok(())
}

/// Insert a dependency edge: `task_id` depends on `depends_on_id`.
///
/// Uses `ON CONFLICT DO NOTHING` so this is idempotent.
pub async fn insert_task_dependency(
    pool: &PgPool,
    task_id: Uuid,
    depends_on_id: Uuid,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_dependencies (task_id, depends_on) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(task_id)
    .bind(depends_on_id)
    .execute(pool)
    .await
    .context("failed to insert task dependency")?;

    Ok(())
}

/// Get the IDs of all tasks that a given task depends on.
pub async fn get_task_dependencies(pool: &PgPool, task_id: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> =
        sqlx::query_as("SELECT depends_on FROM task_dependencies WHERE task_id = $1")
            .bind(task_id)
            .fetch_all(pool)
            .await
            .context("failed to get task dependencies")?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Get all dependency edges for every task in a project, as `(task_id,
/// depends_on)` pairs. Used to build the in-memory `TaskGraph` in one query
/// rather than one round-trip per task.
pub async fn get_all_dependencies_for_project(
    pool: &PgPool,
    project_id: Uuid,
) -> Result<Vec<(Uuid, Uuid)>> {
    let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
        "SELECT td.task_id, td.depends_on \
         FROM task_dependencies td \
         JOIN tasks t ON t.id = td.task_id \
         WHERE t.project_id = $1",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to get dependencies for project")?;

    Ok(rows)
}

/// Atomically transition a task's status, guarded by optimistic locking on
/// the expected current status. Returns the number of rows affected (0
/// means the status did not match `from`, so the caller lost the race).
pub async fn transition_task_status(
    pool: &PgPool,
    task_id: Uuid,
    from: TaskStatus,
    to: TaskStatus,
    assignee: Option<&str>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = $1, \
             assignee = $2, \
             started_at = COALESCE($3, started_at), \
             completed_at = COALESCE($4, completed_at), \
             updated_at = NOW() \
         WHERE id = $5 AND status = $6",
    )
    .bind(to)
    .bind(assignee)
    .bind(started_at)
    .bind(completed_at)
    .bind(task_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition task status")?;

    Ok(result.rows_affected())
}

/// Get all tasks in a project whose status is `todo` and all of whose
/// dependencies are `done` (i.e. ready to be claimed).
pub async fn get_ready_tasks(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT t.* \
         FROM tasks t \
         WHERE t.project_id = $1 \
           AND t.status = 'todo' \
           AND NOT EXISTS ( \
               SELECT 1 FROM task_dependencies td \
               JOIN tasks dep ON dep.id = td.depends_on \
               WHERE td.task_id = t.id AND dep.status != 'done' \
           )",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to get ready tasks")?;

    Ok(tasks)
}

/// Status counts for a project's tasks.
#[derive(Debug, Clone, Default)]
pub struct ProjectProgress {
    pub todo: i64,
    pub in_progress: i64,
    pub blocked: i64,
    pub done: i64,
    pub total: i64,
}

/// Get a summary of task counts by status for a given project.
pub async fn get_project_progress(pool: &PgPool, project_id: Uuid) -> Result<ProjectProgress> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status::text, COUNT(*) as cnt \
         FROM tasks \
         WHERE project_id = $1 \
         GROUP BY status",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to get project progress")?;

    let mut progress = ProjectProgress::default();
    for (status, count) in &rows {
        match status.as_str() {
            "todo" => progress.todo = *count,
            "in_progress" => progress.in_progress = *count,
            "blocked" => progress.blocked = *count,
            "done" => progress.done = *count,
            _ => {}
        }
        progress.total += count;
    }
    Ok(progress)
}

/// Reset tasks stuck `in_progress` with no live lease back to `todo`. Used
/// by the LeaseMonitor and by startup reconciliation to recover from a
/// crash between `TryClaim` and the kanban mirror write.
pub async fn reset_orphaned_tasks(pool: &PgPool, project_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'todo', assignee = NULL, updated_at = NOW() \
         WHERE project_id = $1 \
           AND status = 'in_progress' \
           AND NOT EXISTS ( \
               SELECT 1 FROM leases l \
               WHERE l.task_id = tasks.id AND l.released_at IS NULL \
           ) \
         RETURNING *",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .context("failed to reset orphaned tasks")?;

    Ok(tasks)
}
