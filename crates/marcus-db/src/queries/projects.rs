//! Database query functions for the `projects` table.

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Project;

/// Insert a new project row. Returns the inserted project with
/// server-generated defaults (id, created_at, last_used_at).
pub async fn insert_project(
    pool: &PgPool,
    name: &str,
    provider: &str,
    provider_config: &Value,
) -> Result<Project> {
    let project = sqlx::query_as::<_, Project>(
        "INSERT INTO projects (name, provider, provider_config) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(name)
    .bind(provider)
    .bind(provider_config)
    .fetch_one(pool)
    .await
    .context("failed to insert project")?;

    Ok(project)
}

/// Fetch a project by its ID.
pub async fn get_project(pool: &PgPool, id: Uuid) -> Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch project")?;

    Ok(project)
}

/// List all projects, ordered by last use (most recent first).
pub async fn list_projects(pool: &PgPool) -> Result<Vec<Project>> {
    let projects =
        sqlx::query_as::<_, Project>("SELECT * FROM projects ORDER BY last_used_at DESC")
            .fetch_all(pool)
            .await
            .context("failed to list projects")?;

    Ok(projects)
}

/// Find a project by exact (case-insensitive) name match.
pub async fn find_project_by_name(pool: &PgPool, name: &str) -> Result<Option<Project>> {
    let project =
        sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE lower(name) = lower($1)")
            .bind(name)
            .fetch_optional(pool)
            .await
            .context("failed to find project by name")?;

    Ok(project)
}

/// Remove a project and everything keyed by its id (tasks, leases,
/// decisions, artifacts cascade via foreign keys).
pub async fn remove_project(pool: &PgPool, id: Uuid) -> Result<()> {
    let result = sqlx::query("DELETE FROM projects WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to remove project")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("project {id} not found");
    }

    Ok(())
}

/// Bump `last_used_at` to now. Called whenever a project becomes the active
/// project for a session.
pub async fn touch_project(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE projects SET last_used_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to touch project")?;

    Ok(())
}
