//! Database query functions for the `artifacts` table.
//!
//! This is the metadata index only; the content an artifact describes is
//! written to the project workspace by `marcus_core::artifact` before the
//! row here is inserted.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Artifact, ArtifactType};

/// Fields required to record a new artifact.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub project_id: Uuid,
    pub task_id: Uuid,
    pub agent_id: String,
    pub filename: String,
    pub artifact_type: ArtifactType,
    pub relative_path: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub description: String,
}

/// Insert a new artifact row.
pub async fn insert_artifact(pool: &PgPool, new: &NewArtifact) -> Result<Artifact> {
    let artifact = sqlx::query_as::<_, Artifact>(
        "INSERT INTO artifacts \
            (project_id, task_id, agent_id, filename, artifact_type, \
             relative_path, size_bytes, sha256, description) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING *",
    )
    .bind(new.project_id)
    .bind(new.task_id)
    .bind(&new.agent_id)
    .bind(&new.filename)
    .bind(new.artifact_type)
    .bind(&new.relative_path)
    .bind(new.size_bytes)
    .bind(&new.sha256)
    .bind(&new.description)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to insert artifact for task {}", new.task_id))?;

    Ok(artifact)
}

/// Find an existing artifact recorded under `(task_id, filename)`, used by
/// `ArtifactStore::log_artifact` to decide no-op vs new-version-with-suffix.
pub async fn find_artifact_by_filename(
    pool: &PgPool,
    task_id: Uuid,
    filename: &str,
) -> Result<Option<Artifact>> {
    let artifact = sqlx::query_as::<_, Artifact>(
        "SELECT * FROM artifacts WHERE task_id = $1 AND filename = $2 \
         ORDER BY recorded_at DESC LIMIT 1",
    )
    .bind(task_id)
    .bind(filename)
    .fetch_optional(pool)
    .await
    .context("failed to find artifact by filename")?;

    Ok(artifact)
}

/// List artifacts recorded against a set of dependency tasks, ordered so
/// that API specs come first, then DESIGN, ARCHITECTURE, SPECIFICATION,
/// matching ContextService's preferred artifact ordering.
pub async fn list_artifacts_for_tasks(pool: &PgPool, task_ids: &[Uuid]) -> Result<Vec<Artifact>> {
    let artifacts = sqlx::query_as::<_, Artifact>(
        "SELECT * FROM artifacts WHERE task_id = ANY($1) \
         ORDER BY \
           CASE artifact_type \
             WHEN 'api' THEN 0 \
             WHEN 'design' THEN 1 \
             WHEN 'architecture' THEN 2 \
             WHEN 'specification' THEN 3 \
             ELSE 4 \
           END, \
           recorded_at DESC",
    )
    .bind(task_ids)
    .fetch_all(pool)
    .await
    .context("failed to list artifacts for tasks")?;

    Ok(artifacts)
}
