//! `ArtifactStore` -- writes agent-produced file artifacts to the project
//! workspace and indexes their metadata.
//!
//! `log_artifact` writes `content` under the artifact type's canonical
//! directory (`docs/api/` for API, `docs/design/` for DESIGN, ...),
//! computes its `sha256`, and stores the metadata row. Idempotent on
//! `(task_id, filename)`: identical content is a no-op; different content
//! under the same filename gets a new version with a numeric suffix.

use std::path::{Path, PathBuf};

use marcus_db::models::{Artifact, ArtifactType};
use marcus_db::queries::artifacts::{self, NewArtifact};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::assignment::AssignmentStore;
use crate::error::{MarcusError, Result};

pub struct ArtifactStore {
    pool: PgPool,
    workspace_root: PathBuf,
}

/// Result of `log_artifact`: either the newly written artifact, or the
/// pre-existing one when content was unchanged.
#[derive(Debug, Clone)]
pub struct LoggedArtifact {
    pub artifact: Artifact,
    pub was_no_op: bool,
}

impl ArtifactStore {
    pub fn new(pool: PgPool, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            workspace_root: workspace_root.into(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn log_artifact(
        &self,
        assignments: &AssignmentStore,
        project_id: Uuid,
        task_id: Uuid,
        agent_id: &str,
        filename: &str,
        artifact_type: ArtifactType,
        content: &[u8],
        description: &str,
    ) -> Result<LoggedArtifact> {
        assignments.assert_owner(task_id, agent_id).await?;

        let sha256 = hex::encode(Sha256::digest(content));

        let existing = artifacts::find_artifact_by_filename(&self.pool, task_id, filename)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))?;

        if let Some(existing) = &existing {
            if existing.sha256 == sha256 {
                return Ok(LoggedArtifact {
                    artifact: existing.clone(),
                    was_no_op: true,
                });
            }
        }

        let stored_filename = if existing.is_some() {
            versioned_filename(filename, content)
        } else {
            filename.to_string()
        };

        let relative_path = format!("{}/{}", artifact_type.canonical_dir(), stored_filename);
        let absolute_path = self.workspace_root.join(&relative_path);
        write_artifact_content(&absolute_path, content)
            .await
            .map_err(|e| MarcusError::Internal(format!("failed to write artifact: {e}")))?;

        let artifact = artifacts::insert_artifact(
            &self.pool,
            &NewArtifact {
                project_id,
                task_id,
                agent_id: agent_id.to_string(),
                filename: stored_filename,
                artifact_type,
                relative_path,
                size_bytes: content.len() as i64,
                sha256,
                description: description.to_string(),
            },
        )
        .await
        .map_err(|e| MarcusError::Internal(e.to_string()))?;

        Ok(LoggedArtifact {
            artifact,
            was_no_op: false,
        })
    }

    pub async fn list_for_tasks(&self, task_ids: &[Uuid]) -> Result<Vec<Artifact>> {
        artifacts::list_artifacts_for_tasks(&self.pool, task_ids)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))
    }
}

/// Derive a new filename for a content version conflict, e.g.
/// `report.md` -> `report.v-a1b2c3d4.md` (a short content hash keeps
/// concurrent writers from colliding on the same suffix).
fn versioned_filename(filename: &str, content: &[u8]) -> String {
    let short_hash = &hex::encode(Sha256::digest(content))[..8];
    match filename.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}.v-{short_hash}.{ext}"),
        None => format!("{filename}.v-{short_hash}"),
    }
}

async fn write_artifact_content(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versioned_filename_keeps_extension() {
        let name = versioned_filename("report.md", b"hello");
        assert!(name.starts_with("report.v-"));
        assert!(name.ends_with(".md"));
    }

    #[test]
    fn versioned_filename_without_extension() {
        let name = versioned_filename("README", b"hello");
        assert!(name.starts_with("README.v-"));
    }

    #[test]
    fn versioned_filename_differs_by_content() {
        let a = versioned_filename("report.md", b"hello");
        let b = versioned_filename("report.md", b"world");
        assert_ne!(a, b);
    }
}
