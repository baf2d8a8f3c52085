//! `LocalProvider` -- a `KanbanProvider` backed directly by `marcus-db`.
//!
//! Wire adapters for external boards (GitHub Projects, Planka, Linear) are
//! out of scope; this adapter exists so Marcus has at least one concrete,
//! runnable provider without a remote board configured. The `tasks` table
//! is already the source of truth the kernel writes to directly, so the
//! write methods here are no-ops -- there is no separate remote state to
//! mirror into.

use async_trait::async_trait;
use marcus_db::models::{Task, TaskStatus};
use sqlx::PgPool;
use uuid::Uuid;

use super::{KanbanProvider, ProviderError, TaskSpec};

pub struct LocalProvider {
    pool: PgPool,
}

impl LocalProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KanbanProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn list_tasks(&self, project_id: Uuid) -> Result<Vec<Task>, ProviderError> {
        marcus_db::queries::tasks::list_tasks_for_project(&self.pool, project_id)
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))
    }

    async fn get_task(&self, id: Uuid) -> Result<Task, ProviderError> {
        marcus_db::queries::tasks::get_task(&self.pool, id)
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?
            .ok_or(ProviderError::NotFound(id))
    }

    async fn create_task(&self, _project_id: Uuid, _spec: &TaskSpec) -> Result<Uuid, ProviderError> {
        // The task row already exists -- `ProjectBuilder` inserts it
        // directly. Nothing external to mirror into.
        Ok(Uuid::new_v4())
    }

    async fn update_status(&self, _id: Uuid, _status: TaskStatus) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn assign_task(&self, _id: Uuid, _agent_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn unassign_task(&self, _id: Uuid) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn add_comment(&self, _id: Uuid, _text: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}
