//! `ProjectRegistry` -- the persistent catalog of projects plus each MCP
//! session's active-project selection.
//!
//! The catalog itself (`Add`/`Remove`/`List`) is backed by
//! `marcus_db::queries::projects`; the active-project mapping is
//! in-memory only, since it's meaningless across a server restart
//! (sessions don't survive one either).

use std::collections::HashMap;
use std::sync::Mutex;

use marcus_db::models::Project;
use marcus_db::queries::projects;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{MarcusError, Result};

pub struct ProjectRegistry {
    pool: PgPool,
    active: Mutex<HashMap<String, Uuid>>,
}

impl ProjectRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub async fn add(
        &self,
        name: &str,
        provider: &str,
        provider_config: &serde_json::Value,
    ) -> Result<Project> {
        projects::insert_project(&self.pool, name, provider, provider_config)
            .await
            .map_err(|e| MarcusError::Validation(e.to_string()))
    }

    pub async fn remove(&self, project_id: Uuid) -> Result<()> {
        projects::remove_project(&self.pool, project_id)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))?;
        self.active.lock().unwrap().retain(|_, &mut id| id != project_id);
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Project>> {
        projects::list_projects(&self.pool)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))
    }

    pub async fn get(&self, project_id: Uuid) -> Result<Project> {
        projects::get_project(&self.pool, project_id)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))?
            .ok_or(MarcusError::Validation(format!(
                "project {project_id} not found"
            )))
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Project>> {
        projects::find_project_by_name(&self.pool, name)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))
    }

    /// Switch `caller_id`'s active project, bumping the project's
    /// `last_used_at`.
    pub async fn switch(&self, caller_id: &str, project_id: Uuid) -> Result<Project> {
        let project = self.get(project_id).await?;
        projects::touch_project(&self.pool, project_id)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))?;
        self.active
            .lock()
            .unwrap()
            .insert(caller_id.to_string(), project_id);
        Ok(project)
    }

    /// The caller's active project, or `NoActiveProject` if none has been
    /// selected yet this session.
    pub async fn get_active(&self, caller_id: &str) -> Result<Project> {
        let project_id = self
            .active
            .lock()
            .unwrap()
            .get(caller_id)
            .copied()
            .ok_or(MarcusError::NoActiveProject)?;
        self.get(project_id).await
    }
}
