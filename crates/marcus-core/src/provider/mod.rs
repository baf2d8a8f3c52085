//! `KanbanProvider` -- the adapter interface for external task boards.
//!
//! Each concrete provider (GitHub Projects, Planka, Linear, ...) implements
//! this trait. Wire protocols for specific boards are out of scope here;
//! only the interface contract is specified. The trait is object-safe so
//! adapters can be stored as `Box<dyn KanbanProvider>` in a
//! [`registry::ProviderRegistry`].
//!
//! # Architecture
//!
//! ```text
//! Scheduler / ProjectBuilder
//!     |
//!     v
//! ProviderRegistry --get("github-projects")--> &dyn KanbanProvider
//!     |
//!     |  list_tasks / get_task / create_task
//!     |  update_status / assign_task / unassign_task
//!     |  add_comment
//!     v
//! remote board
//! ```

pub mod local;
pub mod registry;

use async_trait::async_trait;
use marcus_db::models::{Task, TaskStatus};
use uuid::Uuid;

pub use local::LocalProvider;
pub use registry::ProviderRegistry;

/// Fields needed to create a task on a remote board.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub name: String,
    pub description: String,
    pub phase: Option<marcus_db::models::Phase>,
    pub priority: marcus_db::models::Priority,
    pub required_skills: Vec<String>,
    pub estimated_hours: f64,
    pub parent_id: Option<Uuid>,
    pub subtask_index: Option<i32>,
    pub labels: Vec<String>,
}

/// Errors a provider adapter can raise. All variants are integration
/// errors per the error taxonomy: retried with backoff by the caller,
/// counted against the circuit breaker.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider returned malformed data: {0}")]
    Malformed(String),

    #[error("task {0} not found on provider")]
    NotFound(Uuid),

    #[error("provider rejected the write (conflict): {0}")]
    Conflict(String),

    #[error("provider circuit breaker is open")]
    CircuitOpen,
}

/// Adapter interface for a remote kanban-style task board.
///
/// # Object Safety
///
/// Every method returns a concrete or boxed type, so `Box<dyn
/// KanbanProvider>` can be stored in [`ProviderRegistry`].
#[async_trait]
pub trait KanbanProvider: Send + Sync {
    /// Human-readable name for this provider (e.g. "github-projects").
    fn name(&self) -> &str;

    /// List every task for a project. Adapters must page to completion
    /// internally; callers always see the full set.
    async fn list_tasks(&self, project_id: Uuid) -> Result<Vec<Task>, ProviderError>;

    /// Fetch a single task by id.
    async fn get_task(&self, id: Uuid) -> Result<Task, ProviderError>;

    /// Create a task from a spec, returning its assigned id.
    async fn create_task(&self, project_id: Uuid, spec: &TaskSpec) -> Result<Uuid, ProviderError>;

    /// Update a task's canonical status. Idempotent.
    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<(), ProviderError>;

    /// Assign a task to an agent. Never retried by the caller after the
    /// first 4xx/conflict -- a conflict means another actor claimed it.
    async fn assign_task(&self, id: Uuid, agent_id: &str) -> Result<(), ProviderError>;

    /// Clear a task's assignment.
    async fn unassign_task(&self, id: Uuid) -> Result<(), ProviderError>;

    /// Post a comment to the task's card, used to publish decisions for
    /// auditability.
    async fn add_comment(&self, id: Uuid, text: &str) -> Result<(), ProviderError>;

    /// Optional capability: create a new project/board. Adapters that
    /// don't support this return `Malformed` explaining why.
    async fn create_project(
        &self,
        _name: &str,
        _options: &serde_json::Value,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::Malformed(format!(
            "{} does not support create_project",
            self.name()
        )))
    }

    /// Optional capability: recent code references for a task (e.g.
    /// merged-PR URLs), newest first. Adapters without this capability
    /// return an empty list rather than erroring -- `ContextService`
    /// treats it as "nothing to show", not a failure.
    async fn recent_code_references(&self, _task_id: Uuid) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }
}

// Compile-time assertion: KanbanProvider must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn KanbanProvider) {}
};
