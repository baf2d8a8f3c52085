//! The `MarcusError` taxonomy.
//!
//! Every fallible operation in the coordination kernel resolves to one of
//! four kinds: integration, business, configuration, or programming errors.
//! The kind determines retry/surface behavior in the Dispatcher (see
//! `marcus-cli::dispatcher`), not just the message.

use uuid::Uuid;

/// Errors surfaced by the coordination kernel.
///
/// Variants map 1:1 onto the wire error codes in the tool-call response
/// contract (`NO_ACTIVE_PROJECT`, `TASK_LEASE_CONFLICT`, ...).
#[derive(Debug, thiserror::Error)]
pub enum MarcusError {
    /// No project is active for this caller session.
    #[error("no active project for this session")]
    NoActiveProject,

    /// An agent id was used before `register_agent` was called for it.
    #[error("agent {0:?} is not registered")]
    AgentNotRegistered(String),

    /// A task id does not exist in the active project's TaskGraph.
    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    /// `TryClaim` found a live lease already held on the task.
    #[error("task {0} already has a live lease")]
    TaskLeaseConflict(Uuid),

    /// An agent tried to mutate a task leased by a different agent.
    #[error("agent {agent_id:?} does not hold the lease on task {task_id}")]
    NotTaskOwner { task_id: Uuid, agent_id: String },

    /// The KanbanProvider is unreachable, rejected a write, or the circuit
    /// breaker for this endpoint is open. Retried with backoff by the
    /// caller unless the breaker is open.
    #[error("kanban provider unavailable: {0}")]
    KanbanUnavailable(String),

    /// Caller-supplied arguments failed validation (empty skill set, a
    /// cyclic dependency, an unknown provider name, ...).
    #[error("validation error: {0}")]
    Validation(String),

    /// A required field was missing or a referenced resource (provider
    /// adapter, credential) was never configured. Fatal at startup or on
    /// first use.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An invariant the code assumes was violated. Never expected in
    /// correct operation; logged loudly and never swallowed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MarcusError {
    /// The wire error code for this variant, per the tool surface contract.
    pub fn code(&self) -> &'static str {
        match self {
            MarcusError::NoActiveProject => "NO_ACTIVE_PROJECT",
            MarcusError::AgentNotRegistered(_) => "AGENT_NOT_REGISTERED",
            MarcusError::TaskNotFound(_) => "TASK_NOT_FOUND",
            MarcusError::TaskLeaseConflict(_) => "TASK_LEASE_CONFLICT",
            MarcusError::NotTaskOwner { .. } => "NOT_TASK_OWNER",
            MarcusError::KanbanUnavailable(_) => "KANBAN_UNAVAILABLE",
            MarcusError::Validation(_) => "VALIDATION_ERROR",
            MarcusError::Configuration(_) => "VALIDATION_ERROR",
            MarcusError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this error kind is worth retrying with backoff by the
    /// caller. Business, configuration, and programming errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MarcusError::KanbanUnavailable(_))
    }

    /// A short actionable hint the Dispatcher can attach to the structured
    /// `{ok:false, error, hint}` response.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            MarcusError::NoActiveProject => {
                Some("call list_projects, add_project, or create_project first")
            }
            MarcusError::AgentNotRegistered(_) => Some("call register_agent first"),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MarcusError>;
