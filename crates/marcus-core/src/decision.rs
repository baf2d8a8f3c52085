//! `DecisionLog` -- the append-only record of agent-authored decisions.
//!
//! `log_decision` validates the caller holds the lease on the task, then
//! appends to `marcus_db::queries::decisions` and publishes the decision to
//! the kanban card via `KanbanProvider::add_comment` for auditability.

use marcus_db::models::Decision;
use marcus_db::queries::decisions::{self, NewDecision};
use sqlx::PgPool;
use uuid::Uuid;

use crate::assignment::AssignmentStore;
use crate::error::{MarcusError, Result};
use crate::provider::KanbanProvider;

pub struct DecisionLog {
    pool: PgPool,
}

impl DecisionLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a decision and publish it to the kanban card.
    ///
    /// `affects_tasks` references are accepted and stored verbatim, even
    /// across projects: a decision always attaches to `task_id`'s own
    /// project for indexing, and `ContextService` simply finds nothing for
    /// a referenced task that turns out not to be a dependency or sibling.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_decision(
        &self,
        assignments: &AssignmentStore,
        provider: &dyn KanbanProvider,
        project_id: Uuid,
        task_id: Uuid,
        agent_id: &str,
        what: String,
        why: String,
        impact: String,
        affects_tasks: Vec<Uuid>,
    ) -> Result<Decision> {
        assignments.assert_owner(task_id, agent_id).await?;

        let decision = decisions::insert_decision(
            &self.pool,
            &NewDecision {
                project_id,
                task_id,
                agent_id: agent_id.to_string(),
                what: what.clone(),
                why: why.clone(),
                impact: impact.clone(),
                affects_tasks,
            },
        )
        .await
        .map_err(|e| MarcusError::Internal(e.to_string()))?;

        let comment = format!("**Decision by {agent_id}**\n\nWhat: {what}\nWhy: {why}\nImpact: {impact}");
        if let Err(e) = provider.add_comment(task_id, &comment).await {
            // Publishing to the board is best-effort auditability, not the
            // source of truth; the decision is already durable.
            tracing::warn!(error = %e, task_id = %task_id, "failed to publish decision comment");
        }

        Ok(decision)
    }

    pub async fn list_for_task(&self, task_id: Uuid) -> Result<Vec<Decision>> {
        decisions::list_decisions_for_task(&self.pool, task_id)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))
    }

    pub async fn list_affecting(&self, task_ids: &[Uuid], affected_task: Uuid) -> Result<Vec<Decision>> {
        decisions::list_decisions_affecting(&self.pool, task_ids, affected_task)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))
    }
}
