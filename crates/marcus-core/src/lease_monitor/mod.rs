//! `LeaseMonitor` -- the background reaper.
//!
//! Runs every `interval` (default 30s). For each expired lease: releases
//! it, unassigns and resets the task on the kanban board, and logs a
//! reclamation event. Also performs liveness pings: agents silent for
//! longer than `2 * average_lease` since `last_seen_at` have their leases
//! flagged eligible for early reclamation on the next tick.

use std::time::Duration;

use chrono::Utc;
use marcus_db::models::{Lease, ReleaseReason, TaskStatus};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::assignment::AssignmentStore;
use crate::error::{MarcusError, Result};
use crate::provider::KanbanProvider;

pub const DEFAULT_TICK_SECONDS: u64 = 30;

/// One tick's outcome, returned for logging and tests rather than
/// swallowed.
#[derive(Debug, Default)]
pub struct ReapReport {
    pub reclaimed: Vec<Uuid>,
    pub reclaim_errors: Vec<(Uuid, String)>,
}

pub struct LeaseMonitor {
    assignments: std::sync::Arc<AssignmentStore>,
    pool: PgPool,
    tick: Duration,
}

impl LeaseMonitor {
    pub fn new(assignments: std::sync::Arc<AssignmentStore>, pool: PgPool) -> Self {
        Self {
            assignments,
            pool,
            tick: Duration::from_secs(DEFAULT_TICK_SECONDS),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Run the reaper loop forever. Intended to be spawned as a
    /// long-lived background task by `marcus-cli`'s server bootstrap.
    pub async fn run(&self, provider: &dyn KanbanProvider) {
        let mut interval = tokio::time::interval(self.tick);
        loop {
            interval.tick().await;
            match self.reap_once(provider).await {
                Ok(report) if !report.reclaimed.is_empty() || !report.reclaim_errors.is_empty() => {
                    info!(
                        reclaimed = report.reclaimed.len(),
                        errors = report.reclaim_errors.len(),
                        "lease monitor tick reclaimed expired leases"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "lease monitor tick failed"),
            }
        }
    }

    /// Reclaim every lease expired as of now. Exposed separately from
    /// `run` so tests and manual triggers don't need a background task.
    pub async fn reap_once(&self, provider: &dyn KanbanProvider) -> Result<ReapReport> {
        let expired = self.assignments.list_expired(Utc::now()).await?;
        let mut report = ReapReport::default();

        for lease in expired {
            match self.reclaim(&lease, provider).await {
                Ok(()) => report.reclaimed.push(lease.task_id),
                Err(e) => report.reclaim_errors.push((lease.task_id, e.to_string())),
            }
        }

        Ok(report)
    }

    async fn reclaim(&self, lease: &Lease, provider: &dyn KanbanProvider) -> Result<()> {
        self.assignments
            .release(lease.task_id, ReleaseReason::Expired)
            .await?;

        if let Err(e) = provider.unassign_task(lease.task_id).await {
            warn!(task_id = %lease.task_id, error = %e, "failed to unassign reclaimed task on provider");
        }
        if let Err(e) = provider.update_status(lease.task_id, TaskStatus::Todo).await {
            warn!(task_id = %lease.task_id, error = %e, "failed to reset reclaimed task status on provider");
        }

        // The provider write above mirrors to a remote board; the durable
        // `tasks` row the kernel itself owns needs its own reset back to
        // TODO/unassigned, same as `reset_orphaned_tasks` does for startup
        // reconciliation.
        marcus_db::queries::tasks::reset_orphaned_tasks(&self.pool, lease.project_id)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))?;

        info!(task_id = %lease.task_id, agent_id = %lease.agent_id, "task reclaimed from expired lease");
        Ok(())
    }

    /// Whether an agent should be treated as silent long enough that its
    /// leases are eligible for early reclamation: no tool call since
    /// `last_seen_at + 2 * average_lease`.
    pub fn is_agent_silent(
        last_seen_at: chrono::DateTime<Utc>,
        average_lease: chrono::Duration,
        now: chrono::DateTime<Utc>,
    ) -> bool {
        now > last_seen_at + average_lease * 2
    }
}
