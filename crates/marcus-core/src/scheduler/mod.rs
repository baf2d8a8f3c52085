//! The pick-next-task algorithm: filter candidates, score, tie-break,
//! attempt an atomic lease, mirror to the kanban board, assemble the
//! preamble.
//!
//! Adapted from the push model (spawn an agent process for a task) to a
//! pull model (an agent calls `request_next_task` and Marcus picks for
//! it), but the candidate-filter / score / atomic-claim / mirror-to-board
//! shape is the same control flow a dispatch loop always needs.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use marcus_db::models::{Agent, Lease, Phase, Task, TaskStatus};
use sqlx::PgPool;
use uuid::Uuid;

use crate::artifact::ArtifactStore;
use crate::assignment::{AssignmentStore, ClaimOutcome};
use crate::circuit_breaker::CircuitBreaker;
use crate::context::ContextService;
use crate::decision::DecisionLog;
use crate::error::{MarcusError, Result};
use crate::graph::{TaskGraph, TaskNode};
use crate::provider::KanbanProvider;
use crate::retry::{self, Blocker};

const MAX_CLAIM_RETRIES: usize = 5;

/// Result of a successful `request_next_task`.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub task: Task,
    pub preamble: String,
}

/// Outcome of `pick_next_task`.
#[derive(Debug, Clone)]
pub enum Outcome {
    Assigned(Assignment),
    NoTask { retry_after_seconds: i64, reason: String },
}

/// Everything the Scheduler needs to run one pick-next-task call, bundled
/// so the call site doesn't thread six parameters through every frame.
pub struct SchedulerContext<'a> {
    pub project_id: Uuid,
    pub pool: &'a PgPool,
    pub graph: &'a mut TaskGraph,
    pub assignments: &'a AssignmentStore,
    pub provider: &'a dyn KanbanProvider,
    pub breaker: &'a CircuitBreaker,
    pub decisions: &'a DecisionLog,
    pub artifacts: &'a ArtifactStore,
}

pub async fn pick_next_task(ctx: SchedulerContext<'_>, agent: &Agent) -> Result<Outcome> {
    let SchedulerContext {
        project_id,
        pool,
        graph,
        assignments,
        provider,
        breaker,
        decisions,
        artifacts,
    } = ctx;

    // 1. Capacity check.
    let live_leases = assignments.list_live_for_agent(&agent.id).await?;
    if live_leases.len() as i32 >= agent.capacity {
        let now = Utc::now();
        let min_remaining = live_leases
            .iter()
            .map(|l| (l.expires_at - now).num_seconds().max(0))
            .min()
            .unwrap_or(30);
        return Ok(Outcome::NoTask {
            retry_after_seconds: min_remaining.max(1),
            reason: "agent at capacity".to_string(),
        });
    }

    // 2. Candidate set: ready AND unassigned.
    let live_leases = assignments.list_live_for_project(project_id).await?;
    let leased: HashSet<Uuid> = live_leases.iter().map(|l| l.task_id).collect();
    let mut candidates: Vec<&TaskNode> = graph.unassigned_ready_tasks(&leased);

    // 3. Phase-safety filter.
    let cluster_implement_done = cluster_implement_completion(graph);
    candidates.retain(|n| !violates_phase_safety(n, &cluster_implement_done));

    if candidates.is_empty() {
        let retry = no_task_retry(graph, &live_leases, agent);
        return Ok(Outcome::NoTask {
            retry_after_seconds: retry,
            reason: "no ready task matches this agent".to_string(),
        });
    }

    // 4-5. Score and tie-break.
    let mut scored: Vec<(i64, &TaskNode)> = candidates
        .iter()
        .map(|&n| (score(n, agent), n))
        .collect();
    scored.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .cmp(score_a)
            .then(a.task.created_at.cmp(&b.task.created_at))
            .then(a.task.id.cmp(&b.task.id))
    });

    // 6. Attempt lease, bounded retries.
    let mut claimed: Option<Task> = None;
    for (_, node) in scored.iter().take(MAX_CLAIM_RETRIES) {
        let task = node.task.clone();
        match assignments
            .try_claim(
                project_id,
                task.id,
                &agent.id,
                agent.capacity,
                task.estimated_hours,
            )
            .await?
        {
            ClaimOutcome::Claimed(_) => {
                claimed = Some(task);
                break;
            }
            ClaimOutcome::Conflict => continue,
            ClaimOutcome::AgentAtCapacity => {
                return Ok(Outcome::NoTask {
                    retry_after_seconds: 30,
                    reason: "agent at capacity".to_string(),
                });
            }
        }
    }

    let Some(task) = claimed else {
        return Ok(Outcome::NoTask {
            retry_after_seconds: 2,
            reason: "lease conflicts exhausted".to_string(),
        });
    };

    // 7. Mirror to kanban.
    if breaker.is_open(provider.name()) {
        assignments
            .release(task.id, marcus_db::models::ReleaseReason::Expired)
            .await?;
        return Ok(Outcome::NoTask {
            retry_after_seconds: 60,
            reason: "kanban provider circuit breaker open".to_string(),
        });
    }

    let mirror_result = async {
        provider.assign_task(task.id, &agent.id).await?;
        provider
            .update_status(task.id, TaskStatus::InProgress)
            .await
    }
    .await;

    match mirror_result {
        Ok(()) => breaker.record_success(provider.name()),
        Err(e) => {
            breaker.record_failure(provider.name());
            assignments
                .release(task.id, marcus_db::models::ReleaseReason::Expired)
                .await?;
            return Ok(Outcome::NoTask {
                retry_after_seconds: 30,
                reason: format!("kanban mirror failed: {e}"),
            });
        }
    }

    marcus_db::queries::tasks::transition_task_status(
        pool,
        task.id,
        task.status,
        TaskStatus::InProgress,
        Some(&agent.id),
        Some(Utc::now()),
        None,
    )
    .await
    .map_err(|e| MarcusError::Internal(e.to_string()))?;

    graph.assign(task.id, &agent.id);

    // 8. Assemble preamble.
    let preamble =
        ContextService::build_preamble(graph, decisions, artifacts, provider, task.id).await?;

    // 9. Return.
    Ok(Outcome::Assigned(Assignment { task, preamble }))
}

/// Score a candidate for `agent` per the weighted formula. Priority and
/// skill-overlap terms are scaled by 100 to keep everything integral
/// (skill_overlap / |required_skills| is otherwise fractional).
fn score(node: &TaskNode, agent: &Agent) -> i64 {
    let task = &node.task;

    let priority_term = 100 * task.priority.rank() as i64;

    let skill_overlap = task
        .required_skills
        .iter()
        .filter(|s| agent.skills.contains(s))
        .count();
    let skill_term = if task.required_skills.is_empty() {
        0
    } else {
        (50.0 * skill_overlap as f64 / task.required_skills.len() as f64).round() as i64
    };

    let dependents_term = 10 * node.dependents.len() as i64;
    let depth_term = 5 * node.depth as i64;
    let hours_term = task.estimated_hours.round() as i64;

    priority_term + skill_term + dependents_term + depth_term - hours_term
}

/// For every parent cluster, whether all its IMPLEMENT-phase tasks are
/// DONE. Clusters with no IMPLEMENT tasks are vacuously "done" (nothing to
/// block on). Tasks with no `parent_id` form their own singleton clusters
/// and are never blocked by this rule.
fn cluster_implement_completion(graph: &TaskGraph) -> HashMap<Uuid, bool> {
    let mut by_cluster: HashMap<Uuid, Vec<&Task>> = HashMap::new();
    for task in graph.all_tasks() {
        if let Some(parent_id) = task.parent_id {
            by_cluster.entry(parent_id).or_default().push(task);
        }
    }
    by_cluster
        .into_iter()
        .map(|(parent_id, tasks)| {
            let all_done = tasks
                .iter()
                .filter(|t| t.phase == Some(Phase::Implement))
                .all(|t| t.status == TaskStatus::Done);
            (parent_id, all_done)
        })
        .collect()
}

/// Never assign a TEST task for a feature cluster whose IMPLEMENT tasks
/// aren't all DONE, even when no explicit dependency edge says so.
fn violates_phase_safety(node: &TaskNode, cluster_implement_done: &HashMap<Uuid, bool>) -> bool {
    if node.task.phase != Some(Phase::Test) {
        return false;
    }
    match node.task.parent_id {
        Some(parent_id) => !cluster_implement_done.get(&parent_id).copied().unwrap_or(true),
        None => false,
    }
}

/// When no candidate survives filtering, ask the RetryPlanner how long the
/// agent should sleep.
fn no_task_retry(graph: &TaskGraph, live_leases: &[Lease], agent: &Agent) -> i64 {
    let now = Utc::now();

    let blocking_ids = blocking_task_ids(graph);
    if blocking_ids.is_empty() {
        return retry::compute_retry_after(now, &[], false);
    }

    let leases_by_task: HashMap<Uuid, &Lease> = live_leases.iter().map(|l| (l.task_id, l)).collect();
    let blockers: Vec<Blocker> = blocking_ids
        .iter()
        .filter_map(|id| graph.get(*id))
        .map(|node| match leases_by_task.get(&node.task.id) {
            Some(lease) => Blocker::from_lease(lease, node.task.estimated_hours),
            None => Blocker {
                lease: None,
                estimated_hours: node.task.estimated_hours,
            },
        })
        .collect();

    let unlocks_two_or_more = blocking_ids.iter().any(|id| {
        graph
            .get(*id)
            .map(|n| would_unlock_at_least_two(graph, n))
            .unwrap_or(false)
    });

    let _ = agent;
    retry::compute_retry_after(now, &blockers, unlocks_two_or_more)
}

/// Incomplete dependencies of any TODO task: the set the RetryPlanner
/// should watch.
fn blocking_task_ids(graph: &TaskGraph) -> HashSet<Uuid> {
    let mut blockers = HashSet::new();
    for task in graph.all_tasks() {
        if task.status != TaskStatus::Todo {
            continue;
        }
        let Some(node) = graph.get(task.id) else { continue };
        for &dep_id in &node.dependencies {
            if let Some(dep_node) = graph.get(dep_id) {
                if dep_node.task.status != TaskStatus::Done {
                    blockers.insert(dep_id);
                }
            }
        }
    }
    blockers
}

/// Whether completing `blocker` would bring at least 2 of its dependents
/// to "all other dependencies already DONE".
fn would_unlock_at_least_two(graph: &TaskGraph, blocker: &TaskNode) -> bool {
    blocker
        .dependents
        .iter()
        .filter(|&&dependent_id| {
            graph
                .get(dependent_id)
                .map(|n| {
                    n.dependencies
                        .iter()
                        .filter(|&&d| d != blocker.task.id)
                        .all(|&d| {
                            graph
                                .get(d)
                                .map(|dn| dn.task.status == TaskStatus::Done)
                                .unwrap_or(true)
                        })
                })
                .unwrap_or(false)
        })
        .count()
        >= 2
}
