//! `ToolDispatcher` -- the transport-agnostic implementation of every MCP
//! tool call.
//!
//! Owns the pool of per-project `TaskGraph`s (each guarded by its own
//! `tokio::sync::RwLock` per the concurrency model) plus every coordination
//! kernel component, and exposes one async method per tool. `marcus-cli`'s
//! `rmcp` layer is a thin adapter: it deserializes tool arguments, calls the
//! matching method here, and serializes the result, never holding any state
//! of its own.
//!
//! The stdio MCP transport serves one session at a time, so the active
//! project selection used by `ProjectRegistry` is keyed by a single constant
//! caller id rather than a per-connection session id (see `DESIGN.md`).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use marcus_db::models::{ArtifactType, Priority, Project, ReleaseReason, Task, TaskStatus};
use marcus_db::queries::agents;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::artifact::ArtifactStore;
use crate::assignment::AssignmentStore;
use crate::circuit_breaker::CircuitBreaker;
use crate::context::ContextService;
use crate::decision::DecisionLog;
use crate::error::{MarcusError, Result};
use crate::graph::TaskGraph;
use crate::lease_monitor::LeaseMonitor;
use crate::project::builder::{ComplexityMode, FeatureComplexity, FeatureDraft, PrdParser};
use crate::project::{ProjectBuilder, ProjectRegistry};
use crate::provider::{KanbanProvider, ProviderRegistry};
use crate::scheduler::{self, Outcome, SchedulerContext};

/// The stdio transport serves exactly one MCP session, so there is exactly
/// one caller for `ProjectRegistry`'s active-project map.
const CALLER: &str = "default";

/// Deterministic fallback `PrdParser`: treats the whole description as one
/// `Coordinated`-complexity feature. Used when no AI-backed parser is
/// wired in, per the error-handling design's "LLM failure -> fallback
/// deterministic generation" recovery policy.
pub struct FallbackPrdParser;

#[async_trait::async_trait]
impl PrdParser for FallbackPrdParser {
    async fn parse(&self, description: &str) -> Result<Vec<FeatureDraft>> {
        if description.trim().is_empty() {
            return Err(MarcusError::Validation(
                "project description must not be empty".to_string(),
            ));
        }
        let name = description
            .split(|c: char| c == '.' || c == '\n')
            .next()
            .unwrap_or(description)
            .trim()
            .chars()
            .take(60)
            .collect::<String>();
        Ok(vec![FeatureDraft {
            name: if name.is_empty() { "feature".to_string() } else { name },
            description: description.to_string(),
            complexity: FeatureComplexity::Coordinated,
            required_skills: Vec::new(),
            estimated_hours: 4.0,
            priority: Priority::Medium,
        }])
    }
}

pub struct ToolDispatcher {
    pool: PgPool,
    assignments: Arc<AssignmentStore>,
    projects: ProjectRegistry,
    providers: ProviderRegistry,
    decisions: DecisionLog,
    artifacts: ArtifactStore,
    breaker: CircuitBreaker,
    graphs: RwLock<HashMap<Uuid, Arc<RwLock<TaskGraph>>>>,
    prd_parser: Box<dyn PrdParser>,
    started_at: DateTime<Utc>,
}

impl ToolDispatcher {
    pub fn new(pool: PgPool, workspace_root: impl Into<std::path::PathBuf>, providers: ProviderRegistry) -> Self {
        Self {
            assignments: Arc::new(AssignmentStore::new(pool.clone())),
            projects: ProjectRegistry::new(pool.clone()),
            providers,
            decisions: DecisionLog::new(pool.clone()),
            artifacts: ArtifactStore::new(pool.clone(), workspace_root),
            breaker: CircuitBreaker::new(),
            graphs: RwLock::new(HashMap::new()),
            prd_parser: Box::new(FallbackPrdParser),
            pool,
            started_at: Utc::now(),
        }
    }

    pub fn assignments(&self) -> Arc<AssignmentStore> {
        self.assignments.clone()
    }

    fn provider_for(&self, project: &Project) -> Result<&dyn KanbanProvider> {
        self.providers
            .get(&project.provider)
            .ok_or_else(|| MarcusError::Configuration(format!("unknown provider {:?}", project.provider)))
    }

    /// The cached `TaskGraph` for a project, rebuilding it from `marcus-db`
    /// on first use. Rebuild is otherwise only triggered explicitly (project
    /// switch already discards nothing -- graphs for inactive projects stay
    /// cached so switching back doesn't pay rebuild cost again).
    async fn graph_for(&self, project_id: Uuid) -> Result<Arc<RwLock<TaskGraph>>> {
        if let Some(g) = self.graphs.read().await.get(&project_id) {
            return Ok(g.clone());
        }
        let mut graphs = self.graphs.write().await;
        if let Some(g) = graphs.get(&project_id) {
            return Ok(g.clone());
        }
        let tasks = marcus_db::queries::tasks::list_tasks_for_project(&self.pool, project_id)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))?;
        let deps = marcus_db::queries::tasks::get_all_dependencies_for_project(&self.pool, project_id)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))?;
        let graph = Arc::new(RwLock::new(TaskGraph::build(tasks, deps)));
        graphs.insert(project_id, graph.clone());
        Ok(graph)
    }

    fn invalidate_graph_sync(graphs: &mut HashMap<Uuid, Arc<RwLock<TaskGraph>>>, project_id: Uuid) {
        graphs.remove(&project_id);
    }

    async fn require_agent(&self, agent_id: &str) -> Result<marcus_db::models::Agent> {
        agents::touch_agent(&self.pool, agent_id)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))?;
        agents::get_agent(&self.pool, agent_id)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))?
            .ok_or_else(|| MarcusError::AgentNotRegistered(agent_id.to_string()))
    }

    async fn require_task(&self, task_id: Uuid) -> Result<Task> {
        marcus_db::queries::tasks::get_task(&self.pool, task_id)
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))?
            .ok_or(MarcusError::TaskNotFound(task_id))
    }

    // -- register_agent --------------------------------------------------

    pub async fn register_agent(
        &self,
        agent_id: &str,
        name: &str,
        role: &str,
        skills: Vec<String>,
    ) -> Result<serde_json::Value> {
        let agent = agents::upsert_agent(&self.pool, agent_id, name, role, &skills, 1)
            .await
            .map_err(|e| MarcusError::Validation(e.to_string()))?;
        Ok(serde_json::json!({"ok": true, "agent": agent}))
    }

    // -- request_next_task ------------------------------------------------

    pub async fn request_next_task(&self, agent_id: &str) -> Result<serde_json::Value> {
        let agent = self.require_agent(agent_id).await?;
        let project = self.projects.get_active(CALLER).await?;
        let provider = self.provider_for(&project)?;
        let graph_lock = self.graph_for(project.id).await?;

        let mut graph = graph_lock.write().await;
        let ctx = SchedulerContext {
            project_id: project.id,
            pool: &self.pool,
            graph: &mut graph,
            assignments: &self.assignments,
            provider,
            breaker: &self.breaker,
            decisions: &self.decisions,
            artifacts: &self.artifacts,
        };
        let outcome = scheduler::pick_next_task(ctx, &agent).await?;

        Ok(match outcome {
            Outcome::Assigned(a) => serde_json::json!({
                "ok": true,
                "task": a.task,
                "preamble": a.preamble,
            }),
            Outcome::NoTask { retry_after_seconds, reason } => serde_json::json!({
                "ok": false,
                "retry_after_seconds": retry_after_seconds,
                "reason": reason,
            }),
        })
    }

    // -- report_task_progress ---------------------------------------------

    pub async fn report_task_progress(
        &self,
        agent_id: &str,
        task_id: Uuid,
        status: &str,
        _progress: Option<f64>,
        message: Option<String>,
    ) -> Result<serde_json::Value> {
        let task = self.require_task(task_id).await?;

        // A prior `completed` call already released the lease; a retry or
        // duplicate report must still succeed rather than fail ownership.
        if status == "completed" && task.status == TaskStatus::Done {
            return Ok(serde_json::json!({"ok": true}));
        }

        self.assignments.assert_owner(task_id, agent_id).await?;
        let project = self.projects.get(task.project_id).await?;
        let provider = self.provider_for(&project)?;

        match status {
            "in_progress" => {
                if let Some(msg) = message {
                    tracing::info!(task_id = %task_id, agent_id, msg, "task progress update");
                }
            }
            "blocked" => {
                self.transition(&task, provider, TaskStatus::Blocked).await?;
            }
            "completed" => {
                self.transition(&task, provider, TaskStatus::Done).await?;
                self.assignments.release(task_id, ReleaseReason::Completed).await?;
                provider.unassign_task(task_id).await.ok();
                let graph_lock = self.graph_for(task.project_id).await?;
                graph_lock.write().await.set_status(task_id, TaskStatus::Done);
            }
            other => {
                return Err(MarcusError::Validation(format!("unknown status {other:?}")));
            }
        }

        Ok(serde_json::json!({"ok": true}))
    }

    async fn transition(&self, task: &Task, provider: &dyn KanbanProvider, to: TaskStatus) -> Result<()> {
        marcus_db::queries::tasks::transition_task_status(
            &self.pool,
            task.id,
            task.status,
            to,
            task.assignee.as_deref(),
            None,
            if to == TaskStatus::Done { Some(Utc::now()) } else { None },
        )
        .await
        .map_err(|e| MarcusError::Internal(e.to_string()))?;
        if let Err(e) = provider.update_status(task.id, to).await {
            tracing::warn!(task_id = %task.id, error = %e, "failed to mirror status to provider");
        }
        let graph_lock = self.graph_for(task.project_id).await?;
        graph_lock.write().await.set_status(task.id, to);
        Ok(())
    }

    // -- report_blocker -----------------------------------------------------

    pub async fn report_blocker(
        &self,
        agent_id: &str,
        task_id: Uuid,
        description: &str,
        severity: &str,
    ) -> Result<serde_json::Value> {
        self.assignments.assert_owner(task_id, agent_id).await?;
        let task = self.require_task(task_id).await?;
        let project = self.projects.get(task.project_id).await?;
        let provider = self.provider_for(&project)?;
        self.transition(&task, provider, TaskStatus::Blocked).await?;

        tracing::warn!(task_id = %task_id, agent_id, severity, description, "agent reported a blocker");

        let mut suggestions = vec![
            "check get_task_context for prior decisions from dependency tasks".to_string(),
            "use log_decision to record the blocker's root cause for other agents".to_string(),
        ];
        if severity == "critical" {
            suggestions.push("consider release_task so another agent can attempt it".to_string());
        }

        Ok(serde_json::json!({"ok": true, "suggestions": suggestions}))
    }

    // -- release_task -------------------------------------------------------

    pub async fn release_task(&self, agent_id: &str, task_id: Uuid) -> Result<serde_json::Value> {
        self.assignments.assert_owner(task_id, agent_id).await?;
        let task = self.require_task(task_id).await?;
        let project = self.projects.get(task.project_id).await?;
        let provider = self.provider_for(&project)?;

        self.assignments.release(task_id, ReleaseReason::Cancelled).await?;
        if let Err(e) = provider.unassign_task(task_id).await {
            tracing::warn!(task_id = %task_id, error = %e, "failed to unassign on release");
        }
        self.transition(&task, provider, TaskStatus::Todo).await?;
        let graph_lock = self.graph_for(task.project_id).await?;
        graph_lock.write().await.set_status(task_id, TaskStatus::Todo);

        Ok(serde_json::json!({"ok": true}))
    }

    // -- log_decision -------------------------------------------------------

    pub async fn log_decision(
        &self,
        agent_id: &str,
        task_id: Uuid,
        what: String,
        why: String,
        impact: String,
        affects_tasks: Vec<Uuid>,
    ) -> Result<serde_json::Value> {
        let task = self.require_task(task_id).await?;
        let project = self.projects.get(task.project_id).await?;
        let provider = self.provider_for(&project)?;
        let decision = self
            .decisions
            .log_decision(
                &self.assignments,
                provider,
                task.project_id,
                task_id,
                agent_id,
                what,
                why,
                impact,
                affects_tasks,
            )
            .await?;
        Ok(serde_json::json!({"ok": true, "decision_id": decision.id}))
    }

    // -- log_artifact -------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn log_artifact(
        &self,
        agent_id: &str,
        task_id: Uuid,
        filename: &str,
        artifact_type: &str,
        content: &str,
        description: &str,
    ) -> Result<serde_json::Value> {
        let task = self.require_task(task_id).await?;
        let artifact_type: ArtifactType = artifact_type
            .parse()
            .map_err(|e: marcus_db::models::ArtifactTypeParseError| MarcusError::Validation(e.to_string()))?;

        let logged = self
            .artifacts
            .log_artifact(
                &self.assignments,
                task.project_id,
                task_id,
                agent_id,
                filename,
                artifact_type,
                content.as_bytes(),
                description,
            )
            .await?;

        Ok(serde_json::json!({
            "ok": true,
            "artifact_id": logged.artifact.id,
            "path": logged.artifact.relative_path,
        }))
    }

    // -- get_task_context ---------------------------------------------------

    pub async fn get_task_context(&self, task_id: Uuid) -> Result<serde_json::Value> {
        let task = self.require_task(task_id).await?;
        let project = self.projects.get(task.project_id).await?;
        let provider = self.provider_for(&project)?;
        let graph_lock = self.graph_for(task.project_id).await?;
        let graph = graph_lock.read().await;
        let preamble =
            ContextService::build_preamble(&graph, &self.decisions, &self.artifacts, provider, task_id)
                .await?;
        Ok(serde_json::json!({"ok": true, "preamble": preamble}))
    }

    // -- create_project -----------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn create_project(
        &self,
        description: &str,
        project_name: &str,
        complexity: &str,
        provider_name: &str,
        existing_project_id: Option<Uuid>,
        mode: &str,
    ) -> Result<serde_json::Value> {
        let complexity_mode = match complexity {
            "prototype" => ComplexityMode::Prototype,
            "standard" | "" => ComplexityMode::Standard,
            "enterprise" => ComplexityMode::Enterprise,
            other => {
                return Err(MarcusError::Validation(format!(
                    "unknown complexity {other:?}"
                )))
            }
        };

        let resolved_existing = match mode {
            "new_project" => None,
            "add_feature" => Some(existing_project_id.ok_or_else(|| {
                MarcusError::Validation("add_feature mode requires options.project_id".to_string())
            })?),
            "auto" | "" => match existing_project_id {
                Some(id) => Some(id),
                None => self.projects.find_by_name(project_name).await?.map(|p| p.id),
            },
            other => return Err(MarcusError::Validation(format!("unknown mode {other:?}"))),
        };
        let action = if resolved_existing.is_some() { "tasks_added" } else { "project_created" };

        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| MarcusError::Configuration(format!("unknown provider {provider_name:?}")))?;

        let builder = ProjectBuilder::new(&self.pool, &self.projects);
        let result = builder
            .build(
                self.prd_parser.as_ref(),
                provider,
                description,
                project_name,
                provider_name,
                &serde_json::json!({}),
                complexity_mode,
                resolved_existing,
            )
            .await?;

        self.projects.switch(CALLER, result.project_id).await?;
        {
            let mut graphs = self.graphs.write().await;
            Self::invalidate_graph_sync(&mut graphs, result.project_id);
        }
        let graph_lock = self.graph_for(result.project_id).await?;
        *graph_lock.write().await = result.graph;

        let project = self.projects.get(result.project_id).await?;
        Ok(serde_json::json!({
            "ok": true,
            "action": action,
            "project": project,
            "tasks_created": result.tasks_created,
        }))
    }

    // -- add_project --------------------------------------------------------

    pub async fn add_project(
        &self,
        name: &str,
        provider: &str,
        config: serde_json::Value,
    ) -> Result<serde_json::Value> {
        if self.providers.get(provider).is_none() {
            return Err(MarcusError::Configuration(format!("unknown provider {provider:?}")));
        }
        let project = self.projects.add(name, provider, &config).await?;
        Ok(serde_json::json!({"ok": true, "project": project}))
    }

    // -- list_projects -------------------------------------------------------

    pub async fn list_projects(&self) -> Result<serde_json::Value> {
        let projects = self.projects.list().await?;
        Ok(serde_json::json!({"ok": true, "projects": projects}))
    }

    // -- switch_project -------------------------------------------------------

    pub async fn switch_project(&self, project_id: Uuid) -> Result<serde_json::Value> {
        let project = self.projects.switch(CALLER, project_id).await?;
        Ok(serde_json::json!({"ok": true, "project": project}))
    }

    // -- get_current_project ---------------------------------------------------

    pub async fn get_current_project(&self) -> Result<serde_json::Value> {
        match self.projects.get_active(CALLER).await {
            Ok(project) => Ok(serde_json::json!({"ok": true, "project": project})),
            Err(MarcusError::NoActiveProject) => Ok(serde_json::json!({
                "ok": false,
                "hint": MarcusError::NoActiveProject.hint(),
            })),
            Err(e) => Err(e),
        }
    }

    // -- find_or_create_project --------------------------------------------------

    pub async fn find_or_create_project(
        &self,
        project_name: &str,
        create_if_missing: bool,
    ) -> Result<serde_json::Value> {
        if let Some(project) = self.projects.find_by_name(project_name).await? {
            self.projects.switch(CALLER, project.id).await?;
            return Ok(serde_json::json!({"ok": true, "action": "found_existing", "project": project}));
        }

        let all = self.projects.list().await?;
        let needle = project_name.to_lowercase();
        let similar: Vec<&Project> = all
            .iter()
            .filter(|p| p.name.to_lowercase().contains(&needle) || needle.contains(&p.name.to_lowercase()))
            .collect();
        if let Some(candidate) = similar.first() {
            return Ok(serde_json::json!({
                "ok": true,
                "action": "found_similar",
                "project": candidate,
            }));
        }

        if create_if_missing {
            return Ok(serde_json::json!({
                "ok": true,
                "action": "guide_creation",
                "hint": "call create_project with a description to generate tasks for this project",
            }));
        }

        Ok(serde_json::json!({"ok": true, "action": "not_found"}))
    }

    // -- ping ----------------------------------------------------------------

    pub fn ping(&self) -> serde_json::Value {
        let uptime = (Utc::now() - self.started_at).num_seconds().max(0);
        serde_json::json!({
            "ok": true,
            "uptime": uptime,
            "version": env!("CARGO_PKG_VERSION"),
        })
    }

    /// Run the lease reaper forever, sweeping every registered project's
    /// provider each tick. Intended to be spawned once by the server
    /// bootstrap alongside the MCP transport.
    pub async fn run_lease_monitor(&self, tick: std::time::Duration) {
        let monitor = LeaseMonitor::new(self.assignments.clone(), self.pool.clone());
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            let projects = match self.projects.list().await {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "lease monitor failed to list projects");
                    continue;
                }
            };
            for project in projects {
                let provider = match self.provider_for(&project) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(project_id = %project.id, error = %e, "lease monitor skipping project with unknown provider");
                        continue;
                    }
                };
                match monitor.reap_once(provider).await {
                    Ok(report) if !report.reclaimed.is_empty() => {
                        tracing::info!(project_id = %project.id, reclaimed = report.reclaimed.len(), "lease monitor reclaimed expired leases");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(project_id = %project.id, error = %e, "lease monitor tick failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fallback_parser_rejects_empty_description() {
        let parser = FallbackPrdParser;
        assert!(parser.parse("   ").await.is_err());
    }

    #[tokio::test]
    async fn fallback_parser_derives_name_from_first_sentence() {
        let parser = FallbackPrdParser;
        let drafts = parser.parse("Add dark mode. It should persist per-user.").await.unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].name, "Add dark mode");
        assert_eq!(drafts[0].complexity, FeatureComplexity::Coordinated);
    }
}
