//! `ProjectBuilder` -- the natural-language project creation pipeline.
//!
//! Drives an external `PrdParser` to turn a description into task drafts,
//! selects a task pattern per (feature-complexity, mode) from a fixed
//! matrix, extracts technical constraints as labels, persists tasks in a
//! single transaction, mirrors them to the kanban board, and rebuilds the
//! TaskGraph.

use std::collections::HashMap;

use async_trait::async_trait;
use marcus_db::models::{Phase, Priority, Task};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{MarcusError, Result};
use crate::graph::TaskGraph;
use crate::project::registry::ProjectRegistry;
use crate::provider::{KanbanProvider, TaskSpec};

/// Overall delivery rigor selected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexityMode {
    Prototype,
    Standard,
    Enterprise,
}

/// Per-feature complexity, as inferred by the `PrdParser`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureComplexity {
    Atomic,
    Simple,
    Coordinated,
    Distributed,
}

/// One feature extracted from the project description.
#[derive(Debug, Clone)]
pub struct FeatureDraft {
    pub name: String,
    pub description: String,
    pub complexity: FeatureComplexity,
    pub required_skills: Vec<String>,
    pub estimated_hours: f64,
    pub priority: Priority,
}

/// External natural-language-to-tasks capability. Marcus does not
/// implement PRD parsing itself; this trait is the seam an AI-backed
/// implementation plugs into.
#[async_trait]
pub trait PrdParser: Send + Sync {
    async fn parse(&self, description: &str) -> Result<Vec<FeatureDraft>>;
}

/// Fixed (feature-complexity, mode) -> phase-pattern matrix.
fn task_pattern(complexity: FeatureComplexity, mode: ComplexityMode) -> Vec<Phase> {
    use ComplexityMode::*;
    use FeatureComplexity::*;
    use Phase::*;

    match (complexity, mode) {
        (Atomic, Prototype) => vec![Implement],
        (Atomic, Standard) => vec![Implement, Test],
        (Atomic, Enterprise) => vec![Design, Implement, Test, Docs],

        (Simple, Prototype) => vec![Implement],
        (Simple, Standard) => vec![Implement, Test],
        (Simple, Enterprise) => vec![Design, Implement, Test, Docs],

        (Coordinated, Prototype) => vec![Implement, Test],
        (Coordinated, Standard) => vec![Design, Implement, Test],
        (Coordinated, Enterprise) => vec![Design, Implement, Test, Docs],

        (Distributed, Prototype) => vec![Design, Implement, Test],
        (Distributed, Standard) => vec![Design, Implement, Test, Docs],
        (Distributed, Enterprise) => vec![Design, Implement, Test, Docs],
    }
}

/// Known technical-constraint tokens, attached verbatim as labels on every
/// generated task so prompts reaching agents carry them.
const CONSTRAINT_TOKENS: &[&str] = &[
    "vanilla-js",
    "no-frameworks",
    "no-orm",
    "no-build-step",
    "serverless",
    "offline-first",
];

fn extract_constraints(description: &str) -> Vec<String> {
    let lower = description.to_lowercase();
    CONSTRAINT_TOKENS
        .iter()
        .filter(|token| lower.contains(*token))
        .map(|token| token.to_string())
        .collect()
}

pub struct ProjectBuilder<'a> {
    pool: &'a PgPool,
    registry: &'a ProjectRegistry,
}

#[derive(Debug, Clone)]
pub struct BuildResult {
    pub project_id: Uuid,
    pub tasks_created: usize,
    pub graph: TaskGraph,
}

impl<'a> ProjectBuilder<'a> {
    pub fn new(pool: &'a PgPool, registry: &'a ProjectRegistry) -> Self {
        Self { pool, registry }
    }

    /// Build (or extend) a project from a natural-language description.
    ///
    /// When `existing_project_id` is set, steps 1-4 still run but
    /// generated tasks are appended to the existing board/project instead
    /// of creating a new one.
    pub async fn build(
        &self,
        parser: &dyn PrdParser,
        provider: &dyn KanbanProvider,
        description: &str,
        project_name: &str,
        provider_name: &str,
        provider_config: &serde_json::Value,
        mode: ComplexityMode,
        existing_project_id: Option<Uuid>,
    ) -> Result<BuildResult> {
        let features = parser.parse(description).await?;
        if features.is_empty() {
            return Err(MarcusError::Validation(
                "PRD parser returned no features".to_string(),
            ));
        }

        let constraints = extract_constraints(description);

        let project = match existing_project_id {
            Some(id) => self.registry.get(id).await?,
            None => {
                self.registry
                    .add(project_name, provider_name, provider_config)
                    .await?
            }
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))?;

        let mut created_tasks: Vec<Task> = Vec::new();
        let mut phase_id_by_feature: HashMap<(String, Phase), Uuid> = HashMap::new();

        for feature in &features {
            let pattern = task_pattern(feature.complexity, mode);
            for (index, &phase) in pattern.iter().enumerate() {
                let name = format!("{} - {phase}", feature.name);
                let task = sqlx::query_as::<_, Task>(
                    "INSERT INTO tasks \
                        (project_id, name, description, status, phase, priority, \
                         required_skills, estimated_hours, subtask_index, labels) \
                     VALUES ($1, $2, $3, 'todo', $4, $5, $6, $7, $8, $9) \
                     RETURNING *",
                )
                .bind(project.id)
                .bind(&name)
                .bind(&feature.description)
                .bind(phase)
                .bind(feature.priority)
                .bind(&feature.required_skills)
                .bind(feature.estimated_hours)
                .bind(index as i32)
                .bind(&constraints)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| MarcusError::Internal(format!("failed to insert task {name:?}: {e}")))?;

                phase_id_by_feature.insert((feature.name.clone(), phase), task.id);
                created_tasks.push(task);
            }

            // Explicit phase-ordering dependency edges within the
            // feature, matching the DESIGN < IMPLEMENT < TEST < DOCS
            // inference rule the TaskGraph would otherwise have to guess.
            for window in pattern.windows(2) {
                let (earlier, later) = (window[0], window[1]);
                let earlier_id = phase_id_by_feature[&(feature.name.clone(), earlier)];
                let later_id = phase_id_by_feature[&(feature.name.clone(), later)];
                sqlx::query(
                    "INSERT INTO task_dependencies (task_id, depends_on) VALUES ($1, $2) \
                     ON CONFLICT DO NOTHING",
                )
                .bind(later_id)
                .bind(earlier_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| MarcusError::Internal(e.to_string()))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| MarcusError::Internal(e.to_string()))?;

        // Mirror to the kanban board. Failures here are integration
        // errors; the local rows already committed are the source of
        // truth for the graph rebuild regardless.
        for task in &created_tasks {
            let spec = TaskSpec {
                name: task.name.clone(),
                description: task.description.clone(),
                phase: task.phase,
                priority: task.priority,
                required_skills: task.required_skills.clone(),
                estimated_hours: task.estimated_hours,
                parent_id: task.parent_id,
                subtask_index: task.subtask_index,
                labels: constraints.clone(),
            };
            if let Err(e) = provider.create_task(project.id, &spec).await {
                tracing::warn!(task_id = %task.id, error = %e, "failed to mirror created task to kanban provider");
            }
        }

        let dependencies = marcus_db::queries::tasks::get_all_dependencies_for_project(
            self.pool, project.id,
        )
        .await
        .map_err(|e| MarcusError::Internal(e.to_string()))?;

        let graph = TaskGraph::build(created_tasks.clone(), dependencies);

        Ok(BuildResult {
            project_id: project.id,
            tasks_created: created_tasks.len(),
            graph,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_prototype_is_implement_only() {
        assert_eq!(
            task_pattern(FeatureComplexity::Atomic, ComplexityMode::Prototype),
            vec![Phase::Implement]
        );
    }

    #[test]
    fn simple_standard_is_implement_and_test() {
        assert_eq!(
            task_pattern(FeatureComplexity::Simple, ComplexityMode::Standard),
            vec![Phase::Implement, Phase::Test]
        );
    }

    #[test]
    fn coordinated_standard_includes_design() {
        assert_eq!(
            task_pattern(FeatureComplexity::Coordinated, ComplexityMode::Standard),
            vec![Phase::Design, Phase::Implement, Phase::Test]
        );
    }

    #[test]
    fn enterprise_mode_always_includes_docs() {
        for complexity in [
            FeatureComplexity::Atomic,
            FeatureComplexity::Simple,
            FeatureComplexity::Coordinated,
            FeatureComplexity::Distributed,
        ] {
            assert!(task_pattern(complexity, ComplexityMode::Enterprise).contains(&Phase::Docs));
        }
    }

    #[test]
    fn extracts_known_constraint_tokens() {
        let constraints = extract_constraints("Build this with Vanilla-JS and no-orm access.");
        assert!(constraints.contains(&"vanilla-js".to_string()));
        assert!(constraints.contains(&"no-orm".to_string()));
        assert!(!constraints.contains(&"serverless".to_string()));
    }

    #[test]
    fn no_constraints_found_returns_empty() {
        assert!(extract_constraints("A perfectly ordinary web app.").is_empty());
    }
}
