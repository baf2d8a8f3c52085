//! `ContextService` -- assembles the task preamble handed to an agent at
//! assignment time.
//!
//! Joins dependency artifacts (transitively to depth 2), sibling and
//! dependency decisions, the parent task's decomposition conventions, and
//! up to 3 recent code references from the provider, then renders a capped
//! text preamble so agents start with the context they need without being
//! handed the entire project history.

use std::collections::{HashSet, VecDeque};

use marcus_db::models::{Artifact, ArtifactType, Decision, Phase, Task};
use uuid::Uuid;

use crate::artifact::ArtifactStore;
use crate::decision::DecisionLog;
use crate::error::Result;
use crate::graph::TaskGraph;
use crate::provider::KanbanProvider;

/// Preambles are capped at 16 KiB of rendered text; older/less-relevant
/// entries are dropped first to make room.
pub const PREAMBLE_CAP_BYTES: usize = 16 * 1024;

const MAX_DEPENDENCY_DEPTH: u32 = 2;
const MAX_CODE_REFERENCES: usize = 3;

pub struct ContextService;

impl ContextService {
    /// Build the preamble for `task_id`. `graph` must already contain the
    /// task (it was just claimed, so its TaskGraph entry is current).
    pub async fn build_preamble(
        graph: &TaskGraph,
        decisions: &DecisionLog,
        artifacts: &ArtifactStore,
        provider: &dyn KanbanProvider,
        task_id: Uuid,
    ) -> Result<String> {
        let Some(node) = graph.get(task_id) else {
            return Ok(String::new());
        };
        let task = node.task.clone();

        let dep_ids = transitive_dependencies(graph, task_id, MAX_DEPENDENCY_DEPTH);

        let mut artifact_rows = artifacts.list_for_tasks(&dep_ids).await?;
        reorder_by_relevance(&mut artifact_rows, task.phase);

        let mut decision_rows = Vec::new();
        for &dep_id in &dep_ids {
            decision_rows.extend(decisions.list_for_task(dep_id).await?);
        }
        if let Some(parent_id) = task.parent_id {
            let siblings = sibling_ids(graph, parent_id, task_id);
            if !siblings.is_empty() {
                decision_rows.extend(decisions.list_affecting(&siblings, task_id).await?);
            }
        }
        decision_rows.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        dedup_decisions(&mut decision_rows);

        let parent_conventions = match task.parent_id {
            Some(parent_id) => graph.get(parent_id).map(|n| n.task.clone()),
            None => None,
        };

        let code_references = provider
            .recent_code_references(task_id)
            .await
            .unwrap_or_default();
        let code_references: Vec<String> =
            code_references.into_iter().take(MAX_CODE_REFERENCES).collect();

        let preamble = render(
            &task,
            &artifact_rows,
            &decision_rows,
            parent_conventions.as_ref(),
            &code_references,
        );

        Ok(cap_preamble(preamble))
    }
}

/// BFS over `dependencies` edges up to `max_depth`, not including the task
/// itself.
fn transitive_dependencies(graph: &TaskGraph, task_id: Uuid, max_depth: u32) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back((task_id, 0u32));
    let mut result = Vec::new();

    while let Some((id, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let Some(node) = graph.get(id) else { continue };
        for &dep_id in &node.dependencies {
            if seen.insert(dep_id) {
                result.push(dep_id);
                queue.push_back((dep_id, depth + 1));
            }
        }
    }
    result
}

fn sibling_ids(graph: &TaskGraph, parent_id: Uuid, exclude: Uuid) -> Vec<Uuid> {
    graph
        .all_tasks()
        .filter(|t| t.parent_id == Some(parent_id) && t.id != exclude)
        .map(|t| t.id)
        .collect()
}

/// Type-relevance hints: an IMPLEMENT task preferentially gets API/DESIGN
/// artifacts first; a TEST task preferentially gets SPECIFICATION first.
/// `list_artifacts_for_tasks` already orders API < DESIGN < ARCHITECTURE <
/// SPECIFICATION < other; TEST tasks get that order reversed at the front.
fn reorder_by_relevance(artifacts: &mut [Artifact], phase: Option<Phase>) {
    if phase == Some(Phase::Test) {
        artifacts.sort_by_key(|a| a.artifact_type != ArtifactType::Specification);
    }
}

fn dedup_decisions(decisions: &mut Vec<Decision>) {
    let mut seen = HashSet::new();
    decisions.retain(|d| seen.insert(d.id));
}

fn render(
    task: &Task,
    artifacts: &[Artifact],
    decisions: &[Decision],
    parent: Option<&Task>,
    code_references: &[String],
) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Context for: {}\n\n", task.name));
    if !task.description.is_empty() {
        out.push_str(&task.description);
        out.push_str("\n\n");
    }

    if !task.labels.is_empty() {
        out.push_str(&format!("Constraints: {}\n\n", task.labels.join(", ")));
    }

    if let Some(parent) = parent {
        out.push_str("## Shared conventions (from parent task)\n\n");
        out.push_str(&parent.description);
        out.push_str("\n\n");
    }

    if !artifacts.is_empty() {
        out.push_str("## Dependency artifacts\n\n");
        for a in artifacts {
            out.push_str(&format!(
                "- [{:?}] {} ({})\n",
                a.artifact_type, a.filename, a.relative_path
            ));
        }
        out.push('\n');
    }

    if !decisions.is_empty() {
        out.push_str("## Relevant decisions\n\n");
        for d in decisions {
            out.push_str(&format!(
                "- **{}**: {}\n  why: {}\n  impact: {}\n",
                d.agent_id, d.what, d.why, d.impact
            ));
        }
        out.push('\n');
    }

    if !code_references.is_empty() {
        out.push_str("## Prior implementations\n\n");
        for r in code_references {
            out.push_str(&format!("- {r}\n"));
        }
        out.push('\n');
    }

    out
}

/// Truncate to the cap, dropping from the end (the least relevant
/// sections render last: prior implementations, then decisions, then
/// artifacts) while keeping the output valid UTF-8.
fn cap_preamble(mut preamble: String) -> String {
    if preamble.len() <= PREAMBLE_CAP_BYTES {
        return preamble;
    }
    while preamble.len() > PREAMBLE_CAP_BYTES && !preamble.is_empty() {
        preamble.pop();
    }
    preamble.push_str("\n\n[preamble truncated to fit the size cap]\n");
    preamble
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_preamble_leaves_short_text_untouched() {
        let text = "hello".to_string();
        assert_eq!(cap_preamble(text.clone()), text);
    }

    #[test]
    fn cap_preamble_truncates_long_text() {
        let text = "x".repeat(PREAMBLE_CAP_BYTES * 2);
        let capped = cap_preamble(text);
        assert!(capped.len() <= PREAMBLE_CAP_BYTES + 200);
        assert!(capped.contains("truncated"));
    }

    #[test]
    fn dedup_decisions_removes_repeats() {
        use chrono::Utc;
        let d = Decision {
            id: Uuid::new_v4(),
            project_id: Uuid::nil(),
            task_id: Uuid::nil(),
            agent_id: "a".into(),
            what: "x".into(),
            why: "y".into(),
            impact: "z".into(),
            affects_tasks: vec![],
            recorded_at: Utc::now(),
        };
        let mut v = vec![d.clone(), d];
        dedup_decisions(&mut v);
        assert_eq!(v.len(), 1);
    }
}
