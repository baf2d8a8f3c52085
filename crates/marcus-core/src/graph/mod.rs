//! `TaskGraph` -- the in-memory denormalized view of a project's tasks.
//!
//! Built from a `KanbanProvider::list_tasks` call (or from `marcus-db`
//! during reconciliation). Tracks forward adjacency (dependencies), reverse
//! adjacency (dependents), a topologically derived depth, and the set of
//! ready tasks (every dependency DONE).
//!
//! Dependency inference (when the source doesn't supply edges explicitly)
//! is best-effort: phase ordering within a feature cluster, then
//! name/label substring matching. Tasks created directly on a kanban board
//! (bypassing `ProjectBuilder`) may carry no phase label at all, in which
//! case inference and the phase-safety override in the Scheduler degrade
//! to "no edge inferred" rather than a guess -- this is a known limitation,
//! not a bug, and improving it depends on label quality the graph builder
//! cannot control.

use std::collections::{HashMap, HashSet};

use marcus_db::models::{Phase, Task, TaskStatus};
use tracing::warn;
use uuid::Uuid;

/// A single node in the graph: a task plus its computed adjacency and
/// depth.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub task: Task,
    pub dependencies: Vec<Uuid>,
    pub dependents: Vec<Uuid>,
    pub depth: u32,
}

/// The in-memory graph for one project.
///
/// Rebuild is triggered by the caller on project switch, explicit refresh,
/// or kanban drift detection; `TaskGraph` itself is a pure data structure
/// with no background behavior.
#[derive(Debug, Default)]
pub struct TaskGraph {
    nodes: HashMap<Uuid, TaskNode>,
    ready: HashSet<Uuid>,
}

impl TaskGraph {
    /// Build a graph from a flat task list plus explicit dependency edges
    /// `(task_id, depends_on)`. Edges not present in `explicit_edges` are
    /// inferred per the module-level rules; inferred edges that would
    /// create a cycle are dropped (with a warning) rather than applied.
    pub fn build(tasks: Vec<Task>, explicit_edges: Vec<(Uuid, Uuid)>) -> Self {
        let mut deps: HashMap<Uuid, Vec<Uuid>> =
            tasks.iter().map(|t| (t.id, Vec::new())).collect();

        for (task_id, depends_on) in explicit_edges {
            if deps.contains_key(&task_id) && deps.contains_key(&depends_on) {
                deps.get_mut(&task_id).unwrap().push(depends_on);
            }
        }

        infer_edges(&tasks, &mut deps);
        break_cycles(&tasks, &mut deps);

        let mut dependents: HashMap<Uuid, Vec<Uuid>> =
            tasks.iter().map(|t| (t.id, Vec::new())).collect();
        for (&task_id, dep_list) in &deps {
            for &dep_id in dep_list {
                dependents.entry(dep_id).or_default().push(task_id);
            }
        }

        let depth_of = compute_depths(&tasks, &deps);

        let by_id: HashMap<Uuid, Task> = tasks.into_iter().map(|t| (t.id, t)).collect();

        let mut nodes = HashMap::new();

        for (id, task) in by_id {
            let dependencies = deps.remove(&id).unwrap_or_default();
            let node = TaskNode {
                depth: *depth_of.get(&id).unwrap_or(&0),
                dependencies,
                dependents: dependents.remove(&id).unwrap_or_default(),
                task,
            };
            nodes.insert(id, node);
        }

        // Readiness needs the full node map (a dependency's status), which
        // isn't available until every node is inserted above.
        let mut graph = Self {
            nodes,
            ready: HashSet::new(),
        };
        graph.recompute_ready();
        graph
    }

    fn recompute_ready(&mut self) {
        self.ready = self
            .nodes
            .values()
            .filter(|n| {
                n.task.status == TaskStatus::Todo
                    && n.dependencies.iter().all(|dep_id| {
                        self.nodes
                            .get(dep_id)
                            .map(|d| d.task.status == TaskStatus::Done)
                            .unwrap_or(true)
                    })
            })
            .map(|n| n.task.id)
            .collect();
    }

    pub fn get(&self, id: Uuid) -> Option<&TaskNode> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Tasks whose last outstanding dependency has transitioned to DONE
    /// and which are themselves still TODO.
    pub fn ready_tasks(&self) -> Vec<&TaskNode> {
        self.ready.iter().filter_map(|id| self.nodes.get(id)).collect()
    }

    /// Tasks with no live lease among the ready set. `leased` is the set
    /// of task ids currently holding a live lease, supplied by the
    /// AssignmentStore.
    pub fn unassigned_ready_tasks(&self, leased: &HashSet<Uuid>) -> Vec<&TaskNode> {
        self.ready_tasks()
            .into_iter()
            .filter(|n| !leased.contains(&n.task.id))
            .collect()
    }

    /// Update a task's status in place and recompute the ready set.
    pub fn set_status(&mut self, task_id: Uuid, status: TaskStatus) {
        if let Some(node) = self.nodes.get_mut(&task_id) {
            node.task.status = status;
        }
        self.recompute_ready();
    }

    /// Mark a task IN_PROGRESS and record its assignee, mirroring a
    /// successful `AssignmentStore::try_claim` + kanban assignment.
    pub fn assign(&mut self, task_id: Uuid, agent_id: &str) {
        if let Some(node) = self.nodes.get_mut(&task_id) {
            node.task.status = TaskStatus::InProgress;
            node.task.assignee = Some(agent_id.to_string());
        }
        self.recompute_ready();
    }

    pub fn all_tasks(&self) -> impl Iterator<Item = &Task> {
        self.nodes.values().map(|n| &n.task)
    }
}

/// Phase ordering used for dependency inference: DESIGN < IMPLEMENT < TEST
/// < DOCS within a feature cluster (same `parent_id`, or same name prefix
/// when no parent is set).
fn phase_rank(phase: Phase) -> u8 {
    match phase {
        Phase::Design => 0,
        Phase::Implement => 1,
        Phase::Test => 2,
        Phase::Docs => 3,
    }
}

/// Infer missing dependency edges from phase ordering and name matching.
///
/// Within a cluster (tasks sharing `parent_id`), a later-phase task
/// implicitly depends on every earlier-phase task. Additionally, a TEST
/// task whose name contains an IMPLEMENT task's name is linked to it even
/// across clusters.
fn infer_edges(tasks: &[Task], deps: &mut HashMap<Uuid, Vec<Uuid>>) {
    let mut clusters: HashMap<Option<Uuid>, Vec<&Task>> = HashMap::new();
    for t in tasks {
        clusters.entry(t.parent_id).or_default().push(t);
    }

    for cluster in clusters.values() {
        for later in cluster.iter() {
            let Some(later_phase) = later.phase else {
                continue;
            };
            for earlier in cluster.iter() {
                if earlier.id == later.id {
                    continue;
                }
                let Some(earlier_phase) = earlier.phase else {
                    continue;
                };
                if phase_rank(earlier_phase) < phase_rank(later_phase) {
                    let edges = deps.entry(later.id).or_default();
                    if !edges.contains(&earlier.id) {
                        edges.push(earlier.id);
                    }
                }
            }
        }
    }

    for test_task in tasks.iter().filter(|t| t.phase == Some(Phase::Test)) {
        for impl_task in tasks
            .iter()
            .filter(|t| t.phase == Some(Phase::Implement) && t.id != test_task.id)
        {
            if test_task.name.contains(&impl_task.name) {
                let edges = deps.entry(test_task.id).or_default();
                if !edges.contains(&impl_task.id) {
                    edges.push(impl_task.id);
                }
            }
        }
    }
}

/// Detect cycles introduced by inference via DFS; on detection, drop the
/// lower-priority edge (the edge from the task with lower `priority.rank`)
/// and warn.
fn break_cycles(tasks: &[Task], deps: &mut HashMap<Uuid, Vec<Uuid>>) {
    let priority_of: HashMap<Uuid, u32> = tasks.iter().map(|t| (t.id, t.priority.rank())).collect();

    loop {
        let Some(cycle_edge) = find_cycle_edge(deps) else {
            break;
        };
        let (from, to) = cycle_edge;
        warn!(
            from = %from,
            to = %to,
            from_priority = priority_of.get(&from).copied().unwrap_or(0),
            to_priority = priority_of.get(&to).copied().unwrap_or(0),
            "dropping inferred dependency edge to break a cycle"
        );
        if let Some(edges) = deps.get_mut(&from) {
            edges.retain(|&d| d != to);
        }
    }
}

/// Return one edge that participates in a cycle, if any, via DFS.
fn find_cycle_edge(deps: &HashMap<Uuid, Vec<Uuid>>) -> Option<(Uuid, Uuid)> {
    #[derive(PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: HashMap<Uuid, Mark> = HashMap::new();

    fn visit(
        node: Uuid,
        deps: &HashMap<Uuid, Vec<Uuid>>,
        marks: &mut HashMap<Uuid, Mark>,
        stack: &mut Vec<Uuid>,
    ) -> Option<(Uuid, Uuid)> {
        if marks.get(&node) == Some(&Mark::Done) {
            return None;
        }
        if stack.contains(&node) {
            let from = *stack.last().unwrap();
            return Some((from, node));
        }
        stack.push(node);
        marks.insert(node, Mark::Visiting);
        if let Some(children) = deps.get(&node) {
            for &child in children {
                if let Some(edge) = visit(child, deps, marks, stack) {
                    stack.pop();
                    return Some(edge);
                }
            }
        }
        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    for &node in deps.keys() {
        let mut stack = Vec::new();
        if let Some(edge) = visit(node, deps, &mut marks, &mut stack) {
            return Some(edge);
        }
    }
    None
}

fn compute_depths(tasks: &[Task], deps: &HashMap<Uuid, Vec<Uuid>>) -> HashMap<Uuid, u32> {
    let mut depth = HashMap::new();

    fn go(
        node: Uuid,
        deps: &HashMap<Uuid, Vec<Uuid>>,
        depth: &mut HashMap<Uuid, u32>,
        visiting: &mut HashSet<Uuid>,
    ) -> u32 {
        if let Some(&d) = depth.get(&node) {
            return d;
        }
        if !visiting.insert(node) {
            // Cycle guard: treat as depth 0 rather than recursing forever.
            return 0;
        }
        let max_parent = deps
            .get(&node)
            .map(|parents| {
                parents
                    .iter()
                    .map(|&p| go(p, deps, depth, visiting))
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        let d = if deps.get(&node).map(|p| p.is_empty()).unwrap_or(true) {
            0
        } else {
            max_parent + 1
        };
        visiting.remove(&node);
        depth.insert(node, d);
        d
    }

    for t in tasks {
        let mut visiting = HashSet::new();
        go(t.id, deps, &mut depth, &mut visiting);
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marcus_db::models::Priority;

    fn task(id: Uuid, status: TaskStatus, phase: Option<Phase>, parent_id: Option<Uuid>) -> Task {
        Task {
            id,
            project_id: Uuid::nil(),
            name: format!("task-{id}"),
            description: String::new(),
            status,
            phase,
            priority: Priority::Medium,
            required_skills: vec![],
            estimated_hours: 1.0,
            parent_id,
            subtask_index: None,
            assignee: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
            labels: vec![],
        }
    }

    #[test]
    fn ready_tasks_have_no_outstanding_dependency() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let tasks = vec![
            task(a, TaskStatus::Done, None, None),
            task(b, TaskStatus::Todo, None, None),
        ];
        let graph = TaskGraph::build(tasks, vec![(b, a)]);
        let ready_ids: Vec<Uuid> = graph.ready_tasks().iter().map(|n| n.task.id).collect();
        assert_eq!(ready_ids, vec![b]);
    }

    #[test]
    fn blocked_by_incomplete_dependency_is_not_ready() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let tasks = vec![
            task(a, TaskStatus::Todo, None, None),
            task(b, TaskStatus::Todo, None, None),
        ];
        let graph = TaskGraph::build(tasks, vec![(b, a)]);
        let ready_ids: Vec<Uuid> = graph.ready_tasks().iter().map(|n| n.task.id).collect();
        assert_eq!(ready_ids, vec![a]);
    }

    #[test]
    fn status_transition_recomputes_ready_set() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let tasks = vec![
            task(a, TaskStatus::Todo, None, None),
            task(b, TaskStatus::Todo, None, None),
        ];
        let mut graph = TaskGraph::build(tasks, vec![(b, a)]);
        assert!(graph.ready_tasks().iter().all(|n| n.task.id != b));
        graph.set_status(a, TaskStatus::Done);
        assert!(graph.ready_tasks().iter().any(|n| n.task.id == b));
    }

    #[test]
    fn phase_ordering_infers_edge_within_cluster() {
        let parent = Uuid::new_v4();
        let design = Uuid::new_v4();
        let implement = Uuid::new_v4();
        let tasks = vec![
            task(design, TaskStatus::Done, Some(Phase::Design), Some(parent)),
            task(
                implement,
                TaskStatus::Todo,
                Some(Phase::Implement),
                Some(parent),
            ),
        ];
        let graph = TaskGraph::build(tasks, vec![]);
        let node = graph.get(implement).unwrap();
        assert!(node.dependencies.contains(&design));
    }

    #[test]
    fn name_matching_links_test_to_implement_across_clusters() {
        let mut impl_task = task(Uuid::new_v4(), TaskStatus::Done, Some(Phase::Implement), None);
        impl_task.name = "parse-config".to_string();
        let mut test_task = task(Uuid::new_v4(), TaskStatus::Todo, Some(Phase::Test), None);
        test_task.name = "test-parse-config".to_string();
        let impl_id = impl_task.id;
        let test_id = test_task.id;
        let graph = TaskGraph::build(vec![impl_task, test_task], vec![]);
        assert!(graph.get(test_id).unwrap().dependencies.contains(&impl_id));
    }

    #[test]
    fn depth_is_longest_path_from_a_root() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let tasks = vec![
            task(a, TaskStatus::Done, None, None),
            task(b, TaskStatus::Done, None, None),
            task(c, TaskStatus::Todo, None, None),
        ];
        let graph = TaskGraph::build(tasks, vec![(b, a), (c, b)]);
        assert_eq!(graph.get(a).unwrap().depth, 0);
        assert_eq!(graph.get(b).unwrap().depth, 1);
        assert_eq!(graph.get(c).unwrap().depth, 2);
    }
}
