//! End-to-end coordination scenarios driven through `ToolDispatcher`
//! against a real PostgreSQL database.
//!
//! Each test creates a unique temporary database inside a shared
//! containerized PostgreSQL instance (via testcontainers), runs
//! migrations, and drops it on completion so tests are fully isolated.
//! Tasks and dependencies are seeded directly against `marcus-db` rather
//! than through `create_project`'s PRD parser, so each scenario controls
//! its graph shape exactly.

use sqlx::PgPool;
use uuid::Uuid;

use marcus_core::dispatcher::ToolDispatcher;
use marcus_core::lease_monitor::LeaseMonitor;
use marcus_core::provider::{LocalProvider, ProviderRegistry};
use marcus_db::models::{Phase, Priority, Task, TaskStatus};
use marcus_db::queries::{agents, projects, tasks};

use marcus_test_utils::{create_test_db, drop_test_db};

struct Harness {
    pool: PgPool,
    db_name: String,
    dispatcher: ToolDispatcher,
    project_id: Uuid,
    workdir: tempfile::TempDir,
}

impl Harness {
    async fn new() -> Self {
        let (pool, db_name) = create_test_db().await;

        let project = projects::insert_project(&pool, "coordination test", "local", &serde_json::json!({}))
            .await
            .expect("insert project should succeed");

        let mut providers = ProviderRegistry::new();
        providers.register(LocalProvider::new(pool.clone()));

        let workdir = tempfile::tempdir().expect("tempdir should succeed");
        let dispatcher = ToolDispatcher::new(pool.clone(), workdir.path(), providers);

        dispatcher
            .switch_project(project.id)
            .await
            .expect("switching to the seeded project should succeed");

        Self {
            pool,
            db_name,
            dispatcher,
            project_id: project.id,
            workdir,
        }
    }

    async fn seed_task(
        &self,
        name: &str,
        phase: Phase,
        priority: Priority,
        parent_id: Option<Uuid>,
    ) -> Task {
        tasks::insert_task(
            &self.pool,
            self.project_id,
            name,
            "",
            Some(phase),
            priority,
            &[],
            1.0,
            parent_id,
            None,
        )
        .await
        .expect("insert task should succeed")
    }

    async fn seed_dependency(&self, task_id: Uuid, depends_on: Uuid) {
        tasks::insert_task_dependency(&self.pool, task_id, depends_on)
            .await
            .expect("insert dependency should succeed");
    }

    async fn register_agent(&self, id: &str) {
        self.dispatcher
            .register_agent(id, id, "implementer", vec![])
            .await
            .expect("register_agent should succeed");
    }

    async fn teardown(self) {
        self.pool.close().await;
        drop_test_db(&self.db_name).await;
        drop(self.workdir);
    }
}

fn task_id(response: &serde_json::Value) -> Uuid {
    response["task"]["id"]
        .as_str()
        .expect("assigned response should carry a task id")
        .parse()
        .expect("task id should be a uuid")
}

// ---- Scenario 1: single-agent linear chain -------------------------------

#[tokio::test]
async fn single_agent_linear_chain_runs_in_dependency_order() {
    let h = Harness::new().await;
    h.register_agent("agent-1").await;

    let a = h.seed_task("A", Phase::Implement, Priority::Medium, None).await;
    let b = h.seed_task("B", Phase::Implement, Priority::Medium, None).await;
    let c = h.seed_task("C", Phase::Implement, Priority::Medium, None).await;
    h.seed_dependency(b.id, a.id).await;
    h.seed_dependency(c.id, b.id).await;

    // 1. A is the only ready task.
    let response = h.dispatcher.request_next_task("agent-1").await.expect("request should succeed");
    assert!(response["ok"].as_bool().unwrap());
    assert_eq!(task_id(&response), a.id, "A has no dependencies, it must be assigned first");

    h.dispatcher
        .report_task_progress("agent-1", a.id, "completed", None, None)
        .await
        .expect("completing A should succeed");

    // 2. B becomes ready once A is DONE.
    let response = h.dispatcher.request_next_task("agent-1").await.expect("request should succeed");
    assert_eq!(task_id(&response), b.id, "B must unlock only after A completes");

    h.dispatcher
        .report_task_progress("agent-1", b.id, "completed", None, None)
        .await
        .expect("completing B should succeed");

    // 3. C becomes ready once B is DONE.
    let response = h.dispatcher.request_next_task("agent-1").await.expect("request should succeed");
    assert_eq!(task_id(&response), c.id, "C must unlock only after B completes");

    h.dispatcher
        .report_task_progress("agent-1", c.id, "completed", None, None)
        .await
        .expect("completing C should succeed");

    // 4. Nothing left: the agent is told to back off.
    let response = h.dispatcher.request_next_task("agent-1").await.expect("request should succeed");
    assert!(!response["ok"].as_bool().unwrap());
    assert!(response["retry_after_seconds"].as_i64().unwrap() > 0);

    h.teardown().await;
}

// ---- Idempotent completion (review comment 1) ----------------------------

#[tokio::test]
async fn completing_an_already_done_task_is_a_no_op_success() {
    let h = Harness::new().await;
    h.register_agent("agent-1").await;

    let a = h.seed_task("A", Phase::Implement, Priority::Medium, None).await;
    let response = h.dispatcher.request_next_task("agent-1").await.expect("request should succeed");
    assert_eq!(task_id(&response), a.id);

    h.dispatcher
        .report_task_progress("agent-1", a.id, "completed", None, None)
        .await
        .expect("first completion should succeed");

    // The lease is gone by now; a retried completion report must still
    // succeed instead of failing ownership.
    let retried = h
        .dispatcher
        .report_task_progress("agent-1", a.id, "completed", None, None)
        .await
        .expect("repeat completion must be a no-op success, not NotTaskOwner");
    assert!(retried["ok"].as_bool().unwrap());

    h.teardown().await;
}

// ---- Durable in_progress transition on claim (review comment 5) ---------

#[tokio::test]
async fn claiming_a_task_persists_the_in_progress_transition() {
    let h = Harness::new().await;
    h.register_agent("agent-1").await;

    let a = h.seed_task("A", Phase::Implement, Priority::Medium, None).await;
    h.dispatcher.request_next_task("agent-1").await.expect("request should succeed");

    let row = tasks::get_task(&h.pool, a.id)
        .await
        .expect("get_task should succeed")
        .expect("task should still exist");
    assert_eq!(row.status, TaskStatus::InProgress);
    assert_eq!(row.assignee.as_deref(), Some("agent-1"));
    assert!(row.started_at.is_some(), "started_at must be stamped on claim");

    h.teardown().await;
}

// ---- Scenario 3: race for the same task ----------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_agents_racing_for_one_task_never_both_win() {
    let h = Harness::new().await;
    h.register_agent("agent-1").await;
    h.register_agent("agent-2").await;
    h.seed_task("A", Phase::Implement, Priority::Medium, None).await;

    let (r1, r2) = tokio::join!(
        h.dispatcher.request_next_task("agent-1"),
        h.dispatcher.request_next_task("agent-2"),
    );
    let r1 = r1.expect("request 1 should not error");
    let r2 = r2.expect("request 2 should not error");

    let assigned = [r1["ok"].as_bool().unwrap(), r2["ok"].as_bool().unwrap()];
    assert_eq!(
        assigned.iter().filter(|&&ok| ok).count(),
        1,
        "exactly one of the two racing agents must be assigned the task"
    );

    h.teardown().await;
}

// ---- Scenario 4: lease expiry and reclamation ----------------------------

#[tokio::test]
async fn expired_lease_is_reclaimed_and_task_becomes_assignable_again() {
    let h = Harness::new().await;
    h.register_agent("agent-1").await;
    h.register_agent("agent-2").await;

    let a = h.seed_task("A", Phase::Implement, Priority::Medium, None).await;
    let response = h.dispatcher.request_next_task("agent-1").await.expect("request should succeed");
    assert_eq!(task_id(&response), a.id);

    // Force the live lease into the past without waiting out a real
    // expiry window.
    sqlx::query("UPDATE leases SET expires_at = NOW() - INTERVAL '1 second' WHERE task_id = $1")
        .bind(a.id)
        .execute(&h.pool)
        .await
        .expect("forcing lease expiry should succeed");

    let assignments = h.dispatcher.assignments();
    let monitor = LeaseMonitor::new(assignments, h.pool.clone());
    let provider = LocalProvider::new(h.pool.clone());
    let report = monitor.reap_once(&provider).await.expect("reap should succeed");
    assert_eq!(report.reclaimed, vec![a.id]);

    let row = tasks::get_task(&h.pool, a.id)
        .await
        .expect("get_task should succeed")
        .expect("task should still exist");
    assert_eq!(row.status, TaskStatus::Todo, "LocalProvider reset should flow back to tasks.status");

    // The task is free again: a different agent can now claim it. The
    // dispatcher's cached graph still thinks agent-1 holds it, but the
    // lease layer -- not the stale in-memory graph assignment -- is what
    // the Scheduler actually checks on each request, so a fresh
    // dispatcher against the same database sees the reclaimed task.
    let mut providers = ProviderRegistry::new();
    providers.register(LocalProvider::new(h.pool.clone()));
    let fresh = ToolDispatcher::new(h.pool.clone(), h.workdir.path(), providers);
    fresh.switch_project(h.project_id).await.expect("switch should succeed");
    fresh.register_agent("agent-2", "agent-2", "implementer", vec![]).await.expect("register should succeed");
    let response = fresh.request_next_task("agent-2").await.expect("request should succeed");
    assert_eq!(task_id(&response), a.id);

    h.teardown().await;
}

// ---- Scenario 5: tie-break determinism -----------------------------------

#[tokio::test]
async fn equal_score_tasks_break_ties_by_creation_order() {
    let h = Harness::new().await;
    h.register_agent("agent-1").await;

    let first = h.seed_task("X", Phase::Implement, Priority::Medium, None).await;
    // Ensure a strictly later `created_at` than `first` regardless of
    // clock resolution.
    sqlx::query("UPDATE tasks SET created_at = $1 WHERE id = $2")
        .bind(first.created_at - chrono::Duration::seconds(5))
        .bind(first.id)
        .execute(&h.pool)
        .await
        .expect("backdating should succeed");
    let second = h.seed_task("Y", Phase::Implement, Priority::Medium, None).await;

    let response = h.dispatcher.request_next_task("agent-1").await.expect("request should succeed");
    assert_eq!(
        task_id(&response),
        first.id,
        "with identical scores the earlier-created task must win"
    );
    let _ = second;

    h.teardown().await;
}

// ---- Scenario 6: phase-safety override -----------------------------------

#[tokio::test]
async fn test_phase_task_waits_for_every_implement_sibling_in_its_cluster() {
    let h = Harness::new().await;
    h.register_agent("agent-1").await;

    let parent = h.seed_task("feature", Phase::Design, Priority::Medium, None).await;
    let impl1 = h.seed_task("feature - impl 1", Phase::Implement, Priority::Medium, Some(parent.id)).await;
    let impl2 = h.seed_task("feature - impl 2", Phase::Implement, Priority::Medium, Some(parent.id)).await;
    let test_task = h.seed_task("feature - test", Phase::Test, Priority::Medium, Some(parent.id)).await;
    let _ = test_task;

    // Only the two IMPLEMENT tasks should ever come back; the TEST task
    // must never be assignable while either sibling is outstanding.
    let first = h.dispatcher.request_next_task("agent-1").await.expect("request should succeed");
    let first_id = task_id(&first);
    assert!(first_id == impl1.id || first_id == impl2.id);
    h.dispatcher
        .report_task_progress("agent-1", first_id, "completed", None, None)
        .await
        .expect("completing the first implement task should succeed");

    let second = h.dispatcher.request_next_task("agent-1").await.expect("request should succeed");
    let second_id = task_id(&second);
    assert!(second_id == impl1.id || second_id == impl2.id);
    assert_ne!(second_id, first_id, "the scheduler must not reassign the same implement task");
    h.dispatcher
        .report_task_progress("agent-1", second_id, "completed", None, None)
        .await
        .expect("completing the second implement task should succeed");

    // Both IMPLEMENT tasks are done now: the TEST task finally unlocks.
    let third = h.dispatcher.request_next_task("agent-1").await.expect("request should succeed");
    assert_eq!(task_id(&third), test_task.id);

    h.teardown().await;
}

// ---- Technical-constraint labels reach the preamble (review comment 4) --

#[tokio::test]
async fn create_project_persists_and_surfaces_constraint_labels() {
    let h = Harness::new().await;
    h.register_agent("agent-1").await;

    let response = h
        .dispatcher
        .create_project(
            "Build a vanilla-js widget with no-orm data access.",
            "widget project",
            "standard",
            "local",
            None,
            "new_project",
        )
        .await
        .expect("create_project should succeed");
    assert!(response["ok"].as_bool().unwrap());

    let assigned = h.dispatcher.request_next_task("agent-1").await.expect("request should succeed");
    assert!(assigned["ok"].as_bool().unwrap());
    let preamble = assigned["preamble"].as_str().expect("assignment should carry a preamble");
    assert!(
        preamble.contains("vanilla-js") && preamble.contains("no-orm"),
        "constraints extracted at project creation must reach the agent verbatim: {preamble}"
    );

    h.teardown().await;
}
