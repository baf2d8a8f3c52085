//! Integration tests for the lease query layer -- the SQL-level atomicity
//! the rest of the coordination kernel builds on.
//!
//! Each test creates a unique temporary database inside a shared
//! containerized PostgreSQL instance (via testcontainers), runs
//! migrations, and drops it on completion so tests are fully isolated.

use chrono::{Duration, Utc};
use uuid::Uuid;

use marcus_db::models::ReleaseReason;
use marcus_db::queries::{leases, projects, tasks};

use marcus_test_utils::{create_test_db, drop_test_db};

async fn seed_task(pool: &sqlx::PgPool) -> (Uuid, Uuid) {
    let project = projects::insert_project(pool, "lease test project", "local", &serde_json::json!({}))
        .await
        .expect("insert project should succeed");

    let task = tasks::insert_task(
        pool,
        project.id,
        "do the thing",
        "",
        None,
        marcus_db::models::Priority::Medium,
        &[],
        1.0,
        None,
        None,
    )
    .await
    .expect("insert task should succeed");

    (project.id, task.id)
}

#[tokio::test]
async fn try_insert_lease_succeeds_when_no_live_lease_exists() {
    let (pool, db_name) = create_test_db().await;
    let (project_id, task_id) = seed_task(&pool).await;

    let expires_at = Utc::now() + Duration::hours(1);
    let lease = leases::try_insert_lease(&pool, project_id, task_id, "agent-a", expires_at)
        .await
        .expect("insert should succeed")
        .expect("lease should be granted");

    assert_eq!(lease.task_id, task_id);
    assert_eq!(lease.agent_id, "agent-a");
    assert_eq!(lease.generation, 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn try_insert_lease_conflicts_with_a_live_lease() {
    let (pool, db_name) = create_test_db().await;
    let (project_id, task_id) = seed_task(&pool).await;

    let expires_at = Utc::now() + Duration::hours(1);
    leases::try_insert_lease(&pool, project_id, task_id, "agent-a", expires_at)
        .await
        .expect("first insert should succeed")
        .expect("first lease should be granted");

    let conflict = leases::try_insert_lease(&pool, project_id, task_id, "agent-b", expires_at)
        .await
        .expect("conflicting insert should not error");
    assert!(conflict.is_none(), "a second agent must not win a live lease");

    pool.close().await;
    drop_test_db(&db_name).await;
}

/// The property the dispatcher bug (review comment 1) depends on at the
/// SQL layer: a lease can be re-granted, at a higher generation, once the
/// prior one is released.
#[tokio::test]
async fn try_insert_lease_succeeds_again_after_release() {
    let (pool, db_name) = create_test_db().await;
    let (project_id, task_id) = seed_task(&pool).await;

    let expires_at = Utc::now() + Duration::hours(1);
    let first = leases::try_insert_lease(&pool, project_id, task_id, "agent-a", expires_at)
        .await
        .expect("first insert should succeed")
        .expect("first lease should be granted");

    let released = leases::release_lease(&pool, task_id, ReleaseReason::Completed)
        .await
        .expect("release should succeed");
    assert!(released);

    let second = leases::try_insert_lease(&pool, project_id, task_id, "agent-b", expires_at)
        .await
        .expect("second insert should succeed")
        .expect("lease should be re-grantable after release");

    assert_eq!(second.generation, first.generation + 1);
    assert_eq!(second.agent_id, "agent-b");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn release_lease_is_idempotent() {
    let (pool, db_name) = create_test_db().await;
    let (project_id, task_id) = seed_task(&pool).await;

    leases::try_insert_lease(&pool, project_id, task_id, "agent-a", Utc::now() + Duration::hours(1))
        .await
        .expect("insert should succeed")
        .expect("lease should be granted");

    assert!(leases::release_lease(&pool, task_id, ReleaseReason::Completed)
        .await
        .expect("first release should succeed"));
    assert!(!leases::release_lease(&pool, task_id, ReleaseReason::Completed)
        .await
        .expect("second release should not error"));

    pool.close().await;
    drop_test_db(&db_name).await;
}

/// Mutual exclusion under real concurrency: many simultaneous claim
/// attempts for the same task must yield exactly one winner, which is
/// what `AssignmentStore::try_claim` relies on `try_insert_lease` for.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_claims_on_one_task_yield_exactly_one_winner() {
    let (pool, db_name) = create_test_db().await;
    let (project_id, task_id) = seed_task(&pool).await;

    let expires_at = Utc::now() + Duration::hours(1);
    let mut handles = Vec::new();
    for i in 0..16 {
        let pool = pool.clone();
        let agent_id = format!("agent-{i}");
        handles.push(tokio::spawn(async move {
            leases::try_insert_lease(&pool, project_id, task_id, &agent_id, expires_at)
                .await
                .expect("insert attempt should not error")
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.expect("task should not panic").is_some() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1, "exactly one concurrent claim must win");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn renew_lease_requires_matching_agent() {
    let (pool, db_name) = create_test_db().await;
    let (project_id, task_id) = seed_task(&pool).await;

    leases::try_insert_lease(&pool, project_id, task_id, "agent-a", Utc::now() + Duration::hours(1))
        .await
        .expect("insert should succeed")
        .expect("lease should be granted");

    let new_expiry = Utc::now() + Duration::hours(2);
    assert!(!leases::renew_lease(&pool, task_id, "agent-b", new_expiry)
        .await
        .expect("renew by wrong agent should not error"));
    assert!(leases::renew_lease(&pool, task_id, "agent-a", new_expiry)
        .await
        .expect("renew by lease holder should succeed"));

    let lease = leases::get_live_lease_for_task(&pool, task_id)
        .await
        .expect("fetch should succeed")
        .expect("lease should still be live");
    assert_eq!(lease.renewed_count, 1);
    assert_eq!(lease.expires_at, new_expiry);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn list_expired_only_returns_leases_past_their_expiry() {
    let (pool, db_name) = create_test_db().await;
    let (project_id, task_id) = seed_task(&pool).await;
    let (_, other_task_id) = seed_task(&pool).await;

    leases::try_insert_lease(&pool, project_id, task_id, "agent-a", Utc::now() - Duration::seconds(1))
        .await
        .expect("insert should succeed")
        .expect("lease should be granted");
    leases::try_insert_lease(
        &pool,
        project_id,
        other_task_id,
        "agent-b",
        Utc::now() + Duration::hours(1),
    )
    .await
    .expect("insert should succeed")
    .expect("lease should be granted");

    let expired = leases::list_expired(&pool, Utc::now()).await.expect("list should succeed");
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].task_id, task_id);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn count_live_leases_for_agent_ignores_released_leases() {
    let (pool, db_name) = create_test_db().await;
    let (project_id, task_id) = seed_task(&pool).await;
    let (_, other_task_id) = seed_task(&pool).await;

    leases::try_insert_lease(&pool, project_id, task_id, "agent-a", Utc::now() + Duration::hours(1))
        .await
        .expect("insert should succeed")
        .expect("lease should be granted");
    leases::try_insert_lease(
        &pool,
        project_id,
        other_task_id,
        "agent-a",
        Utc::now() + Duration::hours(1),
    )
    .await
    .expect("insert should succeed")
    .expect("lease should be granted");

    assert_eq!(
        leases::count_live_leases_for_agent(&pool, "agent-a")
            .await
            .expect("count should succeed"),
        2
    );

    leases::release_lease(&pool, task_id, ReleaseReason::Completed)
        .await
        .expect("release should succeed");

    assert_eq!(
        leases::count_live_leases_for_agent(&pool, "agent-a")
            .await
            .expect("count should succeed"),
        1
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}
