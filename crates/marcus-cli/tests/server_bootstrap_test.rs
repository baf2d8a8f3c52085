//! Integration test for the `marcus` server bootstrap sequence: pool,
//! migrations, provider registration, and a couple of tool calls through
//! the resulting `ToolDispatcher`.
//!
//! `marcus-cli` is a binary-only crate (no library target), so this test
//! simulates `server::Server::bootstrap` and `spawn_lease_monitor` the same
//! way rather than importing its private modules -- the same shape
//! `gator-cli`'s own CLI-command tests use against `gator-core`/`gator-db`
//! directly.

use std::time::Duration;

use marcus_core::provider::{LocalProvider, ProviderRegistry};
use marcus_core::ToolDispatcher;

use marcus_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn bootstrap_sequence_wires_a_working_dispatcher() {
    let (pool, db_name) = create_test_db().await;

    let mut providers = ProviderRegistry::new();
    providers.register(LocalProvider::new(pool.clone()));

    let workdir = tempfile::tempdir().expect("tempdir should succeed");
    let dispatcher = ToolDispatcher::new(pool.clone(), workdir.path(), providers);

    let ping = dispatcher.ping();
    assert!(ping["ok"].as_bool().unwrap());

    let registered = dispatcher
        .register_agent("agent-1", "Agent One", "implementer", vec!["rust".to_string()])
        .await
        .expect("register_agent should succeed");
    assert!(registered["ok"].as_bool().unwrap());

    let created = dispatcher
        .create_project(
            "Add a health check endpoint.",
            "bootstrap test project",
            "standard",
            "local",
            None,
            "new_project",
        )
        .await
        .expect("create_project should succeed");
    assert!(created["ok"].as_bool().unwrap());
    assert!(created["tasks_created"].as_u64().unwrap() > 0);

    let assigned = dispatcher
        .request_next_task("agent-1")
        .await
        .expect("request_next_task should succeed");
    assert!(assigned["ok"].as_bool().unwrap());

    // The lease monitor is spawned alongside the dispatcher at startup;
    // one tick on an otherwise idle project should be a no-op, not a panic.
    let monitor_dispatcher = std::sync::Arc::new(dispatcher);
    let monitor_handle = {
        let dispatcher = monitor_dispatcher.clone();
        tokio::spawn(async move { dispatcher.run_lease_monitor(Duration::from_millis(20)).await })
    };
    tokio::time::sleep(Duration::from_millis(80)).await;
    monitor_handle.abort();

    drop(workdir);
    pool.close().await;
    drop_test_db(&db_name).await;
}
