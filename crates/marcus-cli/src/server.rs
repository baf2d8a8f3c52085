//! Server bootstrap: pool, migrations, provider registry, and the
//! `ToolDispatcher` that backs every MCP tool.

use anyhow::{Context, Result};
use marcus_core::provider::{LocalProvider, ProviderRegistry};
use marcus_core::ToolDispatcher;
use marcus_db::pool;

use crate::config::MarcusConfig;

/// Owns the pool and the dispatcher for the lifetime of the process.
pub struct Server {
    pub dispatcher: std::sync::Arc<ToolDispatcher>,
    lease_tick: std::time::Duration,
}

impl Server {
    /// Ensure the database exists, run migrations, and construct the
    /// dispatcher with the built-in `local` provider registered.
    pub async fn bootstrap(config: &MarcusConfig) -> Result<Self> {
        pool::ensure_database_exists(&config.db_config)
            .await
            .context("failed to ensure database exists")?;

        let db_pool = pool::create_pool(&config.db_config)
            .await
            .context("failed to create connection pool")?;

        let migrations_path = pool::default_migrations_path();
        pool::run_migrations(&db_pool, migrations_path)
            .await
            .context("failed to run migrations")?;

        let mut providers = ProviderRegistry::new();
        providers.register(LocalProvider::new(db_pool.clone()));

        let dispatcher = ToolDispatcher::new(db_pool, &config.workspace_root, providers);

        Ok(Self {
            dispatcher: std::sync::Arc::new(dispatcher),
            lease_tick: config.lease_tick,
        })
    }

    /// Spawn the lease reaper as a background task. Returns its handle so
    /// callers can abort it on shutdown.
    pub fn spawn_lease_monitor(&self) -> tokio::task::JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        let tick = self.lease_tick;
        tokio::spawn(async move {
            dispatcher.run_lease_monitor(tick).await;
        })
    }
}
