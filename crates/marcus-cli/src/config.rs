//! Configuration for `marcus`.
//!
//! Environment-variable only: there is no TOML/XDG config-file layer. CLI
//! flags, when passed, override the environment.

use std::time::Duration;

use marcus_db::config::DbConfig;

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct MarcusConfig {
    pub db_config: DbConfig,
    /// Root directory artifact content is written under.
    pub workspace_root: std::path::PathBuf,
    /// Lease reaper tick interval.
    pub lease_tick: Duration,
}

impl MarcusConfig {
    /// Resolve configuration from the environment, with an optional CLI
    /// flag override for the database URL.
    pub fn resolve(cli_database_url: Option<&str>) -> Self {
        let db_config = match cli_database_url {
            Some(url) => DbConfig::new(url),
            None => DbConfig::from_env(),
        };

        let workspace_root = std::env::var("MARCUS_WORKSPACE_ROOT")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|_| std::path::PathBuf::from("./marcus-artifacts"));

        let lease_tick = std::env::var("MARCUS_LEASE_TICK_SECONDS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(marcus_core::lease_monitor::DEFAULT_TICK_SECONDS));

        Self {
            db_config,
            workspace_root,
            lease_tick,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_falls_back_to_defaults_without_env() {
        // SAFETY: test runs single-threaded per-process env mutation; no
        // other test in this crate reads these vars.
        unsafe {
            std::env::remove_var("MARCUS_DATABASE_URL");
            std::env::remove_var("MARCUS_WORKSPACE_ROOT");
            std::env::remove_var("MARCUS_LEASE_TICK_SECONDS");
        }
        let cfg = MarcusConfig::resolve(None);
        assert_eq!(cfg.db_config.database_url, DbConfig::DEFAULT_URL);
        assert_eq!(cfg.lease_tick, Duration::from_secs(marcus_core::lease_monitor::DEFAULT_TICK_SECONDS));
    }

    #[test]
    fn cli_flag_overrides_env() {
        let cfg = MarcusConfig::resolve(Some("postgresql://example/override"));
        assert_eq!(cfg.db_config.database_url, "postgresql://example/override");
    }
}
