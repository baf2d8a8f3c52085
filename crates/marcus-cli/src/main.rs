mod config;
mod dispatcher;
mod server;

use anyhow::Result;
use rmcp::{transport::stdio, ServiceExt};

use config::MarcusConfig;
use dispatcher::McpHandler;

/// Parse `--database-url <url>` (or `--database-url=<url>`) out of argv.
/// No other flags are recognised; everything else is environment-only.
fn cli_database_url() -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for (i, arg) in args.iter().enumerate() {
        if let Some(value) = arg.strip_prefix("--database-url=") {
            return Some(value.to_string());
        }
        if arg == "--database-url" {
            return args.get(i + 1).cloned();
        }
    }
    None
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = MarcusConfig::resolve(cli_database_url().as_deref());

    tracing::info!(database_url = %config.db_config.database_url, "starting marcus");

    let srv = server::Server::bootstrap(&config).await?;
    let lease_monitor = srv.spawn_lease_monitor();

    let handler = McpHandler::new(srv.dispatcher.clone());
    let service = handler.serve(stdio()).await.map_err(|e| {
        tracing::error!(error = %e, "failed to start MCP service");
        e
    })?;

    tokio::select! {
        result = service.waiting() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
    }

    lease_monitor.abort();
    tracing::info!("marcus shut down");
    Ok(())
}
