use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use loki_mcp::app;
use loki_mcp::config::Config;
use loki_mcp::mcp::McpServer;
use loki_mcp::tools::LokiTools;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout 专用于 JSON-RPC，日志一律写 stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match env::args().nth(1) {
        Some(path) => Config::load_from_path(Path::new(&path))
            .with_context(|| format!("loading config from {path}"))?,
        None => Config::default(),
    }
    .with_env_overrides();

    info!(
        mode = ?config.server.mode,
        loki_url = config.loki.effective_url(),
        org = ?config.loki.org_id,
        "starting loki-mcp"
    );

    let tools = LokiTools::new(config.loki.clone()).context("building Loki client")?;
    let shutdown = CancellationToken::new();
    let server = McpServer::new(Arc::new(tools), shutdown.clone());

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, shutting down");
            signal_token.cancel();
        }
    });

    app::run(server, &config.server).await?;

    Ok(())
}
