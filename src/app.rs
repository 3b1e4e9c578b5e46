//! 按配置的模式启动传输层。

use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tracing::info;

use crate::config::{ServerConfig, ServerMode};
use crate::error::{LokiError, Result};
use crate::http::serve_http;
use crate::mcp::{serve_lines, McpServer};

/// Run the transports selected by `config.mode` on the process stdio.
pub async fn run(server: McpServer, config: &ServerConfig) -> Result<()> {
    run_with_stdio(
        server,
        config,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}

/// Same as [`run`] with the stdio transport bound to `reader`/`writer`.
///
/// In `both` mode the HTTP listener lives until the shutdown token fires;
/// stdin reaching EOF only ends the stdio side.
pub async fn run_with_stdio<R, W>(
    server: McpServer,
    config: &ServerConfig,
    reader: R,
    writer: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let shutdown = server.shutdown_token();
    match config.mode {
        ServerMode::Stdio => serve_lines(server, reader, writer).await,
        ServerMode::Http => serve_http(server, config, shutdown).await,
        ServerMode::Both => {
            let http_server = server.clone();
            let http_config = config.clone();
            let http_task =
                tokio::spawn(async move { serve_http(http_server, &http_config, shutdown).await });
            serve_lines(server, reader, writer).await?;
            info!("stdio transport finished, HTTP keeps serving until shutdown");
            http_task
                .await
                .map_err(|e| LokiError::Transport(format!("http task failed: {e}")))?
        }
    }
}
