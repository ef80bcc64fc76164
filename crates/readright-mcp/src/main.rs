mod server;

use rmcp::{ServiceExt, transport::stdio};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use readright_common::client::ReadRightClient;
use readright_common::config::ClientConfig;

use server::ReadRightServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting readright MCP server");

    let config = ClientConfig::from_env();
    info!(
        base_url = %config.base_url,
        timeout_ms = config.timeout.as_millis(),
        max_retries = config.max_retries,
        rewrite_mode = %config.rewrite_mode,
        "readright client configured"
    );
    let client = ReadRightClient::new(config)?;

    match client.health().await {
        Ok(health) => info!(status = %health.status, "backend reachable"),
        Err(e) => info!(error = %e, "backend not reachable yet, continuing"),
    }

    let server = ReadRightServer::new(client);

    if let Ok(addr) = std::env::var("MCP_TCP_LISTEN_ADDR") {
        let listener = TcpListener::bind(&addr).await?;
        info!(listen_addr = %addr, "MCP server ready, serving on TCP");
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = server.clone();
            tokio::spawn(async move {
                tracing::info!(peer = %peer, "MCP client connected");
                let service = server.serve(stream).await.inspect_err(|e| {
                    tracing::error!(error = %e, "MCP server error");
                })?;
                service.waiting().await?;
                tracing::info!(peer = %peer, "MCP client disconnected");
                Ok::<(), anyhow::Error>(())
            });
        }
    } else {
        info!("MCP server ready, serving on stdio");
        let service = server.serve(stdio()).await.inspect_err(|e| {
            tracing::error!(error = %e, "MCP server error");
        })?;
        service.waiting().await?;
        info!("MCP server shut down");
    }
    Ok(())
}
