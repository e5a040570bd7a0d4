//! Recollect binary: HTTP server, MCP server, schema migration.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use recollect::app::AppContext;
use recollect::config::AppConfig;
use recollect::mcp::{RecollectMcpServer, serve_http, serve_stdio};

#[derive(Debug, Parser)]
#[command(name = "recollect", version, about = "RAG backend for transcripted conversations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum McpTransport {
    /// JSON-RPC over stdin/stdout.
    Stdio,
    /// Streamable HTTP at /mcp.
    Http,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the HTTP API.
    Serve {
        /// Bind host.
        #[arg(long, default_value = "0.0.0.0", env = "RECOLLECT_HOST")]
        host: String,
        /// Bind port.
        #[arg(long, default_value_t = 8000, env = "RECOLLECT_PORT")]
        port: u16,
    },
    /// Serve the MCP tool surface.
    Mcp {
        /// Transport to use.
        #[arg(long, value_enum, default_value_t = McpTransport::Stdio)]
        transport: McpTransport,
        /// Bind host (http transport).
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Bind port (http transport).
        #[arg(long, default_value_t = 8001)]
        port: u16,
    },
    /// Apply the database schema and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr: stdout is reserved for the MCP stdio
    // transport.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("configuration error")?;
    let ctx = AppContext::init(config).await.context("startup failed")?;

    match cli.command {
        Commands::Serve { host, port } => {
            recollect::http::serve(ctx, &host, port).await?;
        }
        Commands::Mcp {
            transport,
            host,
            port,
        } => {
            let server = RecollectMcpServer::new(Arc::clone(&ctx));
            match transport {
                McpTransport::Stdio => serve_stdio(server).await?,
                McpTransport::Http => serve_http(server, &host, port).await?,
            }
            ctx.shutdown().await;
        }
        Commands::Migrate => {
            // AppContext::init already migrated; nothing further.
            ctx.shutdown().await;
        }
    }

    Ok(())
}
