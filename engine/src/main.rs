use std::net::SocketAddr;
use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};

use engine_core::EngineConfig;
use engine_server::{serve, AppState};

#[derive(Parser, Debug)]
#[command(name = "engine", about = "Task-orchestration engine service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP and WebSocket server.
    Serve {
        /// Overrides HOST from the environment.
        #[arg(long)]
        host: Option<String>,
        /// Overrides PORT from the environment.
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = EngineConfig::from_env();
    let (_guard, info) =
        engine_observability::init_process_logging(Path::new(&config.log_dir), config.log_retention_days)?;
    tracing::info!(logs_dir = %info.logs_dir, "logging initialized");

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.host.clone());
            let port = port.unwrap_or(config.port);
            let addr: SocketAddr = format!("{host}:{port}")
                .parse()
                .with_context(|| format!("invalid bind address {host}:{port}"))?;

            let state = AppState::new(config).await?;
            serve(addr, state).await?;
        }
    }

    Ok(())
}
