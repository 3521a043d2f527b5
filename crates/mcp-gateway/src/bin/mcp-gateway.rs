use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use mcp_gateway::{GatewayError, GatewayServer, config};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "mcp-gateway", version, about = "Aggregating gateway for the Model Context Protocol")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Loads a config file and serves the HTTP surface until interrupted.
    Serve {
        /// Path to the gateway's TOML or JSON configuration document.
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Loads and validates a config file without starting the server.
    Check {
        #[arg(long, short)]
        config: PathBuf,
    },
}

/// Exit codes: 0 normal shutdown, 1 configuration invalid, 2 startup bind
/// failure, 3 fatal internal error.
#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Check { config: path } => match config::load(&path) {
            Ok(config) => {
                info!(gateways = config.gateways.len(), "configuration is valid");
                ExitCode::from(0)
            }
            Err(err) => {
                error!(error = %err, "configuration is invalid");
                ExitCode::from(1)
            }
        },
        Command::Serve { config: path } => run_serve(path).await,
    }
}

async fn run_serve(path: PathBuf) -> ExitCode {
    let config = match config::load(&path) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, path = %path.display(), "configuration is invalid");
            return ExitCode::from(1);
        }
    };

    let addr = match config.socket_addr() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, "configuration has an invalid bind address");
            return ExitCode::from(1);
        }
    };

    let shutdown_grace = config.proxy.timeout_secs;

    let server = match GatewayServer::build(config).await {
        Ok(server) => server,
        Err(err) => {
            error!(error = %err, "failed to build gateway server");
            return exit_code_for(&err);
        }
    };

    let handle = match mcp_gateway::server::spawn(server, addr).await {
        Ok(handle) => handle,
        Err(err) => {
            error!(error = %err, %addr, "failed to bind HTTP listener");
            return ExitCode::from(2);
        }
    };

    info!(addr = %handle.addr(), "mcp-gateway ready");

    if let Err(err) = signal::ctrl_c().await {
        warn!(error = ?err, "failed to listen for Ctrl+C, shutting down anyway");
    } else {
        info!("received Ctrl+C, shutting down");
    }

    info!(grace_secs = shutdown_grace, "waiting for in-flight tool calls to drain");
    handle.shutdown().await;
    info!("mcp-gateway stopped cleanly");
    ExitCode::from(0)
}

fn exit_code_for(err: &GatewayError) -> ExitCode {
    match err {
        GatewayError::Io(_) => ExitCode::from(3),
        _ => ExitCode::from(1),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")).unwrap();
    fmt().with_env_filter(env_filter).with_target(true).with_writer(std::io::stderr).init();
}
