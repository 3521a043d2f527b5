use std::{collections::BTreeMap, process::Stdio};

use anyhow::{Context, Result};
use rmcp::{service::ServiceExt, transport::child_process::TokioChildProcess};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
};
use tracing::warn;

use super::DownstreamService;

/// Spawns a stdio downstream. The child's stderr is piped and forwarded to
/// the gateway's own stderr, each line prefixed with the downstream's name,
/// rather than inherited directly, so multiple stdio downstreams don't
/// interleave unlabeled output.
pub async fn connect_stdio(
    server_label: &str,
    command: &str,
    args: &[String],
    env: &BTreeMap<String, String>,
) -> Result<DownstreamService> {
    let cmd = build_command(command, args, env);

    let (transport, stderr) = TokioChildProcess::builder(cmd)
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to spawn process '{command}'"))?;

    if let Some(stderr) = stderr {
        let label = server_label.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => eprintln!("[{label}] {line}"),
                    Ok(None) => break,
                    Err(err) => {
                        warn!(error = ?err, server = %label, "stdio downstream stderr read failed");
                        break;
                    }
                }
            }
        });
    }

    ().serve(transport).await.with_context(|| format!("failed to initialise MCP transport for '{command}'"))
}

/// Builds the child-process command exactly as it will be spawned: the
/// configured args verbatim, the configured env vars added on top of (not
/// replacing) the gateway's own environment, and `kill_on_drop` so an
/// abandoned connection's child doesn't outlive it.
fn build_command(command: &str, args: &[String], env: &BTreeMap<String, String>) -> Command {
    let mut cmd = Command::new(command);
    cmd.args(args);
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd.kill_on_drop(true);
    cmd
}
