//! The `cli` processor type: spawns a child process, writes the event to its
//! stdin as one JSON object, closes stdin, and parses stdout as a verdict.

use std::time::Duration;

use serde_json::json;
use tokio::{io::AsyncWriteExt, process::Command, time::timeout};
use tracing::warn;

use super::{Outcome, VerdictWire};
use crate::event::Event;

pub async fn run_cli_processor(command: &str, args: &[String], processor_timeout: Duration, event: &Event) -> Outcome {
    let payload = json!({
        "event": event.kind,
        "payload": event.payload,
        "meta": {
            "requestId": event.request_id,
            "sessionId": event.session_id,
            "gateway": event.routing.gateway,
            "server": event.routing.server,
            "direction": event.direction,
        },
    });

    let spawn_result = Command::new(command)
        .args(args)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .spawn();

    let mut child = match spawn_result {
        Ok(child) => child,
        Err(err) => return Outcome::Fault(format!("failed to spawn processor: {err}")),
    };

    let run = async {
        if let Some(mut stdin) = child.stdin.take() {
            let bytes = serde_json::to_vec(&payload).unwrap_or_default();
            stdin.write_all(&bytes).await?;
            stdin.shutdown().await?;
        }
        child.wait_with_output().await
    };

    match timeout(processor_timeout, run).await {
        Ok(Ok(output)) => {
            if output.stdout.is_empty() {
                return Outcome::Fault(format!("processor exited with {} and produced no output", output.status));
            }
            match serde_json::from_slice::<VerdictWire>(&output.stdout) {
                Ok(wire) => Outcome::Verdict(wire.into()),
                Err(err) => Outcome::Fault(format!("unparseable processor output: {err}")),
            }
        }
        Ok(Err(err)) => Outcome::Fault(format!("processor I/O error: {err}")),
        Err(_) => {
            warn!(%command, "processor timed out");
            Outcome::Fault("processor timed out".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{RoutingContext, TransportKind};

    fn request_event() -> Event {
        Event::new_request(
            "req-1".into(),
            "sess-1".into(),
            RoutingContext {
                gateway: "g1".into(),
                server: "a".into(),
                transport: TransportKind::Http,
                endpoint: Some("http://a".into()),
                command: None,
            },
            serde_json::json!({"a": 1}),
        )
    }

    #[tokio::test]
    async fn runs_a_shell_processor_and_parses_its_verdict() {
        let event = request_event();
        let outcome = run_cli_processor(
            "sh",
            &["-c".to_string(), r#"echo '{"status":200,"modified_payload":{"a":1,"injected":"Y"}}'"#.to_string()],
            Duration::from_secs(2),
            &event,
        )
        .await;

        match outcome {
            Outcome::Verdict(verdict) => {
                assert_eq!(verdict.status, 200);
                assert_eq!(verdict.modified_payload, Some(serde_json::json!({"a":1,"injected":"Y"})));
            }
            Outcome::Fault(message) => panic!("expected a verdict, got fault: {message}"),
        }
    }

    #[tokio::test]
    async fn a_missing_command_is_a_fault_not_a_panic() {
        let event = request_event();
        let outcome = run_cli_processor("definitely-not-a-real-binary", &[], Duration::from_secs(2), &event).await;
        assert!(matches!(outcome, Outcome::Fault(_)));
    }

    #[tokio::test]
    async fn empty_stdout_is_a_fault() {
        let event = request_event();
        let outcome = run_cli_processor("true", &[], Duration::from_secs(2), &event).await;
        assert!(matches!(outcome, Outcome::Fault(_)));
    }

    #[tokio::test]
    async fn a_hanging_processor_is_killed_on_timeout() {
        let event = request_event();
        let outcome =
            run_cli_processor("sh", &["-c".to_string(), "sleep 5".to_string()], Duration::from_millis(50), &event).await;
        assert!(matches!(outcome, Outcome::Fault(_)));
    }
}
