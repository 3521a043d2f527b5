//! Chain semantics: processors run in strict config order. A faulting
//! processor is recorded and skipped; a rejecting processor short-circuits
//! the rest of the chain.

use serde_json::{Value, json};

use super::{Outcome, Processor};
use crate::event::{Event, MessageKind};

pub async fn run_chain(processors: &[Processor], event: &mut Event) {
    for processor in processors.iter().filter(|p| p.enabled) {
        match processor.run(event).await {
            Outcome::Fault(message) => {
                event.record_processing_error(&processor.name, message);
            }
            Outcome::Verdict(verdict) => {
                if !verdict.is_reject() {
                    if let Some(payload) = verdict.modified_payload {
                        event.set_payload(payload);
                    }
                    continue;
                }

                event.status = verdict.status;
                event.success = false;
                let reason = verdict.error.clone().unwrap_or_else(|| format!("processor '{}' rejected the event", processor.name));
                event.metadata.insert("rejectProcessor".to_string(), processor.name.clone());
                event.metadata.insert("rejectReason".to_string(), reason.clone());

                if matches!(event.kind, MessageKind::Response) {
                    event.set_payload(mcp_error_payload(&event.payload, &reason));
                }
                return;
            }
        }
    }
}

/// An MCP-shaped error object, preserving `jsonrpc`/`id` from the original
/// payload, that replaces a rejected response's payload.
fn mcp_error_payload(original: &Value, reason: &str) -> Value {
    json!({
        "jsonrpc": original.get("jsonrpc").cloned().unwrap_or_else(|| json!("2.0")),
        "id": original.get("id").cloned().unwrap_or(Value::Null),
        "error": { "code": -32000, "message": reason },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ProcessorConfig,
        event::{RoutingContext, TransportKind},
    };

    fn shell_processor(name: &str, script: &str) -> Processor {
        let mut options = serde_json::Map::new();
        options.insert("command".to_string(), json!("sh"));
        options.insert("args".to_string(), json!(["-c", script]));
        let config = ProcessorConfig { name: name.to_string(), kind: "cli".to_string(), enabled: true, timeout_secs: 2, options };
        Processor::from_config(&config).unwrap()
    }

    fn request_event() -> Event {
        Event::new_request(
            "req-1".into(),
            "sess-1".into(),
            RoutingContext { gateway: "g1".into(), server: "a".into(), transport: TransportKind::Http, endpoint: None, command: None },
            json!({"a": 1}),
        )
    }

    #[tokio::test]
    async fn a_rejecting_processor_short_circuits_the_rest_of_the_chain() {
        let processors = vec![
            shell_processor("mutate", r#"echo '{"status":200,"modified_payload":{"injected":"Y"}}'"#),
            shell_processor("reject", r#"echo '{"status":403,"error":"denied"}'"#),
            shell_processor("never", r#"echo '{"status":200,"modified_payload":{"should":"not-run"}}'"#),
        ];
        let mut event = request_event();

        run_chain(&processors, &mut event).await;

        assert_eq!(event.status, 403);
        assert!(!event.success);
        assert_eq!(event.payload, json!({"injected": "Y"}));
        assert_eq!(event.metadata.get("rejectProcessor"), Some(&"reject".to_string()));
    }

    #[tokio::test]
    async fn a_faulting_processor_does_not_change_the_payload_and_the_chain_continues() {
        let processors = vec![
            Processor::from_config(&ProcessorConfig {
                name: "faulty".to_string(),
                kind: "cli".to_string(),
                enabled: true,
                timeout_secs: 2,
                options: serde_json::Map::from_iter([("command".to_string(), json!("definitely-not-a-real-binary"))]),
            })
            .unwrap(),
            shell_processor("mutate", r#"echo '{"status":200,"modified_payload":{"injected":"Y"}}'"#),
        ];
        let mut event = request_event();
        let original_payload = event.payload.clone();

        run_chain(&processors, &mut event).await;

        assert!(event.processing_errors.contains_key("faulty"));
        assert_ne!(event.payload, original_payload);
        assert_eq!(event.payload, json!({"injected": "Y"}));
    }
}
