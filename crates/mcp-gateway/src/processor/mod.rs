//! Event processor chain: an ordered pipeline of out-of-process filters,
//! each returning a verdict that can mutate or reject an event.

pub mod chain;
pub mod cli;

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::{
    config::ProcessorConfig,
    error::{GatewayError, Result},
    event::Event,
};

/// The wire shape of a processor's stdout (the contract every `cli`
/// processor is expected to honor).
#[derive(Debug, Deserialize)]
pub struct VerdictWire {
    pub status: u16,
    #[serde(default)]
    pub modified_payload: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A parsed, successfully-returned verdict from a processor.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub status: u16,
    pub modified_payload: Option<Value>,
    pub error: Option<String>,
}

impl From<VerdictWire> for Verdict {
    fn from(wire: VerdictWire) -> Self {
        Self { status: wire.status, modified_payload: wire.modified_payload, error: wire.error }
    }
}

impl Verdict {
    pub fn is_reject(&self) -> bool {
        self.status >= 400
    }
}

/// What running a processor against an event produced: either it ran to
/// completion and returned a verdict, or it faulted (failed to spawn, timed
/// out, or returned unparseable output). A fault never changes the event;
/// it is only recorded and the chain moves on.
pub enum Outcome {
    Verdict(Verdict),
    Fault(String),
}

enum Kind {
    Cli { command: String, args: Vec<String> },
}

/// One processor instantiated from a [`ProcessorConfig`].
pub struct Processor {
    pub name: String,
    pub enabled: bool,
    pub timeout: Duration,
    kind: Kind,
}

impl Processor {
    pub fn from_config(config: &ProcessorConfig) -> Result<Self> {
        let kind = match config.kind.as_str() {
            "cli" => {
                let command = config
                    .options
                    .get("command")
                    .and_then(Value::as_str)
                    .ok_or_else(|| GatewayError::ProcessorFault {
                        name: config.name.clone(),
                        message: "missing 'command' option for cli processor".to_string(),
                    })?
                    .to_string();
                let args = config
                    .options
                    .get("args")
                    .and_then(Value::as_array)
                    .map(|values| values.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default();
                Kind::Cli { command, args }
            }
            other => {
                return Err(GatewayError::ProcessorFault {
                    name: config.name.clone(),
                    message: format!("unsupported processor type '{other}'"),
                });
            }
        };
        Ok(Self { name: config.name.clone(), enabled: config.enabled, timeout: config.timeout(), kind })
    }

    pub async fn run(&self, event: &Event) -> Outcome {
        match &self.kind {
            Kind::Cli { command, args } => cli::run_cli_processor(command, args, self.timeout, event).await,
        }
    }
}
