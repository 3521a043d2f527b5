//! Downstream connection: a config plus runtime connection state, the
//! object sessions fan out `connect`/`close`/`callTool` calls through.

use std::collections::BTreeMap;

use rmcp::model::{CallToolRequestParam, CallToolResult, Tool};
use tokio::sync::RwLock;
use tracing::warn;

use crate::{
    config::DownstreamConfig,
    error::{GatewayError, Result},
    event::TransportKind,
    transport,
};

/// Lifecycle state of a downstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Connecting,
    Connected,
    Failed,
    Closed,
}

struct Inner {
    state: ConnectionState,
    service: Option<transport::DownstreamService>,
    tools: Vec<Tool>,
    last_error: Option<String>,
}

/// A single downstream MCP server, as seen from one session.
pub struct DownstreamConnection {
    name: String,
    config: DownstreamConfig,
    inner: RwLock<Inner>,
}

impl DownstreamConnection {
    pub fn new(name: String, config: DownstreamConfig) -> Self {
        Self {
            name,
            config,
            inner: RwLock::new(Inner {
                state: ConnectionState::Pending,
                service: None,
                tools: Vec::new(),
                last_error: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport_kind(&self) -> TransportKind {
        if self.config.is_http() { TransportKind::Http } else { TransportKind::Stdio }
    }

    pub fn endpoint(&self) -> Option<String> {
        self.config.url.clone()
    }

    pub fn command_label(&self) -> Option<String> {
        self.config.command.as_ref().map(|cmd| {
            let mut parts = vec![cmd.clone()];
            parts.extend(self.config.args.iter().cloned());
            parts.join(" ")
        })
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.read().await.state
    }

    /// Connects if not already connected. Calling this again after a
    /// successful connect is a cheap no-op.
    pub async fn connect(&self, passthrough_headers: &BTreeMap<String, String>) -> Result<()> {
        {
            let guard = self.inner.read().await;
            if guard.state == ConnectionState::Connected {
                return Ok(());
            }
        }

        let mut guard = self.inner.write().await;
        if guard.state == ConnectionState::Connected {
            return Ok(());
        }
        guard.state = ConnectionState::Connecting;

        let connect_result = if let Some(url) = self.config.url.as_deref() {
            transport::connect_http(url, &self.config.headers, passthrough_headers).await
        } else if let Some(command) = self.config.command.as_deref() {
            transport::connect_stdio(&self.name, command, &self.config.args, &self.config.env).await
        } else {
            Err(anyhow::anyhow!("downstream '{}' has neither url nor command configured", self.name))
        };

        let service = match connect_result {
            Ok(service) => service,
            Err(err) => {
                guard.state = ConnectionState::Failed;
                guard.last_error = Some(err.to_string());
                return Err(GatewayError::Transport { name: self.name.clone(), source: err });
            }
        };

        let tools = match service.list_all_tools().await {
            Ok(tools) => tools,
            Err(err) => {
                guard.state = ConnectionState::Failed;
                guard.last_error = Some(err.to_string());
                return Err(GatewayError::Transport { name: self.name.clone(), source: err.into() });
            }
        };

        guard.service = Some(service);
        guard.tools = tools;
        guard.state = ConnectionState::Connected;
        guard.last_error = None;
        Ok(())
    }

    pub async fn tools(&self) -> Vec<Tool> {
        self.inner.read().await.tools.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.read().await.last_error.clone()
    }

    pub async fn call_tool(&self, params: CallToolRequestParam) -> Result<CallToolResult> {
        let guard = self.inner.read().await;
        if guard.state != ConnectionState::Connected {
            return Err(GatewayError::NotConnected { name: self.name.clone() });
        }
        let service = guard.service.as_ref().expect("connected state implies a service");
        service.call_tool(params).await.map_err(|err| GatewayError::Transport { name: self.name.clone(), source: err.into() })
    }

    /// Idempotent: closing an already-closed connection is a no-op.
    pub async fn close(&self) {
        let mut guard = self.inner.write().await;
        if guard.state == ConnectionState::Closed {
            return;
        }
        if let Some(service) = guard.service.take() {
            if let Err(err) = service.cancel().await {
                warn!(error = ?err, downstream = %self.name, "error while closing downstream connection");
            }
        }
        guard.state = ConnectionState::Closed;
    }
}
