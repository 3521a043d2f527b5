//! Per-client session: owns one [`DownstreamConnection`] per enabled
//! downstream in a gateway, the aggregated tool registry built from them,
//! and the headers captured from the session's first inbound request.

use std::{
    collections::BTreeMap,
    sync::{Arc, atomic::{AtomicBool, Ordering}},
};

use futures::future::join_all;
use rmcp::model::Tool;
use tokio::sync::RwLock;
use tracing::warn;

use crate::{
    config::GatewayConfig,
    downstream::DownstreamConnection,
    error::{GatewayError, Result},
};

/// Separator between a tool's origin server and its original name in
/// aggregated mode. Split on the first occurrence only.
pub const NAMESPACE_SEPARATOR: &str = "___";

/// A tool as exposed on a session's façade.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub public_name: String,
    pub origin_server: String,
    pub original_name: String,
    pub tool: Tool,
}

pub struct Session {
    pub id: String,
    pub gateway: String,
    pub aggregated: bool,
    downstreams: BTreeMap<String, Arc<DownstreamConnection>>,
    registry: RwLock<Vec<ToolDescriptor>>,
    passthrough_headers: BTreeMap<String, String>,
    initialized: AtomicBool,
}

impl Session {
    pub fn new(
        id: String,
        gateway: String,
        aggregated: bool,
        gateway_config: &GatewayConfig,
        passthrough_headers: BTreeMap<String, String>,
    ) -> Self {
        let downstreams = gateway_config
            .mcp_servers
            .iter()
            .filter(|(_, cfg)| cfg.enabled)
            .map(|(name, cfg)| (name.clone(), Arc::new(DownstreamConnection::new(name.clone(), cfg.clone()))))
            .collect();

        Self {
            id,
            gateway,
            aggregated,
            downstreams,
            registry: RwLock::new(Vec::new()),
            passthrough_headers,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn downstream(&self, name: &str) -> Option<Arc<DownstreamConnection>> {
        self.downstreams.get(name).cloned()
    }

    pub fn downstream_names(&self) -> Vec<String> {
        self.downstreams.keys().cloned().collect()
    }

    /// Fans out a `connect` call per downstream concurrently. Tools from
    /// downstreams that connect successfully populate the façade's
    /// registry; a downstream that fails to connect is simply absent from
    /// it, unless *every* downstream failed, in which case the whole
    /// initialize fails.
    pub async fn initialize(&self) -> Result<()> {
        let headers = self.passthrough_headers.clone();
        let tasks = self.downstreams.values().cloned().map(|connection| {
            let headers = headers.clone();
            async move {
                let result = connection.connect(&headers).await;
                (connection, result)
            }
        });

        let results = join_all(tasks).await;
        let total = results.len();
        let mut failures = 0usize;
        let mut entries = Vec::new();

        for (connection, result) in results {
            match result {
                Ok(()) => {
                    for tool in connection.tools().await {
                        match build_descriptor(connection.name(), &tool, self.aggregated) {
                            Ok(descriptor) => entries.push(descriptor),
                            Err(err) => warn!(error = ?err, downstream = connection.name(), "skipping tool with invalid name"),
                        }
                    }
                }
                Err(err) => {
                    failures += 1;
                    warn!(error = ?err, downstream = connection.name(), "downstream failed to connect during session init");
                }
            }
        }

        if total > 0 && failures == total {
            return Err(GatewayError::Transport {
                name: self.gateway.clone(),
                source: anyhow::anyhow!("every downstream failed to connect"),
            });
        }

        *self.registry.write().await = entries;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.registry.read().await.clone()
    }

    pub async fn resolve(&self, public_name: &str) -> Option<ToolDescriptor> {
        self.registry.read().await.iter().find(|d| d.public_name == public_name).cloned()
    }

    pub async fn close(&self) {
        for connection in self.downstreams.values() {
            connection.close().await;
        }
    }
}

fn build_descriptor(server_name: &str, tool: &Tool, aggregated: bool) -> Result<ToolDescriptor> {
    let original_name = tool.name.to_string();
    if original_name.contains(NAMESPACE_SEPARATOR) {
        return Err(GatewayError::ToolNameContainsSeparator { name: original_name, separator: NAMESPACE_SEPARATOR });
    }

    let public_name =
        if aggregated { format!("{server_name}{NAMESPACE_SEPARATOR}{original_name}") } else { original_name.clone() };

    let mut namespaced_tool = tool.clone();
    namespaced_tool.name = public_name.clone().into();

    Ok(ToolDescriptor { public_name, origin_server: server_name.to_string(), original_name, tool: namespaced_tool })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Tool;

    fn tool(name: &str) -> Tool {
        Tool::new(name.to_string(), "a tool".to_string(), serde_json::Map::new())
    }

    #[test]
    fn namespaces_tool_names_in_aggregated_mode() {
        let descriptor = build_descriptor("alpha", &tool("search"), true).unwrap();
        assert_eq!(descriptor.public_name, "alpha___search");
        assert_eq!(descriptor.tool.name, "alpha___search");
    }

    #[test]
    fn leaves_tool_names_unnamespaced_in_passthrough_mode() {
        let descriptor = build_descriptor("alpha", &tool("search"), false).unwrap();
        assert_eq!(descriptor.public_name, "search");
    }

    #[test]
    fn rejects_downstream_tool_names_containing_the_separator() {
        let err = build_descriptor("alpha", &tool("weird___tool"), true).unwrap_err();
        assert!(matches!(err, GatewayError::ToolNameContainsSeparator { .. }));
    }
}
