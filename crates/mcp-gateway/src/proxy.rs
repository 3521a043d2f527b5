//! Proxy: owns one gateway's sessions and dispatches tool calls through the
//! event-processing pipeline, in both aggregated and pass-through mode.

use std::{collections::BTreeMap, sync::Arc};

use rmcp::model::{CallToolRequestParam, CallToolResult};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{
    config::GatewayConfig,
    downstream::ConnectionState,
    event::{Event, RoutingContext, ToolCallSnapshot, TransportKind},
    event_processor::EventProcessor,
    id,
    session::Session,
};

/// Outcome of a tool call as seen by the HTTP layer.
pub enum CallOutcome {
    /// A JSON-RPC `result` value. This covers both successful MCP tool
    /// results and MCP-level tool errors (`isError: true`), since both are
    /// framed as a normal JSON-RPC success response.
    Result(Value),
    /// A JSON-RPC protocol-level error (transport failure, unknown tool).
    RpcError { code: i64, message: String },
}

pub struct Proxy {
    gateway_name: String,
    config: GatewayConfig,
    event_processor: Arc<EventProcessor>,
    sessions: RwLock<BTreeMap<String, Arc<Session>>>,
}

impl Proxy {
    pub fn new(gateway_name: String, config: GatewayConfig, event_processor: Arc<EventProcessor>) -> Self {
        Self { gateway_name, config, event_processor, sessions: RwLock::new(BTreeMap::new()) }
    }

    pub fn gateway_name(&self) -> &str {
        &self.gateway_name
    }

    pub async fn get_or_create_session(
        &self,
        session_id: &str,
        aggregated: bool,
        passthrough_headers: BTreeMap<String, String>,
    ) -> crate::error::Result<Arc<Session>> {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            return Ok(session.clone());
        }

        let mut guard = self.sessions.write().await;
        if let Some(session) = guard.get(session_id) {
            return Ok(session.clone());
        }

        let session = Arc::new(Session::new(
            session_id.to_string(),
            self.gateway_name.clone(),
            aggregated,
            &self.config,
            passthrough_headers,
        ));
        session.initialize().await?;
        guard.insert(session_id.to_string(), session.clone());
        Ok(session)
    }

    pub async fn close_session(&self, session_id: &str) {
        let session = self.sessions.write().await.remove(session_id);
        if let Some(session) = session {
            session.close().await;
        }
    }

    pub async fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close().await;
        }
    }

    /// Implements the tool-call dispatch: resolve the target downstream,
    /// run the request through the processor chain, forward the call
    /// (stripping the namespace prefix in aggregated mode happened already
    /// at registration time), then run the response through the chain too.
    /// A processor-chain rejection at either stage always wins over
    /// whatever the downstream would have said.
    pub async fn handle_tool_call(
        &self,
        session: &Arc<Session>,
        public_tool_name: &str,
        arguments: Value,
        transport: TransportKind,
    ) -> CallOutcome {
        let request_id = id::new_uuid_v7();

        let Some(descriptor) = session.resolve(public_tool_name).await else {
            return CallOutcome::RpcError { code: -32000, message: "server not available".to_string() };
        };

        let Some(connection) = session.downstream(&descriptor.origin_server) else {
            return CallOutcome::RpcError { code: -32000, message: "server not available".to_string() };
        };

        if connection.state().await != ConnectionState::Connected {
            return CallOutcome::RpcError { code: -32000, message: "server not available".to_string() };
        }

        let routing = RoutingContext {
            gateway: self.gateway_name.clone(),
            server: descriptor.origin_server.clone(),
            transport,
            endpoint: connection.endpoint(),
            command: connection.command_label(),
        };

        let request_payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "params": { "name": descriptor.public_name, "arguments": arguments },
        });
        let mut request_event = Event::new_request(request_id.clone(), session.id.clone(), routing.clone(), request_payload);
        request_event.tool_call =
            Some(ToolCallSnapshot { name: descriptor.public_name.clone(), arguments: Some(arguments.clone()), result: None, is_error: false });

        self.event_processor.process(&mut request_event).await;

        if request_event.status >= 400 {
            let message = request_event.metadata.get("rejectReason").cloned().unwrap_or_else(|| "rejected by processor".to_string());
            let rejection_payload = serde_json::json!({
                "content": [{"type": "text", "text": message}],
                "isError": true,
            });
            let mut response_event = Event::new_response(
                request_id,
                session.id.clone(),
                routing,
                false,
                request_event.status,
                rejection_payload,
            );
            response_event.tool_call =
                Some(ToolCallSnapshot { name: descriptor.public_name.clone(), arguments: None, result: None, is_error: true });
            self.event_processor.process(&mut response_event).await;
            return CallOutcome::Result(response_event.payload.clone());
        }

        let arguments = request_event
            .payload
            .get("params")
            .and_then(|params| params.get("arguments"))
            .cloned()
            .unwrap_or(arguments);

        let call_params = CallToolRequestParam { name: descriptor.original_name.clone().into(), arguments: arguments.as_object().cloned() };

        let (success, status, response_payload) = match connection.call_tool(call_params).await {
            Ok(result) => {
                let is_error = result.is_error.unwrap_or(false);
                (!is_error, if is_error { 400 } else { 200 }, call_result_to_value(&result))
            }
            Err(err) => {
                let message = err.to_string();
                let failure_payload = serde_json::json!({
                    "jsonrpc": "2.0",
                    "error": { "code": -32000, "message": message },
                });
                let mut response_event =
                    Event::new_response(request_id, session.id.clone(), routing, false, 500, failure_payload);
                response_event.tool_call =
                    Some(ToolCallSnapshot { name: descriptor.public_name.clone(), arguments: None, result: None, is_error: true });
                self.event_processor.process(&mut response_event).await;
                return CallOutcome::RpcError { code: -32000, message };
            }
        };

        let mut response_event = Event::new_response(request_id, session.id.clone(), routing, success, status, response_payload.clone());
        response_event.tool_call =
            Some(ToolCallSnapshot { name: descriptor.public_name.clone(), arguments: None, result: Some(response_payload), is_error: !success });

        self.event_processor.process(&mut response_event).await;

        CallOutcome::Result(response_event.payload.clone())
    }
}

fn call_result_to_value(result: &CallToolResult) -> Value {
    serde_json::to_value(result).unwrap_or_else(|_| serde_json::json!({"content": [], "isError": true}))
}
