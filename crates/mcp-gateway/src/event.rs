//! The uniform event record consumed by the logger (C6) and the processor
//! chain (C4/C5). One record is produced for every request, response, and
//! lifecycle transition the proxy observes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Transport kind a downstream connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    Stdio,
    Sdk,
}

/// Direction of travel for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ClientToServer,
    ServerToClient,
    System,
}

/// Broad shape of the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Request,
    Response,
    System,
}

/// Routing context attached to every event: which gateway, which downstream,
/// and how it was reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingContext {
    pub gateway: String,
    pub server: String,
    pub transport: TransportKind,
    /// Downstream URL, present for HTTP-streaming downstreams.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Downstream command + args, present for stdio downstreams.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// A snapshot of the tool call a request/response pair is carrying, when the
/// event corresponds to a `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallSnapshot {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

/// The uniform event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: String,
    pub transport: TransportKind,
    pub request_id: String,
    pub session_id: String,
    pub server_id: String,
    pub direction: Direction,
    pub kind: MessageKind,
    pub success: bool,
    /// 0 unset, >=200 set, >=400 failure.
    pub status: u16,
    pub payload: Value,
    pub routing: RoutingContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallSnapshot>,
    #[serde(default)]
    pub modified: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub processing_errors: BTreeMap<String, String>,
}

impl Event {
    pub fn new_request(
        request_id: String,
        session_id: String,
        routing: RoutingContext,
        payload: Value,
    ) -> Self {
        Self {
            timestamp: now_rfc3339(),
            transport: routing.transport,
            request_id,
            session_id,
            server_id: routing.server.clone(),
            direction: Direction::ClientToServer,
            kind: MessageKind::Request,
            success: true,
            status: 0,
            payload,
            routing,
            tool_call: None,
            modified: false,
            metadata: BTreeMap::new(),
            processing_errors: BTreeMap::new(),
        }
    }

    pub fn new_response(
        request_id: String,
        session_id: String,
        routing: RoutingContext,
        success: bool,
        status: u16,
        payload: Value,
    ) -> Self {
        Self {
            timestamp: now_rfc3339(),
            transport: routing.transport,
            request_id,
            session_id,
            server_id: routing.server.clone(),
            direction: Direction::ServerToClient,
            kind: MessageKind::Response,
            success,
            status,
            payload,
            routing,
            tool_call: None,
            modified: false,
            metadata: BTreeMap::new(),
            processing_errors: BTreeMap::new(),
        }
    }

    /// Marks the payload as mutated by the processor chain.
    pub fn set_payload(&mut self, payload: Value) {
        if payload != self.payload {
            self.payload = payload;
            self.modified = true;
        }
    }

    pub fn record_processing_error(&mut self, processor: impl Into<String>, message: impl Into<String>) {
        self.processing_errors.insert(processor.into(), message.into());
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
