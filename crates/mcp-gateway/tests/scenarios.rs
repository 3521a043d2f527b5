//! End-to-end scenarios A–D against fake in-process HTTP downstreams: an
//! aggregated pass-through call, a processor mutating a request, a processor
//! rejecting one, and a downstream call failing at the transport level.
//! Scenario E (stdio spawn args/env) is a unit test in `transport::stdio`;
//! scenario F (auth) is covered by `tests/http_surface.rs`.

use std::{collections::BTreeMap, net::SocketAddr, sync::Arc, time::Duration};

use mcp_gateway::{
    GatewayServer,
    config::{DownstreamConfig, GatewayConfig, GlobalConfig, ProcessorConfig, ProxySettings},
    server,
};
use rmcp::{
    ErrorData as McpError,
    handler::server::ServerHandler,
    model::{
        CallToolRequestParam, CallToolResult, Content, Implementation, JsonObject, ListToolsResult,
        PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo, Tool,
    },
    service::RequestContext,
    transport::streamable_http_server::{
        StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
    },
    RoleServer,
};
use serde_json::{Value, json};
use tokio::sync::Mutex;

/// A fake downstream MCP server advertising exactly one tool. Every call is
/// recorded so tests can assert on exactly what the gateway forwarded, and
/// `fail` makes the call return a protocol-level error to exercise the
/// downstream-failure path.
#[derive(Clone)]
struct FakeDownstream {
    tool_name: String,
    received: Arc<Mutex<Vec<Value>>>,
    fail: bool,
}

impl FakeDownstream {
    fn new(tool_name: &str) -> (Self, Arc<Mutex<Vec<Value>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        (Self { tool_name: tool_name.to_string(), received: received.clone(), fail: false }, received)
    }

    fn failing(tool_name: &str) -> Self {
        Self { tool_name: tool_name.to_string(), received: Arc::new(Mutex::new(Vec::new())), fail: true }
    }
}

impl ServerHandler for FakeDownstream {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "fake-downstream".to_string(),
                title: None,
                version: "0.0.1".to_string(),
                icons: None,
                website_url: None,
            },
            instructions: None,
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl core::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let schema: JsonObject = Default::default();
        let tool = Tool::new(self.tool_name.clone(), "a fake tool".to_string(), schema);
        std::future::ready(Ok(ListToolsResult { tools: vec![tool], next_cursor: None }))
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl core::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        let received = self.received.clone();
        let fail = self.fail;
        let arguments = request.arguments.clone();
        async move {
            if let Some(args) = &arguments {
                received.lock().await.push(Value::Object(args.clone()));
            }
            if fail {
                return Err(McpError::internal_error("downstream exploded".to_string(), None));
            }
            Ok(CallToolResult {
                content: vec![Content::text("ok")],
                structured_content: arguments.map(Value::Object),
                is_error: None,
                meta: None,
            })
        }
    }
}

/// Serves a [`FakeDownstream`] over streamable HTTP at `/mcp` and returns
/// its base URL (ready to use as a `DownstreamConfig::url`).
async fn spawn_fake_downstream(handler: FakeDownstream) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service: StreamableHttpService<FakeDownstream, LocalSessionManager> = StreamableHttpService::new(
        move || Ok(handler.clone()),
        Default::default(),
        StreamableHttpServerConfig { stateful_mode: true, sse_keep_alive: Some(Duration::from_secs(15)) },
    );
    let router = axum::Router::new().nest_service("/mcp", service);
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}/mcp")
}

fn http_downstream(url: String) -> DownstreamConfig {
    DownstreamConfig { url: Some(url), headers: BTreeMap::new(), command: None, args: Vec::new(), env: BTreeMap::new(), enabled: true }
}

fn base_config(gateways: BTreeMap<String, GatewayConfig>, log_path: &std::path::Path) -> GlobalConfig {
    GlobalConfig {
        name: "scenario-gateway".to_string(),
        version: "0.0.0".to_string(),
        proxy: ProxySettings { host: "127.0.0.1".to_string(), port: 0, timeout_secs: 5 },
        auth_enabled: Some(false),
        auth_header: "Authorization".to_string(),
        auth_keys: Vec::new(),
        log_path: Some(log_path.to_string_lossy().into_owned()),
        processors: Vec::new(),
        gateways,
    }
}

async fn spawn_gateway(config: GlobalConfig) -> (server::GatewayServerHandle, SocketAddr) {
    let gateway = GatewayServer::build(config).await.expect("valid config builds a server");
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let handle = server::spawn(gateway, addr).await.expect("listener binds");
    let bound = handle.addr();
    (handle, bound)
}

async fn call_tool(addr: SocketAddr, gateway: &str, tool: &str, arguments: Value) -> Value {
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/mcp/{gateway}"))
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"name": tool, "arguments": arguments}}))
        .send()
        .await
        .unwrap();
    response.json().await.unwrap()
}

async fn read_log_lines(log_path: &std::path::Path) -> Vec<Value> {
    let content = tokio::fs::read_to_string(log_path).await.unwrap_or_default();
    content.lines().filter_map(|line| serde_json::from_str(line).ok()).collect()
}

/// Scenario A: aggregated pass-through. Two downstreams `a` (tool `foo`) and
/// `b` (tool `bar`); calling `a___foo` reaches only `a`, unchanged, and both
/// a request and a response event are logged sharing one request id.
#[tokio::test]
async fn scenario_a_aggregated_pass_through_routes_to_the_right_downstream() {
    let (handler_a, received_a) = FakeDownstream::new("foo");
    let (handler_b, received_b) = FakeDownstream::new("bar");
    let url_a = spawn_fake_downstream(handler_a).await;
    let url_b = spawn_fake_downstream(handler_b).await;

    let gateway = GatewayConfig {
        mcp_servers: BTreeMap::from([("a".to_string(), http_downstream(url_a)), ("b".to_string(), http_downstream(url_b))]),
        processors: Vec::new(),
    };

    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("events.log");
    let config = base_config(BTreeMap::from([("g1".to_string(), gateway)]), &log_path);
    let (handle, addr) = spawn_gateway(config).await;

    let body = call_tool(addr, "g1", "a___foo", json!({"x": 1})).await;
    assert_eq!(body["result"]["structuredContent"], json!({"x": 1}));

    assert_eq!(*received_a.lock().await, vec![json!({"x": 1})]);
    assert!(received_b.lock().await.is_empty(), "the non-targeted downstream must not be called");

    let events = read_log_lines(&log_path).await;
    let matching: Vec<&Value> =
        events.iter().filter(|e| e["tool_call"]["name"] == json!("a___foo")).collect();
    assert!(matching.len() >= 2, "expected at least a request and a response event");
    let request_ids: std::collections::HashSet<String> =
        matching.iter().map(|e| e["request_id"].as_str().unwrap_or_default().to_string()).collect();
    assert_eq!(request_ids.len(), 1, "request and response events must share one request id");
    assert!(matching.iter().all(|e| e["routing"]["transport"] == json!("http")));

    handle.shutdown().await;
}

/// Scenario B: a processor injects a field into the request arguments
/// before they reach the downstream, and the event is flagged `modified`.
#[tokio::test]
async fn scenario_b_a_processor_mutates_the_forwarded_arguments() {
    let (handler, received) = FakeDownstream::new("tool");
    let url = spawn_fake_downstream(handler).await;

    let mut options = serde_json::Map::new();
    options.insert("command".to_string(), json!("sh"));
    options.insert(
        "args".to_string(),
        json!(["-c", r#"echo '{"status":200,"modified_payload":{"jsonrpc":"2.0","method":"tools/call","params":{"name":"srv___tool","arguments":{"a":1,"injected":"Y"}}}}'"#]),
    );
    let processor = ProcessorConfig { name: "inject".to_string(), kind: "cli".to_string(), enabled: true, timeout_secs: 2, options };

    let gateway = GatewayConfig {
        mcp_servers: BTreeMap::from([("srv".to_string(), http_downstream(url))]),
        processors: vec![processor],
    };

    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("events.log");
    let config = base_config(BTreeMap::from([("g1".to_string(), gateway)]), &log_path);
    let (handle, addr) = spawn_gateway(config).await;

    call_tool(addr, "g1", "srv___tool", json!({"a": 1})).await;

    assert_eq!(*received.lock().await, vec![json!({"a": 1, "injected": "Y"})]);

    let events = read_log_lines(&log_path).await;
    let request_event = events
        .iter()
        .find(|e| e["direction"] == json!("client_to_server") && e["tool_call"]["name"] == json!("srv___tool"))
        .expect("a request event was logged");
    assert_eq!(request_event["modified"], json!(true));

    handle.shutdown().await;
}

/// Scenario C: a processor rejects the call outright; the downstream is
/// never invoked and the client sees an MCP-level error result.
#[tokio::test]
async fn scenario_c_a_processor_rejection_short_circuits_the_downstream_call() {
    let (handler, received) = FakeDownstream::new("delete");
    let url = spawn_fake_downstream(handler).await;

    let script = r#"body=$(cat); case "$body" in *'"name":"srv___delete"'*) echo '{"status":403,"error":"denied"}' ;; *) echo '{"status":200}' ;; esac"#;
    let mut options = serde_json::Map::new();
    options.insert("command".to_string(), json!("sh"));
    options.insert("args".to_string(), json!(["-c", script]));
    let processor = ProcessorConfig { name: "guard".to_string(), kind: "cli".to_string(), enabled: true, timeout_secs: 2, options };

    let gateway = GatewayConfig {
        mcp_servers: BTreeMap::from([("srv".to_string(), http_downstream(url))]),
        processors: vec![processor],
    };

    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("events.log");
    let config = base_config(BTreeMap::from([("g1".to_string(), gateway)]), &log_path);
    let (handle, addr) = spawn_gateway(config).await;

    let body = call_tool(addr, "g1", "srv___delete", json!({})).await;

    assert_eq!(body["result"]["isError"], json!(true));
    let text = body["result"]["content"][0]["text"].as_str().unwrap_or_default();
    assert_eq!(text, "denied");
    assert!(received.lock().await.is_empty(), "the downstream must never be called once rejected");

    let events = read_log_lines(&log_path).await;
    let response_event = events
        .iter()
        .find(|e| e["direction"] == json!("server_to_client") && e["tool_call"]["name"] == json!("srv___delete"))
        .expect("a response event was logged for the rejected call");
    assert_eq!(response_event["success"], json!(false));
    assert_eq!(response_event["status"], json!(403));
    assert_eq!(response_event["tool_call"]["is_error"], json!(true));

    handle.shutdown().await;
}

/// Scenario D: the downstream call itself fails at the protocol level; the
/// client receives a JSON-RPC error and a failed response event is logged.
#[tokio::test]
async fn scenario_d_a_downstream_failure_is_surfaced_and_logged() {
    let handler = FakeDownstream::failing("explode");
    let url = spawn_fake_downstream(handler).await;

    let gateway = GatewayConfig {
        mcp_servers: BTreeMap::from([("srv".to_string(), http_downstream(url))]),
        processors: Vec::new(),
    };

    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("events.log");
    let config = base_config(BTreeMap::from([("g1".to_string(), gateway)]), &log_path);
    let (handle, addr) = spawn_gateway(config).await;

    let body = call_tool(addr, "g1", "srv___explode", json!({})).await;

    assert!(body.get("error").is_some(), "a downstream failure must surface as a JSON-RPC error");
    assert!(body.get("result").is_none());

    let events = read_log_lines(&log_path).await;
    let response_event = events
        .iter()
        .find(|e| e["direction"] == json!("server_to_client") && e["tool_call"]["name"] == json!("srv___explode"))
        .expect("a response event was logged for the failed call");
    assert_eq!(response_event["success"], json!(false));
    assert!(response_event["status"].as_u64().unwrap_or(0) >= 400);

    handle.shutdown().await;
}
