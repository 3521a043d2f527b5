//! Server (C9): HTTP surface, routing table, auth middleware, component
//! wiring, and shutdown. Endpoints are mounted at `/mcp/<gateway>`
//! (aggregated view) and `/mcp/<gateway>/<server>` (pass-through view, one
//! per enabled downstream), each fronting its own [`Proxy`].

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{Arc, OnceLock},
    time::Duration,
};

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use regex::Regex;
use serde_json::{Value, json};
use tokio::{net::TcpListener, sync::Notify, task::JoinHandle};
use tower::{ServiceBuilder, timeout::TimeoutLayer};
use tracing::{error, info, warn};

use crate::{
    auth::{KeyValidator, StaticKeySet, capture_passthrough_headers, strip_bearer_prefix},
    config::GlobalConfig,
    error::{GatewayError, Result},
    event::TransportKind,
    event_processor::EventProcessor,
    logger::EventLogger,
    processor::Processor,
    proxy::{CallOutcome, Proxy},
};

const SESSION_HEADER: &str = "mcp-session-id";
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

fn path_segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex is valid"))
}

fn validate_path_segment(name: &str) -> Result<()> {
    if path_segment_pattern().is_match(name) {
        Ok(())
    } else {
        Err(GatewayError::InvalidPathSegment { name: name.to_string() })
    }
}

/// One mounted endpoint: either a gateway's aggregated view or a single
/// downstream's pass-through view.
struct Endpoint {
    proxy: Arc<Proxy>,
    aggregated: bool,
    transport: TransportKind,
}

/// Wires config, logger, proxies, and auth into one routable HTTP surface.
pub struct GatewayServer {
    config: GlobalConfig,
    logger: Arc<EventLogger>,
    endpoints: BTreeMap<String, Endpoint>,
    key_store: Option<StaticKeySet>,
}

impl GatewayServer {
    pub async fn build(config: GlobalConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let logger = Arc::new(EventLogger::open(config.log_path()).await?);
        let mut endpoints = BTreeMap::new();

        for (gateway_name, gateway) in &config.gateways {
            validate_path_segment(gateway_name)?;

            let mut chain_configs = config.processors.clone();
            chain_configs.extend(gateway.processors.clone());
            let processors =
                chain_configs.iter().map(Processor::from_config).collect::<Result<Vec<_>>>()?;
            let event_processor = Arc::new(EventProcessor::new(processors, logger.clone()));

            let aggregated_proxy =
                Arc::new(Proxy::new(gateway_name.clone(), gateway.clone(), event_processor.clone()));
            endpoints.insert(
                gateway_name.clone(),
                Endpoint { proxy: aggregated_proxy, aggregated: true, transport: TransportKind::Http },
            );

            for (server_name, downstream) in &gateway.mcp_servers {
                if !downstream.enabled {
                    continue;
                }
                validate_path_segment(server_name)?;

                let mut single = gateway.clone();
                single.mcp_servers = BTreeMap::from([(server_name.clone(), downstream.clone())]);
                let transport = if downstream.is_http() { TransportKind::Http } else { TransportKind::Stdio };
                let proxy = Arc::new(Proxy::new(gateway_name.clone(), single, event_processor.clone()));
                endpoints.insert(
                    format!("{gateway_name}/{server_name}"),
                    Endpoint { proxy, aggregated: false, transport },
                );
            }
        }

        let key_store = if config.auth_enabled() { Some(StaticKeySet::new(config.auth_keys.clone())) } else { None };

        Ok(Arc::new(Self { config, logger, endpoints, key_store }))
    }

    fn auth_header(&self) -> &str {
        &self.config.auth_header
    }

    fn check_auth(&self, headers: &HeaderMap) -> std::result::Result<(), Response> {
        let Some(store) = &self.key_store else { return Ok(()) };

        let header_name = self.auth_header();
        let presented = headers
            .get(header_name)
            .or_else(|| headers.get(header_name.to_ascii_lowercase()))
            .and_then(|v| v.to_str().ok())
            .map(strip_bearer_prefix);

        match presented {
            Some(token) if store.validate(token) => Ok(()),
            _ => Err(unauthorized_response(header_name)),
        }
    }

    async fn dispatch(&self, key: &str, headers: HeaderMap, body: Bytes) -> Response {
        let Some(endpoint) = self.endpoints.get(key) else {
            return (StatusCode::NOT_FOUND, "unknown gateway or server").into_response();
        };

        if let Err(response) = self.check_auth(&headers) {
            return response;
        }

        let body = if body.len() > MAX_BODY_BYTES {
            warn!(%key, size = body.len(), "request body exceeded the 10 MiB guard and was truncated");
            Bytes::copy_from_slice(&body[..MAX_BODY_BYTES])
        } else {
            body
        };

        let request: Value = match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(err) => return jsonrpc_error_response(Value::Null, -32700, &format!("parse error: {err}")),
        };

        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
        let is_notification = request.get("id").is_none();

        let session_id = headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(crate::id::new_uuid_v7);

        let passthrough = capture_passthrough_headers(&headers, self.auth_header());

        if is_notification {
            return StatusCode::ACCEPTED.into_response();
        }

        let result = match method {
            "initialize" => {
                let session = match endpoint.proxy.get_or_create_session(&session_id, endpoint.aggregated, passthrough).await {
                    Ok(session) => session,
                    Err(err) => return self.transport_error_response(id, &session_id, err),
                };
                let tools = session.tools().await;
                Ok(json!({
                    "protocolVersion": "2025-03-26",
                    "serverInfo": { "name": self.config.name, "version": self.config.version },
                    "capabilities": { "tools": { "listChanged": false } },
                    "toolCount": tools.len(),
                }))
            }
            "tools/list" => {
                let session = match endpoint.proxy.get_or_create_session(&session_id, endpoint.aggregated, passthrough).await {
                    Ok(session) => session,
                    Err(err) => return self.transport_error_response(id, &session_id, err),
                };
                let tools: Vec<Value> =
                    session.tools().await.into_iter().map(|descriptor| serde_json::to_value(&descriptor.tool).unwrap_or(Value::Null)).collect();
                Ok(json!({ "tools": tools }))
            }
            "tools/call" => {
                let session = match endpoint.proxy.get_or_create_session(&session_id, endpoint.aggregated, passthrough).await {
                    Ok(session) => session,
                    Err(err) => return self.transport_error_response(id, &session_id, err),
                };
                let params = request.get("params").cloned().unwrap_or(Value::Null);
                let name = params.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

                match endpoint.proxy.handle_tool_call(&session, &name, arguments, endpoint.transport).await {
                    CallOutcome::Result(value) => Ok(value),
                    CallOutcome::RpcError { code, message } => {
                        return jsonrpc_error_response_with_session(id, code, &message, &session_id);
                    }
                }
            }
            other => Err(format!("method not found: {other}")),
        };

        match result {
            Ok(value) => jsonrpc_success_response(id, value, &session_id),
            Err(message) => jsonrpc_error_response_with_session(id, -32601, &message, &session_id),
        }
    }

    fn transport_error_response(&self, id: Value, session_id: &str, err: GatewayError) -> Response {
        error!(error = ?err, "session initialization failed");
        jsonrpc_error_response_with_session(id, -32000, "server not available", session_id)
    }

    /// Cancels all sessions, closes every downstream connection, and flushes
    /// the shared logger. Idempotent: calling it twice is harmless, the
    /// second pass simply finds nothing left to close.
    pub async fn shutdown(&self) {
        for endpoint in self.endpoints.values() {
            endpoint.proxy.close_all().await;
        }
        self.logger.flush().await;
    }
}

fn unauthorized_response(auth_header: &str) -> Response {
    let mut response = (StatusCode::UNAUTHORIZED, axum::Json(json!({"error": "unauthorized"}))).into_response();
    if auth_header.eq_ignore_ascii_case("authorization") {
        response.headers_mut().insert(header::WWW_AUTHENTICATE, header::HeaderValue::from_static("Bearer"));
    }
    response
}

fn jsonrpc_success_response(id: Value, result: Value, session_id: &str) -> Response {
    let body = json!({ "jsonrpc": "2.0", "id": id, "result": result });
    with_session_header(axum::Json(body).into_response(), session_id)
}

fn jsonrpc_error_response(id: Value, code: i64, message: &str) -> Response {
    let body = json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } });
    axum::Json(body).into_response()
}

fn jsonrpc_error_response_with_session(id: Value, code: i64, message: &str, session_id: &str) -> Response {
    with_session_header(jsonrpc_error_response(id, code, message), session_id)
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = session_id.parse() {
        response.headers_mut().insert(HeaderName::from_static("mcp-session-id"), value);
    }
    response
}

/// Liveness check: no auth, no downstream reach-through. Kept as pure
/// ambient ops surface, not part of the MCP dispatch path.
async fn handle_health() -> Response {
    axum::Json(json!({"status": "ok"})).into_response()
}

async fn handle_aggregated(State(server): State<Arc<GatewayServer>>, Path(gateway): Path<String>, headers: HeaderMap, body: Bytes) -> Response {
    server.dispatch(&gateway, headers, body).await
}

async fn handle_passthrough(
    State(server): State<Arc<GatewayServer>>,
    Path((gateway, downstream)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    server.dispatch(&format!("{gateway}/{downstream}"), headers, body).await
}

fn router(server: Arc<GatewayServer>) -> Router {
    let timeout = Duration::from_secs(server.config.proxy.timeout_secs.max(1));
    Router::new()
        .route("/api/health", get(handle_health))
        .route("/mcp/:gateway", post(handle_aggregated))
        .route("/mcp/:gateway/:server", post(handle_passthrough))
        .layer(ServiceBuilder::new().layer(TimeoutLayer::new(timeout)))
        .with_state(server)
}

pub struct GatewayServerHandle {
    addr: SocketAddr,
    server: Arc<GatewayServer>,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl GatewayServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stops accepting new connections, waits for the in-flight request
    /// worker to wind down, then runs the proxy/logger shutdown sequence.
    /// Idempotent: a second call finds the listener already gone.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let grace = Duration::from_secs(self.server.config.proxy.timeout_secs.max(1));
        let _ = tokio::time::timeout(grace, self.task).await;
        self.server.shutdown().await;
    }
}

/// Binds the listener and spawns the serving task. Exit-code mapping for
/// bind failures lives in the entry point, which distinguishes this from
/// configuration errors.
pub async fn spawn(server: Arc<GatewayServer>, addr: SocketAddr) -> anyhow::Result<GatewayServerHandle> {
    let listener = TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;
    let app = router(server.clone());
    let shutdown = Arc::new(Notify::new());
    let shutdown_signal = shutdown.clone();

    let task = tokio::spawn(async move {
        let graceful = axum::serve(listener, app).with_graceful_shutdown(async move {
            shutdown_signal.notified().await;
        });
        if let Err(err) = graceful.await {
            error!(error = ?err, "HTTP server terminated with error");
        }
    });

    info!(addr = %bound_addr, "gateway HTTP surface listening");
    Ok(GatewayServerHandle { addr: bound_addr, server, shutdown, task })
}
