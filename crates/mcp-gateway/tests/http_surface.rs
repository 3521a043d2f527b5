//! Exercises the HTTP surface end to end: auth middleware, routing, and the
//! JSON-RPC envelope for a gateway with no configured downstreams.

use std::{collections::BTreeMap, net::SocketAddr};

use mcp_gateway::{
    GatewayServer,
    config::{GatewayConfig, GlobalConfig, ProxySettings},
    server,
};
use serde_json::{Value, json};

fn config(auth_keys: Vec<String>, log_path: &std::path::Path) -> GlobalConfig {
    GlobalConfig {
        name: "test-gateway".to_string(),
        version: "0.0.0".to_string(),
        proxy: ProxySettings { host: "127.0.0.1".to_string(), port: 0, timeout_secs: 5 },
        auth_enabled: Some(true),
        auth_header: "Authorization".to_string(),
        auth_keys,
        log_path: Some(log_path.to_string_lossy().into_owned()),
        processors: Vec::new(),
        gateways: BTreeMap::from([("g1".to_string(), GatewayConfig::default())]),
    }
}

async fn spawn_test_server(auth_keys: Vec<String>) -> (server::GatewayServerHandle, std::net::SocketAddr) {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(auth_keys, &dir.path().join("events.log"));
    let gateway = GatewayServer::build(cfg).await.expect("valid config builds a server");
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let handle = server::spawn(gateway, addr).await.expect("listener binds");
    let bound = handle.addr();
    // Leak the directory for the server's lifetime; the OS reclaims it on process exit.
    std::mem::forget(dir);
    (handle, bound)
}

#[tokio::test]
async fn missing_credentials_are_rejected() {
    let (handle, addr) = spawn_test_server(vec!["plain-key".to_string()]).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/mcp/g1"))
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers().get("www-authenticate").unwrap(), "Bearer");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"error": "unauthorized"}));

    handle.shutdown().await;
}

#[tokio::test]
async fn wrong_credentials_are_rejected() {
    let (handle, addr) = spawn_test_server(vec!["plain-key".to_string()]).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/mcp/g1"))
        .header("Authorization", "Bearer wrong")
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    handle.shutdown().await;
}

#[tokio::test]
async fn valid_credentials_reach_the_proxy_and_an_empty_gateway_lists_no_tools() {
    let (handle, addr) = spawn_test_server(vec!["plain-key".to_string()]).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/mcp/g1"))
        .header("Authorization", "Bearer plain-key")
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.headers().contains_key("mcp-session-id"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["tools"], json!([]));

    handle.shutdown().await;
}

#[tokio::test]
async fn unknown_gateway_is_a_404() {
    let (handle, addr) = spawn_test_server(vec!["plain-key".to_string()]).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/mcp/does-not-exist"))
        .header("Authorization", "Bearer plain-key")
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    handle.shutdown().await;
}

#[tokio::test]
async fn health_check_needs_no_credentials() {
    let (handle, addr) = spawn_test_server(vec!["plain-key".to_string()]).await;

    let response = reqwest::Client::new().get(format!("http://{addr}/api/health")).send().await.unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);

    handle.shutdown().await;
}

#[tokio::test]
async fn a_notification_gets_no_jsonrpc_body() {
    let (handle, addr) = spawn_test_server(vec!["plain-key".to_string()]).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/mcp/g1"))
        .header("Authorization", "Bearer plain-key")
        .json(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    handle.shutdown().await;
}
