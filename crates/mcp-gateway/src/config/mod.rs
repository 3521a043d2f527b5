//! Configuration document types and loading.
//!
//! A gateway process is driven by one config file, TOML or JSON chosen by
//! file extension (mirroring the dual-format loader this crate has always
//! used). After parsing, every string leaf is passed through `${VAR}`
//! substitution against the process environment before the document is
//! validated.

use std::{collections::BTreeMap, path::Path, sync::OnceLock, time::Duration};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatewayError, Result};

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex is valid"))
}

/// One downstream MCP server: exactly one of `url` (HTTP-streaming) or
/// `command` (stdio child process) must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownstreamConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl DownstreamConfig {
    pub fn is_http(&self) -> bool {
        self.url.is_some()
    }

    fn validate(&self, name: &str) -> Result<()> {
        let has_url = self.url.as_deref().map(str::trim).is_some_and(|s| !s.is_empty());
        let has_command = self.command.as_deref().map(str::trim).is_some_and(|s| !s.is_empty());
        if has_url == has_command {
            return Err(GatewayError::DownstreamTransportAmbiguous { name: name.to_string() });
        }
        Ok(())
    }
}

/// One gateway: a named bundle of downstreams exposed together behind a
/// single aggregated endpoint and one pass-through endpoint per downstream.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, DownstreamConfig>,
    #[serde(default)]
    pub processors: Vec<ProcessorConfig>,
}

/// An entry in a processor chain. `cli` is the only supported type today;
/// the shape leaves room for future in-process types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_processor_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub options: serde_json::Map<String, Value>,
}

fn default_processor_timeout_secs() -> u64 {
    5
}

impl ProcessorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Listen address and related proxy-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    /// Read/write timeout applied to the HTTP surface, in seconds.
    #[serde(default = "default_proxy_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_proxy_timeout_secs() -> u64 {
    30
}

/// The whole configuration document for one gateway process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub proxy: ProxySettings,
    /// Whether API-key auth is required. Left unset, binding to a wildcard
    /// host is a configuration error (spec invariant: no silent-open
    /// wildcard bind).
    #[serde(default)]
    pub auth_enabled: Option<bool>,
    #[serde(default = "default_auth_header")]
    pub auth_header: String,
    #[serde(default)]
    pub auth_keys: Vec<String>,
    #[serde(default)]
    pub log_path: Option<String>,
    /// Processors applied ahead of every gateway's own chain, in order.
    #[serde(default)]
    pub processors: Vec<ProcessorConfig>,
    #[serde(default)]
    pub gateways: BTreeMap<String, GatewayConfig>,
}

fn default_name() -> String {
    "mcp-gateway".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_auth_header() -> String {
    "Authorization".to_string()
}

impl GlobalConfig {
    pub fn validate(&self) -> Result<()> {
        if is_wildcard_host(&self.proxy.host) && self.auth_enabled.is_none() {
            return Err(GatewayError::WildcardBindRequiresAuthDecision);
        }
        for gateway in self.gateways.values() {
            for (name, downstream) in &gateway.mcp_servers {
                downstream.validate(name)?;
            }
        }
        Ok(())
    }

    pub fn auth_enabled(&self) -> bool {
        self.auth_enabled.unwrap_or(false)
    }

    pub fn socket_addr(&self) -> Result<std::net::SocketAddr> {
        format!("{}:{}", self.proxy.host, self.proxy.port)
            .parse()
            .map_err(|_| GatewayError::InvalidPathSegment { name: self.proxy.host.clone() })
    }

    pub fn log_path(&self) -> std::path::PathBuf {
        self.log_path.as_ref().map(std::path::PathBuf::from).unwrap_or_else(|| std::path::PathBuf::from("mcp-gateway-events.log"))
    }
}

fn is_wildcard_host(host: &str) -> bool {
    matches!(host, "0.0.0.0" | "::" | "*")
}

fn is_json_path(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Reads, parses, substitutes `${VAR}` placeholders in, and validates a
/// config file.
pub fn load(path: impl AsRef<Path>) -> Result<GlobalConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|source| GatewayError::ReadConfig { path: path.to_path_buf(), source })?;

    let mut value: Value = if is_json_path(path) {
        serde_json::from_str(&content).map_err(|source| GatewayError::ParseJson { path: path.to_path_buf(), source })?
    } else {
        toml_edit::de::from_str(&content).map_err(|source| GatewayError::ParseToml { path: path.to_path_buf(), source })?
    };

    substitute_env(&mut value);

    let config: GlobalConfig = serde_json::from_value(value)
        .map_err(|source| GatewayError::ParseJson { path: path.to_path_buf(), source })?;
    config.validate()?;
    Ok(config)
}

fn substitute_env(value: &mut Value) {
    match value {
        Value::String(s) => *s = substitute_string(s),
        Value::Array(items) => items.iter_mut().for_each(substitute_env),
        Value::Object(map) => map.values_mut().for_each(substitute_env),
        _ => {}
    }
}

fn substitute_string(input: &str) -> String {
    env_var_pattern()
        .replace_all(input, |caps: &regex::Captures| std::env::var(&caps[1]).unwrap_or_default())
        .into_owned()
}
