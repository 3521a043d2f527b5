use std::{collections::BTreeMap, time::Duration};

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::{
    service::ServiceExt,
    transport::{StreamableHttpClientTransport, streamable_http_client::StreamableHttpClientTransportConfig},
};

use super::DownstreamService;

/// Downstream HTTP call timeout.
const DOWNSTREAM_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Connects to an HTTP-streaming downstream. `gateway_headers` come from the
/// downstream's own config (with `${VAR}` already substituted at load time);
/// `passthrough_headers` come from the current session's inbound request and
/// win on collision, since they represent the caller's own credentials.
pub async fn connect_http(
    url: &str,
    gateway_headers: &BTreeMap<String, String>,
    passthrough_headers: &BTreeMap<String, String>,
) -> Result<DownstreamService> {
    let mut headers = HeaderMap::new();
    for (name, value) in gateway_headers.iter().chain(passthrough_headers.iter()) {
        let header_name = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
            .with_context(|| format!("invalid header name '{name}'"))?;
        let header_value =
            HeaderValue::from_str(value).with_context(|| format!("invalid header value for '{name}'"))?;
        headers.insert(header_name, header_value);
    }

    let client = reqwest::Client::builder()
        .timeout(DOWNSTREAM_HTTP_TIMEOUT)
        .default_headers(headers)
        .build()
        .context("failed to build downstream HTTP client")?;

    let config = StreamableHttpClientTransportConfig::with_uri(url.to_string());
    let transport = StreamableHttpClientTransport::with_client(client, config);

    ().serve(transport).await.with_context(|| format!("failed to initialise MCP transport for '{url}'"))
}
