//! Downstream transport adapters: HTTP-streaming and child-process stdio,
//! both yielding an rmcp client service so the rest of the gateway never has
//! to care which one it is talking to.

mod http;
mod stdio;

pub use http::connect_http;
pub use stdio::connect_stdio;

use rmcp::service::{RoleClient, RunningService};

/// A connected downstream MCP client, regardless of transport kind.
pub type DownstreamService = RunningService<RoleClient, ()>;
