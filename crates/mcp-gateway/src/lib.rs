//! Core library for the aggregating MCP gateway: session lifecycle,
//! downstream connection management, tool aggregation and dispatch, the
//! event-processing pipeline, and the HTTP/stdio transport adapters.

pub mod auth;
pub mod config;
pub mod downstream;
pub mod error;
pub mod event;
pub mod event_processor;
pub mod id;
pub mod logger;
pub mod processor;
pub mod proxy;
pub mod server;
pub mod session;
pub mod transport;

pub use config::GlobalConfig;
pub use error::GatewayError;
pub use server::GatewayServer;
