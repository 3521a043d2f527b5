use std::{io, path::PathBuf};

use serde_json::Error as JsonError;
use thiserror::Error;
use toml_edit::{de::Error as TomlDeError, ser::Error as TomlSerError};

/// Errors surfaced by the gateway runtime.
///
/// Variants map to the error kinds in the gateway's error-handling design:
/// configuration errors are fatal at startup, transport/tool/processor
/// errors are per-request and recoverable, auth errors become 401s.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to read configuration file {path}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse JSON configuration at {path}")]
    ParseJson {
        path: PathBuf,
        #[source]
        source: JsonError,
    },

    #[error("failed to parse TOML configuration at {path}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: TomlDeError,
    },

    #[error("failed to serialise configuration to TOML")]
    SerialiseToml {
        #[source]
        source: TomlSerError,
    },

    #[error("downstream '{name}' must set exactly one of url or command")]
    DownstreamTransportAmbiguous { name: String },

    #[error("gateway '{gateway}' has no downstream named '{server}'")]
    UnknownDownstream { gateway: String, server: String },

    #[error("binding to a wildcard host requires authEnabled to be set explicitly")]
    WildcardBindRequiresAuthDecision,

    #[error("tool name '{name}' contains the namespace separator '{separator}'")]
    ToolNameContainsSeparator { name: String, separator: &'static str },

    #[error("gateway or server name '{name}' is not URL-safe")]
    InvalidPathSegment { name: String },

    #[error("downstream '{name}' is not connected")]
    NotConnected { name: String },

    #[error("downstream transport failure for '{name}'")]
    Transport {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("processor '{name}' rejected the event with status {status}")]
    ProcessorReject { name: String, status: u16, message: String },

    #[error("processor '{name}' faulted: {message}")]
    ProcessorFault { name: String, message: String },

    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
