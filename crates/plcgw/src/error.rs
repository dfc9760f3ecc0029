//! CLI error types with miette diagnostics.

use std::net::SocketAddr;

use miette::Diagnostic;
use thiserror::Error;

use plcgw_config::ConfigError;
use plcgw_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const BIND: i32 = 4;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(plcgw::no_config),
        help("Pass an existing file with --config, or run: plcgw config path")
    )]
    NoConfig { path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(plcgw::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(
        code(plcgw::config),
        help("Check the config file syntax and PLCGW_* environment variables.")
    )]
    Config(ConfigError),

    // ── Startup ──────────────────────────────────────────────────────
    #[error("Cannot listen on {addr}")]
    #[diagnostic(
        code(plcgw::bind),
        help("Another process may own the port. Choose one with --bind or gateway.api_bind.")
    )]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(code(plcgw::core))]
    Core(#[from] CoreError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Cannot render JSON: {0}")]
    #[diagnostic(code(plcgw::json))]
    Json(#[from] serde_json::Error),
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound { path } => Self::NoConfig {
                path: path.display().to_string(),
            },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoConfig { .. } | Self::Config(_) => exit_code::CONFIG,
            Self::Validation { .. } => exit_code::USAGE,
            Self::Bind { .. } => exit_code::BIND,
            Self::Core(_) | Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }
}
