// ── Core error types ──
//
// User-facing errors from plcgw-core. Consumers never see raw frame or
// socket failures: the `From<plcgw_s7::Error>` impl translates them into
// the gateway's failure categories.

use thiserror::Error;

use crate::codec::CodecError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to PLC at {target}: {reason}")]
    ConnectionFailed { target: String, reason: String },

    #[error("PLC request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Another connect or disconnect is already in progress")]
    Busy,

    #[error("Cannot {requested} while {active} mode is active; disconnect first")]
    ModeConflict {
        active: &'static str,
        requested: &'static str,
    },

    #[error("PLC is not connected")]
    ControllerDisconnected,

    #[error("Connection to PLC lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("PLC link error: {message}")]
    Link { message: String },

    #[error("PLC rejected the request: {message}")]
    Rejected { message: String },

    // ── Point errors ─────────────────────────────────────────────────
    #[error("Data point not found: {id}")]
    PointNotFound { id: String },

    #[error("Data point is not writable: {id}")]
    PointNotWritable { id: String },

    #[error("Cannot encode value for {id}: {source}")]
    Encode {
        id: String,
        #[source]
        source: CodecError,
    },

    #[error("Cannot decode value: {0}")]
    Decode(#[from] CodecError),

    #[error("Write to {id} failed: {reason}")]
    WriteFailed { id: String, reason: String },

    // ── Input errors ─────────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the PLC session should be considered gone after this error.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::ConnectionLost { .. }
                | Self::Link { .. }
                | Self::ControllerDisconnected
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<plcgw_s7::Error> for CoreError {
    fn from(err: plcgw_s7::Error) -> Self {
        match err {
            plcgw_s7::Error::Timeout { timeout_ms } => CoreError::Timeout { timeout_ms },
            plcgw_s7::Error::Closed => CoreError::ConnectionLost {
                reason: "connection closed by PLC".into(),
            },
            plcgw_s7::Error::Broken => CoreError::ConnectionLost {
                reason: "session abandoned after a failed request".into(),
            },
            plcgw_s7::Error::Io(e) => CoreError::Link {
                message: e.to_string(),
            },
            plcgw_s7::Error::Handshake(message) | plcgw_s7::Error::Protocol(message) => {
                CoreError::Link { message }
            }
            plcgw_s7::Error::Item(item) => CoreError::Rejected {
                message: item.to_string(),
            },
            plcgw_s7::Error::InvalidRequest(message) => CoreError::ValidationFailed { message },
        }
    }
}
