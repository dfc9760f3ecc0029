use thiserror::Error;

/// Top-level error type for the `plcgw-s7` crate.
///
/// Covers every failure mode of a single ISO-on-TCP session: socket I/O,
/// request timeouts, the COTP/S7 handshake, malformed frames, and item-level
/// rejections from the controller. `plcgw-core` maps these into its own
/// categories.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// Socket-level failure (connection refused, reset, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection mid-exchange.
    #[error("Connection closed by peer")]
    Closed,

    /// An earlier exchange timed out or failed mid-frame; the session must
    /// be reopened.
    #[error("Session unusable after an earlier failed request")]
    Broken,

    /// Request did not complete within the configured timeout.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Session ─────────────────────────────────────────────────────
    /// COTP connection request or S7 setup communication was refused.
    #[error("Connection handshake failed: {0}")]
    Handshake(String),

    /// Frame did not match the expected layout or carried an error header.
    #[error("Protocol error: {0}")]
    Protocol(String),

    // ── Data ────────────────────────────────────────────────────────
    /// The controller answered, but refused the addressed item.
    #[error("PLC rejected item: {0}")]
    Item(ItemError),

    /// The request cannot be expressed on the wire (address too large, ...).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Whether the session is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Closed | Self::Broken | Self::Timeout { .. } | Self::Protocol(_)
        )
    }
}

/// Item-level return codes from read/write var responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ItemError {
    #[error("hardware fault")]
    HardwareFault,
    #[error("access denied")]
    AccessDenied,
    #[error("address out of range")]
    AddressOutOfRange,
    #[error("data type not supported")]
    DataTypeNotSupported,
    #[error("data type inconsistent")]
    DataTypeInconsistent,
    #[error("object does not exist")]
    ObjectDoesNotExist,
    #[error("return code 0x{0:02X}")]
    Unknown(u8),
}

impl ItemError {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::HardwareFault,
            0x03 => Self::AccessDenied,
            0x05 => Self::AddressOutOfRange,
            0x06 => Self::DataTypeNotSupported,
            0x07 => Self::DataTypeInconsistent,
            0x0A => Self::ObjectDoesNotExist,
            other => Self::Unknown(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
