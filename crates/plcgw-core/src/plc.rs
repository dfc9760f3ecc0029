// ── Controller abstraction ──
//
// The gateway never names a concrete protocol client. It asks a
// `PlcConnector` for a session and talks to it through `PlcClient`.

use async_trait::async_trait;
use plcgw_s7::S7Client;

use crate::config::ConnectionConfig;
use crate::error::CoreError;
use crate::model::PlcIdentity;

/// One open controller session. Calls are issued one at a time; the
/// gateway serializes access.
#[async_trait]
pub trait PlcClient: Send {
    /// Read `len` bytes from data block `db` at byte `offset`.
    async fn read(&mut self, db: u16, offset: u32, len: usize) -> Result<Vec<u8>, CoreError>;

    async fn write(&mut self, db: u16, offset: u32, data: &[u8]) -> Result<(), CoreError>;

    async fn identity(&mut self) -> Result<PlcIdentity, CoreError>;

    /// Fails when the controller itself is unreachable, as opposed to a
    /// single point being unreadable.
    async fn probe(&mut self) -> Result<(), CoreError>;

    async fn close(self: Box<Self>) -> Result<(), CoreError>;
}

/// Opens controller sessions.
#[async_trait]
pub trait PlcConnector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn PlcClient>, CoreError>;
}

// ── S7 ───────────────────────────────────────────────────────────────

/// Connector for Siemens S7 CPUs over ISO-on-TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct S7Connector;

#[async_trait]
impl PlcConnector for S7Connector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn PlcClient>, CoreError> {
        let client = S7Client::connect(&config.into())
            .await
            .map_err(|e| match e {
                plcgw_s7::Error::Timeout { timeout_ms } => CoreError::Timeout { timeout_ms },
                other => CoreError::ConnectionFailed {
                    target: config.target(),
                    reason: other.to_string(),
                },
            })?;
        Ok(Box::new(S7Session(client)))
    }
}

struct S7Session(S7Client);

#[async_trait]
impl PlcClient for S7Session {
    async fn read(&mut self, db: u16, offset: u32, len: usize) -> Result<Vec<u8>, CoreError> {
        Ok(self.0.read_db(db, offset, len).await?)
    }

    async fn write(&mut self, db: u16, offset: u32, data: &[u8]) -> Result<(), CoreError> {
        Ok(self.0.write_db(db, offset, data).await?)
    }

    async fn identity(&mut self) -> Result<PlcIdentity, CoreError> {
        Ok(self.0.identity().await?.into())
    }

    async fn probe(&mut self) -> Result<(), CoreError> {
        Ok(self.0.probe().await?)
    }

    async fn close(self: Box<Self>) -> Result<(), CoreError> {
        Ok(self.0.close().await?)
    }
}
