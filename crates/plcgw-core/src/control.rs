// ── Control surface ──
//
// Transport-independent command handling: queries, connect/disconnect,
// demo mode and writes. Requests and responses are the JSON shapes the
// HTTP API exposes; the caller maps `Outcome` onto its status codes.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ConnectionOverrides;
use crate::error::CoreError;
use crate::feed::FeedListener;
use crate::gateway::Gateway;
use crate::model::{ConnectionStatus, PlcValue, PointDefinition};
use crate::store::PointSnapshot;

/// A command, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ControlRequest {
    Status,
    Data,
    Datapoints,
    Connect {
        #[serde(default)]
        config: Option<ConnectionOverrides>,
    },
    ConnectDemo,
    Disconnect,
    Write {
        #[serde(default, rename = "dataPointId")]
        data_point_id: Option<String>,
        #[serde(default)]
        value: Option<PlcValue>,
    },
}

impl ControlRequest {
    /// Side-effect-free requests.
    pub fn is_query(&self) -> bool {
        matches!(self, Self::Status | Self::Data | Self::Datapoints)
    }
}

/// Response category, independent of any transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Outcome {
    #[default]
    Ok,
    BadRequest,
    NotFound,
    Conflict,
    Unavailable,
    Failed,
}

impl From<&CoreError> for Outcome {
    fn from(err: &CoreError) -> Self {
        match err {
            CoreError::PointNotFound { .. } => Self::NotFound,
            CoreError::PointNotWritable { .. }
            | CoreError::Encode { .. }
            | CoreError::Decode(_)
            | CoreError::ValidationFailed { .. } => Self::BadRequest,
            CoreError::Busy | CoreError::ModeConflict { .. } => Self::Conflict,
            CoreError::ControllerDisconnected
            | CoreError::ConnectionFailed { .. }
            | CoreError::Timeout { .. }
            | CoreError::ConnectionLost { .. }
            | CoreError::Link { .. } => Self::Unavailable,
            CoreError::Rejected { .. }
            | CoreError::WriteFailed { .. }
            | CoreError::Config { .. }
            | CoreError::Internal(_) => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ConnectionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Arc<PointSnapshot>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_points: Option<Vec<PointDefinition>>,
    #[serde(skip)]
    pub outcome: Outcome,
}

impl ControlResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    fn query() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    fn failure(outcome: Outcome, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            outcome,
            ..Self::default()
        }
    }

    fn with_status(mut self, status: ConnectionStatus) -> Self {
        self.status = Some(status);
        self
    }
}

impl From<CoreError> for ControlResponse {
    fn from(err: CoreError) -> Self {
        Self::failure(Outcome::from(&err), err.to_string())
    }
}

/// Drives the gateway on behalf of external callers and owns the live-feed
/// listener, which starts with the first connect.
pub struct ControlSurface {
    gateway: Gateway,
    feed: Mutex<Option<FeedListener>>,
}

impl ControlSurface {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            feed: Mutex::new(None),
        }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Address of the live feed, once started.
    pub async fn feed_addr(&self) -> Option<SocketAddr> {
        self.feed.lock().await.as_ref().map(FeedListener::local_addr)
    }

    /// Handle a raw JSON request body. Malformed input is a `BadRequest`.
    pub async fn handle_body(&self, body: &[u8]) -> ControlResponse {
        match serde_json::from_slice::<ControlRequest>(body) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                debug!(error = %e, "rejecting malformed control request");
                ControlResponse::failure(Outcome::BadRequest, format!("Invalid request: {e}"))
            }
        }
    }

    pub async fn handle(&self, request: ControlRequest) -> ControlResponse {
        match request {
            ControlRequest::Status => ControlResponse {
                data_points: Some(self.gateway.points().to_vec()),
                ..ControlResponse::query()
            }
            .with_status(self.gateway.status()),
            ControlRequest::Data => ControlResponse {
                data: Some(self.gateway.snapshot()),
                ..ControlResponse::query()
            },
            ControlRequest::Datapoints => ControlResponse {
                data_points: Some(self.gateway.points().to_vec()),
                ..ControlResponse::query()
            },
            ControlRequest::Connect { config } => self.connect(config).await,
            ControlRequest::ConnectDemo => self.connect_demo().await,
            ControlRequest::Disconnect => self.disconnect().await,
            ControlRequest::Write {
                data_point_id,
                value,
            } => match (data_point_id, value) {
                (Some(id), Some(value)) if !id.is_empty() => self.write(&id, &value).await,
                _ => ControlResponse::failure(
                    Outcome::BadRequest,
                    "Both dataPointId and value are required",
                ),
            },
        }
    }

    /// Disconnect whichever mode is active and stop the live feed.
    pub async fn shutdown(&self) {
        self.gateway.shutdown().await;
        let feed = self.feed.lock().await.take();
        if let Some(feed) = feed {
            feed.shutdown().await;
        }
        info!("control surface shut down");
    }

    // ── Commands ─────────────────────────────────────────────────

    async fn connect(&self, overrides: Option<ConnectionOverrides>) -> ControlResponse {
        if let Err(e) = self.ensure_feed().await {
            return e.into();
        }
        match self.gateway.connect(overrides.as_ref()).await {
            Ok(status) => {
                let base = &self.gateway.config().connection;
                let target = overrides
                    .as_ref()
                    .map_or_else(|| base.target(), |o| base.with_overrides(o).target());
                ControlResponse::ok(format!("Connected to PLC at {target}")).with_status(status)
            }
            Err(e) => ControlResponse::from(e).with_status(self.gateway.status()),
        }
    }

    async fn connect_demo(&self) -> ControlResponse {
        if let Err(e) = self.ensure_feed().await {
            return e.into();
        }
        match self.gateway.start_demo().await {
            Ok(status) => ControlResponse::ok("Demo mode started").with_status(status),
            Err(e) => ControlResponse::from(e).with_status(self.gateway.status()),
        }
    }

    async fn disconnect(&self) -> ControlResponse {
        let result = if self.gateway.is_demo() {
            self.gateway.stop_demo().await
        } else {
            self.gateway.disconnect().await
        };
        match result {
            Ok(status) => ControlResponse::ok("Disconnected").with_status(status),
            Err(e) => ControlResponse::from(e).with_status(self.gateway.status()),
        }
    }

    async fn write(&self, id: &str, value: &PlcValue) -> ControlResponse {
        match self.gateway.write(id, value).await {
            Ok(()) => ControlResponse::ok(format!("Wrote {value} to {id}")),
            Err(e) => e.into(),
        }
    }

    async fn ensure_feed(&self) -> Result<(), CoreError> {
        let mut feed = self.feed.lock().await;
        if feed.is_none() {
            let addr = self.gateway.config().feed_addr;
            *feed = Some(FeedListener::bind(addr, self.gateway.clone()).await?);
        }
        Ok(())
    }
}
