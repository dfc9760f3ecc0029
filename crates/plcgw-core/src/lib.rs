//! Gateway core between a PLC and the API/live-feed consumers.
//!
//! This crate owns the connection lifecycle, the value codec, the polling
//! loop and the live-data fan-out:
//!
//! - **[`Gateway`]**: Central facade. [`connect()`](Gateway::connect) opens a
//!   controller session and starts the poller; a lost session is retried
//!   automatically up to a configured cap. Demo mode swaps the controller for
//!   a [`DemoSource`].
//!
//! - **[`codec`]**: Big-endian decoding/encoding of the supported point
//!   types, including bit-level BOOLs and S7 strings.
//!
//! - **[`BroadcastHub`]**: Per-client bounded queues. A slow client is
//!   dropped instead of stalling the poller.
//!
//! - **[`ControlSurface`]**: Transport-independent command handling used by
//!   the HTTP API. Starts the [`FeedListener`] on first connect.

pub mod codec;
pub mod config;
pub mod control;
pub mod demo;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod hub;
pub mod model;
pub mod plc;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ConnectionConfig, ConnectionOverrides, GatewayConfig};
pub use control::{ControlRequest, ControlResponse, ControlSurface, Outcome};
pub use demo::{DemoSource, SyntheticSource};
pub use error::CoreError;
pub use feed::FeedListener;
pub use gateway::Gateway;
pub use hub::{BroadcastHub, ClientId, FeedMessage};
pub use plc::{PlcClient, PlcConnector, S7Connector};
pub use store::PointSnapshot;

pub use model::{
    ConnectionPhase, ConnectionStatus, DataType, PlcIdentity, PlcValue, PointDefinition,
    PointValue, Quality,
};
