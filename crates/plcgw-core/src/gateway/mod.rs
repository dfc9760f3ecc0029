// ── Gateway ──
//
// Owns the controller connection lifecycle, the point-value cache and the
// broadcast hub. Connect, disconnect and the demo-mode equivalents are
// mutually exclusive: a transition started while another is running fails
// with `CoreError::Busy` instead of waiting.

mod poll;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{self, WritePlan};
use crate::config::{ConnectionConfig, ConnectionOverrides, GatewayConfig};
use crate::demo::{DemoSource, SyntheticSource};
use crate::error::CoreError;
use crate::hub::{BroadcastHub, CLIENT_QUEUE_CAPACITY, ClientId, FeedMessage};
use crate::model::{
    ConnectionPhase, ConnectionStatus, PlcValue, PointDefinition, validate_points,
};
use crate::plc::{PlcClient, PlcConnector, S7Connector};
use crate::store::{PointCache, PointSnapshot};

use self::poll::PollSource;

/// The single service object behind the control surface and live feed.
///
/// Cheaply cloneable via `Arc<GatewayInner>`.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    config: GatewayConfig,
    points: Vec<PointDefinition>,
    connector: Arc<dyn PlcConnector>,
    demo: Arc<dyn DemoSource>,
    cache: PointCache,
    hub: BroadcastHub,
    status: watch::Sender<ConnectionStatus>,
    /// Only one request against the controller at a time.
    link: Mutex<Option<Link>>,
    /// Held for the duration of connect/disconnect/demo transitions.
    transition: Mutex<()>,
    poller: Mutex<Option<TaskSlot>>,
    reconnect: Mutex<Option<TaskSlot>>,
}

struct Link {
    client: Box<dyn PlcClient>,
    config: ConnectionConfig,
}

struct TaskSlot {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TaskSlot {
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "background task ended abnormally");
        }
    }
}

impl Gateway {
    /// Build a gateway. Does NOT connect; call [`connect()`](Self::connect)
    /// or [`start_demo()`](Self::start_demo).
    pub fn new(
        config: GatewayConfig,
        points: Vec<PointDefinition>,
        connector: Arc<dyn PlcConnector>,
        demo: Arc<dyn DemoSource>,
    ) -> Result<Self, CoreError> {
        validate_points(&points)?;
        let (status, _) = watch::channel(ConnectionStatus::default());

        Ok(Self {
            inner: Arc::new(GatewayInner {
                cache: PointCache::new(&points),
                hub: BroadcastHub::new(config.protocol_tag.clone(), CLIENT_QUEUE_CAPACITY),
                config,
                points,
                connector,
                demo,
                status,
                link: Mutex::new(None),
                transition: Mutex::new(()),
                poller: Mutex::new(None),
                reconnect: Mutex::new(None),
            }),
        })
    }

    /// Gateway talking S7 to the configured controller, with the synthetic
    /// demo source.
    pub fn s7(config: GatewayConfig, points: Vec<PointDefinition>) -> Result<Self, CoreError> {
        Self::new(
            config,
            points,
            Arc::new(S7Connector),
            Arc::new(SyntheticSource::new()),
        )
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn points(&self) -> &[PointDefinition] {
        &self.inner.points
    }

    pub fn point(&self, id: &str) -> Option<&PointDefinition> {
        self.inner.points.iter().find(|p| p.id == id)
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Connect to the controller, replacing any existing session.
    ///
    /// `overrides` are applied on top of the configured connection
    /// parameters. Resets the reconnect attempt counter and cancels any
    /// pending automatic reconnect. Failures are recorded in the status and
    /// returned; they are never retried automatically.
    pub async fn connect(
        &self,
        overrides: Option<&ConnectionOverrides>,
    ) -> Result<ConnectionStatus, CoreError> {
        let _guard = self.begin_transition()?;
        if self.is_demo() {
            return Err(CoreError::ModeConflict {
                active: "demo",
                requested: "connect to a PLC",
            });
        }

        let base = &self.inner.config.connection;
        let config = overrides.map_or_else(|| base.clone(), |o| base.with_overrides(o));

        self.cancel_reconnect().await;
        self.inner.status.send_modify(|s| s.connection_attempts = 0);
        self.establish(config).await
    }

    /// Stop polling, close the controller session and clear the error.
    ///
    /// Close failures are logged; disconnect itself always completes.
    pub async fn disconnect(&self) -> Result<ConnectionStatus, CoreError> {
        let _guard = self.begin_transition()?;
        if self.is_demo() {
            return Err(CoreError::ModeConflict {
                active: "demo",
                requested: "disconnect from the PLC",
            });
        }
        self.teardown().await;
        info!("disconnected from PLC");
        Ok(self.status())
    }

    /// Switch to demo mode: status reports connected with the demo
    /// identity and the poller reads from the demo source.
    pub async fn start_demo(&self) -> Result<ConnectionStatus, CoreError> {
        let _guard = self.begin_transition()?;
        if self.inner.link.lock().await.is_some() {
            return Err(CoreError::ModeConflict {
                active: "PLC",
                requested: "start demo mode",
            });
        }

        self.cancel_reconnect().await;
        self.stop_poller().await;

        let identity = self.inner.demo.identity();
        self.inner.status.send_modify(|s| {
            s.connected = true;
            s.demo_mode = true;
            s.error = None;
            s.connection_attempts = 0;
            s.last_connected = Some(Utc::now());
            s.plc_info = Some(identity);
            s.state = ConnectionPhase::DemoConnected;
        });
        self.start_poller(PollSource::Demo).await;
        self.broadcast_status();
        info!("demo mode started");
        Ok(self.status())
    }

    pub async fn stop_demo(&self) -> Result<ConnectionStatus, CoreError> {
        let _guard = self.begin_transition()?;
        if self.inner.link.lock().await.is_some() {
            return Err(CoreError::ModeConflict {
                active: "PLC",
                requested: "stop demo mode",
            });
        }
        self.teardown().await;
        info!("demo mode stopped");
        Ok(self.status())
    }

    /// Stop every background task and close the controller session.
    ///
    /// Unlike `disconnect`, waits for an in-flight transition to finish
    /// instead of failing.
    pub async fn shutdown(&self) {
        let _guard = self.inner.transition.lock().await;
        self.teardown().await;
        debug!("gateway shut down");
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Write `value` (in raw controller units) to point `id`.
    ///
    /// Unknown and read-only points are rejected before the controller is
    /// contacted. `BOOL` points with a bit offset are read-modify-written
    /// while holding the session, so no other request can interleave.
    pub async fn write(&self, id: &str, value: &PlcValue) -> Result<(), CoreError> {
        let point = self
            .point(id)
            .ok_or_else(|| CoreError::PointNotFound { id: id.to_owned() })?;
        if !point.writable {
            return Err(CoreError::PointNotWritable { id: id.to_owned() });
        }

        if self.is_demo() {
            self.inner.demo.write(point, value)?;
            info!(point = %point.id, %value, "demo write");
            return Ok(());
        }

        let plan = codec::encode(value, point).map_err(|source| CoreError::Encode {
            id: id.to_owned(),
            source,
        })?;

        let mut guard = self.inner.link.lock().await;
        let link = guard.as_mut().ok_or(CoreError::ControllerDisconnected)?;
        let result = match &plan {
            WritePlan::Replace(bytes) => link.client.write(point.db, point.offset, bytes).await,
            WritePlan::Bit { .. } => {
                match link.client.read(point.db, point.offset, 1).await {
                    Ok(current) => match current.first() {
                        Some(byte) => {
                            let next = plan.apply_bit(*byte);
                            link.client.write(point.db, point.offset, &[next]).await
                        }
                        None => Err(CoreError::Internal("empty read for bit write".into())),
                    },
                    Err(e) => Err(e),
                }
            }
        };
        drop(guard);

        result.map_err(|e| CoreError::WriteFailed {
            id: id.to_owned(),
            reason: e.to_string(),
        })?;
        info!(point = %point.id, db = point.db, offset = point.offset, %value, "wrote point");
        Ok(())
    }

    // ── Live feed ────────────────────────────────────────────────

    /// Register a live-feed client. It receives the current data (when the
    /// cache is populated) and status before any later broadcast.
    pub fn subscribe(&self) -> (ClientId, mpsc::Receiver<Arc<str>>) {
        self.inner.hub.subscribe(&self.sync_messages())
    }

    pub fn unsubscribe(&self, client: ClientId) {
        self.inner.hub.unsubscribe(client);
    }

    /// Re-send the data and status snapshots to one client.
    pub fn resync(&self, client: ClientId) {
        for message in self.sync_messages() {
            if !self.inner.hub.send_to(client, &message) {
                break;
            }
        }
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.inner.hub
    }

    // ── State observation ────────────────────────────────────────

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn snapshot(&self) -> Arc<PointSnapshot> {
        self.inner.cache.snapshot()
    }

    pub fn watch_data(&self) -> watch::Receiver<Arc<PointSnapshot>> {
        self.inner.cache.subscribe()
    }

    pub fn is_demo(&self) -> bool {
        self.inner.status.borrow().demo_mode
    }

    // ── Internals ────────────────────────────────────────────────

    fn begin_transition(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, CoreError> {
        self.inner
            .transition
            .try_lock()
            .map_err(|_| CoreError::Busy)
    }

    /// Open a session with `config` and start polling. Caller holds the
    /// transition lock.
    async fn establish(&self, config: ConnectionConfig) -> Result<ConnectionStatus, CoreError> {
        self.set_phase(ConnectionPhase::Connecting);
        self.broadcast_status();
        self.stop_poller().await;
        self.close_link().await;

        let target = config.target();
        info!(target = %target, rack = config.rack, slot = config.slot, "connecting to PLC");

        let connected = tokio::time::timeout(config.timeout, self.inner.connector.connect(&config))
            .await
            .unwrap_or_else(|_| {
                Err(CoreError::Timeout {
                    timeout_ms: u64::try_from(config.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            });
        let mut client = match connected {
            Ok(client) => client,
            Err(e) => {
                warn!(target = %target, error = %e, "PLC connection failed");
                let message = e.to_string();
                self.inner.status.send_modify(|s| {
                    s.connected = false;
                    s.error = Some(message);
                    s.plc_info = None;
                    s.state = ConnectionPhase::Disconnected;
                });
                self.broadcast_status();
                return Err(e);
            }
        };

        let identity = match client.identity().await {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!(error = %e, "could not read PLC identity (non-fatal)");
                None
            }
        };

        *self.inner.link.lock().await = Some(Link { client, config });

        self.inner.status.send_modify(|s| {
            s.connected = true;
            s.demo_mode = false;
            s.error = None;
            s.connection_attempts = 0;
            s.last_connected = Some(Utc::now());
            s.plc_info = identity;
            s.state = ConnectionPhase::Connected;
        });
        self.start_poller(PollSource::Plc).await;
        self.broadcast_status();
        info!(target = %target, "connected to PLC");
        Ok(self.status())
    }

    /// Stop the poller before anything else, then any pending reconnect,
    /// then close the session.
    async fn teardown(&self) {
        self.set_phase(ConnectionPhase::Disconnecting);
        self.stop_poller().await;
        self.cancel_reconnect().await;
        self.close_link().await;

        self.inner.status.send_modify(|s| {
            s.connected = false;
            s.demo_mode = false;
            s.error = None;
            s.plc_info = None;
            s.state = ConnectionPhase::Disconnected;
        });
        self.broadcast_status();
    }

    /// Close and drop the session, returning its parameters.
    async fn close_link(&self) -> Option<ConnectionConfig> {
        let link = self.inner.link.lock().await.take()?;
        if let Err(e) = link.client.close().await {
            warn!(error = %e, "error closing PLC connection (ignored)");
        }
        Some(link.config)
    }

    async fn start_poller(&self, source: PollSource) {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll::poll_task(self.clone(), source, cancel.clone()));
        let previous = self
            .inner
            .poller
            .lock()
            .await
            .replace(TaskSlot { cancel, handle });
        if let Some(previous) = previous {
            previous.stop().await;
        }
    }

    async fn stop_poller(&self) {
        let slot = self.inner.poller.lock().await.take();
        if let Some(slot) = slot {
            slot.stop().await;
        }
    }

    async fn cancel_reconnect(&self) {
        let slot = self.inner.reconnect.lock().await.take();
        if let Some(slot) = slot {
            slot.stop().await;
            debug!("pending reconnect cancelled");
        }
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        self.inner.status.send_modify(|s| s.state = phase);
    }

    fn broadcast_status(&self) {
        self.inner.hub.broadcast(&FeedMessage::Status(self.status()));
    }

    fn sync_messages(&self) -> Vec<FeedMessage> {
        let mut messages = Vec::with_capacity(2);
        if !self.inner.cache.is_empty() {
            messages.push(FeedMessage::Data(self.inner.cache.snapshot()));
        }
        messages.push(FeedMessage::Status(self.status()));
        messages
    }
}
