// ── Background tasks ──
//
// The poller sweeps every configured point on a fixed interval. The
// reconnect task runs only after the poller detects a lost session.

use chrono::Utc;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{Gateway, TaskSlot};
use crate::codec;
use crate::config::ConnectionConfig;
use crate::error::CoreError;
use crate::hub::FeedMessage;
use crate::model::{ConnectionPhase, PointValue};

const CONNECTION_LOST: &str = "Connection lost";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PollSource {
    Plc,
    Demo,
}

/// Sweep on every tick until cancelled or the session is lost. The first
/// sweep runs immediately.
///
/// Boxed: the poller can schedule a reconnect, which starts a new poller.
pub(super) fn poll_task(
    gateway: Gateway,
    source: PollSource,
    cancel: CancellationToken,
) -> BoxFuture<'static, ()> {
    async move { run_poller(gateway, source, cancel).await }.boxed()
}

async fn run_poller(gateway: Gateway, source: PollSource, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(gateway.inner.config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let keep_polling = match source {
                    PollSource::Plc => gateway.plc_sweep(&cancel).await,
                    PollSource::Demo => {
                        gateway.demo_sweep();
                        true
                    }
                };
                if !keep_polling {
                    break;
                }
            }
        }
    }
    debug!(?source, "poller stopped");
}

/// Retry the lost session until it succeeds, the attempt cap is reached,
/// or the task is cancelled.
pub(super) fn reconnect_task(
    gateway: Gateway,
    config: ConnectionConfig,
    cancel: CancellationToken,
) -> BoxFuture<'static, ()> {
    async move { run_reconnect(gateway, config, cancel).await }.boxed()
}

async fn run_reconnect(gateway: Gateway, config: ConnectionConfig, cancel: CancellationToken) {
    let max = gateway.inner.config.max_reconnect_attempts;
    let delay = gateway.inner.config.reconnect_delay;

    loop {
        let attempts = gateway.status().connection_attempts;
        if attempts >= max {
            warn!(attempts, "automatic reconnect gave up; an explicit connect is required");
            break;
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        let Ok(_guard) = gateway.begin_transition() else {
            debug!("transition in progress, abandoning automatic reconnect");
            break;
        };
        let attempt = attempts + 1;
        gateway
            .inner
            .status
            .send_modify(|s| s.connection_attempts = attempt);
        info!(attempt, max, target = %config.target(), "reconnecting to PLC");

        match gateway.establish(config.clone()).await {
            Ok(_) => break,
            Err(e) => warn!(attempt, error = %e, "reconnect attempt failed"),
        }
    }
}

impl Gateway {
    /// One sweep against the controller. Returns `false` when the session
    /// is gone and polling must stop. A link failure on the probe or on any
    /// point read abandons the sweep without publishing it; any other error
    /// only marks the affected point bad.
    async fn plc_sweep(&self, cancel: &CancellationToken) -> bool {
        let probe = {
            let mut guard = self.inner.link.lock().await;
            match guard.as_mut() {
                Some(link) => link.client.probe().await,
                None => return false,
            }
        };
        match probe {
            Ok(()) => {}
            // Keep polling if a transition owns the session; it cancels us.
            Err(e) if e.is_link_failure() => return !self.connection_lost(&e).await,
            // The CPU answered, it just refused the status list.
            Err(e) => debug!(error = %e, "PLC status probe rejected, sweeping anyway"),
        }

        let mut entries = Vec::with_capacity(self.inner.points.len());
        for point in &self.inner.points {
            if cancel.is_cancelled() {
                return false;
            }

            let read = {
                let mut guard = self.inner.link.lock().await;
                match guard.as_mut() {
                    Some(link) => {
                        link.client
                            .read(point.db, point.offset, point.byte_len())
                            .await
                    }
                    None => Err(CoreError::ControllerDisconnected),
                }
            };
            let read = match read {
                // No point reading the rest off a dead session.
                Err(e) if e.is_link_failure() => return !self.connection_lost(&e).await,
                other => other,
            };
            let now = Utc::now();
            let decoded = read.and_then(|buf| codec::decode(&buf, point).map_err(CoreError::from));

            let entry = match decoded {
                Ok(value) => PointValue::good(value, now),
                Err(e) => {
                    debug!(
                        point = %point.id,
                        db = point.db,
                        offset = point.offset,
                        error = %e,
                        "point read failed"
                    );
                    PointValue::bad(e.to_string(), now)
                }
            };
            entries.push((point.id.clone(), entry));
        }

        self.publish(entries);
        true
    }

    fn demo_sweep(&self) {
        let now = Utc::now();
        let entries = self
            .inner
            .demo
            .values(&self.inner.points)
            .into_iter()
            .map(|(id, value)| (id, PointValue::good(value, now)))
            .collect();
        self.publish(entries);
    }

    fn publish(&self, entries: Vec<(String, PointValue)>) {
        let count = entries.len();
        self.inner.cache.apply_sweep(entries);
        let clients = self
            .inner
            .hub
            .broadcast(&FeedMessage::Data(self.inner.cache.snapshot()));
        trace!(points = count, clients, "sweep published");
    }

    /// The controller stopped answering mid-session: drop the session,
    /// report it, and schedule an automatic reconnect. Returns `false` when
    /// a transition in progress owns the session instead.
    async fn connection_lost(&self, error: &CoreError) -> bool {
        let Ok(_guard) = self.begin_transition() else {
            return false;
        };
        warn!(error = %error, "connection to PLC lost");

        let config = self.close_link().await;
        self.inner.status.send_modify(|s| {
            s.connected = false;
            s.error = Some(CONNECTION_LOST.into());
            s.plc_info = None;
            s.state = ConnectionPhase::Disconnected;
        });
        self.broadcast_status();

        if let Some(config) = config {
            self.schedule_reconnect(config).await;
        }
        true
    }

    async fn schedule_reconnect(&self, config: ConnectionConfig) {
        let max = self.inner.config.max_reconnect_attempts;
        if self.status().connection_attempts >= max {
            warn!(max, "reconnect attempts exhausted; an explicit connect is required");
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(reconnect_task(self.clone(), config, cancel.clone()));
        let previous = self
            .inner
            .reconnect
            .lock()
            .await
            .replace(TaskSlot { cancel, handle });
        if let Some(previous) = previous {
            previous.stop().await;
        }
        debug!(
            delay_ms = u64::try_from(self.inner.config.reconnect_delay.as_millis())
                .unwrap_or(u64::MAX),
            "reconnect scheduled"
        );
    }
}
