// ── Live feed listener ──
//
// WebSocket transport for the broadcast hub. Every accepted socket becomes
// one hub client: outbound messages are drained from its queue, inbound
// text frames are small JSON commands.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::gateway::Gateway;
use crate::hub::{ClientId, FeedMessage};

/// Commands a live-feed client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Answered with a `pong` message.
    Ping,
    /// Re-send the data and status snapshots to this client.
    Snapshot,
}

/// A running live-feed listener.
pub struct FeedListener {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl FeedListener {
    pub async fn bind(addr: SocketAddr, gateway: Gateway) -> Result<Self, CoreError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| CoreError::Config {
            message: format!("cannot listen for live feed on {addr}: {e}"),
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(accept_loop(listener, gateway, cancel.clone()));
        info!(addr = %local_addr, "live feed listening");

        Ok(Self {
            local_addr,
            cancel,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close every client socket and wait for them.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "live feed listener ended abnormally");
        }
    }
}

async fn accept_loop(listener: TcpListener, gateway: Gateway, cancel: CancellationToken) {
    let mut clients = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    clients.spawn(serve_client(stream, peer, gateway.clone(), cancel.child_token()));
                }
                Err(e) => warn!(error = %e, "live feed accept failed"),
            },
            Some(_) = clients.join_next(), if !clients.is_empty() => {}
        }
    }

    while clients.join_next().await.is_some() {}
    info!("live feed stopped");
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    gateway: Gateway,
    cancel: CancellationToken,
) {
    let socket = match tokio_tungstenite::accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            debug!(%peer, error = %e, "live feed handshake failed");
            return;
        }
    };
    let (mut sink, mut inbound) = socket.split();
    let (id, mut outbound) = gateway.subscribe();
    info!(client = id, %peer, "live feed client connected");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            queued = outbound.recv() => {
                // `None`: the hub dropped this client.
                let Some(text) = queued else { break };
                if let Err(e) = sink.send(Message::text(text.to_string())).await {
                    debug!(client = id, error = %e, "live feed send failed");
                    break;
                }
            }
            frame = inbound.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_client_message(&gateway, id, text.as_str()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(client = id, error = %e, "live feed read failed");
                    break;
                }
            }
        }
    }

    gateway.unsubscribe(id);
    info!(client = id, "live feed client disconnected");
}

fn handle_client_message(gateway: &Gateway, client: ClientId, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ping) => {
            gateway.hub().send_to(client, &FeedMessage::Pong);
        }
        Ok(ClientMessage::Snapshot) => gateway.resync(client),
        Err(e) => warn!(client, error = %e, "ignoring malformed live feed message"),
    }
}
