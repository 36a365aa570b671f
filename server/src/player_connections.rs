use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use common::{LeaderboardSnapshot, ServerMessage};
use crate::error::ConnectionLost;

pub type ConnectionId = Uuid;

/// Outbound queue depth per connection. A client that falls this far behind
/// hits the send timeout and is dropped.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// A fully serialized message queued for one connection.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Snapshot { version: u64, payload: Arc<str> },
    Direct(Arc<str>),
}

impl OutboundFrame {
    pub fn snapshot(snapshot: &LeaderboardSnapshot) -> serde_json::Result<Self> {
        let payload = ServerMessage::leaderboard(snapshot).to_json()?;
        Ok(OutboundFrame::Snapshot {
            version: snapshot.version,
            payload: payload.into(),
        })
    }

    pub fn message(message: &ServerMessage) -> serde_json::Result<Self> {
        Ok(OutboundFrame::Direct(message.to_json()?.into()))
    }

    pub fn payload(&self) -> &str {
        match self {
            OutboundFrame::Snapshot { payload, .. } => payload,
            OutboundFrame::Direct(payload) => payload,
        }
    }
}

/// Per-connection filter that drops snapshots older than one already written,
/// so a connection never sees rankings go backwards. Repeats of the newest
/// version pass, since explicit leaderboard requests are answered with it.
#[derive(Debug, Default)]
pub struct DeliveryCursor {
    last_version: Option<u64>,
}

impl DeliveryCursor {
    pub fn admit(&mut self, frame: &OutboundFrame) -> bool {
        match frame {
            OutboundFrame::Snapshot { version, .. } => {
                if self.last_version.is_some_and(|last| *version < last) {
                    return false;
                }
                self.last_version = Some(*version);
                true
            }
            OutboundFrame::Direct(_) => true,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Tracks the open live-channel connections and fans messages out to them.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, mpsc::Sender<OutboundFrame>>>,
    send_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            send_timeout,
        }
    }

    /// Channel pair for a new connection's outbound queue.
    pub fn channel() -> (mpsc::Sender<OutboundFrame>, mpsc::Receiver<OutboundFrame>) {
        mpsc::channel(OUTBOUND_QUEUE_CAPACITY)
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    pub async fn register(&self, id: ConnectionId, sender: mpsc::Sender<OutboundFrame>) {
        let mut connections = self.connections.write().await;
        connections.insert(id, sender);
        debug!("Registered connection {} ({} open)", id, connections.len());
    }

    /// Returns whether the connection was still registered. Removing an
    /// unknown id is a no-op.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        let removed = connections.remove(&id).is_some();
        if removed {
            debug!("Unregistered connection {} ({} open)", id, connections.len());
        }
        removed
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Send to a single connection. A failed send unregisters it.
    pub async fn send_to(&self, id: ConnectionId, frame: OutboundFrame) -> Result<(), ConnectionLost> {
        let sender = self.connections.read().await.get(&id).cloned();
        let Some(sender) = sender else {
            return Err(ConnectionLost(id));
        };

        if let Err(e) = sender.send_timeout(frame, self.send_timeout).await {
            warn!("Dropping connection {}: {}", id, e);
            self.unregister(id).await;
            return Err(ConnectionLost(id));
        }
        Ok(())
    }

    /// Best-effort delivery to every registered connection.
    ///
    /// The sender list is copied before sending so registration never waits on
    /// a slow fan-out. Connections that fail or time out are unregistered; the
    /// rest still receive the frame.
    pub async fn broadcast(&self, frame: OutboundFrame) -> BroadcastReport {
        let targets: Vec<(ConnectionId, mpsc::Sender<OutboundFrame>)> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .map(|(id, sender)| (*id, sender.clone()))
                .collect()
        };

        let sends = targets.iter().map(|(id, sender)| {
            let frame = frame.clone();
            async move {
                let result = sender.send_timeout(frame, self.send_timeout).await;
                (*id, result.map_err(|e| e.to_string()))
            }
        });

        let mut report = BroadcastReport::default();
        for (id, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("Dropping connection {} during broadcast: {}", id, e);
                    self.unregister(id).await;
                    report.dropped += 1;
                }
            }
        }

        trace!(
            "Broadcast delivered to {} connections, dropped {}",
            report.delivered, report.dropped
        );
        report
    }
}
