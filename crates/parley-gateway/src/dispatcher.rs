use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use parley_types::models::UserId;

/// How a delivery is routed to local connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only connections subscribed to the destination's room.
    Topic,
    /// Every connection.
    All,
}

/// A serialized payload on its way to WebSocket clients.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub scope: Scope,
    pub destination: String,
    pub json: Arc<str>,
}

/// In-process fan-out hub for all gateway connections on this node.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel: every connection receives every delivery and
    /// filters topic deliveries against its own subscriptions.
    broadcast_tx: broadcast::Sender<Delivery>,

    /// Per-user targeted channels: user_id -> (conn_id -> sender).
    /// A user may hold several connections (tabs, devices).
    user_channels: RwLock<HashMap<UserId, HashMap<Uuid, mpsc::UnboundedSender<Delivery>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to deliveries. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Delivery> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Deliver to connections subscribed to `destination`.
    pub fn deliver_topic(&self, destination: &str, json: Arc<str>) {
        self.send(Delivery {
            scope: Scope::Topic,
            destination: destination.to_string(),
            json,
        });
    }

    /// Deliver to every connection.
    pub fn deliver_all(&self, destination: &str, json: Arc<str>) {
        self.send(Delivery {
            scope: Scope::All,
            destination: destination.to_string(),
            json,
        });
    }

    fn send(&self, delivery: Delivery) {
        // No receivers simply means nobody is connected.
        let _ = self.inner.broadcast_tx.send(delivery);
    }

    /// Deliver to every connection of one user.
    pub async fn deliver_to_user(&self, user_id: UserId, destination: &str, json: Arc<str>) {
        let channels = self.inner.user_channels.read().await;
        if let Some(conns) = channels.get(&user_id) {
            for tx in conns.values() {
                let _ = tx.send(Delivery {
                    scope: Scope::All,
                    destination: destination.to_string(),
                    json: json.clone(),
                });
            }
        }
    }

    /// Register a per-connection targeted channel. Returns (conn_id, receiver).
    pub async fn register_connection(
        &self,
        user_id: UserId,
    ) -> (Uuid, mpsc::UnboundedReceiver<Delivery>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Unregister a connection's targeted channel.
    pub async fn unregister_connection(&self, user_id: UserId, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some(conns) = channels.get_mut(&user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                channels.remove(&user_id);
            }
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner
            .user_channels
            .read()
            .await
            .values()
            .map(|conns| conns.len())
            .sum()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
