//! In-memory room registry: which live connections are enrolled in which
//! group's broadcast room. Process-local, rebuilt by clients re-joining
//! after reconnect. A multi-process deployment would need an external
//! pub/sub behind this interface.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tokio::sync::mpsc::UnboundedSender;

pub type ConnId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate an opaque identifier for a new connection.
pub fn next_conn_id() -> ConnId {
    NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Default)]
struct RoomTable {
    /// group id -> connections enrolled in that room.
    rooms: HashMap<String, HashMap<ConnId, UnboundedSender<String>>>,
    /// connection -> group ids it joined, for disconnect cleanup.
    joined: HashMap<ConnId, HashSet<String>>,
}

#[derive(Clone, Default)]
pub struct RoomRegistry {
    inner: Arc<RwLock<RoomTable>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enroll a connection in a group's room. Joining twice is a no-op.
    pub async fn join(&self, conn: ConnId, group_id: &str, tx: UnboundedSender<String>) {
        let mut table = self.inner.write().await;
        table
            .rooms
            .entry(group_id.to_string())
            .or_default()
            .insert(conn, tx);
        table
            .joined
            .entry(conn)
            .or_default()
            .insert(group_id.to_string());
    }

    /// Deregister a connection from every room it joined.
    pub async fn disconnect(&self, conn: ConnId) {
        let mut table = self.inner.write().await;
        if let Some(groups) = table.joined.remove(&conn) {
            for group_id in groups {
                let now_empty = match table.rooms.get_mut(&group_id) {
                    Some(room) => {
                        room.remove(&conn);
                        room.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    table.rooms.remove(&group_id);
                }
            }
        }
    }

    /// Fan a serialized event out to every connection in the room, the
    /// sender's own connection included. Connections whose channel is gone
    /// are pruned. Returns the number of deliveries.
    pub async fn broadcast(&self, group_id: &str, payload: &str) -> usize {
        let mut table = self.inner.write().await;
        let mut delivered = 0;
        let mut dead: Vec<ConnId> = Vec::new();

        if let Some(room) = table.rooms.get(group_id) {
            for (conn, tx) in room {
                if tx.send(payload.to_string()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*conn);
                }
            }
        }

        for conn in dead {
            if let Some(room) = table.rooms.get_mut(group_id) {
                room.remove(&conn);
            }
            if let Some(groups) = table.joined.get_mut(&conn) {
                groups.remove(group_id);
            }
        }

        delivered
    }

    pub async fn room_size(&self, group_id: &str) -> usize {
        let table = self.inner.read().await;
        table.rooms.get(group_id).map(|r| r.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn broadcast_reaches_room_members_only() {
        let registry = RoomRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let (tx_c, mut rx_c) = mpsc::unbounded_channel();

        let a = next_conn_id();
        let b = next_conn_id();
        let c = next_conn_id();

        registry.join(a, "g-1", tx_a).await;
        registry.join(b, "g-1", tx_b).await;
        registry.join(c, "g-2", tx_c).await;

        let delivered = registry.broadcast("g-1", "hello").await;
        assert_eq!(delivered, 2);

        assert_eq!(rx_a.recv().await.as_deref(), Some("hello"));
        assert_eq!(rx_b.recv().await.as_deref(), Some("hello"));
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn sender_receives_its_own_broadcast() {
        let registry = RoomRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = next_conn_id();

        registry.join(conn, "g-1", tx).await;
        registry.broadcast("g-1", "echo").await;
        assert_eq!(rx.recv().await.as_deref(), Some("echo"));
    }

    #[tokio::test]
    async fn join_is_idempotent() {
        let registry = RoomRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = next_conn_id();

        registry.join(conn, "g-1", tx.clone()).await;
        registry.join(conn, "g-1", tx).await;
        assert_eq!(registry.room_size("g-1").await, 1);

        registry.broadcast("g-1", "once").await;
        assert_eq!(rx.recv().await.as_deref(), Some("once"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_removes_from_all_rooms() {
        let registry = RoomRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = next_conn_id();

        registry.join(conn, "g-1", tx.clone()).await;
        registry.join(conn, "g-2", tx).await;
        registry.disconnect(conn).await;

        assert_eq!(registry.room_size("g-1").await, 0);
        assert_eq!(registry.room_size("g-2").await, 0);
        assert_eq!(registry.broadcast("g-1", "nobody home").await, 0);
    }

    #[tokio::test]
    async fn dead_connections_are_pruned_on_broadcast() {
        let registry = RoomRegistry::new();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        drop(rx_dead);

        let live = next_conn_id();
        let dead = next_conn_id();
        registry.join(live, "g-1", tx_live).await;
        registry.join(dead, "g-1", tx_dead).await;

        assert_eq!(registry.broadcast("g-1", "ping").await, 1);
        assert_eq!(rx_live.recv().await.as_deref(), Some("ping"));
        assert_eq!(registry.room_size("g-1").await, 1);
    }
}
