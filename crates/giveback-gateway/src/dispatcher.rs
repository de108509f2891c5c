use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use giveback_types::events::GatewayEvent;

/// Tracks live connections and the rooms they have joined.
///
/// Rooms are named by chat id, plus one personal room per user named by the
/// user id. Membership lives in process memory only and is rebuilt as
/// clients reconnect and rejoin.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// conn_id -> outbound queue of the connection
    connections: RwLock<HashMap<Uuid, mpsc::UnboundedSender<GatewayEvent>>>,

    /// room name -> member conn_ids
    rooms: RwLock<HashMap<String, HashSet<Uuid>>>,
}

/// Name of a user's personal room.
pub fn personal_room(user_id: Uuid) -> String {
    user_id.to_string()
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and join it to its user's personal room.
    /// Returns (conn_id, receiver of events addressed to it).
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(conn_id, tx);
        self.join(conn_id, &personal_room(user_id)).await;
        (conn_id, rx)
    }

    /// Drop a connection from the registry and from every room it was in.
    pub async fn unregister(&self, conn_id: Uuid) {
        let mut rooms = self.inner.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&conn_id);
            !members.is_empty()
        });
        drop(rooms);

        self.inner.connections.write().await.remove(&conn_id);
    }

    pub async fn join(&self, conn_id: Uuid, room: &str) {
        self.inner
            .rooms
            .write()
            .await
            .entry(room.to_string())
            .or_default()
            .insert(conn_id);
    }

    /// Returns whether the connection was in the room.
    pub async fn leave(&self, conn_id: Uuid, room: &str) -> bool {
        let mut rooms = self.inner.rooms.write().await;
        let Some(members) = rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&conn_id);
        if members.is_empty() {
            rooms.remove(room);
        }
        removed
    }

    /// Send an event to every connection in the room, sender included.
    /// Returns how many connections it was queued for.
    pub async fn broadcast_to_room(&self, room: &str, event: GatewayEvent) -> usize {
        let rooms = self.inner.rooms.read().await;
        let Some(members) = rooms.get(room) else {
            return 0;
        };

        let connections = self.inner.connections.read().await;
        let mut delivered = 0;
        for conn_id in members {
            if let Some(tx) = connections.get(conn_id) {
                if tx.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Send an event to one connection only.
    pub async fn send_to_connection(&self, conn_id: Uuid, event: GatewayEvent) {
        let connections = self.inner.connections.read().await;
        if let Some(tx) = connections.get(&conn_id) {
            let _ = tx.send(event);
        }
    }

    /// Send an event to every live connection of a user.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> usize {
        self.broadcast_to_room(&personal_room(user_id), event).await
    }

    pub async fn is_member(&self, conn_id: Uuid, room: &str) -> bool {
        self.inner
            .rooms
            .read()
            .await
            .get(room)
            .is_some_and(|members| members.contains(&conn_id))
    }

    pub async fn room_size(&self, room: &str) -> usize {
        self.inner.rooms.read().await.get(room).map_or(0, HashSet::len)
    }
}
