/**
 * ROOM BROADCASTER - Room-scoped fan-out to live connections
 *
 * ROLE:
 * Owns the connection <-> room membership tables and delivers server events to
 * every member of a room. Memberships live only as long as the connection and
 * vanish on disconnect.
 *
 * DELIVERY CONTRACT:
 * At most once. Each connection has a bounded outbound queue drained by its own
 * writer task. `publish` never awaits: a full queue drops the event for that
 * member only (logged) and a closed queue is skipped (logged). No retries, no
 * replay for clients that were away.
 */

use crate::events::ServerEvent;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

pub type ConnectionId = Uuid;
pub type EventSender = mpsc::Sender<Arc<ServerEvent>>;
pub type EventReceiver = mpsc::Receiver<Arc<ServerEvent>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Room {
    Bus(String),
    Route(String),
    Station(String),
    Admin,
    Guard,
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Bus(id) => write!(f, "bus:{id}"),
            Room::Route(id) => write!(f, "route:{id}"),
            Room::Station(id) => write!(f, "station:{id}"),
            Room::Admin => f.write_str("admin"),
            Room::Guard => f.write_str("guard"),
        }
    }
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, EventSender>,
    rooms: HashMap<Room, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<Room>>,
}

impl Registry {
    fn remove_member(&mut self, id: &ConnectionId, room: &Room) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(id);
        if members.is_empty() {
            self.rooms.remove(room);
        }
        removed
    }
}

pub struct RoomBroadcaster {
    registry: Mutex<Registry>,
    client_buffer: usize,
}

impl RoomBroadcaster {
    pub fn new(client_buffer: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            client_buffer: client_buffer.max(1),
        }
    }

    /// Registers a new connection and hands back its outbound queue.
    pub fn connect(&self) -> (ConnectionId, EventReceiver) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.client_buffer);
        let mut reg = self.registry.lock();
        reg.connections.insert(id, tx);
        reg.memberships.insert(id, HashSet::new());
        tracing::debug!(conn = %id, total = reg.connections.len(), "client connected");
        (id, rx)
    }

    /// Drops the connection and every room membership it held.
    pub fn disconnect(&self, id: ConnectionId) -> usize {
        let mut reg = self.registry.lock();
        reg.connections.remove(&id);
        let rooms = reg.memberships.remove(&id).unwrap_or_default();
        for room in &rooms {
            reg.remove_member(&id, room);
        }
        tracing::debug!(conn = %id, rooms = rooms.len(), "client disconnected");
        rooms.len()
    }

    /// Idempotent. Returns false when already a member or the connection is unknown.
    pub fn join(&self, id: ConnectionId, room: Room) -> bool {
        let mut reg = self.registry.lock();
        let Some(memberships) = reg.memberships.get_mut(&id) else {
            tracing::warn!(conn = %id, %room, "join from unknown connection");
            return false;
        };
        if !memberships.insert(room.clone()) {
            return false;
        }
        tracing::debug!(conn = %id, %room, "joined room");
        reg.rooms.entry(room).or_default().insert(id)
    }

    /// Idempotent. Returns false when the connection was not in the room.
    pub fn leave(&self, id: ConnectionId, room: &Room) -> bool {
        let mut reg = self.registry.lock();
        let was_member = reg
            .memberships
            .get_mut(&id)
            .map(|m| m.remove(room))
            .unwrap_or(false);
        if was_member {
            reg.remove_member(&id, room);
            tracing::debug!(conn = %id, %room, "left room");
        }
        was_member
    }

    /// Delivers `event` to every current member of `room`. Returns how many
    /// members accepted it.
    pub fn publish(&self, room: &Room, event: ServerEvent) -> usize {
        let targets: Vec<(ConnectionId, EventSender)> = {
            let reg = self.registry.lock();
            match reg.rooms.get(room) {
                Some(members) => members
                    .iter()
                    .filter_map(|id| reg.connections.get(id).map(|tx| (*id, tx.clone())))
                    .collect(),
                None => Vec::new(),
            }
        };
        let label = room.to_string();
        deliver(&label, targets, event)
    }

    /// Delivers `event` to every connection regardless of rooms.
    pub fn broadcast(&self, event: ServerEvent) -> usize {
        let targets: Vec<(ConnectionId, EventSender)> = {
            let reg = self.registry.lock();
            reg.connections.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };
        deliver("*", targets, event)
    }

    pub fn rooms_of(&self, id: ConnectionId) -> Vec<Room> {
        let reg = self.registry.lock();
        let mut rooms: Vec<Room> = reg
            .memberships
            .get(&id)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    pub fn member_count(&self, room: &Room) -> usize {
        self.registry.lock().rooms.get(room).map_or(0, HashSet::len)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.lock().connections.len()
    }

    /// Forgets every connection. Dropping the senders ends each writer task.
    pub fn shutdown(&self) {
        let mut reg = self.registry.lock();
        let count = reg.connections.len();
        *reg = Registry::default();
        tracing::info!("room broadcaster closed ({} connections dropped)", count);
    }
}

fn deliver(label: &str, targets: Vec<(ConnectionId, EventSender)>, event: ServerEvent) -> usize {
    if targets.is_empty() {
        return 0;
    }
    let name = event.name();
    let event = Arc::new(event);
    let mut delivered = 0;
    for (id, tx) in targets {
        match tx.try_send(event.clone()) {
            Ok(()) => delivered += 1,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(conn = %id, room = label, event = name, "client queue full, event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(conn = %id, room = label, event = name, "client gone, event dropped");
            }
        }
    }
    tracing::debug!(room = label, event = name, delivered, "published");
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::HealthSummary;
    use time::OffsetDateTime;

    fn health_event() -> ServerEvent {
        ServerEvent::SystemHealth(HealthSummary::compute(1, 0, OffsetDateTime::now_utc()))
    }

    #[test]
    fn test_room_names() {
        assert_eq!(Room::Bus("TJ001".into()).to_string(), "bus:TJ001");
        assert_eq!(Room::Route("7F".into()).to_string(), "route:7F");
        assert_eq!(Room::Station("ST01".into()).to_string(), "station:ST01");
        assert_eq!(Room::Admin.to_string(), "admin");
        assert_eq!(Room::Guard.to_string(), "guard");
    }

    #[test]
    fn test_join_is_idempotent() {
        let rooms = RoomBroadcaster::new(8);
        let (id, mut rx) = rooms.connect();
        assert!(rooms.join(id, Room::Admin));
        assert!(!rooms.join(id, Room::Admin));
        assert_eq!(rooms.member_count(&Room::Admin), 1);
        assert_eq!(rooms.rooms_of(id), vec![Room::Admin]);

        assert_eq!(rooms.publish(&Room::Admin, health_event()), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "one join, one delivery");
    }

    #[test]
    fn test_leave_is_idempotent() {
        let rooms = RoomBroadcaster::new(8);
        let (id, _rx) = rooms.connect();
        rooms.join(id, Room::Guard);
        assert!(rooms.leave(id, &Room::Guard));
        assert!(!rooms.leave(id, &Room::Guard));
        assert!(!rooms.leave(id, &Room::Admin));
        assert_eq!(rooms.member_count(&Room::Guard), 0);
    }

    #[test]
    fn test_broadcast_isolation() {
        let rooms = RoomBroadcaster::new(8);
        let (a, mut rx_a) = rooms.connect();
        let (b, mut rx_b) = rooms.connect();
        rooms.join(a, Room::Bus("A".into()));
        rooms.join(b, Room::Bus("B".into()));

        assert_eq!(rooms.publish(&Room::Bus("B".into()), health_event()), 1);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_disconnect_drops_memberships() {
        let rooms = RoomBroadcaster::new(8);
        let (id, _rx) = rooms.connect();
        rooms.join(id, Room::Admin);
        rooms.join(id, Room::Bus("TJ001".into()));
        assert_eq!(rooms.disconnect(id), 2);
        assert_eq!(rooms.connection_count(), 0);
        assert_eq!(rooms.member_count(&Room::Admin), 0);
        assert!(!rooms.join(id, Room::Admin), "unknown after disconnect");
        assert_eq!(rooms.publish(&Room::Admin, health_event()), 0);
    }

    #[test]
    fn test_slow_member_does_not_block_others() {
        let rooms = RoomBroadcaster::new(1);
        let (slow, _rx_slow) = rooms.connect();
        let (fast, mut rx_fast) = rooms.connect();
        rooms.join(slow, Room::Admin);
        rooms.join(fast, Room::Admin);

        assert_eq!(rooms.publish(&Room::Admin, health_event()), 2);
        rx_fast.try_recv().unwrap();
        // slow member's single slot is still occupied: dropped for it only
        assert_eq!(rooms.publish(&Room::Admin, health_event()), 1);
        assert!(rx_fast.try_recv().is_ok());
    }

    #[test]
    fn test_closed_member_is_skipped() {
        let rooms = RoomBroadcaster::new(4);
        let (gone, rx_gone) = rooms.connect();
        let (live, mut rx_live) = rooms.connect();
        rooms.join(gone, Room::Admin);
        rooms.join(live, Room::Admin);
        drop(rx_gone);

        assert_eq!(rooms.publish(&Room::Admin, health_event()), 1);
        assert!(rx_live.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let rooms = RoomBroadcaster::new(4);
        let (_a, mut rx_a) = rooms.connect();
        let (b, mut rx_b) = rooms.connect();
        rooms.join(b, Room::Guard);
        assert_eq!(rooms.broadcast(health_event()), 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_shutdown_closes_queues() {
        let rooms = RoomBroadcaster::new(4);
        let (id, mut rx) = rooms.connect();
        rooms.join(id, Room::Admin);
        rooms.shutdown();
        assert_eq!(rooms.connection_count(), 0);
        assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
    }
}
