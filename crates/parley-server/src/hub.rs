//! Connection registry and channel fan-out.
//!
//! The hub is owned by the router task, so it needs no locking. Each
//! connection has an unbounded outbox drained by its WebSocket writer task;
//! events pushed here in sequence arrive at that connection in the same
//! order.

use std::collections::{HashMap, HashSet};

use parley_shared::protocol::ServerEvent;
use parley_shared::{ChannelId, Principal, PrincipalId};
use tokio::sync::mpsc;
use tracing::debug;

pub type ConnectionId = u64;
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

struct Connection {
    principal: Principal,
    outbox: Outbox,
    channels: HashSet<ChannelId>,
}

#[derive(Default)]
pub struct Hub {
    connections: HashMap<ConnectionId, Connection>,
    by_channel: HashMap<ChannelId, HashSet<ConnectionId>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, conn: ConnectionId, principal: Principal, outbox: Outbox) {
        self.connections.insert(
            conn,
            Connection {
                principal,
                outbox,
                channels: HashSet::new(),
            },
        );
    }

    /// Drop a connection and all of its subscriptions.
    pub fn unregister(&mut self, conn: ConnectionId) -> Option<Principal> {
        let connection = self.connections.remove(&conn)?;
        for channel in &connection.channels {
            if let Some(subs) = self.by_channel.get_mut(channel) {
                subs.remove(&conn);
                if subs.is_empty() {
                    self.by_channel.remove(channel);
                }
            }
        }
        Some(connection.principal)
    }

    /// Subscribe a connection to a channel's broadcasts. Returns `false` if
    /// it was already subscribed or is not registered.
    pub fn subscribe(&mut self, conn: ConnectionId, channel: &ChannelId) -> bool {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return false;
        };
        if !connection.channels.insert(channel.clone()) {
            return false;
        }
        self.by_channel
            .entry(channel.clone())
            .or_default()
            .insert(conn);
        true
    }

    pub fn is_subscribed(&self, conn: ConnectionId, channel: &ChannelId) -> bool {
        self.by_channel
            .get(channel)
            .is_some_and(|subs| subs.contains(&conn))
    }

    pub fn principal_of(&self, conn: ConnectionId) -> Option<&Principal> {
        self.connections.get(&conn).map(|c| &c.principal)
    }

    pub fn connections_of(&self, principal: PrincipalId) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|(_, c)| c.principal.id == principal)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Push an event to one connection. Returns `false` if the connection is
    /// gone.
    pub fn send(&self, conn: ConnectionId, event: ServerEvent) -> bool {
        let Some(connection) = self.connections.get(&conn) else {
            return false;
        };
        if connection.outbox.send(event).is_err() {
            debug!(conn, "Outbox closed, dropping event");
            return false;
        }
        true
    }

    /// Push an event to every subscriber of a channel. Returns the number of
    /// connections reached.
    pub fn broadcast_channel(&self, channel: &ChannelId, event: &ServerEvent) -> usize {
        let Some(subs) = self.by_channel.get(channel) else {
            return 0;
        };
        subs.iter()
            .filter(|conn| self.send(**conn, event.clone()))
            .count()
    }

    pub fn broadcast_all(&self, event: &ServerEvent) -> usize {
        self.connections
            .keys()
            .filter(|conn| self.send(**conn, event.clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> ServerEvent {
        ServerEvent::ThreadClosed {
            parent_id: parley_shared::MessageId::new(),
        }
    }

    #[test]
    fn channel_broadcast_reaches_only_subscribers() {
        let mut hub = Hub::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        hub.register(1, Principal::registered("a"), tx1);
        hub.register(2, Principal::registered("b"), tx2);

        let general = ChannelId::general();
        assert!(hub.subscribe(1, &general));
        assert!(!hub.subscribe(1, &general));

        assert_eq!(hub.broadcast_channel(&general, &event()), 1);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());

        assert_eq!(hub.broadcast_all(&event()), 2);
    }

    #[test]
    fn unregister_removes_subscriptions() {
        let mut hub = Hub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let sam = Principal::registered("sam");
        hub.register(1, sam.clone(), tx);
        hub.subscribe(1, &ChannelId::general());

        assert_eq!(hub.connections_of(sam.id), vec![1]);
        assert_eq!(hub.unregister(1), Some(sam.clone()));
        assert!(!hub.is_subscribed(1, &ChannelId::general()));
        assert!(hub.connections_of(sam.id).is_empty());
        assert_eq!(hub.len(), 0);
    }

    #[test]
    fn closed_outbox_is_skipped() {
        let mut hub = Hub::new();
        let (tx, rx) = mpsc::unbounded_channel();
        hub.register(1, Principal::registered("a"), tx);
        hub.subscribe(1, &ChannelId::general());
        drop(rx);

        assert!(!hub.send(1, event()));
        assert_eq!(hub.broadcast_channel(&ChannelId::general(), &event()), 0);
    }
}
