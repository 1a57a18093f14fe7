//! Online state per principal.
//!
//! Presence is reference-counted by connection: only the first connect and
//! the last disconnect of a principal are transitions, and only transitions
//! are broadcast.

use std::collections::HashMap;

use parley_shared::protocol::ServerEvent;
use parley_shared::PrincipalId;
use tracing::debug;

use crate::hub::Hub;

#[derive(Debug, Default)]
pub struct PresenceTracker {
    connections: HashMap<PrincipalId, usize>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a new connection. Returns `true` on an offline → online
    /// transition, which is broadcast to every connection.
    pub fn mark_online(&mut self, principal: PrincipalId, hub: &Hub) -> bool {
        let count = self.connections.entry(principal).or_insert(0);
        *count += 1;
        if *count > 1 {
            return false;
        }
        debug!(principal = %principal, "Principal online");
        hub.broadcast_all(&ServerEvent::PresenceChanged {
            principal_id: principal,
            online: true,
        });
        true
    }

    /// Release a connection. Returns `true` on an online → offline
    /// transition, which is broadcast to every remaining connection.
    pub fn mark_offline(&mut self, principal: PrincipalId, hub: &Hub) -> bool {
        let Some(count) = self.connections.get_mut(&principal) else {
            return false;
        };
        *count = count.saturating_sub(1);
        if *count > 0 {
            return false;
        }
        self.connections.remove(&principal);
        debug!(principal = %principal, "Principal offline");
        hub.broadcast_all(&ServerEvent::PresenceChanged {
            principal_id: principal,
            online: false,
        });
        true
    }

    pub fn is_online(&self, principal: PrincipalId) -> bool {
        self.connections.contains_key(&principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::Principal;
    use tokio::sync::mpsc;

    #[test]
    fn only_transitions_are_broadcast() {
        let mut hub = Hub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let observer = Principal::registered("observer");
        hub.register(1, observer, tx);

        let mut presence = PresenceTracker::new();
        let sam = PrincipalId::new();

        assert!(presence.mark_online(sam, &hub));
        assert!(!presence.mark_online(sam, &hub));
        assert!(matches!(
            rx.try_recv(),
            Ok(ServerEvent::PresenceChanged { online: true, .. })
        ));
        assert!(rx.try_recv().is_err());

        assert!(!presence.mark_offline(sam, &hub));
        assert!(presence.is_online(sam));
        assert!(rx.try_recv().is_err());

        assert!(presence.mark_offline(sam, &hub));
        assert!(!presence.is_online(sam));
        assert!(matches!(
            rx.try_recv(),
            Ok(ServerEvent::PresenceChanged { online: false, .. })
        ));
    }

    #[test]
    fn offline_for_unknown_principal_is_a_no_op() {
        let hub = Hub::new();
        let mut presence = PresenceTracker::new();
        let stranger = PrincipalId::new();
        assert!(!presence.mark_offline(stranger, &hub));
        assert!(!presence.is_online(stranger));
    }
}
