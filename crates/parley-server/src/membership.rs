//! Channel membership, visibility and connection subscriptions.
//!
//! Persistent channels are visible to everyone and joined on demand.
//! Direct-message channels are visible only to their two members.

use parley_shared::constants::MAX_CHANNEL_NAME_LEN;
use parley_shared::error::Result;
use parley_shared::protocol::ServerEvent;
use parley_shared::{Channel, ChannelId, ChatError, Principal, PrincipalId};
use parley_store::Store;
use tracing::{debug, info};

use crate::hub::{ConnectionId, Hub};

/// Idempotently add a membership. Returns `true` if it was new.
pub fn ensure_member(
    store: &mut dyn Store,
    principal: PrincipalId,
    channel: &ChannelId,
) -> Result<bool> {
    Ok(store.add_membership(channel, principal)?)
}

/// All persistent channels plus the direct channels `principal` belongs to.
pub fn list_visible_channels(store: &dyn Store, principal: PrincipalId) -> Result<Vec<Channel>> {
    Ok(store
        .list_channels()?
        .into_iter()
        .filter(|c| c.is_persistent() || c.member_ids.contains(&principal))
        .collect())
}

/// Check that `principal` may post to `channel`.
pub fn authorize(store: &dyn Store, principal: PrincipalId, channel: &ChannelId) -> Result<Channel> {
    let channel = store.get_channel(channel)?;
    if !store.is_member(&channel.id, principal)? {
        return Err(ChatError::Authorization(format!(
            "not a member of channel '{}'",
            channel.name
        )));
    }
    Ok(channel)
}

/// Connect-time join: `general` plus every prior membership.
pub fn join_all(
    store: &mut dyn Store,
    hub: &mut Hub,
    conn: ConnectionId,
    principal: PrincipalId,
) -> Result<()> {
    ensure_member(store, principal, &ChannelId::general())?;
    for channel in store.memberships(principal)? {
        hub.subscribe(conn, &channel);
    }
    Ok(())
}

/// Explicit switch to a channel. Joining a persistent channel adds the
/// membership; a direct channel must already include the principal.
pub fn join_channel(
    store: &mut dyn Store,
    hub: &mut Hub,
    conn: ConnectionId,
    principal: PrincipalId,
    channel: &ChannelId,
) -> Result<Channel> {
    let found = store.get_channel(channel)?;
    if found.is_persistent() {
        if ensure_member(store, principal, channel)? {
            debug!(principal = %principal, channel = %channel, "Joined channel");
        }
    } else if !store.is_member(channel, principal)? {
        return Err(ChatError::Authorization(
            "not a member of this direct conversation".into(),
        ));
    }
    hub.subscribe(conn, channel);
    Ok(store.get_channel(channel)?)
}

/// Create a persistent channel with `creator` as its first member.
pub fn create_channel(
    store: &mut dyn Store,
    hub: &mut Hub,
    creator: PrincipalId,
    name: &str,
) -> Result<Channel> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::Validation("channel name is empty".into()));
    }
    if name.chars().count() > MAX_CHANNEL_NAME_LEN {
        return Err(ChatError::Validation(format!(
            "channel name exceeds {MAX_CHANNEL_NAME_LEN} characters"
        )));
    }
    if store.find_channel_by_name(name)?.is_some() {
        return Err(ChatError::Validation(format!(
            "channel '{name}' already exists"
        )));
    }

    let mut channel = Channel::persistent(name);
    channel.member_ids.push(creator);
    store.create_channel(&channel)?;
    for conn in hub.connections_of(creator) {
        hub.subscribe(conn, &channel.id);
    }
    info!(channel = %channel.id, name = %channel.name, "Created channel");
    Ok(channel)
}

/// Get or create the direct channel between `requester` and `target`,
/// subscribing every connection of both. A new channel is announced to
/// both principals; an existing one only to the requesting connection.
pub fn open_direct(
    store: &mut dyn Store,
    hub: &mut Hub,
    conn: ConnectionId,
    requester: &Principal,
    target: PrincipalId,
) -> Result<Channel> {
    if target == requester.id {
        return Err(ChatError::Validation(
            "cannot open a direct conversation with yourself".into(),
        ));
    }
    let target = store.get_principal(target)?;
    let id = ChannelId::direct(requester.id, target.id);

    let (channel, created) = match store.get_channel(&id) {
        Ok(existing) => (existing, false),
        Err(parley_store::StoreError::NotFound(_)) => {
            let channel = Channel::direct(requester, &target);
            store.create_channel(&channel)?;
            info!(channel = %channel.id, "Opened direct conversation");
            (channel, true)
        }
        Err(e) => return Err(e.into()),
    };
    ensure_member(store, requester.id, &channel.id)?;
    ensure_member(store, target.id, &channel.id)?;

    let mut recipients = hub.connections_of(requester.id);
    recipients.extend(hub.connections_of(target.id));
    for recipient in &recipients {
        hub.subscribe(*recipient, &channel.id);
    }

    let event = ServerEvent::ChannelCreated {
        channel: channel.clone(),
    };
    if created {
        for recipient in recipients {
            hub.send(recipient, event.clone());
        }
    } else {
        hub.send(conn, event);
    }
    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_store::{Account, MemoryStore};
    use tokio::sync::mpsc;

    fn principal(store: &mut MemoryStore, name: &str) -> Principal {
        let p = Principal::registered(name);
        store.create_principal(&Account::guest(p.clone())).unwrap();
        p
    }

    #[test]
    fn visibility_hides_foreign_direct_channels() {
        let mut store = MemoryStore::default();
        let (a, b, c) = (
            principal(&mut store, "a"),
            principal(&mut store, "b"),
            principal(&mut store, "c"),
        );
        store.create_channel(&Channel::direct(&a, &b)).unwrap();

        let names = |p: PrincipalId, store: &MemoryStore| -> Vec<String> {
            list_visible_channels(store, p)
                .unwrap()
                .into_iter()
                .map(|c| c.name)
                .collect()
        };
        assert_eq!(names(a.id, &store), vec!["general", "a, b"]);
        assert_eq!(names(c.id, &store), vec!["general"]);
    }

    #[test]
    fn authorize_distinguishes_missing_and_forbidden() {
        let mut store = MemoryStore::default();
        let a = principal(&mut store, "a");
        let general = ChannelId::general();

        assert!(matches!(
            authorize(&store, a.id, &ChannelId("nope".into())),
            Err(ChatError::NotFound(_))
        ));
        assert!(matches!(
            authorize(&store, a.id, &general),
            Err(ChatError::Authorization(_))
        ));
        ensure_member(&mut store, a.id, &general).unwrap();
        assert!(authorize(&store, a.id, &general).is_ok());
    }

    #[test]
    fn direct_channel_join_requires_membership() {
        let mut store = MemoryStore::default();
        let mut hub = Hub::new();
        let (a, b, c) = (
            principal(&mut store, "a"),
            principal(&mut store, "b"),
            principal(&mut store, "c"),
        );
        let dm = Channel::direct(&a, &b);
        store.create_channel(&dm).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.register(1, c.clone(), tx);

        assert!(matches!(
            join_channel(&mut store, &mut hub, 1, c.id, &dm.id),
            Err(ChatError::Authorization(_))
        ));
        assert!(!hub.is_subscribed(1, &dm.id));

        let random = Channel::persistent("random");
        store.create_channel(&random).unwrap();
        join_channel(&mut store, &mut hub, 1, c.id, &random.id).unwrap();
        assert!(store.is_member(&random.id, c.id).unwrap());
        assert!(hub.is_subscribed(1, &random.id));
    }

    #[test]
    fn open_direct_is_symmetric_and_announced_once() {
        let mut store = MemoryStore::default();
        let mut hub = Hub::new();
        let (a, b) = (principal(&mut store, "a"), principal(&mut store, "b"));
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        hub.register(1, a.clone(), tx_a);
        hub.register(2, b.clone(), tx_b);

        let first = open_direct(&mut store, &mut hub, 1, &a, b.id).unwrap();
        assert!(matches!(rx_a.try_recv(), Ok(ServerEvent::ChannelCreated { .. })));
        assert!(matches!(rx_b.try_recv(), Ok(ServerEvent::ChannelCreated { .. })));
        assert!(hub.is_subscribed(2, &first.id));

        let second = open_direct(&mut store, &mut hub, 2, &b, a.id).unwrap();
        assert_eq!(first.id, second.id);
        assert!(rx_a.try_recv().is_err());
        assert!(matches!(rx_b.try_recv(), Ok(ServerEvent::ChannelCreated { .. })));

        assert!(matches!(
            open_direct(&mut store, &mut hub, 1, &a, a.id),
            Err(ChatError::Validation(_))
        ));
        assert!(matches!(
            open_direct(&mut store, &mut hub, 1, &a, PrincipalId::new()),
            Err(ChatError::NotFound(_))
        ));
    }

    #[test]
    fn channel_names_are_validated() {
        let mut store = MemoryStore::default();
        let mut hub = Hub::new();
        let a = principal(&mut store, "a");

        let created = create_channel(&mut store, &mut hub, a.id, "  random ").unwrap();
        assert_eq!(created.name, "random");
        assert!(store.is_member(&created.id, a.id).unwrap());

        for bad in ["", "   ", "random", "general"] {
            assert!(matches!(
                create_channel(&mut store, &mut hub, a.id, bad),
                Err(ChatError::Validation(_))
            ));
        }
        let long = "x".repeat(MAX_CHANNEL_NAME_LEN + 1);
        assert!(create_channel(&mut store, &mut hub, a.id, &long).is_err());
    }
}
