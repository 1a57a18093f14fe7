//! Reaction toggling.
//!
//! The stored state is just the set of `(message, principal, emoji)`
//! triples; what clients see is recomputed from it by [`aggregate`].

use parley_shared::constants::MAX_EMOJI_LEN;
use parley_shared::error::Result;
use parley_shared::{ChatError, MessageId, PrincipalId, Reaction, ReactionAggregate};
use parley_store::Store;

/// Group reactions by emoji, keeping principals in insertion order.
pub fn aggregate(reactions: &[Reaction]) -> ReactionAggregate {
    let mut out = ReactionAggregate::new();
    for reaction in reactions {
        out.entry(reaction.emoji.clone())
            .or_default()
            .push(reaction.principal_id);
    }
    out
}

fn validate_emoji(emoji: &str) -> Result<()> {
    if emoji.trim().is_empty() {
        return Err(ChatError::Validation("emoji is empty".into()));
    }
    if emoji.len() > MAX_EMOJI_LEN {
        return Err(ChatError::Validation(format!(
            "emoji exceeds {MAX_EMOJI_LEN} bytes"
        )));
    }
    Ok(())
}

/// Remove the triple if present, add it otherwise, and return the new
/// aggregate for the message.
pub fn toggle(
    store: &mut dyn Store,
    message_id: MessageId,
    principal: PrincipalId,
    emoji: &str,
) -> Result<ReactionAggregate> {
    validate_emoji(emoji)?;
    store.get_message(message_id)?;

    let reaction = Reaction {
        message_id,
        principal_id: principal,
        emoji: emoji.to_string(),
    };
    if !store.delete_reaction(&reaction)? {
        store.create_reaction(&reaction)?;
    }
    Ok(aggregate(&store.list_reactions(message_id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::{ChannelId, Principal};
    use parley_store::MemoryStore;

    fn seeded() -> (MemoryStore, MessageId) {
        let mut store = MemoryStore::default();
        let author = Principal::registered("sam");
        let (message, _) = crate::messages::create_root(
            &mut store,
            &ChannelId::general(),
            &author,
            "react to me",
            None,
        )
        .unwrap();
        (store, message.id)
    }

    #[test]
    fn aggregate_groups_by_emoji_in_insertion_order() {
        let id = MessageId::new();
        let (a, b) = (PrincipalId::new(), PrincipalId::new());
        let reactions = [
            Reaction { message_id: id, principal_id: b, emoji: "🔥".into() },
            Reaction { message_id: id, principal_id: a, emoji: "👍".into() },
            Reaction { message_id: id, principal_id: a, emoji: "🔥".into() },
        ];
        let agg = aggregate(&reactions);
        assert_eq!(agg.len(), 2);
        assert_eq!(agg["🔥"], vec![b, a]);
        assert_eq!(agg["👍"], vec![a]);
    }

    #[test]
    fn toggling_twice_restores_the_aggregate() {
        let (mut store, id) = seeded();
        let sam = PrincipalId::new();

        let before = aggregate(&store.list_reactions(id).unwrap());
        let added = toggle(&mut store, id, sam, "👍").unwrap();
        assert_eq!(added["👍"], vec![sam]);

        let removed = toggle(&mut store, id, sam, "👍").unwrap();
        assert_eq!(removed, before);
        assert!(removed.is_empty());
    }

    #[test]
    fn toggle_rejects_bad_input() {
        let (mut store, id) = seeded();
        let sam = PrincipalId::new();
        assert!(matches!(
            toggle(&mut store, MessageId::new(), sam, "👍"),
            Err(ChatError::NotFound(_))
        ));
        assert!(matches!(
            toggle(&mut store, id, sam, " "),
            Err(ChatError::Validation(_))
        ));
        assert!(matches!(
            toggle(&mut store, id, sam, &"x".repeat(MAX_EMOJI_LEN + 1)),
            Err(ChatError::Validation(_))
        ));
    }
}
