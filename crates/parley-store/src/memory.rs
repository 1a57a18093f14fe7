//! In-process [`Store`] implementation.
//!
//! Each channel keeps at most `retention_limit` root messages. When a new
//! root message pushes a channel over the limit the oldest root is evicted
//! together with all of its descendant replies, their reply counters and
//! every reaction on the evicted messages. Replies never count towards the
//! limit.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use parley_shared::constants::DEFAULT_RETENTION_LIMIT;
use parley_shared::{Channel, ChannelId, Message, MessageId, Principal, PrincipalId, Reaction};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::models::Account;
use crate::Store;

#[derive(Debug)]
pub struct MemoryStore {
    retention_limit: usize,
    principals: HashMap<PrincipalId, Account>,
    /// Channels in creation order.
    channel_order: Vec<ChannelId>,
    channels: HashMap<ChannelId, Channel>,
    messages: HashMap<MessageId, Message>,
    /// Root messages per channel, oldest first.
    roots: HashMap<ChannelId, VecDeque<MessageId>>,
    /// Replies per parent, oldest first. The length is the reply counter.
    replies: HashMap<MessageId, Vec<MessageId>>,
    /// `(principal, emoji)` pairs per message in insertion order.
    reactions: HashMap<MessageId, Vec<(PrincipalId, String)>>,
}

impl MemoryStore {
    pub fn new(retention_limit: usize) -> Self {
        let mut store = Self {
            retention_limit: retention_limit.max(1),
            principals: HashMap::new(),
            channel_order: Vec::new(),
            channels: HashMap::new(),
            messages: HashMap::new(),
            roots: HashMap::new(),
            replies: HashMap::new(),
            reactions: HashMap::new(),
        };
        let general = Channel::general();
        store.channel_order.push(general.id.clone());
        store.channels.insert(general.id.clone(), general);
        store
    }

    pub fn retention_limit(&self) -> usize {
        self.retention_limit
    }

    /// Remove a message and every descendant reply. Returns removed ids,
    /// the requested one first.
    fn remove_tree(&mut self, id: MessageId) -> Vec<MessageId> {
        let Some(message) = self.messages.remove(&id) else {
            return Vec::new();
        };
        self.reactions.remove(&id);

        match message.parent_id {
            Some(parent) => {
                if let Some(siblings) = self.replies.get_mut(&parent) {
                    siblings.retain(|r| *r != id);
                }
            }
            None => {
                if let Some(roots) = self.roots.get_mut(&message.channel_id) {
                    roots.retain(|r| *r != id);
                }
            }
        }

        let mut removed = vec![id];
        let mut pending = self.replies.remove(&id).unwrap_or_default();
        while let Some(reply) = pending.pop() {
            self.messages.remove(&reply);
            self.reactions.remove(&reply);
            pending.extend(self.replies.remove(&reply).unwrap_or_default());
            removed.push(reply);
        }
        removed
    }

    /// Evict oldest roots until the channel is within its limit. Returns
    /// every evicted id.
    fn enforce_retention(&mut self, channel: &ChannelId) -> Vec<MessageId> {
        let mut evicted_ids = Vec::new();
        loop {
            let oldest = match self.roots.get(channel) {
                Some(roots) if roots.len() > self.retention_limit => roots.front().copied(),
                _ => None,
            };
            let Some(oldest) = oldest else { break };
            let evicted = self.remove_tree(oldest);
            debug!(channel = %channel, root = %oldest, evicted = evicted.len(), "retention evicted thread");
            evicted_ids.extend(evicted);
        }
        evicted_ids
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_LIMIT)
    }
}

impl Store for MemoryStore {
    fn create_principal(&mut self, account: &Account) -> Result<()> {
        let name = &account.principal.display_name;
        if self
            .principals
            .values()
            .any(|a| a.principal.display_name == *name)
        {
            return Err(StoreError::Conflict(format!("principal '{name}'")));
        }
        self.principals.insert(account.principal.id, account.clone());
        Ok(())
    }

    fn get_principal(&self, id: PrincipalId) -> Result<Principal> {
        self.principals
            .get(&id)
            .map(|a| a.principal.clone())
            .ok_or(StoreError::NotFound("principal"))
    }

    fn find_account(&self, display_name: &str) -> Result<Option<Account>> {
        Ok(self
            .principals
            .values()
            .find(|a| a.principal.display_name == display_name)
            .cloned())
    }

    fn list_principals(&self) -> Result<Vec<Principal>> {
        let mut principals: Vec<_> = self.principals.values().map(|a| a.principal.clone()).collect();
        principals.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(principals)
    }

    fn remove_principal(&mut self, id: PrincipalId) -> Result<bool> {
        if self.principals.remove(&id).is_none() {
            return Ok(false);
        }
        for channel in self.channels.values_mut() {
            channel.member_ids.retain(|m| *m != id);
        }
        Ok(true)
    }

    fn stale_guests(&self, created_before: DateTime<Utc>) -> Result<Vec<PrincipalId>> {
        Ok(self
            .principals
            .values()
            .filter(|a| a.principal.is_ephemeral && a.created_at <= created_before)
            .map(|a| a.principal.id)
            .collect())
    }

    fn create_channel(&mut self, channel: &Channel) -> Result<()> {
        if self.channels.contains_key(&channel.id) {
            return Err(StoreError::Conflict(format!("channel '{}'", channel.id)));
        }
        let mut channel = channel.clone();
        let mut seen = HashSet::new();
        channel.member_ids.retain(|m| seen.insert(*m));
        self.channel_order.push(channel.id.clone());
        self.channels.insert(channel.id.clone(), channel);
        Ok(())
    }

    fn get_channel(&self, id: &ChannelId) -> Result<Channel> {
        self.channels
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound("channel"))
    }

    fn find_channel_by_name(&self, name: &str) -> Result<Option<Channel>> {
        Ok(self
            .channels
            .values()
            .find(|c| c.is_persistent() && c.name == name)
            .cloned())
    }

    fn list_channels(&self) -> Result<Vec<Channel>> {
        Ok(self
            .channel_order
            .iter()
            .filter_map(|id| self.channels.get(id).cloned())
            .collect())
    }

    fn add_membership(&mut self, channel: &ChannelId, principal: PrincipalId) -> Result<bool> {
        let channel = self
            .channels
            .get_mut(channel)
            .ok_or(StoreError::NotFound("channel"))?;
        if channel.member_ids.contains(&principal) {
            return Ok(false);
        }
        channel.member_ids.push(principal);
        Ok(true)
    }

    fn is_member(&self, channel: &ChannelId, principal: PrincipalId) -> Result<bool> {
        Ok(self
            .channels
            .get(channel)
            .is_some_and(|c| c.member_ids.contains(&principal)))
    }

    fn memberships(&self, principal: PrincipalId) -> Result<Vec<ChannelId>> {
        Ok(self
            .channel_order
            .iter()
            .filter(|id| {
                self.channels
                    .get(*id)
                    .is_some_and(|c| c.member_ids.contains(&principal))
            })
            .cloned()
            .collect())
    }

    fn create_message(&mut self, message: &Message) -> Result<Vec<MessageId>> {
        if !self.channels.contains_key(&message.channel_id) {
            return Err(StoreError::NotFound("channel"));
        }
        match message.parent_id {
            Some(parent) => {
                if !self.messages.contains_key(&parent) {
                    return Err(StoreError::NotFound("parent message"));
                }
                self.replies.entry(parent).or_default().push(message.id);
                self.messages.insert(message.id, message.clone());
                Ok(Vec::new())
            }
            None => {
                self.roots
                    .entry(message.channel_id.clone())
                    .or_default()
                    .push_back(message.id);
                self.messages.insert(message.id, message.clone());
                Ok(self.enforce_retention(&message.channel_id))
            }
        }
    }

    fn get_message(&self, id: MessageId) -> Result<Message> {
        self.messages
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("message"))
    }

    fn delete_message(&mut self, id: MessageId) -> Result<Vec<MessageId>> {
        let removed = self.remove_tree(id);
        if removed.is_empty() {
            return Err(StoreError::NotFound("message"));
        }
        Ok(removed)
    }

    fn list_replies(&self, parent: MessageId) -> Result<Vec<Message>> {
        Ok(self
            .replies
            .get(&parent)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.messages.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn reply_count(&self, parent: MessageId) -> Result<usize> {
        Ok(self.replies.get(&parent).map_or(0, Vec::len))
    }

    fn recent_messages(&self, channel: &ChannelId, limit: usize) -> Result<Vec<Message>> {
        let Some(roots) = self.roots.get(channel) else {
            return Ok(Vec::new());
        };
        let skip = roots.len().saturating_sub(limit);
        Ok(roots
            .iter()
            .skip(skip)
            .filter_map(|id| self.messages.get(id).cloned())
            .collect())
    }

    fn create_reaction(&mut self, reaction: &Reaction) -> Result<bool> {
        if !self.messages.contains_key(&reaction.message_id) {
            return Err(StoreError::NotFound("message"));
        }
        let entries = self.reactions.entry(reaction.message_id).or_default();
        let pair = (reaction.principal_id, reaction.emoji.clone());
        if entries.contains(&pair) {
            return Ok(false);
        }
        entries.push(pair);
        Ok(true)
    }

    fn delete_reaction(&mut self, reaction: &Reaction) -> Result<bool> {
        let Some(entries) = self.reactions.get_mut(&reaction.message_id) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|(p, e)| !(*p == reaction.principal_id && *e == reaction.emoji));
        Ok(entries.len() != before)
    }

    fn list_reactions(&self, message: MessageId) -> Result<Vec<Reaction>> {
        Ok(self
            .reactions
            .get(&message)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(principal_id, emoji)| Reaction {
                        message_id: message,
                        principal_id: *principal_id,
                        emoji: emoji.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(channel: &ChannelId, parent: Option<MessageId>) -> Message {
        Message {
            id: MessageId::new(),
            channel_id: channel.clone(),
            author_id: PrincipalId::new(),
            author_name: "tester".into(),
            text: "hello".into(),
            created_at: Utc::now(),
            file: None,
            parent_id: parent,
        }
    }

    #[test]
    fn seeds_general_channel() {
        let store = MemoryStore::default();
        let general = store.get_channel(&ChannelId::general()).unwrap();
        assert!(general.is_persistent());
        assert_eq!(store.list_channels().unwrap().len(), 1);
    }

    #[test]
    fn reply_counter_tracks_inserts_and_deletes() {
        let mut store = MemoryStore::default();
        let general = ChannelId::general();
        let root = message(&general, None);
        store.create_message(&root).unwrap();

        let r1 = message(&general, Some(root.id));
        let r2 = message(&general, Some(root.id));
        store.create_message(&r1).unwrap();
        store.create_message(&r2).unwrap();
        assert_eq!(store.reply_count(root.id).unwrap(), 2);

        assert_eq!(store.delete_message(r1.id).unwrap(), vec![r1.id]);
        assert_eq!(store.reply_count(root.id).unwrap(), 1);
        let replies = store.list_replies(root.id).unwrap();
        assert_eq!(replies, vec![r2]);
    }

    #[test]
    fn deleting_root_cascades_to_replies() {
        let mut store = MemoryStore::default();
        let general = ChannelId::general();
        let root = message(&general, None);
        store.create_message(&root).unwrap();
        let reply = message(&general, Some(root.id));
        store.create_message(&reply).unwrap();

        let removed = store.delete_message(root.id).unwrap();
        assert_eq!(removed, vec![root.id, reply.id]);
        assert!(store.get_message(reply.id).is_err());
        assert!(matches!(
            store.delete_message(root.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn nested_replies_are_removed_with_their_ancestor() {
        let mut store = MemoryStore::default();
        let general = ChannelId::general();
        let root = message(&general, None);
        let question = message(&general, Some(root.id));
        let answer = message(&general, Some(question.id));
        for m in [&root, &question, &answer] {
            store.create_message(m).unwrap();
        }

        let removed = store.delete_message(question.id).unwrap();
        assert_eq!(removed, vec![question.id, answer.id]);
        assert_eq!(store.reply_count(root.id).unwrap(), 0);
        assert!(store.get_message(answer.id).is_err());
        assert!(store.get_message(root.id).is_ok());
    }

    #[test]
    fn retention_evicts_oldest_root_with_its_replies() {
        let mut store = MemoryStore::new(3);
        let general = ChannelId::general();

        let first = message(&general, None);
        store.create_message(&first).unwrap();
        let reply = message(&general, Some(first.id));
        store.create_message(&reply).unwrap();
        store
            .create_reaction(&Reaction {
                message_id: reply.id,
                principal_id: PrincipalId::new(),
                emoji: "👍".into(),
            })
            .unwrap();

        // Replies do not count towards the limit.
        for _ in 0..2 {
            store.create_message(&message(&general, Some(first.id))).unwrap();
        }
        for _ in 0..2 {
            store.create_message(&message(&general, None)).unwrap();
        }
        assert!(store.get_message(first.id).is_ok());

        let evicted = store.create_message(&message(&general, None)).unwrap();
        assert_eq!(evicted.len(), 4);
        assert_eq!(evicted[0], first.id);
        assert!(evicted.contains(&reply.id));
        assert!(store.get_message(first.id).is_err());
        assert!(store.get_message(reply.id).is_err());
        assert_eq!(store.reply_count(first.id).unwrap(), 0);
        assert!(store.list_reactions(reply.id).unwrap().is_empty());
        assert_eq!(store.recent_messages(&general, 10).unwrap().len(), 3);
    }

    #[test]
    fn reaction_triples_are_unique() {
        let mut store = MemoryStore::default();
        let general = ChannelId::general();
        let root = message(&general, None);
        store.create_message(&root).unwrap();

        let reaction = Reaction {
            message_id: root.id,
            principal_id: PrincipalId::new(),
            emoji: "🎉".into(),
        };
        assert!(store.create_reaction(&reaction).unwrap());
        assert!(!store.create_reaction(&reaction).unwrap());
        assert_eq!(store.list_reactions(root.id).unwrap().len(), 1);
        assert!(store.delete_reaction(&reaction).unwrap());
        assert!(!store.delete_reaction(&reaction).unwrap());
    }

    #[test]
    fn duplicate_display_names_conflict() {
        let mut store = MemoryStore::default();
        store
            .create_principal(&Account::guest(Principal::guest("guest_bob")))
            .unwrap();
        let err = store
            .create_principal(&Account::guest(Principal::guest("guest_bob")))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn stale_guests_skip_registered_principals() {
        let mut store = MemoryStore::default();
        let mut old_guest = Account::guest(Principal::guest("guest_old"));
        old_guest.created_at = Utc::now() - chrono::Duration::minutes(30);
        let mut old_user = Account::with_password(Principal::registered("dave"), "hash".into());
        old_user.created_at = old_guest.created_at;
        let fresh_guest = Account::guest(Principal::guest("guest_new"));
        for account in [&old_guest, &old_user, &fresh_guest] {
            store.create_principal(account).unwrap();
        }

        let cutoff = Utc::now() - chrono::Duration::minutes(10);
        assert_eq!(store.stale_guests(cutoff).unwrap(), vec![old_guest.principal.id]);
    }

    #[test]
    fn removing_principal_drops_memberships_but_keeps_messages() {
        let mut store = MemoryStore::default();
        let guest = Principal::guest("guest_eve");
        store.create_principal(&Account::guest(guest.clone())).unwrap();
        let general = ChannelId::general();
        store.add_membership(&general, guest.id).unwrap();

        let mut msg = message(&general, None);
        msg.author_id = guest.id;
        store.create_message(&msg).unwrap();

        assert!(store.remove_principal(guest.id).unwrap());
        assert!(!store.is_member(&general, guest.id).unwrap());
        assert_eq!(store.get_message(msg.id).unwrap().author_name, "tester");
    }
}
