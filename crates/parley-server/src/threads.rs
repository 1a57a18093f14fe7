//! Threaded replies and the connections currently viewing each thread.
//!
//! Reply counters are kept by the store alongside reply insert/delete, so
//! this module only validates, materialises and tracks observers.

use std::collections::{HashMap, HashSet};

use parley_shared::error::Result;
use parley_shared::protocol::ServerEvent;
use parley_shared::{ChannelId, ChatError, FileRef, Message, MessageId, MessageView, Principal};
use parley_store::Store;

use crate::hub::ConnectionId;
use crate::messages;

#[derive(Debug, Default)]
pub struct ThreadEngine {
    observers: HashMap<MessageId, HashSet<ConnectionId>>,
}

impl ThreadEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a reply. The parent must exist and live in `channel`. Also
    /// returns any ids the store evicted while inserting.
    pub fn create_reply(
        &self,
        store: &mut dyn Store,
        channel: &ChannelId,
        parent_id: MessageId,
        author: &Principal,
        text: &str,
        file: Option<FileRef>,
    ) -> Result<(Message, Vec<MessageId>)> {
        let parent = store.get_message(parent_id)?;
        if parent.channel_id != *channel {
            return Err(ChatError::Validation(
                "parent message belongs to another channel".into(),
            ));
        }
        messages::validate_body(text, file.as_ref())?;

        let reply = messages::compose(channel, author, text, file, Some(parent_id));
        let evicted = store.create_message(&reply)?;
        Ok((reply, evicted))
    }

    /// The parent and its replies in creation order.
    pub fn get_thread(
        &self,
        store: &dyn Store,
        parent_id: MessageId,
    ) -> Result<(MessageView, Vec<MessageView>)> {
        let parent = store.get_message(parent_id)?;
        let replies = store.list_replies(parent_id)?;
        Ok((
            messages::view(store, parent)?,
            messages::views(store, replies)?,
        ))
    }

    pub fn reply_count(&self, store: &dyn Store, parent_id: MessageId) -> Result<usize> {
        Ok(store.reply_count(parent_id)?)
    }

    /// Current counter and newest reply of a thread.
    pub fn update_event(&self, store: &dyn Store, parent_id: MessageId) -> Result<ServerEvent> {
        let latest = store.list_replies(parent_id)?.pop();
        let latest_reply = latest.map(|m| messages::view(store, m)).transpose()?;
        Ok(ServerEvent::ThreadUpdated {
            parent_id,
            reply_count: self.reply_count(store, parent_id)?,
            latest_reply,
        })
    }

    pub fn observe(&mut self, parent_id: MessageId, conn: ConnectionId) {
        self.observers.entry(parent_id).or_default().insert(conn);
    }

    pub fn close(&mut self, parent_id: MessageId, conn: ConnectionId) {
        if let Some(conns) = self.observers.get_mut(&parent_id) {
            conns.remove(&conn);
            if conns.is_empty() {
                self.observers.remove(&parent_id);
            }
        }
    }

    /// Drop every observer of the given threads and return who was watching.
    pub fn take_observers(&mut self, parents: &[MessageId]) -> Vec<(MessageId, Vec<ConnectionId>)> {
        parents
            .iter()
            .filter_map(|id| {
                let conns = self.observers.remove(id)?;
                let mut conns: Vec<_> = conns.into_iter().collect();
                conns.sort_unstable();
                Some((*id, conns))
            })
            .collect()
    }

    pub fn forget_connection(&mut self, conn: ConnectionId) {
        self.observers.retain(|_, conns| {
            conns.remove(&conn);
            !conns.is_empty()
        });
    }
}
