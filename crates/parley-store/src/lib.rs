//! # parley-store
//!
//! Persistence for Parley. The [`Store`] trait is the only surface the
//! server depends on; two implementations ship with the crate:
//!
//! - [`MemoryStore`] keeps everything in process and enforces a per-channel
//!   retention limit on root messages.
//! - [`Database`] wraps a `rusqlite::Connection` with typed CRUD helpers and
//!   schema migrations.
//!
//! Both seed the `general` channel when opened.

pub mod channels;
pub mod database;
pub mod memory;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod principals;
pub mod reactions;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use models::*;

use chrono::{DateTime, Utc};
use parley_shared::{Channel, ChannelId, Message, MessageId, Principal, PrincipalId, Reaction};

/// Storage operations the realtime core relies on.
///
/// Implementations are driven from a single owner at a time (the server
/// wraps them in a mutex), so methods take `&mut self` for writes and are
/// free to assume no interleaving.
pub trait Store: Send {
    // -- principals --

    /// Insert a principal. Display names are unique.
    fn create_principal(&mut self, account: &Account) -> Result<()>;
    fn get_principal(&self, id: PrincipalId) -> Result<Principal>;
    fn find_account(&self, display_name: &str) -> Result<Option<Account>>;
    fn list_principals(&self) -> Result<Vec<Principal>>;
    /// Remove a principal and its memberships. Messages and reactions stay.
    fn remove_principal(&mut self, id: PrincipalId) -> Result<bool>;
    /// Ephemeral principals created at or before `created_before`.
    fn stale_guests(&self, created_before: DateTime<Utc>) -> Result<Vec<PrincipalId>>;

    // -- channels --

    fn create_channel(&mut self, channel: &Channel) -> Result<()>;
    fn get_channel(&self, id: &ChannelId) -> Result<Channel>;
    fn find_channel_by_name(&self, name: &str) -> Result<Option<Channel>>;
    fn list_channels(&self) -> Result<Vec<Channel>>;
    /// Returns `true` if the membership was newly added.
    fn add_membership(&mut self, channel: &ChannelId, principal: PrincipalId) -> Result<bool>;
    fn is_member(&self, channel: &ChannelId, principal: PrincipalId) -> Result<bool>;
    fn memberships(&self, principal: PrincipalId) -> Result<Vec<ChannelId>>;

    // -- messages --

    /// Insert a message. Replies bump their parent's reply counter in the
    /// same step.
    ///
    /// Returns the ids of messages evicted to make room for it, each evicted
    /// root followed by its replies. Stores without retention return an
    /// empty list.
    fn create_message(&mut self, message: &Message) -> Result<Vec<MessageId>>;
    fn get_message(&self, id: MessageId) -> Result<Message>;
    /// Delete a message together with its replies and reactions. Returns the
    /// ids of every removed message, the requested one first.
    fn delete_message(&mut self, id: MessageId) -> Result<Vec<MessageId>>;
    /// Replies to `parent`, oldest first.
    fn list_replies(&self, parent: MessageId) -> Result<Vec<Message>>;
    fn reply_count(&self, parent: MessageId) -> Result<usize>;
    /// The newest `limit` root messages of a channel, oldest first.
    fn recent_messages(&self, channel: &ChannelId, limit: usize) -> Result<Vec<Message>>;

    // -- reactions --

    /// Returns `true` if the triple was newly added.
    fn create_reaction(&mut self, reaction: &Reaction) -> Result<bool>;
    /// Returns `true` if the triple existed.
    fn delete_reaction(&mut self, reaction: &Reaction) -> Result<bool>;
    /// Reactions on a message in insertion order.
    fn list_reactions(&self, message: MessageId) -> Result<Vec<Reaction>>;
}
