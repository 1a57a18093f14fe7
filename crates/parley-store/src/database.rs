//! SQLite-backed [`Store`].
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. The typed CRUD helpers
//! live next to their tables (`principals.rs`, `channels.rs`, `messages.rs`,
//! `reactions.rs`); this module wires them into the [`Store`] trait.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parley_shared::{Channel, ChannelId, Message, MessageId, Principal, PrincipalId, Reaction};
use rusqlite::Connection;
use uuid::Uuid;

use crate::error::Result;
use crate::migrations;
use crate::models::Account;
use crate::Store;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = %path.display(), "opening database");
        Self::init(Connection::open(path)?)
    }

    /// Open a private in-memory database. Useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // Run schema migrations (also seeds `general`).
        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return a mutable reference to the underlying connection.
    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

// ---------------------------------------------------------------------------
// Row helpers shared by the table modules
// ---------------------------------------------------------------------------

pub(crate) fn parse_uuid(idx: usize, s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

impl Store for Database {
    fn create_principal(&mut self, account: &Account) -> Result<()> {
        self.insert_principal(account)
    }

    fn get_principal(&self, id: PrincipalId) -> Result<Principal> {
        self.get_principal_by_id(id)
    }

    fn find_account(&self, display_name: &str) -> Result<Option<Account>> {
        self.get_account_by_name(display_name)
    }

    fn list_principals(&self) -> Result<Vec<Principal>> {
        self.list_all_principals()
    }

    fn remove_principal(&mut self, id: PrincipalId) -> Result<bool> {
        self.delete_principal(id)
    }

    fn stale_guests(&self, created_before: DateTime<Utc>) -> Result<Vec<PrincipalId>> {
        self.list_stale_guests(created_before)
    }

    fn create_channel(&mut self, channel: &Channel) -> Result<()> {
        self.insert_channel(channel)
    }

    fn get_channel(&self, id: &ChannelId) -> Result<Channel> {
        self.get_channel_by_id(id)
    }

    fn find_channel_by_name(&self, name: &str) -> Result<Option<Channel>> {
        self.get_persistent_channel_by_name(name)
    }

    fn list_channels(&self) -> Result<Vec<Channel>> {
        self.list_all_channels()
    }

    fn add_membership(&mut self, channel: &ChannelId, principal: PrincipalId) -> Result<bool> {
        self.insert_membership(channel, principal)
    }

    fn is_member(&self, channel: &ChannelId, principal: PrincipalId) -> Result<bool> {
        self.has_membership(channel, principal)
    }

    fn memberships(&self, principal: PrincipalId) -> Result<Vec<ChannelId>> {
        self.list_memberships(principal)
    }

    fn create_message(&mut self, message: &Message) -> Result<Vec<MessageId>> {
        self.insert_message(message)?;
        Ok(Vec::new())
    }

    fn get_message(&self, id: MessageId) -> Result<Message> {
        self.get_message_by_id(id)
    }

    fn delete_message(&mut self, id: MessageId) -> Result<Vec<MessageId>> {
        self.delete_message_tree(id)
    }

    fn list_replies(&self, parent: MessageId) -> Result<Vec<Message>> {
        self.get_replies(parent)
    }

    fn reply_count(&self, parent: MessageId) -> Result<usize> {
        self.get_reply_count(parent)
    }

    fn recent_messages(&self, channel: &ChannelId, limit: usize) -> Result<Vec<Message>> {
        self.get_recent_roots(channel, limit)
    }

    fn create_reaction(&mut self, reaction: &Reaction) -> Result<bool> {
        self.add_reaction(reaction)
    }

    fn delete_reaction(&mut self, reaction: &Reaction) -> Result<bool> {
        self.remove_reaction(reaction)
    }

    fn list_reactions(&self, message: MessageId) -> Result<Vec<Reaction>> {
        self.get_reactions_for_message(message)
    }
}
