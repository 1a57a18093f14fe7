//! CRUD operations for [`Channel`] records and their memberships.

use chrono::Utc;
use parley_shared::{Channel, ChannelId, ChannelKind, PrincipalId};
use rusqlite::{params, OptionalExtension};

use crate::database::{parse_ts, parse_uuid, Database};
use crate::error::{Result, StoreError};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new channel together with its initial members.
    pub fn insert_channel(&self, channel: &Channel) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        tx.execute(
            "INSERT INTO channels (id, name, kind, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                channel.id.as_str(),
                channel.name,
                channel.kind.as_str(),
                channel.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(format!("channel '{}'", channel.id))
            }
            other => StoreError::Sqlite(other),
        })?;

        let now = Utc::now().to_rfc3339();
        for member in &channel.member_ids {
            tx.execute(
                "INSERT OR IGNORE INTO memberships (channel_id, principal_id, joined_at)
                 VALUES (?1, ?2, ?3)",
                params![channel.id.as_str(), member.to_string(), now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Add a membership. Returns `true` if it did not exist before.
    pub fn insert_membership(&self, channel: &ChannelId, principal: PrincipalId) -> Result<bool> {
        if !self.channel_exists(channel)? {
            return Err(StoreError::NotFound("channel"));
        }
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO memberships (channel_id, principal_id, joined_at)
             VALUES (?1, ?2, ?3)",
            params![
                channel.as_str(),
                principal.to_string(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single channel by id, including its members.
    pub fn get_channel_by_id(&self, id: &ChannelId) -> Result<Channel> {
        let mut channel = self
            .conn()
            .query_row(
                "SELECT id, name, kind, created_at
                 FROM channels
                 WHERE id = ?1",
                params![id.as_str()],
                row_to_channel,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound("channel"),
                other => StoreError::Sqlite(other),
            })?;
        channel.member_ids = self.channel_members(id)?;
        Ok(channel)
    }

    /// Find a persistent channel by name.
    pub fn get_persistent_channel_by_name(&self, name: &str) -> Result<Option<Channel>> {
        let channel = self
            .conn()
            .query_row(
                "SELECT id, name, kind, created_at
                 FROM channels
                 WHERE name = ?1 AND kind = 'persistent'",
                params![name],
                row_to_channel,
            )
            .optional()?;

        match channel {
            Some(mut channel) => {
                channel.member_ids = self.channel_members(&channel.id)?;
                Ok(Some(channel))
            }
            None => Ok(None),
        }
    }

    /// List all channels, ordered by creation date ascending.
    pub fn list_all_channels(&self) -> Result<Vec<Channel>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, name, kind, created_at
             FROM channels
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map([], row_to_channel)?;

        let mut channels = Vec::new();
        for row in rows {
            let mut channel = row?;
            channel.member_ids = self.channel_members(&channel.id)?;
            channels.push(channel);
        }
        Ok(channels)
    }

    pub fn has_membership(&self, channel: &ChannelId, principal: PrincipalId) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM memberships WHERE channel_id = ?1 AND principal_id = ?2",
                params![channel.as_str(), principal.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Channels a principal belongs to, in join order.
    pub fn list_memberships(&self, principal: PrincipalId) -> Result<Vec<ChannelId>> {
        let mut stmt = self.conn().prepare(
            "SELECT channel_id FROM memberships
             WHERE principal_id = ?1
             ORDER BY joined_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![principal.to_string()], |row| {
            row.get::<_, String>(0).map(ChannelId)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn channel_members(&self, channel: &ChannelId) -> Result<Vec<PrincipalId>> {
        let mut stmt = self.conn().prepare(
            "SELECT principal_id FROM memberships
             WHERE channel_id = ?1
             ORDER BY joined_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![channel.as_str()], |row| {
            let id: String = row.get(0)?;
            parse_uuid(0, &id).map(PrincipalId)
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    fn channel_exists(&self, channel: &ChannelId) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM channels WHERE id = ?1",
                params![channel.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a `rusqlite::Row` to a [`Channel`] without members.
fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let kind_str: String = row.get(2)?;
    let created_str: String = row.get(3)?;

    let kind = ChannelKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown channel kind '{kind_str}'").into(),
        )
    })?;

    Ok(Channel {
        id: ChannelId(id),
        name,
        kind,
        member_ids: Vec::new(),
        created_at: parse_ts(3, &created_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Account;
    use crate::Store;
    use parley_shared::Principal;

    fn principal(db: &mut Database, name: &str) -> Principal {
        let p = Principal::registered(name);
        db.create_principal(&Account::with_password(p.clone(), "h".into()))
            .unwrap();
        p
    }

    #[test]
    fn direct_channel_keeps_members() {
        let mut db = Database::open_in_memory().unwrap();
        let a = principal(&mut db, "a");
        let b = principal(&mut db, "b");

        let dm = Channel::direct(&a, &b);
        db.create_channel(&dm).unwrap();

        let loaded = db.get_channel(&dm.id).unwrap();
        assert_eq!(loaded.kind, ChannelKind::DirectMessage);
        assert_eq!(loaded.member_ids, vec![a.id, b.id]);
        assert!(db.is_member(&dm.id, b.id).unwrap());
        assert!(matches!(
            db.create_channel(&dm),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn membership_is_idempotent() {
        let mut db = Database::open_in_memory().unwrap();
        let a = principal(&mut db, "a");
        let general = ChannelId::general();

        assert!(db.add_membership(&general, a.id).unwrap());
        assert!(!db.add_membership(&general, a.id).unwrap());
        assert_eq!(db.memberships(a.id).unwrap(), vec![general]);
        assert!(matches!(
            db.add_membership(&ChannelId("missing".into()), a.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn finds_only_persistent_channels_by_name() {
        let mut db = Database::open_in_memory().unwrap();
        db.create_channel(&Channel::persistent("random")).unwrap();
        assert!(db.find_channel_by_name("random").unwrap().is_some());
        assert!(db.find_channel_by_name("nope").unwrap().is_none());
    }
}
