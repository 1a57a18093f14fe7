use chrono::Utc;
use parley_shared::{MessageId, PrincipalId, Reaction};
use rusqlite::params;

use crate::database::{parse_uuid, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Insert a `(message, principal, emoji)` triple. Returns `false` if it
    /// was already present.
    pub fn add_reaction(&self, reaction: &Reaction) -> Result<bool> {
        let affected = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO reactions (message_id, principal_id, emoji, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    reaction.message_id.to_string(),
                    reaction.principal_id.to_string(),
                    reaction.emoji,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::NotFound("message")
                }
                other => StoreError::Sqlite(other),
            })?;
        Ok(affected > 0)
    }

    pub fn remove_reaction(&self, reaction: &Reaction) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM reactions WHERE message_id = ?1 AND principal_id = ?2 AND emoji = ?3",
            params![
                reaction.message_id.to_string(),
                reaction.principal_id.to_string(),
                reaction.emoji
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn get_reactions_for_message(&self, message_id: MessageId) -> Result<Vec<Reaction>> {
        let mut stmt = self.conn().prepare(
            "SELECT principal_id, emoji
             FROM reactions WHERE message_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            let principal: String = row.get(0)?;
            let emoji: String = row.get(1)?;
            Ok(Reaction {
                message_id,
                principal_id: PrincipalId(parse_uuid(0, &principal)?),
                emoji,
            })
        })?;

        let mut reactions = Vec::new();
        for row in rows {
            reactions.push(row?);
        }
        Ok(reactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use parley_shared::{ChannelId, Message};

    fn seeded() -> (Database, MessageId) {
        let mut db = Database::open_in_memory().unwrap();
        let msg = Message {
            id: MessageId::new(),
            channel_id: ChannelId::general(),
            author_id: PrincipalId::new(),
            author_name: "sam".into(),
            text: "react to me".into(),
            created_at: Utc::now(),
            file: None,
            parent_id: None,
        };
        db.create_message(&msg).unwrap();
        (db, msg.id)
    }

    #[test]
    fn triples_are_unique() {
        let (mut db, id) = seeded();
        let reaction = Reaction {
            message_id: id,
            principal_id: PrincipalId::new(),
            emoji: "👍".into(),
        };

        assert!(db.create_reaction(&reaction).unwrap());
        assert!(!db.create_reaction(&reaction).unwrap());
        assert_eq!(db.list_reactions(id).unwrap(), vec![reaction.clone()]);

        assert!(db.delete_reaction(&reaction).unwrap());
        assert!(db.list_reactions(id).unwrap().is_empty());
    }

    #[test]
    fn reaction_on_missing_message_is_not_found() {
        let (mut db, _) = seeded();
        let reaction = Reaction {
            message_id: MessageId::new(),
            principal_id: PrincipalId::new(),
            emoji: "👍".into(),
        };
        assert!(matches!(
            db.create_reaction(&reaction),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn reactions_cascade_with_message() {
        let (mut db, id) = seeded();
        db.create_reaction(&Reaction {
            message_id: id,
            principal_id: PrincipalId::new(),
            emoji: "🔥".into(),
        })
        .unwrap();
        db.delete_message(id).unwrap();
        assert!(db.list_reactions(id).unwrap().is_empty());
    }
}
