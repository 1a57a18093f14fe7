use parley_shared::{ChannelId, FileRef, Message, MessageId, PrincipalId};
use rusqlite::{params, OptionalExtension};

use crate::database::{parse_ts, parse_uuid, Database};
use crate::error::{Result, StoreError};

const MESSAGE_COLUMNS: &str = "id, channel_id, author_id, author_name, text, created_at,
     file_url, file_type, file_name, parent_id";

impl Database {
    /// Insert a message. For replies the parent's `reply_count` is bumped in
    /// the same transaction.
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;

        if let Some(parent) = message.parent_id {
            let bumped = tx.execute(
                "UPDATE messages SET reply_count = reply_count + 1 WHERE id = ?1",
                params![parent.to_string()],
            )?;
            if bumped == 0 {
                return Err(StoreError::NotFound("parent message"));
            }
        }

        let file = message.file.as_ref();
        tx.execute(
            "INSERT INTO messages (id, channel_id, author_id, author_name, text, created_at,
                                   file_url, file_type, file_name, parent_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                message.id.to_string(),
                message.channel_id.as_str(),
                message.author_id.to_string(),
                message.author_name,
                message.text,
                message.created_at.to_rfc3339(),
                file.map(|f| f.url.as_str()),
                file.map(|f| f.content_type.as_str()),
                file.map(|f| f.name.as_str()),
                message.parent_id.map(|p| p.to_string()),
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
            {
                StoreError::NotFound("channel")
            }
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict(format!("message '{}'", message.id))
            }
            other => StoreError::Sqlite(other),
        })?;

        tx.commit()?;
        Ok(())
    }

    pub fn get_message_by_id(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound("message"),
                other => StoreError::Sqlite(other),
            })
    }

    pub fn get_replies(&self, parent: MessageId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE parent_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![parent.to_string()], row_to_message)?;

        let mut replies = Vec::new();
        for row in rows {
            replies.push(row?);
        }
        Ok(replies)
    }

    pub fn get_reply_count(&self, parent: MessageId) -> Result<usize> {
        let count: Option<i64> = self
            .conn()
            .query_row(
                "SELECT reply_count FROM messages WHERE id = ?1",
                params![parent.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0).max(0) as usize)
    }

    /// The newest `limit` root messages of a channel, returned oldest first.
    pub fn get_recent_roots(&self, channel: &ChannelId, limit: usize) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE channel_id = ?1 AND parent_id IS NULL
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(
            params![channel.as_str(), limit as i64],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        messages.reverse();
        Ok(messages)
    }

    /// Delete a message and everything hanging off it. Descendant replies
    /// and reactions cascade through foreign keys; deleting a reply
    /// decrements its parent's counter.
    pub fn delete_message_tree(&mut self, id: MessageId) -> Result<Vec<MessageId>> {
        let message = self.get_message_by_id(id)?;
        let mut removed = vec![id];
        let mut cursor = 0;
        while cursor < removed.len() {
            let children = self.get_replies(removed[cursor])?;
            removed.extend(children.into_iter().map(|r| r.id));
            cursor += 1;
        }

        let tx = self.conn_mut().transaction()?;
        tx.execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
        if let Some(parent) = message.parent_id {
            tx.execute(
                "UPDATE messages SET reply_count = MAX(reply_count - 1, 0) WHERE id = ?1",
                params![parent.to_string()],
            )?;
        }
        tx.commit()?;

        Ok(removed)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let channel_id: String = row.get(1)?;
    let author_str: String = row.get(2)?;
    let author_name: String = row.get(3)?;
    let text: String = row.get(4)?;
    let ts_str: String = row.get(5)?;
    let file_url: Option<String> = row.get(6)?;
    let file_type: Option<String> = row.get(7)?;
    let file_name: Option<String> = row.get(8)?;
    let parent_str: Option<String> = row.get(9)?;

    let file = match (file_url, file_type, file_name) {
        (Some(url), Some(content_type), Some(name)) => Some(FileRef {
            url,
            content_type,
            name,
        }),
        _ => None,
    };

    let parent_id = parent_str
        .map(|p| parse_uuid(9, &p).map(MessageId))
        .transpose()?;

    Ok(Message {
        id: MessageId(parse_uuid(0, &id_str)?),
        channel_id: ChannelId(channel_id),
        author_id: PrincipalId(parse_uuid(2, &author_str)?),
        author_name,
        text,
        created_at: parse_ts(5, &ts_str)?,
        file,
        parent_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use chrono::Utc;

    fn message(parent: Option<MessageId>) -> Message {
        Message {
            id: MessageId::new(),
            channel_id: ChannelId::general(),
            author_id: PrincipalId::new(),
            author_name: "sam".into(),
            text: "hello".into(),
            created_at: Utc::now(),
            file: None,
            parent_id: parent,
        }
    }

    #[test]
    fn insert_and_read_with_file() {
        let mut db = Database::open_in_memory().unwrap();
        let mut msg = message(None);
        msg.file = Some(FileRef {
            url: "/uploads/abc".into(),
            content_type: "image/png".into(),
            name: "cat.png".into(),
        });
        db.create_message(&msg).unwrap();

        let loaded = db.get_message(msg.id).unwrap();
        assert_eq!(loaded.file, msg.file);
        assert_eq!(loaded.text, "hello");
    }

    #[test]
    fn reply_to_missing_parent_is_rejected() {
        let mut db = Database::open_in_memory().unwrap();
        let orphan = message(Some(MessageId::new()));
        assert!(matches!(
            db.create_message(&orphan),
            Err(StoreError::NotFound(_))
        ));
        assert!(db.get_message(orphan.id).is_err());
    }

    #[test]
    fn duplicate_id_is_a_conflict() {
        let mut db = Database::open_in_memory().unwrap();
        let root = message(None);
        db.create_message(&root).unwrap();

        let mut again = message(None);
        again.id = root.id;
        assert!(matches!(
            db.create_message(&again),
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(db.get_message(root.id).unwrap().created_at, root.created_at);
    }

    #[test]
    fn unknown_channel_is_not_found() {
        let mut db = Database::open_in_memory().unwrap();
        let mut msg = message(None);
        msg.channel_id = ChannelId::new();
        assert!(matches!(
            db.create_message(&msg),
            Err(StoreError::NotFound("channel"))
        ));
    }

    #[test]
    fn replies_are_ordered_and_counted() {
        let mut db = Database::open_in_memory().unwrap();
        let root = message(None);
        db.create_message(&root).unwrap();

        let replies: Vec<_> = (0..3).map(|_| message(Some(root.id))).collect();
        for reply in &replies {
            db.create_message(reply).unwrap();
        }

        assert_eq!(db.reply_count(root.id).unwrap(), 3);
        let ids: Vec<_> = db.list_replies(root.id).unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, replies.iter().map(|m| m.id).collect::<Vec<_>>());

        db.delete_message(replies[1].id).unwrap();
        assert_eq!(db.reply_count(root.id).unwrap(), 2);
    }

    #[test]
    fn deleting_root_cascades() {
        let mut db = Database::open_in_memory().unwrap();
        let root = message(None);
        db.create_message(&root).unwrap();
        let reply = message(Some(root.id));
        db.create_message(&reply).unwrap();

        let removed = db.delete_message(root.id).unwrap();
        assert_eq!(removed, vec![root.id, reply.id]);
        assert!(matches!(
            db.get_message(reply.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn deleting_a_reply_removes_its_own_replies() {
        let mut db = Database::open_in_memory().unwrap();
        let root = message(None);
        let question = message(Some(root.id));
        let answer = message(Some(question.id));
        for m in [&root, &question, &answer] {
            db.create_message(m).unwrap();
        }

        let removed = db.delete_message(question.id).unwrap();
        assert_eq!(removed, vec![question.id, answer.id]);
        assert_eq!(db.reply_count(root.id).unwrap(), 0);
        assert!(db.get_message(answer.id).is_err());
    }

    #[test]
    fn recent_messages_skip_replies() {
        let mut db = Database::open_in_memory().unwrap();
        let roots: Vec<_> = (0..4).map(|_| message(None)).collect();
        for root in &roots {
            db.create_message(root).unwrap();
        }
        db.create_message(&message(Some(roots[0].id))).unwrap();

        let recent = db.recent_messages(&ChannelId::general(), 2).unwrap();
        let ids: Vec<_> = recent.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![roots[2].id, roots[3].id]);
    }
}
