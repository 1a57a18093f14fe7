//! v001 -- Initial schema creation.
//!
//! Creates the five core tables: `principals`, `channels`, `memberships`,
//! `messages` and `reactions`, and seeds the `general` channel.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Principals
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS principals (
    id            TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    display_name  TEXT NOT NULL UNIQUE,
    is_ephemeral  INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    password_hash TEXT,                        -- NULL for guests
    created_at    TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Channels
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channels (
    id         TEXT PRIMARY KEY NOT NULL,      -- UUID v4, 'general' or 'dm:<a>:<b>'
    name       TEXT NOT NULL,
    kind       TEXT NOT NULL,                  -- 'persistent' | 'directMessage'
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_channels_name ON channels(name);

-- ----------------------------------------------------------------
-- Memberships
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS memberships (
    channel_id   TEXT NOT NULL,                -- FK -> channels(id)
    principal_id TEXT NOT NULL,                -- FK -> principals(id)
    joined_at    TEXT NOT NULL,

    PRIMARY KEY (channel_id, principal_id),
    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE,
    FOREIGN KEY (principal_id) REFERENCES principals(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_memberships_principal ON memberships(principal_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
-- author_id has no foreign key: guest principals are removed on disconnect
-- and their messages stay attributed via author_name.
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    channel_id  TEXT NOT NULL,                 -- FK -> channels(id)
    author_id   TEXT NOT NULL,
    author_name TEXT NOT NULL,
    text        TEXT NOT NULL,
    created_at  TEXT NOT NULL,                 -- ISO-8601
    file_url    TEXT,
    file_type   TEXT,
    file_name   TEXT,
    parent_id   TEXT,                          -- FK -> messages(id)
    reply_count INTEGER NOT NULL DEFAULT 0,

    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE,
    FOREIGN KEY (parent_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_channel_ts
    ON messages(channel_id, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_parent
    ON messages(parent_id, created_at);

-- ----------------------------------------------------------------
-- Reactions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS reactions (
    message_id   TEXT NOT NULL,                -- FK -> messages(id)
    principal_id TEXT NOT NULL,
    emoji        TEXT NOT NULL,
    created_at   TEXT NOT NULL,

    UNIQUE (message_id, principal_id, emoji),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Seed
-- ----------------------------------------------------------------
INSERT OR IGNORE INTO channels (id, name, kind, created_at)
    VALUES ('general', 'general', 'persistent', strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
