//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `users`, `groups`, `group_members`, and
//! `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (presence mirror; profile data lives with the auth service)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id        TEXT PRIMARY KEY NOT NULL,      -- UUID v4
    status    TEXT NOT NULL DEFAULT 'offline',-- 'online' | 'offline'
    last_seen TEXT                            -- RFC-3339, NULL while online
);

-- ----------------------------------------------------------------
-- Groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    name       TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL,
    user_id  TEXT NOT NULL,

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    sender_id   TEXT NOT NULL,                -- UUID v4
    receiver_id TEXT,                         -- set for direct messages
    group_id    TEXT,                         -- set for group messages
    content     TEXT NOT NULL,
    kind        TEXT NOT NULL DEFAULT 'text', -- 'text'|'image'|'video'|'file'
    media_url   TEXT,
    seen        INTEGER NOT NULL DEFAULT 0,
    seen_at     TEXT,
    edited      INTEGER NOT NULL DEFAULT 0,
    deleted     INTEGER NOT NULL DEFAULT 0,
    deleted_by  TEXT,
    deleted_at  TEXT,
    created_at  TEXT NOT NULL,                -- RFC-3339, fixed precision

    -- Exactly one of receiver_id / group_id.
    CHECK ((receiver_id IS NULL) <> (group_id IS NULL)),

    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_direct
    ON messages(sender_id, receiver_id, created_at DESC);

CREATE INDEX IF NOT EXISTS idx_messages_group
    ON messages(group_id, created_at DESC);

CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
