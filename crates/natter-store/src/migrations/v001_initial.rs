//! v001 -- Initial schema creation.
//!
//! Creates `servers`, `chats` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Servers, keyed by the identity announced on handshake
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS servers (
    identity   TEXT PRIMARY KEY NOT NULL,
    first_seen TEXT NOT NULL                  -- RFC-3339
);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    server_identity TEXT NOT NULL,            -- FK -> servers(identity)
    name            TEXT NOT NULL,
    creator         TEXT NOT NULL DEFAULT '',
    description     TEXT NOT NULL DEFAULT '',
    remote_id       INTEGER,                  -- server-assigned id, once known

    UNIQUE (server_identity, name),
    FOREIGN KEY (server_identity) REFERENCES servers(identity) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
--
-- (chat_id, id) is deliberately not unique: the client only inserts ids
-- above the chat's watermark.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              INTEGER NOT NULL,         -- server-assigned, per chat
    chat_id         INTEGER NOT NULL,         -- FK -> chats(id)
    server_identity TEXT NOT NULL,            -- FK -> servers(identity)
    type            INTEGER NOT NULL,
    text            TEXT NOT NULL,
    sender          TEXT NOT NULL,
    raw             BLOB,

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (server_identity) REFERENCES servers(identity) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_id
    ON messages(chat_id, id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
