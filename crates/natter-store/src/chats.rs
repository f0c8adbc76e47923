//! Chat records, unique by name within a server identity.

use rusqlite::{params, OptionalExtension};

use natter_shared::{Chat, ServerIdentity};

use crate::database::Database;
use crate::error::{from_sql_id, to_sql_id, Result, StoreError};

impl Database {
    /// Insert `chat` unless a chat with the same name already exists for
    /// `server`. A server-assigned id learned later is filled in on an
    /// existing record. Returns `true` if a record was created.
    pub fn ensure_chat(&self, server: &ServerIdentity, chat: &Chat) -> Result<bool> {
        self.register_server(server)?;

        let remote_id = chat.id.map(to_sql_id).transpose()?;

        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO chats (server_identity, name, creator, description, remote_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                server.as_str(),
                chat.name,
                chat.creator,
                chat.description,
                remote_id,
            ],
        )?;

        if inserted == 0 {
            if let Some(remote_id) = remote_id {
                self.conn().execute(
                    "UPDATE chats SET remote_id = ?1
                     WHERE server_identity = ?2 AND name = ?3 AND remote_id IS NULL",
                    params![remote_id, server.as_str(), chat.name],
                )?;
            }
        } else {
            tracing::debug!(server = %server, chat = %chat.name, "cached new chat");
        }

        Ok(inserted > 0)
    }

    pub fn get_chat(&self, server: &ServerIdentity, name: &str) -> Result<Chat> {
        self.conn()
            .query_row(
                "SELECT name, creator, description, remote_id
                 FROM chats
                 WHERE server_identity = ?1 AND name = ?2",
                params![server.as_str(), name],
                row_to_chat,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// All chats cached for `server`, ordered by name.
    pub fn list_chats(&self, server: &ServerIdentity) -> Result<Vec<Chat>> {
        let mut stmt = self.conn().prepare(
            "SELECT name, creator, description, remote_id
             FROM chats
             WHERE server_identity = ?1
             ORDER BY name ASC",
        )?;

        let rows = stmt.query_map(params![server.as_str()], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }

    /// Local row id of a chat, if it is cached.
    pub(crate) fn chat_row_id(&self, server: &ServerIdentity, name: &str) -> Result<Option<i64>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT id FROM chats WHERE server_identity = ?1 AND name = ?2",
                params![server.as_str(), name],
                |row| row.get(0),
            )
            .optional()?)
    }
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let remote_id: Option<i64> = row.get(3)?;
    Ok(Chat {
        id: remote_id.map(|id| from_sql_id(3, id)).transpose()?,
        name: row.get(0)?,
        creator: row.get(1)?,
        description: row.get(2)?,
    })
}
