use rusqlite::params;

use natter_shared::{Message, MessageType, ServerIdentity};

use crate::database::Database;
use crate::error::{from_sql_id, to_sql_id, Result, StoreError};

impl Database {
    /// Highest message id cached for a chat, or 0 when there is none.
    pub fn watermark(&self, server: &ServerIdentity, chat: &str) -> Result<u64> {
        let max: i64 = self.conn().query_row(
            "SELECT COALESCE(MAX(m.id), 0)
             FROM messages m
             JOIN chats c ON c.id = m.chat_id
             WHERE c.server_identity = ?1 AND c.name = ?2 AND m.server_identity = ?1",
            params![server.as_str(), chat],
            |row| row.get(0),
        )?;
        Ok(from_sql_id(0, max)?)
    }

    /// Every cached message of a chat, ordered by id.
    pub fn stored_messages(&self, server: &ServerIdentity, chat: &str) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT m.id, m.type, m.text, m.sender, m.raw
             FROM messages m
             JOIN chats c ON c.id = m.chat_id
             WHERE c.server_identity = ?1 AND c.name = ?2 AND m.server_identity = ?1
             ORDER BY m.id ASC",
        )?;

        let rows = stmt.query_map(params![server.as_str(), chat], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Append a message to a cached chat.
    ///
    /// No uniqueness check is made on the id; callers insert only ids above
    /// the chat's [`watermark`](Self::watermark).
    pub fn insert_message(
        &self,
        server: &ServerIdentity,
        chat: &str,
        message: &Message,
    ) -> Result<()> {
        let chat_id = self
            .chat_row_id(server, chat)?
            .ok_or(StoreError::NotFound)?;

        self.conn().execute(
            "INSERT INTO messages (id, chat_id, server_identity, type, text, sender, raw)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                to_sql_id(message.id)?,
                chat_id,
                server.as_str(),
                message.kind.as_byte(),
                message.text,
                message.sender,
                message.raw.as_deref().filter(|raw| !raw.is_empty()),
            ],
        )?;
        Ok(())
    }

    pub fn count_messages(&self, server: &ServerIdentity, chat: &str) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*)
             FROM messages m
             JOIN chats c ON c.id = m.chat_id
             WHERE c.server_identity = ?1 AND c.name = ?2 AND m.server_identity = ?1",
            params![server.as_str(), chat],
            |row| row.get(0),
        )?;
        Ok(from_sql_id(0, count)?)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: i64 = row.get(0)?;
    let kind: u8 = row.get(1)?;

    let kind = MessageType::from_byte(kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Integer,
            format!("unknown message type {kind}").into(),
        )
    })?;

    Ok(Message {
        kind,
        id: from_sql_id(0, id)?,
        text: row.get(2)?,
        sender: row.get(3)?,
        raw: row.get(4)?,
    })
}
