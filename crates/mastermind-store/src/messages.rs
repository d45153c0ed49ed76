//! Group chat messages.

use rusqlite::params;
use uuid::Uuid;

use mastermind_shared::types::Message;
use mastermind_shared::WalletAddress;

use crate::database::{not_found, Database};
use crate::error::Result;
use crate::models::{address_at, now_rfc3339, timestamp_at};

const MESSAGE_SELECT: &str = "SELECT m.id, m.group_id, m.sender_address, COALESCE(m.username, u.username),
            m.content, m.created_at
     FROM messages m
     LEFT JOIN users u ON u.address = m.sender_address";

impl Database {
    /// Append a message and return it as stored.
    pub fn insert_message(
        &self,
        group_id: &str,
        sender: &WalletAddress,
        username: Option<&str>,
        content: &str,
    ) -> Result<Message> {
        let id = Uuid::new_v4().to_string();
        self.conn().execute(
            "INSERT INTO messages (id, group_id, sender_address, username, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, group_id, sender.to_base58(), username, content, now_rfc3339()],
        )?;

        self.conn()
            .query_row(&format!("{MESSAGE_SELECT} WHERE m.id = ?1"), params![id], row_to_message)
            .map_err(not_found)
    }

    /// The most recent `limit` messages of a group, oldest first.
    pub fn list_messages(&self, group_id: &str, limit: usize) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT * FROM (
                 {MESSAGE_SELECT}
                 WHERE m.group_id = ?1
                 ORDER BY m.created_at DESC
                 LIMIT ?2
             ) ORDER BY 6 ASC"
        ))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![group_id, limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        group_id: row.get(1)?,
        sender_address: address_at(row, 2)?,
        username: row.get(3)?,
        content: row.get(4)?,
        created_at: Some(timestamp_at(row, 5)?),
    })
}
