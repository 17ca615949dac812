//! Minimal chat storage: enough to record conversations and preview the latest one.

use anyhow::Result;
use rusqlite::params;

use super::{now_millis, Database};

/// Newest message of a character's most recently modified chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPreview {
    pub chat_id: i64,
    pub name: Option<String>,
    pub swipe: Option<String>,
}

impl Database {
    pub fn create_chat(&self, character_id: i64) -> Result<i64> {
        let now = now_millis();
        self.conn.execute(
            "INSERT INTO chats (character_id, create_date, last_modified) VALUES (?, ?, ?)",
            params![character_id, now, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Append a message with its first swipe and bump the chat's modified time.
    pub fn add_chat_entry(&self, chat_id: i64, name: &str, is_user: bool, message: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO chat_entries (chat_id, name, is_user) VALUES (?, ?, ?)",
            params![chat_id, name, is_user],
        )?;
        let entry_id = self.conn.last_insert_rowid();
        self.add_swipe(entry_id, message)?;
        self.touch_chat(chat_id, now_millis())?;
        Ok(entry_id)
    }

    pub fn add_swipe(&self, entry_id: i64, swipe: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO chat_swipes (entry_id, swipe, send_date) VALUES (?, ?, ?)",
            params![entry_id, swipe, now_millis()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn touch_chat(&self, chat_id: i64, last_modified: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE chats SET last_modified = ? WHERE id = ?",
            params![last_modified, chat_id],
        )?;
        Ok(())
    }

    pub fn latest_chat_preview(&self, character_id: i64) -> Result<Option<ChatPreview>> {
        let chat = self.conn.query_row(
            r#"
            SELECT id FROM chats
            WHERE character_id = ?
            ORDER BY last_modified DESC, id DESC
            LIMIT 1
            "#,
            [character_id],
            |row| row.get::<_, i64>(0),
        );
        let chat_id = match chat {
            Ok(id) => id,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry = self.conn.query_row(
            "SELECT id, name FROM chat_entries WHERE chat_id = ? ORDER BY id DESC LIMIT 1",
            [chat_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        );
        let (entry_id, name) = match entry {
            Ok(entry) => entry,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Ok(Some(ChatPreview { chat_id, name: None, swipe: None }));
            }
            Err(e) => return Err(e.into()),
        };

        let swipe = match self.conn.query_row(
            "SELECT swipe FROM chat_swipes WHERE entry_id = ? ORDER BY id DESC LIMIT 1",
            [entry_id],
            |row| row.get::<_, String>(0),
        ) {
            Ok(swipe) => Some(swipe),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Some(ChatPreview { chat_id, name: Some(name), swipe }))
    }
}
