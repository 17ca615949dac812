//! Character rows, their greetings, and tag links.

use anyhow::Result;
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, Row};

use super::{now_millis, CardData, CardField, CardOrder, CardSummary, CardType, Database, Greeting, Tag};
use crate::card::CardV2Data;

const CARD_COLUMNS: &str = "id, type, name, description, personality, scenario, first_mes, \
     mes_example, creator_notes, system_prompt, post_history_instructions, creator, \
     character_version, image_id, last_modified";

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<CardData> {
    Ok(CardData {
        id: row.get(0)?,
        card_type: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        personality: row.get(4)?,
        scenario: row.get(5)?,
        first_mes: row.get(6)?,
        mes_example: row.get(7)?,
        creator_notes: row.get(8)?,
        system_prompt: row.get(9)?,
        post_history_instructions: row.get(10)?,
        creator: row.get(11)?,
        character_version: row.get(12)?,
        image_id: row.get(13)?,
        last_modified: row.get(14)?,
        tags: Vec::new(),
        alternate_greetings: Vec::new(),
    })
}

/// Next avatar id: the current time, bumped past any id already taken.
fn next_image_id(conn: &Connection) -> rusqlite::Result<i64> {
    let max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(image_id), 0) FROM characters",
        [],
        |row| row.get(0),
    )?;
    let next = max
        .checked_add(1)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(0, max))?;
    Ok(now_millis().max(next))
}

fn image_id_in_use(conn: &Connection, image_id: i64) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM characters WHERE image_id = ?)",
        [image_id],
        |row| row.get(0),
    )
}

/// Every row a card needs. Runs inside the caller's transaction.
fn insert_card_rows(
    conn: &Connection,
    data: &CardV2Data,
    card_type: CardType,
) -> rusqlite::Result<(i64, i64)> {
    let image_id = match data.image_id {
        Some(id) if id > 0 && !image_id_in_use(conn, id)? => id,
        _ => next_image_id(conn)?,
    };

    conn.execute(
        r#"
        INSERT INTO characters (
            type, name, description, personality, scenario, first_mes, mes_example,
            creator_notes, system_prompt, post_history_instructions, creator,
            character_version, image_id, last_modified
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            card_type,
            data.name,
            data.description,
            data.personality,
            data.scenario,
            data.first_mes,
            data.mes_example,
            data.creator_notes,
            data.system_prompt,
            data.post_history_instructions,
            data.creator,
            data.character_version,
            image_id,
            data.last_modified.unwrap_or_else(now_millis),
        ],
    )?;
    let id = conn.last_insert_rowid();

    for greeting in &data.alternate_greetings {
        conn.execute(
            "INSERT INTO character_greetings (character_id, greeting) VALUES (?, ?)",
            params![id, greeting],
        )?;
    }

    if !data.tags.is_empty() {
        for tag in &data.tags {
            conn.execute("INSERT OR IGNORE INTO tags (tag) VALUES (?)", [tag])?;
        }
        let mut lookup = conn.prepare("SELECT id FROM tags WHERE tag = ?")?;
        for tag in &data.tags {
            let tag_id: i64 = lookup.query_row([tag], |row| row.get(0))?;
            conn.execute(
                "INSERT OR IGNORE INTO character_tags (character_id, tag_id) VALUES (?, ?)",
                params![id, tag_id],
            )?;
        }
    }

    Ok((id, image_id))
}

impl Database {
    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_card(&self, id: i64) -> Result<Option<CardData>> {
        let result = self.conn.query_row(
            &format!("SELECT {} FROM characters WHERE id = ?", CARD_COLUMNS),
            [id],
            card_from_row,
        );
        match result {
            Ok(mut card) => {
                card.tags = self.get_card_tags(id)?;
                card.alternate_greetings = self.get_greetings(id)?;
                Ok(Some(card))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_card_tags(&self, character_id: i64) -> Result<Vec<Tag>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT t.id, t.tag
            FROM tags t
            JOIN character_tags ct ON ct.tag_id = t.id
            WHERE ct.character_id = ?
            ORDER BY t.id
            "#,
        )?;
        let tags = stmt
            .query_map([character_id], |row| Ok(Tag { id: row.get(0)?, tag: row.get(1)? }))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(tags)
    }

    pub fn get_greetings(&self, character_id: i64) -> Result<Vec<Greeting>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, character_id, greeting FROM character_greetings WHERE character_id = ? ORDER BY id",
        )?;
        let greetings = stmt
            .query_map([character_id], |row| {
                Ok(Greeting {
                    id: row.get(0)?,
                    character_id: row.get(1)?,
                    greeting: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(greetings)
    }

    /// Cards of one type with their tags and, for characters, the latest chat preview.
    pub fn list_cards(&self, card_type: CardType, order: CardOrder) -> Result<Vec<CardSummary>> {
        let order_by = match order {
            CardOrder::Id => "id ASC",
            CardOrder::Modified => "last_modified DESC, id DESC",
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT id, name, image_id, last_modified FROM characters WHERE type = ? ORDER BY {}",
            order_by
        ))?;
        let rows: Vec<(i64, String, i64, Option<i64>)> = stmt
            .query_map([card_type], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .collect::<rusqlite::Result<_>>()?;

        let mut cards = Vec::with_capacity(rows.len());
        for (id, name, image_id, last_modified) in rows {
            let tags = self.get_card_tags(id)?.into_iter().map(|t| t.tag).collect();
            let mut summary = CardSummary {
                id,
                name,
                image_id,
                last_modified: last_modified.unwrap_or(0),
                tags,
                latest_chat: None,
                latest_name: None,
                latest_swipe: None,
            };
            if card_type == CardType::Character {
                if let Some(preview) = self.latest_chat_preview(id)? {
                    summary.latest_chat = Some(preview.chat_id);
                    summary.latest_name = preview.name;
                    summary.latest_swipe = preview.swipe;
                }
            }
            cards.push(summary);
        }
        Ok(cards)
    }

    pub fn card_exists(&self, id: i64) -> Result<bool> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM characters WHERE id = ?)",
            [id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn get_image_id(&self, id: i64) -> Result<Option<i64>> {
        let result = self.conn.query_row(
            "SELECT image_id FROM characters WHERE id = ?",
            [id],
            |row| row.get(0),
        );
        match result {
            Ok(image_id) => Ok(Some(image_id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Allocate a fresh avatar id without writing it anywhere.
    pub fn fresh_image_id(&self) -> Result<i64> {
        Ok(next_image_id(&self.conn)?)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert an empty card of the given type.
    pub fn create_card(&self, name: &str, card_type: CardType) -> Result<i64> {
        let image_id = next_image_id(&self.conn)?;
        self.conn.execute(
            "INSERT INTO characters (type, name, image_id, last_modified) VALUES (?, ?, ?, ?)",
            params![card_type, name, image_id, now_millis()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Overwrite the core text fields and every greeting's text (matched by greeting id).
    pub fn update_card(&self, card: &CardData, id: i64) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE characters
            SET name = ?, description = ?, personality = ?, scenario = ?,
                first_mes = ?, mes_example = ?, system_prompt = ?
            WHERE id = ?
            "#,
            params![
                card.name,
                card.description,
                card.personality,
                card.scenario,
                card.first_mes,
                card.mes_example,
                card.system_prompt,
                id,
            ],
        )?;
        for greeting in &card.alternate_greetings {
            self.conn.execute(
                "UPDATE character_greetings SET greeting = ? WHERE id = ?",
                params![greeting.greeting, greeting.id],
            )?;
        }
        Ok(())
    }

    pub fn add_greeting(&self, character_id: i64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO character_greetings (character_id, greeting) VALUES (?, '')",
            [character_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn delete_greeting(&self, greeting_id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM character_greetings WHERE id = ?", [greeting_id])?;
        Ok(())
    }

    /// Write one column. Returns `false` for tags and greetings, which are not columns.
    pub fn update_field(&self, field: CardField, value: &dyn ToSql, character_id: i64) -> Result<bool> {
        let Some(column) = field.column() else {
            tracing::debug!(?field, character_id, "Compound field cannot be updated as a column");
            return Ok(false);
        };
        self.conn.execute(
            &format!("UPDATE characters SET {} = ? WHERE id = ?", column),
            params![value, character_id],
        )?;
        Ok(true)
    }

    pub fn touch_modified(&self, character_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE characters SET last_modified = ? WHERE id = ?",
            params![now_millis(), character_id],
        )?;
        Ok(())
    }

    /// Delete the row; greetings, tag links and chats go with it.
    pub fn delete_character(&self, character_id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM characters WHERE id = ?", [character_id])?;
        Ok(())
    }

    /// Remove tags no character links to any more. Returns how many were removed.
    pub fn purge_orphan_tags(&self) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM tags WHERE id NOT IN (SELECT tag_id FROM character_tags)",
            [],
        )?;
        Ok(removed)
    }

    /// Insert a card with its greetings and tags atomically.
    ///
    /// Returns `(id, image_id)`, or `None` when any statement failed and the
    /// transaction was rolled back.
    pub fn insert_card(&self, data: &CardV2Data, card_type: CardType) -> Result<Option<(i64, i64)>> {
        let tx = self.conn.unchecked_transaction()?;
        match insert_card_rows(&tx, data, card_type) {
            Ok(ids) => match tx.commit() {
                Ok(()) => Ok(Some(ids)),
                Err(e) => {
                    tracing::warn!(name = %data.name, error = %e, "Commit failed, card not created");
                    Ok(None)
                }
            },
            Err(e) => {
                tracing::warn!(name = %data.name, error = %e, "Rolling back card insert");
                tx.rollback()?;
                Ok(None)
            }
        }
    }

}

#[cfg(test)]
impl Database {
    pub(crate) fn count_tags(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))?;
        Ok(count)
    }
}
