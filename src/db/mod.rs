mod schema;
pub mod cards;
pub mod chats;

use anyhow::{Context, Result};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use schema::SCHEMA;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Which side of a conversation a card plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    User,
    #[default]
    Character,
}

impl CardType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardType::User => "user",
            CardType::Character => "character",
        }
    }
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(CardType::User),
            "character" => Ok(CardType::Character),
            other => Err(anyhow::anyhow!("Unknown card type: {}", other)),
        }
    }
}

impl ToSql for CardType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for CardType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse().map_err(|e: anyhow::Error| FromSqlError::Other(e.into()))
    }
}

/// Sort order for card listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CardOrder {
    #[default]
    Id,
    /// Most recently modified first.
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub id: i64,
    pub character_id: i64,
    pub greeting: String,
}

/// A fully loaded character row with its tags and greetings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardData {
    pub id: i64,
    pub card_type: CardType,
    pub name: String,
    pub description: String,
    pub personality: String,
    pub scenario: String,
    pub first_mes: String,
    pub mes_example: String,
    pub creator_notes: String,
    pub system_prompt: String,
    pub post_history_instructions: String,
    pub creator: String,
    pub character_version: String,
    pub image_id: i64,
    pub last_modified: Option<i64>,
    pub tags: Vec<Tag>,
    pub alternate_greetings: Vec<Greeting>,
}

/// One line of a card listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardSummary {
    pub id: i64,
    pub name: String,
    pub image_id: i64,
    /// Zero when the row has never been stamped.
    pub last_modified: i64,
    pub tags: Vec<String>,
    pub latest_chat: Option<i64>,
    pub latest_name: Option<String>,
    pub latest_swipe: Option<String>,
}

/// Addressable card fields for single-column updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardField {
    Name,
    Description,
    Personality,
    Scenario,
    FirstMes,
    MesExample,
    CreatorNotes,
    SystemPrompt,
    PostHistoryInstructions,
    Creator,
    CharacterVersion,
    ImageId,
    LastModified,
    /// Lives in a join table; not writable as a column.
    Tags,
    /// Lives in its own table; not writable as a column.
    AlternateGreetings,
}

impl CardField {
    /// Backing column, or `None` for the compound fields.
    pub fn column(&self) -> Option<&'static str> {
        match self {
            CardField::Name => Some("name"),
            CardField::Description => Some("description"),
            CardField::Personality => Some("personality"),
            CardField::Scenario => Some("scenario"),
            CardField::FirstMes => Some("first_mes"),
            CardField::MesExample => Some("mes_example"),
            CardField::CreatorNotes => Some("creator_notes"),
            CardField::SystemPrompt => Some("system_prompt"),
            CardField::PostHistoryInstructions => Some("post_history_instructions"),
            CardField::Creator => Some("creator"),
            CardField::CharacterVersion => Some("character_version"),
            CardField::ImageId => Some("image_id"),
            CardField::LastModified => Some("last_modified"),
            CardField::Tags | CardField::AlternateGreetings => None,
        }
    }
}

pub struct Database {
    pub(crate) conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        // Greeting, tag-link and chat cleanup rely on ON DELETE CASCADE.
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self { conn })
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }
}
