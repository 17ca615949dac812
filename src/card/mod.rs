//! The portable "V2" character card and conversion from stored rows.
//!
//! This is the shape carried inside PNG metadata, returned by remote card
//! hosts, and used to duplicate a stored card. Stored ids are dropped: tags
//! and greetings travel as plain strings.

pub mod png;

use serde::{Deserialize, Deserializer, Serialize};

use crate::db::CardData;

pub const SPEC_NAME: &str = "chara_card_v2";
pub const SPEC_VERSION: &str = "2.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterCardV2 {
    #[serde(default, deserialize_with = "null_as_default")]
    pub spec: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub spec_version: String,
    pub data: CardV2Data,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardV2Data {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub personality: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub scenario: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub first_mes: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mes_example: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub creator_notes: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub system_prompt: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub post_history_instructions: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub alternate_greetings: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub creator: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub character_version: String,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub last_modified: Option<i64>,
    /// Avatar id carried when duplicating a stored card; absent in third-party cards.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_millis")]
    pub image_id: Option<i64>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Timestamps show up as integers, floats, or null depending on the exporter.
fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))))
}

impl CharacterCardV2 {
    pub fn new(data: CardV2Data) -> Self {
        Self {
            spec: SPEC_NAME.to_string(),
            spec_version: SPEC_VERSION.to_string(),
            data,
        }
    }

    /// Only version 2.0 cards are accepted for import.
    pub fn is_supported(&self) -> bool {
        self.spec_version == SPEC_VERSION
    }
}

impl From<&CardData> for CharacterCardV2 {
    fn from(card: &CardData) -> Self {
        CharacterCardV2::new(CardV2Data {
            name: card.name.clone(),
            description: card.description.clone(),
            personality: card.personality.clone(),
            scenario: card.scenario.clone(),
            first_mes: card.first_mes.clone(),
            mes_example: card.mes_example.clone(),
            creator_notes: card.creator_notes.clone(),
            system_prompt: card.system_prompt.clone(),
            post_history_instructions: card.post_history_instructions.clone(),
            alternate_greetings: card
                .alternate_greetings
                .iter()
                .map(|g| g.greeting.clone())
                .collect(),
            tags: card.tags.iter().map(|t| t.tag.clone()).collect(),
            creator: card.creator.clone(),
            character_version: card.character_version.clone(),
            last_modified: Some(card.last_modified.unwrap_or(0)),
            image_id: Some(card.image_id),
        })
    }
}

/// Flatten a stored card for export or duplication. Absent in, absent out.
pub fn to_interchange(card: Option<&CardData>) -> Option<CharacterCardV2> {
    card.map(CharacterCardV2::from)
}
