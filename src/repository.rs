//! Card operations that span the database and the avatar directory.
//!
//! Row writes and avatar file writes are not atomic with respect to each
//! other: the avatar is copied only after the row commits, and a failed copy
//! leaves the row in place without an image.

use anyhow::{Context, Result};
use rusqlite::types::ToSql;
use std::fs;
use std::path::{Path, PathBuf};

use crate::card::png::{blank_png, embed_card, ensure_png};
use crate::card::{to_interchange, CharacterCardV2};
use crate::config::Config;
use crate::db::{now_millis, CardData, CardField, CardOrder, CardSummary, CardType, Database};
use crate::images::ImageStore;

pub struct CardRepository {
    db: Database,
    images: ImageStore,
    cache_dir: PathBuf,
}

impl CardRepository {
    pub fn new(db: Database, images: ImageStore, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            images,
            cache_dir: cache_dir.into(),
        }
    }

    /// Open and migrate the database named by `config`.
    pub fn open(config: &Config) -> Result<Self> {
        let db = Database::open(&config.db_path())?;
        db.initialize()?;
        Ok(Self::new(
            db,
            ImageStore::new(config.characters_dir()),
            config.cache_dir.clone(),
        ))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn images(&self) -> &ImageStore {
        &self.images
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_card(&self, id: i64) -> Result<Option<CardData>> {
        self.db.get_card(id)
    }

    pub fn list_cards(&self, card_type: CardType, order: CardOrder) -> Result<Vec<CardSummary>> {
        self.db.list_cards(card_type, order)
    }

    pub fn exists(&self, id: i64) -> Result<bool> {
        self.db.card_exists(id)
    }

    pub fn image_path(&self, image_id: i64) -> PathBuf {
        self.images.image_path(image_id)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub fn create_card(&self, name: &str, card_type: CardType) -> Result<i64> {
        let id = self.db.create_card(name, card_type)?;
        tracing::info!(id, %card_type, name, "Created card");
        Ok(id)
    }

    pub fn update_card(&self, card: &CardData, id: i64) -> Result<()> {
        self.db.update_card(card, id)
    }

    pub fn add_greeting(&self, character_id: i64) -> Result<i64> {
        self.db.add_greeting(character_id)
    }

    pub fn delete_greeting(&self, greeting_id: i64) -> Result<()> {
        self.db.delete_greeting(greeting_id)
    }

    pub fn update_field(&self, field: CardField, value: &dyn ToSql, character_id: i64) -> Result<bool> {
        self.db.update_field(field, value, character_id)
    }

    pub fn touch_modified(&self, character_id: i64) -> Result<()> {
        self.db.touch_modified(character_id)
    }

    /// Delete the avatar, the row and everything hanging off it, then drop unused tags.
    pub fn delete_card(&self, character_id: i64) -> Result<()> {
        if let Some(image_id) = self.db.get_image_id(character_id)? {
            self.images.delete_image(image_id)?;
        }
        self.db.delete_character(character_id)?;
        let purged = self.db.purge_orphan_tags()?;
        tracing::info!(id = character_id, purged_tags = purged, "Deleted card");
        Ok(())
    }

    /// Insert an interchange card as a `character`, then copy its avatar in.
    ///
    /// Any `image_id` carried by the card is ignored and a local one allocated.
    /// Returns `None` when the insert was rolled back.
    pub fn create_character(&self, card: &CharacterCardV2, image: Option<&Path>) -> Result<Option<i64>> {
        if card.data.image_id.is_some() {
            let mut local = card.clone();
            local.data.image_id = None;
            return self.create_character_as(&local, image, CardType::Character);
        }
        self.create_character_as(card, image, CardType::Character)
    }

    fn create_character_as(
        &self,
        card: &CharacterCardV2,
        image: Option<&Path>,
        card_type: CardType,
    ) -> Result<Option<i64>> {
        let Some((id, image_id)) = self.db.insert_card(&card.data, card_type)? else {
            return Ok(None);
        };

        if let Some(source) = image {
            if let Err(e) = self.images.copy_image(source, image_id) {
                tracing::warn!(id, image_id, error = %e, "Card created but avatar copy failed");
            }
        }

        tracing::info!(id, name = %card.data.name, "Created character");
        Ok(Some(id))
    }

    /// Copy a card, its greetings, tags and avatar into a new card of the same type.
    pub fn duplicate_card(&self, character_id: i64) -> Result<Option<i64>> {
        let Some(mut card) = self.db.get_card(character_id)? else {
            tracing::warn!(id = character_id, "Failed to copy card: card does not exist");
            return Ok(None);
        };

        let scratch = if self.images.has_image(card.image_id) {
            fs::create_dir_all(&self.cache_dir)?;
            let path = self.cache_dir.join(format!("{}.png", card.image_id));
            fs::copy(self.images.image_path(card.image_id), &path)
                .context("Failed to stage avatar for duplication")?;
            Some(path)
        } else {
            None
        };

        card.last_modified = Some(now_millis());
        card.image_id = self.db.fresh_image_id()?;
        let Some(cv2) = to_interchange(Some(&card)) else {
            tracing::warn!(id = character_id, "Failed to copy card");
            return Ok(None);
        };

        let created = self.create_character_as(&cv2, scratch.as_deref(), card.card_type);
        if let Some(path) = &scratch {
            let _ = fs::remove_file(path);
        }

        match &created {
            Ok(Some(new_id)) => tracing::info!(from = character_id, to = new_id, name = %card.name, "Card cloned"),
            Ok(None) => tracing::warn!(id = character_id, "Failed to clone card"),
            Err(e) => tracing::warn!(id = character_id, error = %e, "Failed to clone card"),
        }
        created
    }

    /// Swap in a new avatar under a fresh image id. Returns the new id.
    pub fn replace_image(&self, character_id: i64, source: &Path) -> Result<i64> {
        let old_image_id = self
            .db
            .get_image_id(character_id)?
            .with_context(|| format!("Card {} does not exist", character_id))?;

        let image_id = self.db.fresh_image_id()?;
        self.db.update_field(CardField::ImageId, &image_id, character_id)?;
        self.images.delete_image(old_image_id)?;
        self.images.copy_image(source, image_id)?;
        Ok(image_id)
    }

    /// Write the card's avatar to `dest` with the card embedded. `false` if no such card.
    pub fn export_card_png(&self, character_id: i64, dest: &Path) -> Result<bool> {
        let Some(card) = self.db.get_card(character_id)? else {
            return Ok(false);
        };

        let avatar = if self.images.has_image(card.image_id) {
            ensure_png(fs::read(self.images.image_path(card.image_id))?)?
        } else {
            blank_png(256, 256)?
        };

        let cv2 = CharacterCardV2::from(&card);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, embed_card(&avatar, &cv2)?)
            .with_context(|| format!("Failed to write {}", dest.display()))?;
        Ok(true)
    }
}
