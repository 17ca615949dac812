//! The active user persona and character, with change notifications.
//!
//! Each slot caches the loaded card and a token-length cache for its prompt
//! fields. Listeners subscribe to a slot and receive a [`SlotEvent`] for every
//! change.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use crate::db::CardData;
use crate::macros::{expand, MacroContext};
use crate::repository::CardRepository;

/// On-disk format version of the persisted session.
const SESSION_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotEvent {
    Loaded { id: i64, name: Option<String> },
    Updated { id: Option<i64> },
    Unloaded,
    ImageChanged { id: i64, image_id: i64 },
}

pub trait TokenCounter {
    fn count(&self, text: &str) -> usize;
}

/// Roughly four characters per token.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTokenCounter;

impl TokenCounter for ApproxTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

/// Token lengths of a card's prompt fields, valid for one counterpart name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenCache {
    pub other_name: String,
    pub description_length: usize,
    pub examples_length: usize,
    pub personality_length: usize,
    pub scenario_length: usize,
}

#[derive(Default)]
pub struct CardSlot {
    id: Option<i64>,
    card: Option<CardData>,
    token_cache: Option<TokenCache>,
    subscribers: Vec<mpsc::Sender<SlotEvent>>,
}

impl CardSlot {
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn card(&self) -> Option<&CardData> {
        self.card.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.card.as_ref().map(|c| c.name.as_str())
    }

    pub fn subscribe(&mut self) -> mpsc::Receiver<SlotEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: SlotEvent) {
        // Dropped receivers unsubscribe themselves
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Load card `id` into the slot. Returns its name, or `None` if it does not exist.
    pub fn set_card(&mut self, repo: &CardRepository, id: i64) -> Result<Option<String>> {
        let card = repo.get_card(id)?;
        let name = card.as_ref().map(|c| c.name.clone());
        self.id = Some(id);
        self.card = card;
        self.token_cache = None;
        self.emit(SlotEvent::Loaded { id, name: name.clone() });
        Ok(name)
    }

    pub fn unload_card(&mut self) {
        self.id = None;
        self.card = None;
        self.token_cache = None;
        self.emit(SlotEvent::Unloaded);
    }

    /// Replace the in-memory card without touching storage.
    pub fn update_card(&mut self, card: CardData) {
        self.card = Some(card);
        self.token_cache = None;
        self.emit(SlotEvent::Updated { id: self.id });
    }

    /// Avatar path for the loaded card; image id 0 when nothing is loaded.
    pub fn image_path(&self, repo: &CardRepository) -> PathBuf {
        repo.image_path(self.card.as_ref().map_or(0, |c| c.image_id))
    }

    /// Replace the loaded card's avatar with `source`.
    pub fn update_image(&mut self, repo: &CardRepository, source: &Path) -> Result<()> {
        let (Some(id), Some(card)) = (self.id, self.card.as_mut()) else {
            anyhow::bail!("No card loaded");
        };

        let image_id = repo.replace_image(id, source)?;
        card.image_id = image_id;
        self.emit(SlotEvent::ImageChanged { id, image_id });
        Ok(())
    }

    /// Reload the card from storage when its row has changed. Returns whether it did.
    pub fn refresh(&mut self, repo: &CardRepository) -> Result<bool> {
        let Some(id) = self.id else {
            return Ok(false);
        };
        match repo.get_card(id)? {
            Some(fresh) if self.card.as_ref() != Some(&fresh) => {
                self.update_card(fresh);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn token_cache(&mut self, other_name: &str, ctx: &MacroContext, counter: &dyn TokenCounter) -> TokenCache {
        if let Some(cache) = &self.token_cache {
            if cache.other_name == other_name {
                return cache.clone();
            }
        }

        let Some(card) = &self.card else {
            return TokenCache {
                other_name: other_name.to_string(),
                ..Default::default()
            };
        };

        let count = |text: &str| counter.count(&expand(Some(text), ctx));
        let cache = TokenCache {
            other_name: other_name.to_string(),
            description_length: count(&card.description),
            examples_length: count(&card.mes_example),
            personality_length: count(&card.personality),
            scenario_length: count(&card.scenario),
        };
        self.token_cache = Some(cache.clone());
        cache
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSession {
    version: u32,
    #[serde(default)]
    user_id: Option<i64>,
}

/// The two active cards: the user's persona and the character being talked to.
#[derive(Default)]
pub struct Session {
    pub user: CardSlot,
    pub character: CardSlot,
}

impl Session {
    fn macro_context(&self) -> MacroContext {
        MacroContext::new(
            self.user.name().unwrap_or_default(),
            self.character.name().unwrap_or_default(),
        )
    }

    /// Token lengths of the user card, valid while the character name is unchanged.
    pub fn user_cache(&mut self, counter: &dyn TokenCounter) -> TokenCache {
        let ctx = self.macro_context();
        let other = ctx.char_name.clone();
        self.user.token_cache(&other, &ctx, counter)
    }

    /// Token lengths of the character card, valid while the user name is unchanged.
    pub fn character_cache(&mut self, counter: &dyn TokenCounter) -> TokenCache {
        let ctx = self.macro_context();
        let other = ctx.user_name.clone();
        self.character.token_cache(&other, &ctx, counter)
    }

    /// Persist which user card is active.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let state = PersistedSession {
            version: SESSION_VERSION,
            user_id: self.user.id(),
        };
        std::fs::write(path, serde_json::to_vec_pretty(&state)?)
            .with_context(|| format!("Failed to write session {}", path.display()))?;
        Ok(())
    }

    /// Restore the user card saved by [`Session::save`]. State from other
    /// versions, or unreadable state, starts an empty session.
    pub fn restore(path: &Path, repo: &CardRepository) -> Result<Self> {
        let mut session = Session::default();
        if !path.exists() {
            return Ok(session);
        }

        let content = std::fs::read(path)
            .with_context(|| format!("Failed to read session {}", path.display()))?;
        let state: PersistedSession = match serde_json::from_slice(&content) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(path = ?path, error = %e, "Ignoring unreadable session");
                return Ok(session);
            }
        };

        if state.version != SESSION_VERSION {
            tracing::info!(version = state.version, "Discarding session from older version");
            return Ok(session);
        }
        if let Some(id) = state.user_id {
            session.user.set_card(repo, id)?;
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CardType;
    use crate::repository::tests::{sample_card, test_repo};
    use std::cell::Cell;

    struct CountingCounter {
        calls: Cell<usize>,
    }

    impl TokenCounter for CountingCounter {
        fn count(&self, text: &str) -> usize {
            self.calls.set(self.calls.get() + 1);
            text.len()
        }
    }

    #[test]
    fn test_set_and_unload_notify_subscribers() {
        let (_dir, repo) = test_repo();
        let id = repo.create_character(&sample_card("Nova"), None).unwrap().unwrap();

        let mut slot = CardSlot::default();
        let rx = slot.subscribe();

        assert_eq!(slot.set_card(&repo, id).unwrap().as_deref(), Some("Nova"));
        assert_eq!(slot.name(), Some("Nova"));
        slot.unload_card();
        assert!(slot.card().is_none());

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                SlotEvent::Loaded { id, name: Some("Nova".to_string()) },
                SlotEvent::Unloaded,
            ]
        );
    }

    #[test]
    fn test_set_missing_card() {
        let (_dir, repo) = test_repo();
        let mut slot = CardSlot::default();
        assert_eq!(slot.set_card(&repo, 42).unwrap(), None);
        assert_eq!(slot.id(), Some(42));
        assert!(slot.card().is_none());
    }

    #[test]
    fn test_dropped_subscriber_is_removed() {
        let mut slot = CardSlot::default();
        drop(slot.subscribe());
        slot.unload_card();
        assert!(slot.subscribers.is_empty());
    }

    #[test]
    fn test_refresh_picks_up_stored_changes() {
        let (_dir, repo) = test_repo();
        let id = repo.create_character(&sample_card("Before"), None).unwrap().unwrap();
        let mut slot = CardSlot::default();
        slot.set_card(&repo, id).unwrap();

        assert!(!slot.refresh(&repo).unwrap());

        let mut edited = repo.get_card(id).unwrap().unwrap();
        edited.name = "After".to_string();
        repo.update_card(&edited, id).unwrap();

        assert!(slot.refresh(&repo).unwrap());
        assert_eq!(slot.name(), Some("After"));
    }

    #[test]
    fn test_update_image_changes_loaded_card() {
        let (dir, repo) = test_repo();
        let id = repo.create_character(&sample_card("Face"), None).unwrap().unwrap();
        let source = dir.path().join("new.png");
        std::fs::write(&source, b"png").unwrap();

        let mut slot = CardSlot::default();
        assert!(slot.update_image(&repo, &source).is_err());

        slot.set_card(&repo, id).unwrap();
        let rx = slot.subscribe();
        slot.update_image(&repo, &source).unwrap();

        let image_id = slot.card().unwrap().image_id;
        assert_eq!(slot.image_path(&repo), repo.image_path(image_id));
        assert!(slot.image_path(&repo).exists());
        assert_eq!(rx.try_recv().unwrap(), SlotEvent::ImageChanged { id, image_id });
    }

    #[test]
    fn test_token_cache_invalidated_when_other_name_changes() {
        let (_dir, repo) = test_repo();
        let user = repo.create_card("Ana", CardType::User).unwrap();
        let mut persona = repo.get_card(user).unwrap().unwrap();
        persona.description = "I am {{user}}".to_string();
        repo.update_card(&persona, user).unwrap();

        let mut character = sample_card("Bo");
        character.data.description = "{{char}} greets {{user}}".to_string();
        let bo = repo.create_character(&character, None).unwrap().unwrap();
        let cy = repo.create_character(&sample_card("Cy"), None).unwrap().unwrap();

        let mut session = Session::default();
        session.user.set_card(&repo, user).unwrap();
        session.character.set_card(&repo, bo).unwrap();

        let counter = CountingCounter { calls: Cell::new(0) };
        let cache = session.character_cache(&counter);
        assert_eq!(cache.other_name, "Ana");
        assert_eq!(cache.description_length, "Bo greets Ana".len());
        assert_eq!(counter.calls.get(), 4);

        // Same user: served from cache
        session.character_cache(&counter);
        assert_eq!(counter.calls.get(), 4);

        let user_cache = session.user_cache(&counter);
        assert_eq!(user_cache.other_name, "Bo");
        assert_eq!(user_cache.description_length, "I am Ana".len());
        assert_eq!(counter.calls.get(), 8);

        // Switching character invalidates the user card's cache
        session.character.set_card(&repo, cy).unwrap();
        assert_eq!(session.user_cache(&counter).other_name, "Cy");
        assert_eq!(counter.calls.get(), 12);
    }

    #[test]
    fn test_empty_slot_cache_is_zero() {
        let mut session = Session::default();
        let cache = session.character_cache(&ApproxTokenCounter);
        assert_eq!(cache, TokenCache::default());
    }

    #[test]
    fn test_approx_counter_rounds_up() {
        assert_eq!(ApproxTokenCounter.count(""), 0);
        assert_eq!(ApproxTokenCounter.count("abcde"), 2);
    }

    #[test]
    fn test_user_slot_persists_across_sessions() {
        let (dir, repo) = test_repo();
        let user = repo.create_card("Me", CardType::User).unwrap();
        let path = dir.path().join("session.json");

        let mut session = Session::default();
        session.user.set_card(&repo, user).unwrap();
        session.save(&path).unwrap();

        let restored = Session::restore(&path, &repo).unwrap();
        assert_eq!(restored.user.id(), Some(user));
        assert_eq!(restored.user.name(), Some("Me"));
        assert!(restored.character.id().is_none());
    }

    #[test]
    fn test_older_session_versions_are_discarded() {
        let (dir, repo) = test_repo();
        let user = repo.create_card("Me", CardType::User).unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, format!(r#"{{"version": 1, "user_id": {}}}"#, user)).unwrap();

        assert!(Session::restore(&path, &repo).unwrap().user.id().is_none());

        std::fs::write(&path, "not json").unwrap();
        assert!(Session::restore(&path, &repo).unwrap().user.id().is_none());
    }
}
