//! Importing character cards from remote hosts and local PNG files.
//!
//! Every entry point logs its failure and returns `None`; nothing is written
//! to the store unless a complete card was obtained.

pub mod remote;

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::card::png::{blank_png, decode_card, embed_card, ensure_png};
use crate::card::{CardV2Data, CharacterCardV2};
use crate::config::{Config, RemoteConfig};
use crate::db::{CardOrder, CardType};
use crate::repository::CardRepository;

pub use remote::{HttpClient, HttpResponse, UreqClient};

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$").unwrap()
});
static SLUG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[^/]+/[^/]+$").unwrap());

const DEFAULT_CARD_FILE: &str = "aibot.png";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unsupported card version {0:?}, only 2.0 cards can be imported")]
    UnsupportedSpecVersion(String),

    #[error("no character card embedded in {0}")]
    NoCardFound(String),

    #[error("URL not recognized: {0}")]
    UnrecognizedSource(String),

    #[error("failed to get id from {0} URL")]
    MissingIdentifier(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{url} returned status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("card was not created")]
    NotCreated,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("failed to decode card: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Where a remote card lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSource {
    /// Pygmalion character UUID.
    Pyg(String),
    /// Chub `owner/name` path.
    Chub(String),
}

/// Work out which host `input` refers to.
///
/// Accepts a bare UUID (Pygmalion), a bare `owner/name` (Chub), or a full URL
/// on either host.
pub fn resolve_source(input: &str) -> Result<ImportSource, ImportError> {
    if UUID_RE.is_match(input) {
        return Ok(ImportSource::Pyg(input.to_string()));
    }
    if SLUG_RE.is_match(input) {
        return Ok(ImportSource::Chub(input.to_string()));
    }

    let url = Url::parse(input).map_err(|e| ImportError::InvalidInput(format!("{}: {}", input, e)))?;
    let host = url.host_str().unwrap_or_default();

    if host.contains("pygmalion.chat") {
        let from_query = url
            .query_pairs()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.replace('"', ""))
            .filter(|id| UUID_RE.is_match(id));
        if let Some(id) = from_query {
            return Ok(ImportSource::Pyg(id));
        }

        let tail = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .unwrap_or_default();
        if UUID_RE.is_match(tail) {
            return Ok(ImportSource::Pyg(tail.to_string()));
        }
        return Err(ImportError::MissingIdentifier("Pygmalion"));
    }

    if host.contains("chub.ai") || host.contains("characterhub.org") {
        let path = url.path();
        let path = path.strip_prefix("/characters/").unwrap_or(path);
        if SLUG_RE.is_match(path) {
            return Ok(ImportSource::Chub(path.to_string()));
        }
        return Err(ImportError::MissingIdentifier("Chub"));
    }

    Err(ImportError::UnrecognizedSource(input.to_string()))
}

/// The card seeded on first run.
pub fn default_card() -> CharacterCardV2 {
    CharacterCardV2::new(CardV2Data {
        name: "AI Bot".to_string(),
        description: "{{char}} is a friendly and knowledgeable AI assistant.".to_string(),
        personality: "helpful, curious, concise".to_string(),
        first_mes: "Hello {{user}}, how can I help you today?".to_string(),
        tags: vec!["assistant".to_string()],
        creator: "charcard".to_string(),
        character_version: "1".to_string(),
        ..Default::default()
    })
}

pub struct Importer<'a> {
    repo: &'a CardRepository,
    http: &'a dyn HttpClient,
    remote: RemoteConfig,
    assets_dir: PathBuf,
}

impl<'a> Importer<'a> {
    pub fn new(
        repo: &'a CardRepository,
        http: &'a dyn HttpClient,
        remote: RemoteConfig,
        assets_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            repo,
            http,
            remote,
            assets_dir: assets_dir.into(),
        }
    }

    pub fn from_config(repo: &'a CardRepository, http: &'a dyn HttpClient, config: &Config) -> Self {
        Self::new(repo, http, config.remote.clone(), config.assets_dir())
    }

    /// Import from a UUID, `owner/name`, or a Chub/Pygmalion URL.
    pub fn import_from_text(&self, input: &str) -> Option<i64> {
        let input = input.trim();
        let result = resolve_source(input).and_then(|source| match source {
            ImportSource::Pyg(id) => self.import_pyg(&id),
            ImportSource::Chub(path) => self.import_chub(&path),
        });
        log_outcome(input, result)
    }

    /// Import a PNG with an embedded card.
    pub fn import_from_image(&self, path: &Path) -> Option<i64> {
        log_outcome(&path.display().to_string(), self.import_image_file(path))
    }

    /// Import each file independently; returns the ids that were created.
    pub fn import_images(&self, paths: &[PathBuf]) -> Vec<i64> {
        paths.iter().filter_map(|p| self.import_from_image(p)).collect()
    }

    /// Seed the bundled card on first run.
    ///
    /// The asset file marks that the first run happened: once it exists,
    /// deleting the seeded card does not bring it back. A library that
    /// already has characters only gets the asset written.
    pub fn ensure_default_card(&self) -> Option<i64> {
        let path = self.assets_dir.join(DEFAULT_CARD_FILE);
        if path.exists() {
            return None;
        }

        let has_characters = match self.repo.list_cards(CardType::Character, CardOrder::Id) {
            Ok(cards) => !cards.is_empty(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not check for existing characters");
                return None;
            }
        };

        if let Err(e) = write_default_card(&path) {
            tracing::warn!(path = ?path, error = %e, "Failed to write default card");
            return None;
        }
        if has_characters {
            return None;
        }
        self.import_from_image(&path)
    }

    pub fn import_chub(&self, full_path: &str) -> Result<i64, ImportError> {
        tracing::info!(id = full_path, "Importing character from Chub");
        let bytes = remote::fetch_chub_png(self.http, &self.remote, full_path)?;
        let temp = self.write_temp(&bytes)?;
        let result = self.import_image_file(&temp);
        let _ = fs::remove_file(&temp);
        result
    }

    pub fn import_pyg(&self, id: &str) -> Result<i64, ImportError> {
        tracing::info!(id, "Importing character from Pygmalion");
        if !UUID_RE.is_match(id) {
            return Err(ImportError::InvalidInput(format!("Pygmalion id {:?} is not a UUID", id)));
        }
        let fetched = remote::fetch_pyg(self.http, &self.remote, id)?;
        let avatar = ensure_png(fetched.avatar).map_err(|e| ImportError::Decode(format!("{:#}", e)))?;
        let temp = self.write_temp(&avatar)?;
        let result = self.insert(&fetched.card, Some(&temp));
        let _ = fs::remove_file(&temp);
        result
    }

    fn import_image_file(&self, path: &Path) -> Result<i64, ImportError> {
        let bytes = fs::read(path)?;
        let card = decode_card(&bytes)
            .map_err(|e| ImportError::Decode(format!("{:#}", e)))?
            .ok_or_else(|| ImportError::NoCardFound(path.display().to_string()))?;
        if !card.is_supported() {
            return Err(ImportError::UnsupportedSpecVersion(card.spec_version));
        }
        self.insert(&card, Some(path))
    }

    fn insert(&self, card: &CharacterCardV2, avatar: Option<&Path>) -> Result<i64, ImportError> {
        match self.repo.create_character(card, avatar) {
            Ok(Some(id)) => {
                tracing::info!(id, name = %card.data.name, "Imported character");
                Ok(id)
            }
            Ok(None) => Err(ImportError::NotCreated),
            Err(e) => Err(ImportError::Storage(format!("{:#}", e))),
        }
    }

    fn write_temp(&self, bytes: &[u8]) -> Result<PathBuf, ImportError> {
        let dir = self.repo.cache_dir();
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.png", Uuid::new_v4()));
        fs::write(&path, bytes)?;
        Ok(path)
    }
}

fn write_default_card(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let png = embed_card(&blank_png(256, 256)?, &default_card())?;
    fs::write(path, png)?;
    Ok(())
}

fn log_outcome(source: &str, result: Result<i64, ImportError>) -> Option<i64> {
    match result {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(source, error = %e, "Import failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::tests::{sample_card, test_repo};
    use std::cell::RefCell;
    use std::collections::VecDeque;

    const PYG_ID: &str = "123e4567-e89b-12d3-a456-426614174000";

    #[derive(Debug, Clone, PartialEq)]
    struct Request {
        method: &'static str,
        url: String,
        body: Option<serde_json::Value>,
    }

    #[derive(Default)]
    struct MockHttp {
        requests: RefCell<Vec<Request>>,
        responses: RefCell<VecDeque<HttpResponse>>,
    }

    impl MockHttp {
        fn respond(self, status: u16, body: Vec<u8>) -> Self {
            self.responses.borrow_mut().push_back(HttpResponse { status, body });
            self
        }

        fn next(&self) -> Result<HttpResponse, ImportError> {
            Ok(self.responses.borrow_mut().pop_front().unwrap_or(HttpResponse {
                status: 404,
                body: Vec::new(),
            }))
        }
    }

    impl HttpClient for MockHttp {
        fn get(&self, url: &str) -> Result<HttpResponse, ImportError> {
            self.requests.borrow_mut().push(Request {
                method: "GET",
                url: url.to_string(),
                body: None,
            });
            self.next()
        }

        fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse, ImportError> {
            self.requests.borrow_mut().push(Request {
                method: "POST",
                url: url.to_string(),
                body: Some(body.clone()),
            });
            self.next()
        }
    }

    fn card_png(card: &CharacterCardV2) -> Vec<u8> {
        embed_card(&blank_png(8, 8).unwrap(), card).unwrap()
    }

    fn importer<'a>(repo: &'a CardRepository, http: &'a MockHttp, assets: &Path) -> Importer<'a> {
        Importer::new(repo, http, RemoteConfig::default(), assets)
    }

    #[test]
    fn test_resolve_bare_identifiers() {
        assert_eq!(resolve_source(PYG_ID).unwrap(), ImportSource::Pyg(PYG_ID.to_string()));
        assert_eq!(
            resolve_source("owner42/mychar").unwrap(),
            ImportSource::Chub("owner42/mychar".to_string())
        );
    }

    #[test]
    fn test_resolve_pygmalion_urls() {
        let query = format!("https://pygmalion.chat/character?id=%22{}%22", PYG_ID);
        assert_eq!(resolve_source(&query).unwrap(), ImportSource::Pyg(PYG_ID.to_string()));

        let path = format!("https://pygmalion.chat/character/{}", PYG_ID);
        assert_eq!(resolve_source(&path).unwrap(), ImportSource::Pyg(PYG_ID.to_string()));

        assert!(matches!(
            resolve_source("https://pygmalion.chat/character/not-an-id"),
            Err(ImportError::MissingIdentifier("Pygmalion"))
        ));
    }

    #[test]
    fn test_pygmalion_query_id_must_be_uuid() {
        assert!(matches!(
            resolve_source("https://pygmalion.chat/character?id=../../admin"),
            Err(ImportError::MissingIdentifier("Pygmalion"))
        ));

        let mixed = format!("https://pygmalion.chat/character/{}?id=a/b", PYG_ID);
        assert_eq!(resolve_source(&mixed).unwrap(), ImportSource::Pyg(PYG_ID.to_string()));
    }

    #[test]
    fn test_resolve_chub_urls() {
        assert_eq!(
            resolve_source("https://chub.ai/characters/owner42/mychar").unwrap(),
            ImportSource::Chub("owner42/mychar".to_string())
        );
        assert_eq!(
            resolve_source("https://www.characterhub.org/characters/a/b").unwrap(),
            ImportSource::Chub("a/b".to_string())
        );
        assert!(matches!(
            resolve_source("https://chub.ai/characters/only-owner"),
            Err(ImportError::MissingIdentifier("Chub"))
        ));
    }

    #[test]
    fn test_resolve_rejects_unknown_input() {
        assert!(matches!(
            resolve_source("https://example.com/characters/a/b"),
            Err(ImportError::UnrecognizedSource(_))
        ));
        assert!(matches!(resolve_source("just some words"), Err(ImportError::InvalidInput(_))));
    }

    #[test]
    fn test_uuid_routes_to_pygmalion() {
        let (dir, repo) = test_repo();
        let card = serde_json::json!({
            "character": {
                "spec": "chara_card_v2",
                "spec_version": "2.0",
                "data": {
                    "name": "Pyg Friend",
                    "avatar": "https://cdn.example/avatar.png",
                    "tags": ["pyg"]
                }
            }
        });
        let http = MockHttp::default()
            .respond(200, serde_json::to_vec(&card).unwrap())
            .respond(200, blank_png(4, 4).unwrap());

        let id = importer(&repo, &http, dir.path()).import_from_text(PYG_ID).unwrap();

        let requests = http.requests.borrow();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, "GET");
        assert_eq!(
            requests[0].url,
            format!("https://server.pygmalion.chat/api/export/character/{}/v2", PYG_ID)
        );
        assert_eq!(requests[1].url, "https://cdn.example/avatar.png");

        let stored = repo.get_card(id).unwrap().unwrap();
        assert_eq!(stored.name, "Pyg Friend");
        assert_eq!(stored.tags[0].tag, "pyg");
        assert!(repo.images().has_image(stored.image_id));
    }

    #[test]
    fn test_pygmalion_failure_status_aborts() {
        let (dir, repo) = test_repo();
        let http = MockHttp::default().respond(500, Vec::new());

        assert!(importer(&repo, &http, dir.path()).import_from_text(PYG_ID).is_none());
        assert_eq!(http.requests.borrow().len(), 1);
        assert!(repo.list_cards(CardType::Character, CardOrder::Id).unwrap().is_empty());
    }

    #[test]
    fn test_slug_routes_to_chub() {
        let (dir, repo) = test_repo();
        let http = MockHttp::default().respond(200, card_png(&sample_card("Chub Pal")));

        let id = importer(&repo, &http, dir.path())
            .import_from_text("owner42/mychar")
            .unwrap();

        let requests = http.requests.borrow();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].url, "https://api.chub.ai/api/characters/download");
        assert_eq!(
            requests[0].body,
            Some(serde_json::json!({"format": "tavern", "fullPath": "owner42/mychar"}))
        );

        let stored = repo.get_card(id).unwrap().unwrap();
        assert_eq!(stored.name, "Chub Pal");
        assert!(repo.images().has_image(stored.image_id));
    }

    #[test]
    fn test_chub_error_status_is_not_imported() {
        let (dir, repo) = test_repo();
        let http = MockHttp::default().respond(404, b"not found".to_vec());

        assert!(importer(&repo, &http, dir.path()).import_from_text("owner/missing").is_none());
        assert!(repo.list_cards(CardType::Character, CardOrder::Id).unwrap().is_empty());
    }

    #[test]
    fn test_unrecognized_host_makes_no_requests_or_rows() {
        let (dir, repo) = test_repo();
        let http = MockHttp::default();

        assert!(importer(&repo, &http, dir.path())
            .import_from_text("https://example.com/characters/a/b")
            .is_none());
        assert!(http.requests.borrow().is_empty());
        assert!(repo.list_cards(CardType::Character, CardOrder::Id).unwrap().is_empty());
        assert_eq!(repo.db().count_tags().unwrap(), 0);
    }

    #[test]
    fn test_wrong_spec_version_is_rejected() {
        let (dir, repo) = test_repo();
        let mut card = sample_card("Future");
        card.spec_version = "3.0".to_string();
        let path = dir.path().join("v3.png");
        fs::write(&path, card_png(&card)).unwrap();

        let http = MockHttp::default();
        assert!(importer(&repo, &http, dir.path()).import_from_image(&path).is_none());
        assert!(repo.list_cards(CardType::Character, CardOrder::Id).unwrap().is_empty());
    }

    #[test]
    fn test_imported_image_id_does_not_exhaust_ids() {
        let (dir, repo) = test_repo();
        let mut card = sample_card("Far Future");
        card.data.image_id = Some(i64::MAX);
        let path = dir.path().join("future.png");
        fs::write(&path, card_png(&card)).unwrap();

        let http = MockHttp::default();
        let id = importer(&repo, &http, dir.path()).import_from_image(&path).unwrap();
        assert_ne!(repo.get_card(id).unwrap().unwrap().image_id, i64::MAX);

        assert!(repo.create_card("After", CardType::Character).is_ok());
    }

    #[test]
    fn test_import_images_skips_failures() {
        let (dir, repo) = test_repo();
        let good = dir.path().join("good.png");
        fs::write(&good, card_png(&sample_card("Good"))).unwrap();
        let plain = dir.path().join("plain.png");
        fs::write(&plain, blank_png(2, 2).unwrap()).unwrap();
        let missing = dir.path().join("missing.png");

        let http = MockHttp::default();
        let ids = importer(&repo, &http, dir.path()).import_images(&[plain, good, missing]);

        assert_eq!(ids.len(), 1);
        assert_eq!(repo.get_card(ids[0]).unwrap().unwrap().name, "Good");
    }

    #[test]
    fn test_default_card_seeded_once() {
        let (dir, repo) = test_repo();
        let assets = dir.path().join("appAssets");
        let http = MockHttp::default();
        let importer = importer(&repo, &http, &assets);

        let id = importer.ensure_default_card().unwrap();
        assert!(assets.join(DEFAULT_CARD_FILE).exists());
        assert_eq!(repo.get_card(id).unwrap().unwrap().name, "AI Bot");

        assert!(importer.ensure_default_card().is_none());
        assert_eq!(repo.list_cards(CardType::Character, CardOrder::Id).unwrap().len(), 1);
    }

    #[test]
    fn test_deleted_default_card_stays_deleted() {
        let (dir, repo) = test_repo();
        let assets = dir.path().join("appAssets");
        let http = MockHttp::default();
        let importer = importer(&repo, &http, &assets);

        let id = importer.ensure_default_card().unwrap();
        repo.delete_card(id).unwrap();

        assert!(importer.ensure_default_card().is_none());
        assert!(repo.list_cards(CardType::Character, CardOrder::Id).unwrap().is_empty());
    }

    #[test]
    fn test_existing_library_is_not_seeded() {
        let (dir, repo) = test_repo();
        let assets = dir.path().join("appAssets");
        repo.create_character(&sample_card("Mine"), None).unwrap().unwrap();
        let http = MockHttp::default();

        assert!(importer(&repo, &http, &assets).ensure_default_card().is_none());
        assert!(assets.join(DEFAULT_CARD_FILE).exists());
        assert_eq!(repo.list_cards(CardType::Character, CardOrder::Id).unwrap().len(), 1);
    }
}
