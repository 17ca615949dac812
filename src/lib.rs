pub mod card;
pub mod config;
pub mod db;
pub mod images;
pub mod import;
pub mod logging;
pub mod macros;
pub mod repository;
pub mod session;

pub use card::CharacterCardV2;
pub use config::Config;
pub use db::{CardData, CardOrder, CardType, Database};
pub use repository::CardRepository;
