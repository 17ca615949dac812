pub const SCHEMA: &str = r#"
-- Characters: both the user's personas and AI characters
CREATE TABLE IF NOT EXISTS characters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL DEFAULT 'character',  -- 'user' or 'character'
    name TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    personality TEXT NOT NULL DEFAULT '',
    scenario TEXT NOT NULL DEFAULT '',
    first_mes TEXT NOT NULL DEFAULT '',
    mes_example TEXT NOT NULL DEFAULT '',
    creator_notes TEXT NOT NULL DEFAULT '',
    system_prompt TEXT NOT NULL DEFAULT '',
    post_history_instructions TEXT NOT NULL DEFAULT '',
    creator TEXT NOT NULL DEFAULT '',
    character_version TEXT NOT NULL DEFAULT '',

    -- Epoch millis at assignment; also the avatar filename stem
    image_id INTEGER NOT NULL,
    last_modified INTEGER
);

CREATE INDEX IF NOT EXISTS idx_characters_type ON characters(type);

-- Alternate opening messages
CREATE TABLE IF NOT EXISTS character_greetings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    character_id INTEGER NOT NULL,
    greeting TEXT NOT NULL DEFAULT '',
    FOREIGN KEY (character_id) REFERENCES characters(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_character_greetings_character ON character_greetings(character_id);

-- Deduplicated labels
CREATE TABLE IF NOT EXISTS tags (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tag TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS character_tags (
    character_id INTEGER NOT NULL,
    tag_id INTEGER NOT NULL,
    PRIMARY KEY (character_id, tag_id),
    FOREIGN KEY (character_id) REFERENCES characters(id) ON DELETE CASCADE,
    FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_character_tags_tag ON character_tags(tag_id);

-- Chats and their messages
CREATE TABLE IF NOT EXISTS chats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    character_id INTEGER NOT NULL,
    create_date INTEGER NOT NULL,
    last_modified INTEGER NOT NULL,
    FOREIGN KEY (character_id) REFERENCES characters(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chats_character ON chats(character_id);

CREATE TABLE IF NOT EXISTS chat_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    is_user INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_entries_chat ON chat_entries(chat_id);

-- Generated variants of an entry; the newest row is the one shown
CREATE TABLE IF NOT EXISTS chat_swipes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id INTEGER NOT NULL,
    swipe TEXT NOT NULL DEFAULT '',
    send_date INTEGER NOT NULL,
    FOREIGN KEY (entry_id) REFERENCES chat_entries(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_swipes_entry ON chat_swipes(entry_id);
"#;

