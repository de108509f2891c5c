use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (users, cards, chats)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id              TEXT PRIMARY KEY,
                username        TEXT NOT NULL UNIQUE,
                email           TEXT NOT NULL UNIQUE,
                password        TEXT NOT NULL,
                role            TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
                phone_number    TEXT,
                created_at      TEXT NOT NULL
            );

            CREATE TABLE cards (
                id              TEXT PRIMARY KEY,
                card_type       TEXT NOT NULL CHECK (card_type IN ('donation', 'request')),
                item_name       TEXT NOT NULL,
                description     TEXT NOT NULL,
                phone_number    TEXT,
                category        TEXT,
                image_url       TEXT,
                longitude       REAL NOT NULL,
                latitude        REAL NOT NULL,
                address         TEXT NOT NULL,
                user_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_cards_created ON cards(created_at);
            CREATE INDEX idx_cards_user ON cards(user_id, created_at);
            CREATE INDEX idx_cards_coords ON cards(latitude, longitude);

            -- card_id has no foreign key: chats outlive their card.
            -- pair_key is the two participant ids sorted and joined, card_key is
            -- card_id or '' so the UNIQUE constraint also covers card-less chats.
            CREATE TABLE chats (
                id              TEXT PRIMARY KEY,
                participant_one TEXT NOT NULL,
                participant_two TEXT NOT NULL,
                pair_key        TEXT NOT NULL,
                card_id         TEXT,
                card_key        TEXT NOT NULL DEFAULT '',
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                UNIQUE(pair_key, card_key)
            );

            CREATE INDEX idx_chats_one ON chats(participant_one);
            CREATE INDEX idx_chats_two ON chats(participant_two);

            CREATE TABLE chat_messages (
                chat_id         TEXT NOT NULL REFERENCES chats(id),
                position        INTEGER NOT NULL,
                sender_id       TEXT NOT NULL,
                content         TEXT NOT NULL,
                created_at      TEXT NOT NULL,
                PRIMARY KEY (chat_id, position)
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
