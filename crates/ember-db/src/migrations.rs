use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Directed swipe-right edges. The primary key enforces at most one
        -- like per ordered (sender, receiver) pair.
        CREATE TABLE IF NOT EXISTS likes (
            sender_id   TEXT NOT NULL REFERENCES users(id),
            receiver_id TEXT NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (sender_id, receiver_id)
        );

        -- Reciprocal-like pairs, stored in canonical order (user_lo < user_hi).
        -- The unique index is the synchronization point for racing swipes:
        -- the second writer fails the constraint and resolves to a lookup.
        CREATE TABLE IF NOT EXISTS matches (
            id          TEXT PRIMARY KEY,
            user_lo     TEXT NOT NULL REFERENCES users(id),
            user_hi     TEXT NOT NULL REFERENCES users(id),
            matched_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (user_lo, user_hi),
            CHECK (user_lo < user_hi)
        );

        CREATE TABLE IF NOT EXISTS chats (
            id               TEXT PRIMARY KEY,
            match_id         TEXT NOT NULL UNIQUE
                             REFERENCES matches(id) ON DELETE CASCADE,
            last_activity_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            chat_id     TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            sender_id   TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            sent_at     TEXT NOT NULL DEFAULT (datetime('now')),
            read_at     TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_id, sent_at);

        CREATE INDEX IF NOT EXISTS idx_matches_user_hi
            ON matches(user_hi);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
