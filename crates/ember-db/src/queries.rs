use crate::Database;
use crate::models::{MatchRow, MatchSummaryRow, MessageRow, UserRow};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension};

/// Canonical unordered-pair ordering: lower id first. Every query that
/// touches the matches table goes through this so the unique index on
/// (user_lo, user_hi) covers both swipe directions.
pub fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_username_by_id(&self, id: &str) -> Result<String> {
        self.with_conn(|conn| {
            conn.query_row("SELECT username FROM users WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .map_err(|_| anyhow!("User not found: {}", id))
        })
    }

    // -- Likes --

    /// Record a directed like. Returns false when the ordered pair already
    /// exists — the caller treats that as an idempotent repeat, not an error.
    pub fn record_like(&self, sender_id: &str, receiver_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO likes (sender_id, receiver_id) VALUES (?1, ?2)",
                (sender_id, receiver_id),
            )?;
            Ok(inserted == 1)
        })
    }

    /// True iff the receiver has already liked the sender back.
    pub fn has_reciprocal(&self, sender_id: &str, receiver_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM likes WHERE sender_id = ?1 AND receiver_id = ?2",
                    (receiver_id, sender_id),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    // -- Matches --

    pub fn find_match_for_pair(&self, user_a: &str, user_b: &str) -> Result<Option<MatchRow>> {
        let (lo, hi) = canonical_pair(user_a, user_b);
        self.with_conn(|conn| query_match_for_pair(conn, lo, hi))
    }

    /// Create a match and its chat in one transaction (both-or-neither).
    /// A unique-constraint failure on the pair means a concurrent swipe won
    /// the race; that resolves to the existing row instead of an error.
    pub fn create_match_with_chat(
        &self,
        match_id: &str,
        chat_id: &str,
        user_a: &str,
        user_b: &str,
    ) -> Result<MatchRow> {
        let (lo, hi) = canonical_pair(user_a, user_b);
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            match tx.execute(
                "INSERT INTO matches (id, user_lo, user_hi) VALUES (?1, ?2, ?3)",
                (match_id, lo, hi),
            ) {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    drop(tx);
                    return query_match_for_pair(conn, lo, hi)?
                        .ok_or_else(|| anyhow!("Match for pair vanished after conflict"));
                }
                Err(e) => return Err(e.into()),
            }
            tx.execute(
                "INSERT INTO chats (id, match_id) VALUES (?1, ?2)",
                (chat_id, match_id),
            )?;
            tx.commit()?;

            query_match_for_pair(conn, lo, hi)?
                .ok_or_else(|| anyhow!("Match missing immediately after creation"))
        })
    }

    pub fn get_match(&self, match_id: &str) -> Result<Option<MatchRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT m.id, m.user_lo, m.user_hi, c.id, m.matched_at
                     FROM matches m JOIN chats c ON c.match_id = m.id
                     WHERE m.id = ?1",
                    [match_id],
                    map_match_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn matches_for_user(&self, user_id: &str) -> Result<Vec<MatchSummaryRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, c.id,
                        CASE WHEN m.user_lo = ?1 THEN m.user_hi ELSE m.user_lo END AS other_id,
                        u.username, m.matched_at
                 FROM matches m
                 JOIN chats c ON c.match_id = m.id
                 JOIN users u ON u.id =
                      CASE WHEN m.user_lo = ?1 THEN m.user_hi ELSE m.user_lo END
                 WHERE ?1 IN (m.user_lo, m.user_hi)
                 ORDER BY m.matched_at DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(MatchSummaryRow {
                        id: row.get(0)?,
                        chat_id: row.get(1)?,
                        other_user_id: row.get(2)?,
                        other_username: row.get(3)?,
                        matched_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Delete a match; the chat and its messages go with it via cascade.
    pub fn delete_match(&self, match_id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM matches WHERE id = ?1", [match_id])?;
            Ok(())
        })
    }

    // -- Chats / messages --

    pub fn is_chat_participant(&self, chat_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM chats c JOIN matches m ON m.id = c.match_id
                     WHERE c.id = ?1 AND ?2 IN (m.user_lo, m.user_hi)",
                    (chat_id, user_id),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn chat_participants(&self, chat_id: &str) -> Result<Option<(String, String)>> {
        self.with_conn(|conn| {
            let pair = conn
                .query_row(
                    "SELECT m.user_lo, m.user_hi
                     FROM chats c JOIN matches m ON m.id = c.match_id
                     WHERE c.id = ?1",
                    [chat_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(pair)
        })
    }

    /// Insert a message and bump the chat's activity stamp in one transaction.
    pub fn insert_message(
        &self,
        id: &str,
        chat_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, chat_id, sender_id, content) VALUES (?1, ?2, ?3, ?4)",
                (id, chat_id, sender_id, content),
            )?;
            tx.execute(
                "UPDATE chats SET last_activity_at = datetime('now') WHERE id = ?1",
                [chat_id],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_messages(
        &self,
        chat_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            // Cursor pagination: `before` is the sent_at of the oldest message
            // from the previous page.
            let mut stmt = conn.prepare(
                "SELECT m.id, m.chat_id, m.sender_id, u.username, m.content, m.sent_at, m.read_at
                 FROM messages m
                 LEFT JOIN users u ON m.sender_id = u.id
                 WHERE m.chat_id = ?1 AND (?2 IS NULL OR m.sent_at < ?2)
                 ORDER BY m.sent_at DESC
                 LIMIT ?3",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![chat_id, before, limit], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        chat_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        sender_username: row
                            .get::<_, Option<String>>(3)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        content: row.get(4)?,
                        sent_at: row.get(5)?,
                        read_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Set read_at on a message that has none yet. The reader must be a
    /// participant of the message's chat and not the sender, otherwise the
    /// row is left untouched. Returns the chat and the original sender so
    /// the gateway can tell them, or None if the message is unknown,
    /// already read, or the reader is not allowed to mark it.
    pub fn mark_message_read(
        &self,
        message_id: &str,
        reader_id: &str,
    ) -> Result<Option<(String, String)>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let target: Option<(String, String)> = tx
                .query_row(
                    "SELECT msg.chat_id, msg.sender_id
                     FROM messages msg
                     JOIN chats c ON c.id = msg.chat_id
                     JOIN matches m ON m.id = c.match_id
                     WHERE msg.id = ?1 AND msg.read_at IS NULL
                       AND ?2 IN (m.user_lo, m.user_hi)
                       AND msg.sender_id != ?2",
                    (message_id, reader_id),
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            if target.is_some() {
                tx.execute(
                    "UPDATE messages SET read_at = datetime('now') WHERE id = ?1",
                    [message_id],
                )?;
            }
            tx.commit()?;
            Ok(target)
        })
    }
}

fn query_match_for_pair(conn: &Connection, lo: &str, hi: &str) -> Result<Option<MatchRow>> {
    let row = conn
        .query_row(
            "SELECT m.id, m.user_lo, m.user_hi, c.id, m.matched_at
             FROM matches m JOIN chats c ON c.match_id = m.id
             WHERE m.user_lo = ?1 AND m.user_hi = ?2",
            (lo, hi),
            map_match_row,
        )
        .optional()?;
    Ok(row)
}

fn map_match_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MatchRow> {
    Ok(MatchRow {
        id: row.get(0)?,
        user_lo: row.get(1)?,
        user_hi: row.get(2)?,
        chat_id: row.get(3)?,
        matched_at: row.get(4)?,
    })
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_users(names: &[(&str, &str)]) -> Database {
        let db = Database::open_in_memory().unwrap();
        for (id, name) in names {
            db.create_user(id, name, "hash").unwrap();
        }
        db
    }

    fn count(db: &Database, table: &str) -> i64 {
        db.with_conn(|conn| {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| {
                r.get(0)
            })?)
        })
        .unwrap()
    }

    #[test]
    fn like_is_unique_per_ordered_pair() {
        let db = db_with_users(&[("a", "alice"), ("b", "bob")]);

        assert!(db.record_like("a", "b").unwrap());
        assert!(!db.record_like("a", "b").unwrap());
        assert_eq!(count(&db, "likes"), 1);

        // Opposite direction is a distinct edge
        assert!(db.record_like("b", "a").unwrap());
        assert_eq!(count(&db, "likes"), 2);
    }

    #[test]
    fn reciprocal_detection() {
        let db = db_with_users(&[("a", "alice"), ("b", "bob")]);

        db.record_like("a", "b").unwrap();
        assert!(!db.has_reciprocal("a", "b").unwrap());

        db.record_like("b", "a").unwrap();
        assert!(db.has_reciprocal("a", "b").unwrap());
        assert!(db.has_reciprocal("b", "a").unwrap());
    }

    #[test]
    fn match_and_chat_created_together() {
        let db = db_with_users(&[("a", "alice"), ("b", "bob")]);

        let row = db.create_match_with_chat("m1", "c1", "b", "a").unwrap();
        assert_eq!(row.id, "m1");
        assert_eq!(row.chat_id, "c1");
        assert_eq!((row.user_lo.as_str(), row.user_hi.as_str()), ("a", "b"));
        assert_eq!(count(&db, "matches"), 1);
        assert_eq!(count(&db, "chats"), 1);
    }

    #[test]
    fn second_match_for_pair_resolves_to_existing() {
        let db = db_with_users(&[("a", "alice"), ("b", "bob")]);

        let first = db.create_match_with_chat("m1", "c1", "a", "b").unwrap();
        // Race loser arrives with fresh ids, either direction
        let second = db.create_match_with_chat("m2", "c2", "b", "a").unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.chat_id, first.chat_id);
        assert_eq!(count(&db, "matches"), 1);
        assert_eq!(count(&db, "chats"), 1);
    }

    #[test]
    fn delete_match_cascades_to_chat_and_messages() {
        let db = db_with_users(&[("a", "alice"), ("b", "bob")]);

        db.create_match_with_chat("m1", "c1", "a", "b").unwrap();
        db.insert_message("msg1", "c1", "a", "hey").unwrap();
        db.insert_message("msg2", "c1", "b", "hi").unwrap();

        db.delete_match("m1").unwrap();

        assert_eq!(count(&db, "matches"), 0);
        assert_eq!(count(&db, "chats"), 0);
        assert_eq!(count(&db, "messages"), 0);
    }

    #[test]
    fn participant_checks() {
        let db = db_with_users(&[("a", "alice"), ("b", "bob"), ("c", "carol")]);
        db.create_match_with_chat("m1", "c1", "a", "b").unwrap();

        assert!(db.is_chat_participant("c1", "a").unwrap());
        assert!(db.is_chat_participant("c1", "b").unwrap());
        assert!(!db.is_chat_participant("c1", "c").unwrap());
        assert_eq!(
            db.chat_participants("c1").unwrap(),
            Some(("a".into(), "b".into()))
        );
        assert_eq!(db.chat_participants("nope").unwrap(), None);
    }

    #[test]
    fn mark_read_reports_sender_once() {
        let db = db_with_users(&[("a", "alice"), ("b", "bob")]);
        db.create_match_with_chat("m1", "c1", "a", "b").unwrap();
        db.insert_message("msg1", "c1", "a", "hey").unwrap();

        let hit = db.mark_message_read("msg1", "b").unwrap();
        assert_eq!(hit, Some(("c1".into(), "a".into())));

        // Already read: no further notification target
        assert_eq!(db.mark_message_read("msg1", "b").unwrap(), None);
        assert_eq!(db.mark_message_read("ghost", "b").unwrap(), None);
    }

    #[test]
    fn mark_read_requires_a_recipient_in_the_chat() {
        let db = db_with_users(&[("a", "alice"), ("b", "bob"), ("c", "carol")]);
        db.create_match_with_chat("m1", "c1", "a", "b").unwrap();
        db.insert_message("msg1", "c1", "a", "hey").unwrap();

        // An outsider cannot mark it, and the row stays unread
        assert_eq!(db.mark_message_read("msg1", "c").unwrap(), None);
        // Neither can the sender mark their own message
        assert_eq!(db.mark_message_read("msg1", "a").unwrap(), None);

        // The real recipient still gets the first (and only) hit
        assert_eq!(
            db.mark_message_read("msg1", "b").unwrap(),
            Some(("c1".into(), "a".into()))
        );
    }
}
