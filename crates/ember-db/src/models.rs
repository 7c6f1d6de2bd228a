//! Database row types — these map directly to SQLite rows.
//! Distinct from the ember-types API models to keep the DB layer independent.

use chrono::{DateTime, Utc};

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct MatchRow {
    pub id: String,
    pub user_lo: String,
    pub user_hi: String,
    pub chat_id: String,
    pub matched_at: String,
}

impl MatchRow {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.user_lo == user_id || self.user_hi == user_id
    }

    pub fn other_participant(&self, user_id: &str) -> Option<&str> {
        if self.user_lo == user_id {
            Some(&self.user_hi)
        } else if self.user_hi == user_id {
            Some(&self.user_lo)
        } else {
            None
        }
    }
}

/// One row of a user's match list, pre-joined with the counterpart's name.
pub struct MatchSummaryRow {
    pub id: String,
    pub chat_id: String,
    pub other_user_id: String,
    pub other_username: String,
    pub matched_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_username: String,
    pub content: String,
    pub sent_at: String,
    pub read_at: Option<String>,
}

/// Parse a SQLite timestamp. `datetime('now')` stores "YYYY-MM-DD HH:MM:SS"
/// without a timezone marker, so RFC 3339 parsing is tried first and the
/// naive format second, both interpreted as UTC.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}
