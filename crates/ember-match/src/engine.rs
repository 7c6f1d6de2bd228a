use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use ember_db::Database;
use ember_db::models::{MatchRow, MatchSummaryRow};

use crate::error::MatchError;

/// Result of a swipe. `match_id`/`chat_id` are set iff `matched` is true.
/// `newly_matched` distinguishes the swipe that formed the match from an
/// idempotent repeat reporting existing state — callers only fan out
/// match notifications for the former.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwipeOutcome {
    pub matched: bool,
    pub newly_matched: bool,
    pub match_id: Option<Uuid>,
    pub chat_id: Option<Uuid>,
}

impl SwipeOutcome {
    fn no_match() -> Self {
        Self {
            matched: false,
            newly_matched: false,
            match_id: None,
            chat_id: None,
        }
    }

    fn from_row(row: &MatchRow, newly_matched: bool) -> Result<Self, MatchError> {
        Ok(Self {
            matched: true,
            newly_matched,
            match_id: Some(parse_id(&row.id)?),
            chat_id: Some(parse_id(&row.chat_id)?),
        })
    }
}

/// What `unmatch` tore down, for relaying to the counterpart.
#[derive(Debug, Clone)]
pub struct UnmatchOutcome {
    pub match_id: Uuid,
    pub chat_id: Uuid,
    pub other_user_id: Uuid,
}

/// The swipe → reciprocal-like → match state machine over the durable store.
///
/// All methods are blocking; async callers run them under
/// `tokio::task::spawn_blocking`.
#[derive(Clone)]
pub struct MatchEngine {
    db: Arc<Database>,
}

impl MatchEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record a swipe. A pass changes nothing. A like is recorded and, when
    /// the target already liked the actor back, the match and its chat are
    /// created atomically.
    ///
    /// Repeats are idempotent: a duplicate like degrades to a lookup of the
    /// existing match state, and a lost creation race resolves to the row
    /// the winner created. Neither surfaces as an error.
    pub fn swipe(
        &self,
        actor_id: Uuid,
        target_id: Uuid,
        liked: bool,
    ) -> Result<SwipeOutcome, MatchError> {
        if actor_id == target_id {
            return Err(MatchError::Invalid("cannot swipe on yourself".into()));
        }

        let actor = actor_id.to_string();
        let target = target_id.to_string();

        if self.db.get_user_by_id(&target)?.is_none() {
            return Err(MatchError::NotFound(format!("user {}", target_id)));
        }

        if !liked {
            return Ok(SwipeOutcome::no_match());
        }

        if !self.db.record_like(&actor, &target)? {
            debug!("Repeat like {} -> {}, reporting existing state", actor_id, target_id);
            return match self.db.find_match_for_pair(&actor, &target)? {
                Some(row) => SwipeOutcome::from_row(&row, false),
                None => Ok(SwipeOutcome::no_match()),
            };
        }

        if !self.db.has_reciprocal(&actor, &target)? {
            return Ok(SwipeOutcome::no_match());
        }

        let row = self.db.create_match_with_chat(
            &Uuid::new_v4().to_string(),
            &Uuid::new_v4().to_string(),
            &actor,
            &target,
        )?;

        info!(
            "Matched {} and {} (match {}, chat {})",
            row.user_lo, row.user_hi, row.id, row.chat_id
        );
        SwipeOutcome::from_row(&row, true)
    }

    /// Tear down a match. Only a participant may do this; the chat and all
    /// its messages cascade away with it. Irreversible.
    pub fn unmatch(
        &self,
        match_id: Uuid,
        requester_id: Uuid,
    ) -> Result<UnmatchOutcome, MatchError> {
        let id = match_id.to_string();
        let row = self
            .db
            .get_match(&id)?
            .ok_or_else(|| MatchError::NotFound(format!("match {}", match_id)))?;

        let requester = requester_id.to_string();
        let other = row
            .other_participant(&requester)
            .ok_or(MatchError::Unauthorized)?
            .to_string();

        self.db.delete_match(&id)?;
        info!("Unmatched {} (by {})", match_id, requester_id);

        Ok(UnmatchOutcome {
            match_id,
            chat_id: parse_id(&row.chat_id)?,
            other_user_id: parse_id(&other)?,
        })
    }

    pub fn matches_for_user(&self, user_id: Uuid) -> Result<Vec<MatchSummaryRow>, MatchError> {
        Ok(self.db.matches_for_user(&user_id.to_string())?)
    }
}

fn parse_id(raw: &str) -> Result<Uuid, MatchError> {
    raw.parse()
        .map_err(|e| MatchError::Unavailable(anyhow::anyhow!("Corrupt id '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(users: &[(&str, Uuid)]) -> (MatchEngine, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        for (name, id) in users {
            db.create_user(&id.to_string(), name, "hash").unwrap();
        }
        (MatchEngine::new(db.clone()), db)
    }

    fn pair() -> (Uuid, Uuid) {
        (Uuid::new_v4(), Uuid::new_v4())
    }

    fn match_count(db: &Database) -> i64 {
        db.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM matches", [], |r| r.get(0))?))
            .unwrap()
    }

    #[test]
    fn pass_creates_nothing() {
        let (a, b) = pair();
        let (engine, db) = setup(&[("alice", a), ("bob", b)]);

        let out = engine.swipe(a, b, false).unwrap();
        assert!(!out.matched);

        db.with_conn(|conn| {
            let likes: i64 = conn.query_row("SELECT COUNT(*) FROM likes", [], |r| r.get(0))?;
            assert_eq!(likes, 0);
            Ok(())
        })
        .unwrap();

        // A pass after the other side liked still never matches
        engine.swipe(b, a, true).unwrap();
        let out = engine.swipe(a, b, false).unwrap();
        assert!(!out.matched);
        assert_eq!(match_count(&db), 0);
    }

    #[test]
    fn reciprocal_likes_create_exactly_one_match() {
        let (a, b) = pair();
        let (engine, db) = setup(&[("alice", a), ("bob", b)]);

        let first = engine.swipe(a, b, true).unwrap();
        assert!(!first.matched);

        let second = engine.swipe(b, a, true).unwrap();
        assert!(second.matched);
        assert!(second.match_id.is_some());
        assert!(second.chat_id.is_some());
        assert_eq!(match_count(&db), 1);
    }

    #[test]
    fn double_swipe_is_idempotent() {
        let (a, b) = pair();
        let (engine, db) = setup(&[("alice", a), ("bob", b)]);

        engine.swipe(a, b, true).unwrap();
        let repeat = engine.swipe(a, b, true).unwrap();
        assert!(!repeat.matched);

        let matched = engine.swipe(b, a, true).unwrap();
        assert!(matched.matched);

        // Swiping again after the match reports the same match, creates nothing
        let again = engine.swipe(a, b, true).unwrap();
        assert!(again.matched);
        assert!(!again.newly_matched);
        assert_eq!(again.match_id, matched.match_id);
        assert_eq!(again.chat_id, matched.chat_id);
        assert_eq!(match_count(&db), 1);
    }

    #[test]
    fn self_swipe_and_unknown_target_rejected() {
        let (a, b) = pair();
        let (engine, _db) = setup(&[("alice", a)]);

        assert!(matches!(
            engine.swipe(a, a, true),
            Err(MatchError::Invalid(_))
        ));
        assert!(matches!(
            engine.swipe(a, b, true),
            Err(MatchError::NotFound(_))
        ));
    }

    #[test]
    fn concurrent_reciprocal_swipes_create_one_match() {
        let (a, b) = pair();
        let (engine, db) = setup(&[("alice", a), ("bob", b)]);

        let e1 = engine.clone();
        let e2 = engine.clone();
        let t1 = std::thread::spawn(move || e1.swipe(a, b, true).unwrap());
        let t2 = std::thread::spawn(move || e2.swipe(b, a, true).unwrap());
        let r1 = t1.join().unwrap();
        let r2 = t2.join().unwrap();

        // At least one side observes the match, and only one row exists
        assert!(r1.matched || r2.matched);
        assert_eq!(match_count(&db), 1);
    }

    #[test]
    fn unmatch_requires_participant() {
        let (a, b) = pair();
        let outsider = Uuid::new_v4();
        let (engine, _db) = setup(&[("alice", a), ("bob", b), ("carol", outsider)]);

        engine.swipe(a, b, true).unwrap();
        let out = engine.swipe(b, a, true).unwrap();
        let match_id = out.match_id.unwrap();

        assert!(matches!(
            engine.unmatch(match_id, outsider),
            Err(MatchError::Unauthorized)
        ));
        assert!(matches!(
            engine.unmatch(Uuid::new_v4(), a),
            Err(MatchError::NotFound(_))
        ));
    }

    #[test]
    fn unmatch_removes_match_from_both_lists() {
        let (a, b) = pair();
        let (engine, db) = setup(&[("alice", a), ("bob", b)]);

        engine.swipe(a, b, true).unwrap();
        let out = engine.swipe(b, a, true).unwrap();
        let match_id = out.match_id.unwrap();

        assert_eq!(engine.matches_for_user(a).unwrap().len(), 1);
        assert_eq!(engine.matches_for_user(b).unwrap().len(), 1);

        let torn = engine.unmatch(match_id, a).unwrap();
        assert_eq!(torn.other_user_id, b);
        assert_eq!(torn.chat_id, out.chat_id.unwrap());

        assert!(engine.matches_for_user(a).unwrap().is_empty());
        assert!(engine.matches_for_user(b).unwrap().is_empty());
        assert_eq!(match_count(&db), 0);
    }

    #[test]
    fn match_list_names_the_counterpart() {
        let (a, b) = pair();
        let (engine, _db) = setup(&[("alice", a), ("bob", b)]);

        engine.swipe(a, b, true).unwrap();
        engine.swipe(b, a, true).unwrap();

        let for_a = engine.matches_for_user(a).unwrap();
        assert_eq!(for_a[0].other_username, "bob");
        let for_b = engine.matches_for_user(b).unwrap();
        assert_eq!(for_b[0].other_username, "alice");
    }
}
