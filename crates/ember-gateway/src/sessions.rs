use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tokio::sync::mpsc;
use uuid::Uuid;

use ember_types::events::GatewayEvent;

/// Outbound handle for one connected session.
pub type SessionSender = mpsc::UnboundedSender<GatewayEvent>;

struct SessionEntry {
    user_id: Uuid,
    rooms: HashSet<Uuid>,
    tx: SessionSender,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, SessionEntry>,
    by_user: HashMap<Uuid, HashSet<Uuid>>,
    rooms: HashMap<Uuid, HashSet<Uuid>>,
}

/// Maps live sessions to user identities and room memberships. A user may
/// hold several concurrent sessions (multi-device); a session may join many
/// rooms. Everything here is ephemeral — nothing survives the process.
///
/// Mutations are short and lock-scoped; no I/O ever happens under the lock.
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn register(&self, session_id: Uuid, user_id: Uuid, tx: SessionSender) {
        let mut inner = self.inner.write().expect("session lock poisoned");
        inner.sessions.insert(
            session_id,
            SessionEntry {
                user_id,
                rooms: HashSet::new(),
                tx,
            },
        );
        inner.by_user.entry(user_id).or_default().insert(session_id);
    }

    /// Remove a session and every room membership it held. Returns the
    /// user and the rooms it was in, for disconnect notifications.
    pub fn unregister(&self, session_id: Uuid) -> Option<(Uuid, Vec<Uuid>)> {
        let mut inner = self.inner.write().expect("session lock poisoned");
        let entry = inner.sessions.remove(&session_id)?;

        if let Some(set) = inner.by_user.get_mut(&entry.user_id) {
            set.remove(&session_id);
            if set.is_empty() {
                inner.by_user.remove(&entry.user_id);
            }
        }

        for room in &entry.rooms {
            if let Some(members) = inner.rooms.get_mut(room) {
                members.remove(&session_id);
                if members.is_empty() {
                    inner.rooms.remove(room);
                }
            }
        }

        Some((entry.user_id, entry.rooms.into_iter().collect()))
    }

    /// Returns false if the session is unknown.
    pub fn join_room(&self, session_id: Uuid, room_id: Uuid) -> bool {
        let mut inner = self.inner.write().expect("session lock poisoned");
        let Some(entry) = inner.sessions.get_mut(&session_id) else {
            return false;
        };
        entry.rooms.insert(room_id);
        inner.rooms.entry(room_id).or_default().insert(session_id);
        true
    }

    pub fn leave_room(&self, session_id: Uuid, room_id: Uuid) {
        let mut inner = self.inner.write().expect("session lock poisoned");
        if let Some(entry) = inner.sessions.get_mut(&session_id) {
            entry.rooms.remove(&room_id);
        }
        if let Some(members) = inner.rooms.get_mut(&room_id) {
            members.remove(&session_id);
            if members.is_empty() {
                inner.rooms.remove(&room_id);
            }
        }
    }

    pub fn is_in_room(&self, session_id: Uuid, room_id: Uuid) -> bool {
        let inner = self.inner.read().expect("session lock poisoned");
        inner
            .rooms
            .get(&room_id)
            .is_some_and(|members| members.contains(&session_id))
    }

    pub fn sessions_for_user(&self, user_id: Uuid) -> Vec<Uuid> {
        let inner = self.inner.read().expect("session lock poisoned");
        inner
            .by_user
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn sessions_in_room(&self, room_id: Uuid) -> Vec<Uuid> {
        let inner = self.inner.read().expect("session lock poisoned");
        inner
            .rooms
            .get(&room_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Outbound handles for every session of a user.
    pub fn senders_for_user(&self, user_id: Uuid) -> Vec<SessionSender> {
        let inner = self.inner.read().expect("session lock poisoned");
        let Some(set) = inner.by_user.get(&user_id) else {
            return Vec::new();
        };
        set.iter()
            .filter_map(|sid| inner.sessions.get(sid))
            .map(|entry| entry.tx.clone())
            .collect()
    }

    /// Outbound handles for every session in a room.
    pub fn senders_in_room(&self, room_id: Uuid) -> Vec<SessionSender> {
        let inner = self.inner.read().expect("session lock poisoned");
        let Some(set) = inner.rooms.get(&room_id) else {
            return Vec::new();
        };
        set.iter()
            .filter_map(|sid| inner.sessions.get(sid))
            .map(|entry| entry.tx.clone())
            .collect()
    }

    /// Outbound handle for one session, for direct replies.
    pub fn sender(&self, session_id: Uuid) -> Option<SessionSender> {
        let inner = self.inner.read().expect("session lock poisoned");
        inner.sessions.get(&session_id).map(|entry| entry.tx.clone())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(registry: &SessionRegistry, user: Uuid) -> Uuid {
        let (tx, _rx) = mpsc::unbounded_channel();
        let sid = Uuid::new_v4();
        registry.register(sid, user, tx);
        sid
    }

    #[test]
    fn multi_device_sessions_per_user() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();

        let s1 = session(&registry, user);
        let s2 = session(&registry, user);

        let mut sessions = registry.sessions_for_user(user);
        sessions.sort();
        let mut expected = vec![s1, s2];
        expected.sort();
        assert_eq!(sessions, expected);

        registry.unregister(s1);
        assert_eq!(registry.sessions_for_user(user), vec![s2]);
    }

    #[test]
    fn unregister_clears_all_room_memberships() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let (r1, r2) = (Uuid::new_v4(), Uuid::new_v4());

        let sid = session(&registry, user);
        assert!(registry.join_room(sid, r1));
        assert!(registry.join_room(sid, r2));
        assert!(registry.is_in_room(sid, r1));

        let (removed_user, mut rooms) = registry.unregister(sid).unwrap();
        rooms.sort();
        let mut expected = vec![r1, r2];
        expected.sort();
        assert_eq!(removed_user, user);
        assert_eq!(rooms, expected);

        assert!(registry.sessions_in_room(r1).is_empty());
        assert!(registry.sessions_in_room(r2).is_empty());
        assert!(registry.sessions_for_user(user).is_empty());
    }

    #[test]
    fn join_and_leave_room() {
        let registry = SessionRegistry::new();
        let room = Uuid::new_v4();

        let s1 = session(&registry, Uuid::new_v4());
        let s2 = session(&registry, Uuid::new_v4());
        registry.join_room(s1, room);
        registry.join_room(s2, room);
        assert_eq!(registry.sessions_in_room(room).len(), 2);

        registry.leave_room(s1, room);
        assert_eq!(registry.sessions_in_room(room), vec![s2]);
        assert!(!registry.is_in_room(s1, room));

        // Unknown session cannot join
        assert!(!registry.join_room(Uuid::new_v4(), room));
    }
}
