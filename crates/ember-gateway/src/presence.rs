use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Default online-marker lifetime. The connection loop refreshes it on
/// every heartbeat pong, so expiry only fires for silent disconnects.
pub const DEFAULT_PRESENCE_TTL: Duration = Duration::from_secs(300);

/// TTL-based online markers. Absence or expiry means offline; there is no
/// active sweep — expired entries are pruned on the read that finds them.
///
/// Presence is best-effort routing input, never a delivery gate: a poisoned
/// lock degrades to "offline", which steers delivery toward the
/// notification fallback rather than blocking it.
pub struct PresenceTracker {
    ttl: Duration,
    records: RwLock<HashMap<Uuid, Instant>>,
}

impl PresenceTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Set or refresh the online marker. Idempotent.
    pub fn mark_online(&self, user_id: Uuid) {
        let Ok(mut records) = self.records.write() else {
            tracing::warn!("Presence lock poisoned, dropping mark_online for {}", user_id);
            return;
        };
        records.insert(user_id, Instant::now() + self.ttl);
    }

    /// Explicit disconnect: drop the marker immediately.
    pub fn mark_offline(&self, user_id: Uuid) {
        let Ok(mut records) = self.records.write() else {
            tracing::warn!("Presence lock poisoned, dropping mark_offline for {}", user_id);
            return;
        };
        records.remove(&user_id);
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        let expired = {
            let Ok(records) = self.records.read() else {
                return false;
            };
            match records.get(&user_id) {
                Some(expires_at) if *expires_at > Instant::now() => return true,
                Some(_) => true,
                None => false,
            }
        };

        // Lazy prune of the expired entry
        if expired {
            if let Ok(mut records) = self.records.write() {
                if records
                    .get(&user_id)
                    .is_some_and(|expires_at| *expires_at <= Instant::now())
                {
                    records.remove(&user_id);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_until_ttl_expires() {
        let tracker = PresenceTracker::new(Duration::from_millis(40));
        let user = Uuid::new_v4();

        assert!(!tracker.is_online(user));
        tracker.mark_online(user);
        assert!(tracker.is_online(user));

        std::thread::sleep(Duration::from_millis(60));
        assert!(!tracker.is_online(user));
        // Pruned entry stays gone
        assert!(!tracker.is_online(user));
    }

    #[test]
    fn refresh_extends_the_marker() {
        let tracker = PresenceTracker::new(Duration::from_millis(50));
        let user = Uuid::new_v4();

        tracker.mark_online(user);
        std::thread::sleep(Duration::from_millis(30));
        tracker.mark_online(user);
        std::thread::sleep(Duration::from_millis(30));
        // 60ms since first mark, 30ms since refresh
        assert!(tracker.is_online(user));
    }

    #[test]
    fn mark_offline_is_immediate() {
        let tracker = PresenceTracker::new(Duration::from_secs(300));
        let user = Uuid::new_v4();

        tracker.mark_online(user);
        tracker.mark_offline(user);
        assert!(!tracker.is_online(user));

        // Offline for a user never seen is a no-op
        tracker.mark_offline(Uuid::new_v4());
    }
}
