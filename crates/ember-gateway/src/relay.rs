use std::sync::Arc;

use tracing::{trace, warn};
use uuid::Uuid;

use ember_types::events::GatewayEvent;

use crate::notify::NotificationGateway;
use crate::presence::PresenceTracker;
use crate::sessions::SessionRegistry;

/// Routes events to live sessions, with offline fallback to the
/// notification gateway.
///
/// Delivery is at-most-once per session per call: a session whose channel
/// has closed simply misses the event. Durability is the persistence
/// layer's job — anything that must survive is written to the store before
/// it is relayed, and clients fetch it on reconnect.
#[derive(Clone)]
pub struct RelayRouter {
    sessions: Arc<SessionRegistry>,
    presence: Arc<PresenceTracker>,
    notifier: Arc<dyn NotificationGateway>,
}

impl RelayRouter {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        presence: Arc<PresenceTracker>,
        notifier: Arc<dyn NotificationGateway>,
    ) -> Self {
        Self {
            sessions,
            presence,
            notifier,
        }
    }

    /// Fan an event out to every live session in a room.
    pub fn deliver_to_room(&self, room_id: Uuid, event: &GatewayEvent) {
        for tx in self.sessions.senders_in_room(room_id) {
            if tx.send(event.clone()).is_err() {
                trace!("Dropped room event for a closed session in {}", room_id);
            }
        }
    }

    /// Deliver to every session of a user. A user with no sessions and no
    /// presence marker gets the event as an offline notification instead.
    /// No sessions but still marked online (e.g. between reconnects) means
    /// the event is dropped — the durable copy covers it.
    pub fn deliver_to_user(&self, user_id: Uuid, event: &GatewayEvent) {
        let senders = self.sessions.senders_for_user(user_id);
        if senders.is_empty() {
            self.offline_fallback(user_id, event);
            return;
        }
        for tx in senders {
            if tx.send(event.clone()).is_err() {
                trace!("Dropped user event for a closed session of {}", user_id);
            }
        }
    }

    /// Forward to the notification gateway iff the user has zero live
    /// sessions and no presence marker. Fire-and-forget: a gateway failure
    /// is logged and swallowed.
    pub fn offline_fallback(&self, user_id: Uuid, event: &GatewayEvent) {
        if !self.sessions.sessions_for_user(user_id).is_empty() {
            return;
        }
        if self.presence.is_online(user_id) {
            return;
        }
        if let Err(e) = self.notifier.send(user_id, event) {
            warn!("Offline notification for {} failed: {}", user_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Uuid>>,
        fail: bool,
    }

    impl NotificationGateway for RecordingNotifier {
        fn send(&self, user_id: Uuid, _event: &GatewayEvent) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(user_id);
            if self.fail {
                anyhow::bail!("gateway down");
            }
            Ok(())
        }
    }

    struct Fixture {
        sessions: Arc<SessionRegistry>,
        presence: Arc<PresenceTracker>,
        notifier: Arc<RecordingNotifier>,
        relay: RelayRouter,
    }

    fn fixture() -> Fixture {
        let sessions = Arc::new(SessionRegistry::new());
        let presence = Arc::new(PresenceTracker::new(Duration::from_secs(300)));
        let notifier = Arc::new(RecordingNotifier::default());
        let relay = RelayRouter::new(sessions.clone(), presence.clone(), notifier.clone());
        Fixture {
            sessions,
            presence,
            notifier,
            relay,
        }
    }

    fn connect(f: &Fixture, user: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sid = Uuid::new_v4();
        f.sessions.register(sid, user, tx);
        f.presence.mark_online(user);
        (sid, rx)
    }

    fn ping(chat_id: Uuid, user_id: Uuid) -> GatewayEvent {
        GatewayEvent::Typing {
            chat_id,
            user_id,
            is_typing: true,
        }
    }

    #[tokio::test]
    async fn room_delivery_reaches_each_member_once() {
        let f = fixture();
        let room = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let (s1, mut rx1) = connect(&f, a);
        let (s2, mut rx2) = connect(&f, b);
        f.sessions.join_room(s1, room);
        f.sessions.join_room(s2, room);

        f.relay.deliver_to_room(room, &ping(room, a));

        assert!(rx1.try_recv().is_ok());
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn room_delivery_skips_non_members() {
        let f = fixture();
        let room = Uuid::new_v4();

        let (_sid, mut rx) = connect(&f, Uuid::new_v4());
        f.relay.deliver_to_room(room, &ping(room, Uuid::new_v4()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn user_delivery_hits_every_session() {
        let f = fixture();
        let user = Uuid::new_v4();
        let (_s1, mut rx1) = connect(&f, user);
        let (_s2, mut rx2) = connect(&f, user);

        f.relay.deliver_to_user(user, &ping(Uuid::new_v4(), user));

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(f.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_user_gets_a_notification() {
        let f = fixture();
        let user = Uuid::new_v4();

        f.relay.deliver_to_user(user, &ping(Uuid::new_v4(), user));
        assert_eq!(*f.notifier.sent.lock().unwrap(), vec![user]);
    }

    #[tokio::test]
    async fn no_sessions_but_online_is_not_notified() {
        let f = fixture();
        let user = Uuid::new_v4();
        f.presence.mark_online(user);

        f.relay.deliver_to_user(user, &ping(Uuid::new_v4(), user));
        assert!(f.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn disconnected_session_stops_receiving() {
        let f = fixture();
        let room = Uuid::new_v4();
        let user = Uuid::new_v4();

        let (sid, mut rx) = connect(&f, user);
        f.sessions.join_room(sid, room);
        f.sessions.unregister(sid);
        f.presence.mark_offline(user);

        f.relay.deliver_to_room(room, &ping(room, user));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn notifier_failure_is_swallowed() {
        let sessions = Arc::new(SessionRegistry::new());
        let presence = Arc::new(PresenceTracker::new(Duration::from_secs(300)));
        let notifier = Arc::new(RecordingNotifier {
            sent: Mutex::new(Vec::new()),
            fail: true,
        });
        let relay = RelayRouter::new(sessions, presence, notifier.clone());

        let user = Uuid::new_v4();
        relay.deliver_to_user(user, &ping(Uuid::new_v4(), user));
        // The failure was logged, not propagated
        assert_eq!(*notifier.sent.lock().unwrap(), vec![user]);
    }
}
