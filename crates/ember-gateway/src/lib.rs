pub mod connection;
pub mod notify;
pub mod presence;
pub mod relay;
pub mod sessions;

use std::sync::Arc;
use std::time::Duration;

use ember_db::Database;

use notify::NotificationGateway;
use presence::PresenceTracker;
use relay::RelayRouter;
use sessions::SessionRegistry;

/// Everything a WebSocket connection needs: the shared session registry,
/// presence tracker, relay router, and the durable store.
#[derive(Clone)]
pub struct Gateway {
    pub sessions: Arc<SessionRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub relay: RelayRouter,
    pub db: Arc<Database>,
}

impl Gateway {
    pub fn new(
        db: Arc<Database>,
        presence_ttl: Duration,
        notifier: Arc<dyn NotificationGateway>,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let presence = Arc::new(PresenceTracker::new(presence_ttl));
        let relay = RelayRouter::new(sessions.clone(), presence.clone(), notifier);
        Self {
            sessions,
            presence,
            relay,
            db,
        }
    }
}
