use tracing::info;
use uuid::Uuid;

use ember_types::events::GatewayEvent;

/// Push/SMS/email gateway boundary. The relay router calls this when a
/// target has no live sessions and no presence marker; failures are logged
/// by the router and never retried or propagated.
pub trait NotificationGateway: Send + Sync {
    fn send(&self, user_id: Uuid, event: &GatewayEvent) -> anyhow::Result<()>;
}

/// Stand-in gateway that just logs. The production binary wires this until
/// a real push provider is configured.
pub struct LogNotifier;

impl NotificationGateway for LogNotifier {
    fn send(&self, user_id: Uuid, event: &GatewayEvent) -> anyhow::Result<()> {
        info!("Offline notification for {}: {:?}", user_id, event);
        Ok(())
    }
}
