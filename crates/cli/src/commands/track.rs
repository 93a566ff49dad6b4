//! Shipment tracking.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use vitrine_core::{OrderId, TrackingInfo};
use vitrine_storefront::error::StorefrontError;
use vitrine_storefront::services::{ShippingService, poll_tracking};
use vitrine_storefront::state::AppState;

/// Carriers update tracking a few times a day at most.
const FOLLOW_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Show an order's tracking; with `follow`, keep polling until the shipment
/// is delivered or cancelled.
pub async fn track(state: &AppState, order_id: i64, follow: bool) -> Result<(), StorefrontError> {
    let order_id = OrderId::new(order_id);
    let info = state.shipping().track(order_id).await?;
    log_tracking(&info);

    if follow && !info.status.is_terminal() {
        let service: Arc<dyn ShippingService> = Arc::new(state.shipping().clone());
        let mut updates = poll_tracking(service, order_id, FOLLOW_INTERVAL);
        let mut last = info;
        while let Some(info) = updates.next().await {
            if info != last {
                log_tracking(&info);
                last = info;
            }
        }
    }
    Ok(())
}

fn log_tracking(info: &TrackingInfo) {
    info!(
        order_id = %info.order_id,
        tracking_code = info.tracking_code.as_deref().unwrap_or("-"),
        status = ?info.status,
        "Shipment status"
    );
    if let Some(event) = info.events.last() {
        info!(
            location = event.location.as_deref().unwrap_or("-"),
            "{} {}",
            event.date.format("%d/%m/%Y %H:%M"),
            event.description
        );
    }
}
