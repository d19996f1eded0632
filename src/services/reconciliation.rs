use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;
use crate::services::lifecycle::OrderLifecycleService;
use crate::services::orders::OrderService;

/// Periodic sweep that cancels pending orders whose checkout session never
/// confirmed within the expiry window, releasing their reservations.
#[derive(Clone)]
pub struct ReconciliationService {
    orders: Arc<OrderService>,
    lifecycle: Arc<OrderLifecycleService>,
    expiry_minutes: i64,
}

impl ReconciliationService {
    pub fn new(
        orders: Arc<OrderService>,
        lifecycle: Arc<OrderLifecycleService>,
        expiry_minutes: i64,
    ) -> Self {
        Self {
            orders,
            lifecycle,
            expiry_minutes,
        }
    }

    /// Cancels every pending order past expiry. Returns the number of
    /// orders cancelled; individual failures are logged and skipped so one
    /// stuck order cannot stall the sweep.
    #[instrument(skip(self))]
    pub async fn expire_abandoned_orders(&self) -> Result<usize, ServiceError> {
        let cutoff = Utc::now() - chrono::Duration::minutes(self.expiry_minutes);
        let expired = self.orders.find_expired_pending(cutoff).await?;

        let mut cancelled = 0;
        for order in expired {
            match self
                .lifecycle
                .transition(order.id, OrderStatus::Cancelled, "expired")
                .await
            {
                Ok(_) => cancelled += 1,
                Err(e) => {
                    warn!(order_id = %order.id, error = %e, "Failed to expire abandoned order");
                }
            }
        }

        if cancelled > 0 {
            info!(cancelled, "Expired abandoned checkout sessions");
        }
        Ok(cancelled)
    }
}

/// Background loop driving the sweep at a fixed interval.
pub async fn run_sweeper(service: Arc<ReconciliationService>, interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        ticker.tick().await;
        if let Err(e) = service.expire_abandoned_orders().await {
            warn!(error = %e, "Reconciliation sweep failed");
        }
    }
}
