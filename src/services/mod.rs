pub mod checkout;
pub mod inventory;
pub mod lifecycle;
pub mod orders;
pub mod payments;
pub mod reconciliation;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::payments::PaymentGateway;

/// Services layer that encapsulates the business logic used by HTTP
/// handlers and background workers.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<orders::OrderService>,
    pub inventory: Arc<inventory::InventoryService>,
    pub lifecycle: Arc<lifecycle::OrderLifecycleService>,
    pub checkout: Arc<checkout::CheckoutService>,
    pub payments: Arc<payments::PaymentService>,
    pub reconciliation: Arc<reconciliation::ReconciliationService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        config: &AppConfig,
    ) -> Self {
        let orders = Arc::new(orders::OrderService::new(db.clone()));
        let inventory = Arc::new(inventory::InventoryService::new(
            db.clone(),
            event_sender.clone(),
        ));
        let lifecycle = Arc::new(lifecycle::OrderLifecycleService::new(
            orders.clone(),
            inventory.clone(),
            gateway.clone(),
            event_sender.clone(),
        ));
        let checkout = Arc::new(checkout::CheckoutService::new(
            orders.clone(),
            inventory.clone(),
            gateway.clone(),
            event_sender.clone(),
            config.currency.clone(),
        ));
        let payments = Arc::new(payments::PaymentService::new(
            orders.clone(),
            gateway,
            event_sender,
        ));
        let reconciliation = Arc::new(reconciliation::ReconciliationService::new(
            orders.clone(),
            lifecycle.clone(),
            config.checkout_expiry_minutes,
        ));

        Self {
            orders,
            inventory,
            lifecycle,
            checkout,
            payments,
            reconciliation,
        }
    }
}
