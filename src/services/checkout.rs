use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::payments::{
    to_minor_units, CreateSessionRequest, PaymentGateway, SessionLineItem,
};
use crate::services::inventory::InventoryService;
use crate::services::orders::{NewOrderItem, OrderService};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItemInput {
    pub magazine_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct CheckoutInput {
    pub retailer_id: Uuid,
    pub retailer_email: String,
    pub retailer_name: Option<String>,
    pub items: Vec<CartItemInput>,
}

/// What the caller needs to redirect the retailer to the hosted payment
/// page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResult {
    pub order_id: Uuid,
    pub session_id: String,
    pub redirect_url: String,
}

/// Entry point for starting a purchase: validates the cart, reserves
/// inventory before any external call, snapshots prices into a pending
/// order, and opens a gateway checkout session. Any failure after the
/// reservation step triggers compensating rollback.
#[derive(Clone)]
pub struct CheckoutService {
    orders: Arc<OrderService>,
    inventory: Arc<InventoryService>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        orders: Arc<OrderService>,
        inventory: Arc<InventoryService>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        currency: String,
    ) -> Self {
        Self {
            orders,
            inventory,
            gateway,
            event_sender,
            currency,
        }
    }

    #[instrument(skip(self, input), fields(retailer_id = %input.retailer_id, item_count = input.items.len()))]
    pub async fn start_checkout(
        &self,
        input: CheckoutInput,
    ) -> Result<CheckoutResult, ServiceError> {
        self.validate(&input)?;

        // Reserve inventory before touching the gateway so a doomed request
        // never holds external resources. Reservations taken so far are
        // unwound if any later item fails.
        let mut reserved: Vec<(Uuid, i32)> = Vec::with_capacity(input.items.len());
        let mut snapshots: Vec<NewOrderItem> = Vec::with_capacity(input.items.len());

        for item in &input.items {
            let magazine = match self.inventory.get_magazine(item.magazine_id).await {
                Ok(Some(m)) => m,
                Ok(None) => {
                    self.rollback_reservations(&reserved, None).await;
                    return Err(ServiceError::InvalidCartItem(format!(
                        "Unknown magazine {}",
                        item.magazine_id
                    )));
                }
                Err(e) => {
                    self.rollback_reservations(&reserved, None).await;
                    return Err(e);
                }
            };

            if let Err(e) = self
                .inventory
                .reserve(item.magazine_id, item.quantity, None)
                .await
            {
                self.rollback_reservations(&reserved, None).await;
                self.emit_checkout_failed(input.retailer_id, &e).await;
                return Err(e);
            }
            reserved.push((item.magazine_id, item.quantity));

            // Price snapshot: the order keeps this wholesale price even if
            // the catalog changes later
            snapshots.push(NewOrderItem {
                magazine_id: magazine.id,
                title: magazine.title.clone(),
                quantity: item.quantity,
                unit_price: magazine.wholesale_price,
            });
        }

        let (order, items) = match self
            .orders
            .create_order(input.retailer_id, &self.currency, snapshots)
            .await
        {
            Ok(created) => created,
            Err(e) => {
                self.rollback_reservations(&reserved, None).await;
                self.emit_checkout_failed(input.retailer_id, &e).await;
                return Err(e);
            }
        };

        let session = match self.open_gateway_session(&input, &order, &items).await {
            Ok(session) => session,
            Err(e) => {
                self.rollback_checkout(&reserved, order.id).await;
                self.emit_checkout_failed(input.retailer_id, &e).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .orders
            .set_payment_session(
                order.id,
                &session.session_id,
                session.payment_intent_id.as_deref(),
            )
            .await
        {
            self.rollback_checkout(&reserved, order.id).await;
            self.emit_checkout_failed(input.retailer_id, &e).await;
            return Err(e);
        }

        info!(
            order_id = %order.id,
            session_id = %session.session_id,
            total = %order.total_amount,
            "Checkout session started"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::OrderCreated {
                order_id: order.id,
                retailer_id: order.retailer_id,
                total_amount: order.total_amount,
            })
            .await
        {
            warn!(order_id = %order.id, error = %e, "Failed to emit order created event");
        }
        if let Err(e) = self
            .event_sender
            .send(Event::CheckoutStarted {
                order_id: order.id,
                session_id: session.session_id.clone(),
            })
            .await
        {
            warn!(order_id = %order.id, error = %e, "Failed to emit checkout started event");
        }

        Ok(CheckoutResult {
            order_id: order.id,
            session_id: session.session_id,
            redirect_url: session.redirect_url,
        })
    }

    fn validate(&self, input: &CheckoutInput) -> Result<(), ServiceError> {
        if input.items.is_empty() {
            return Err(ServiceError::InvalidCartItem("Cart is empty".to_string()));
        }
        if input.retailer_email.trim().is_empty() || !input.retailer_email.contains('@') {
            return Err(ServiceError::ValidationError(
                "Retailer email is required".to_string(),
            ));
        }
        for item in &input.items {
            if item.quantity <= 0 {
                return Err(ServiceError::InvalidCartItem(format!(
                    "Quantity for magazine {} must be a positive integer",
                    item.magazine_id
                )));
            }
        }
        Ok(())
    }

    async fn open_gateway_session(
        &self,
        input: &CheckoutInput,
        order: &crate::entities::order::Model,
        items: &[crate::entities::order_item::Model],
    ) -> Result<crate::payments::CheckoutSessionRef, ServiceError> {
        let customer = self
            .gateway
            .create_customer(
                &input.retailer_email,
                input.retailer_name.as_deref().unwrap_or(&input.retailer_email),
            )
            .await?;

        let mut line_items = Vec::with_capacity(items.len());
        for item in items {
            line_items.push(SessionLineItem {
                name: item.title.clone(),
                description: Some(format!("Wholesale copies of {}", item.title)),
                unit_amount: to_minor_units(item.unit_price)?,
                quantity: item.quantity,
            });
        }

        self.gateway
            .create_checkout_session(CreateSessionRequest {
                customer,
                currency: order.currency.clone(),
                line_items,
                order_id: order.id.to_string(),
            })
            .await
    }

    /// Compensating rollback after the reservation step: restore every
    /// reserved quantity. Failures are logged for reconciliation, never
    /// silently dropped.
    async fn rollback_reservations(&self, reserved: &[(Uuid, i32)], order_id: Option<Uuid>) {
        for (magazine_id, quantity) in reserved {
            if let Err(e) = self.inventory.release(*magazine_id, *quantity, order_id).await {
                error!(
                    magazine_id = %magazine_id,
                    quantity,
                    error = %e,
                    "Reconciliation required: failed to restore reserved inventory"
                );
            }
        }
    }

    /// Rollback path once a pending order exists: restore inventory and
    /// mark the order cancelled. Inventory is restored here, so the plain
    /// repository update is used rather than the lifecycle manager (which
    /// would release a second time).
    async fn rollback_checkout(&self, reserved: &[(Uuid, i32)], order_id: Uuid) {
        self.rollback_reservations(reserved, Some(order_id)).await;
        if let Err(e) = self
            .orders
            .update_status(
                order_id,
                OrderStatus::Pending,
                OrderStatus::Cancelled,
                Some("checkout-failed"),
            )
            .await
        {
            error!(
                order_id = %order_id,
                error = %e,
                "Reconciliation required: failed to cancel partially created order"
            );
        }
    }

    async fn emit_checkout_failed(&self, retailer_id: Uuid, cause: &ServiceError) {
        if let Err(e) = self
            .event_sender
            .send(Event::CheckoutFailed {
                retailer_id,
                reason: cause.to_string(),
            })
            .await
        {
            warn!(retailer_id = %retailer_id, error = %e, "Failed to emit checkout failed event");
        }
    }
}
