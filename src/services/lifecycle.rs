use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::order::{self, OrderStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::payments::{PaymentGateway, SessionPaymentStatus};
use crate::services::inventory::InventoryService;
use crate::services::orders::OrderService;

/// The allowed transition graph as a single reviewable artifact. The only
/// state-skipping edge is pending -> cancelled.
const ALLOWED_TRANSITIONS: &[(OrderStatus, OrderStatus)] = &[
    (OrderStatus::Pending, OrderStatus::Confirmed),
    (OrderStatus::Pending, OrderStatus::Cancelled),
    (OrderStatus::Confirmed, OrderStatus::Shipped),
    (OrderStatus::Confirmed, OrderStatus::Cancelled),
    (OrderStatus::Shipped, OrderStatus::Delivered),
];

/// Bounded retry for the optimistic compare-and-swap on status.
const MAX_CAS_ATTEMPTS: u32 = 3;

pub fn is_allowed_transition(from: OrderStatus, to: OrderStatus) -> bool {
    ALLOWED_TRANSITIONS.contains(&(from, to))
}

/// The order state machine. Validates transitions against the table,
/// verifies payment capture before confirmation, and releases reserved
/// inventory on cancellation.
#[derive(Clone)]
pub struct OrderLifecycleService {
    orders: Arc<OrderService>,
    inventory: Arc<InventoryService>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
}

impl OrderLifecycleService {
    pub fn new(
        orders: Arc<OrderService>,
        inventory: Arc<InventoryService>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            orders,
            inventory,
            gateway,
            event_sender,
        }
    }

    /// Moves an order to `target`, or fails with `InvalidTransition`,
    /// `OrderNotFound`, or `PaymentNotConfirmed`. A request for the order's
    /// current status is an idempotent no-op success. Concurrent transitions
    /// on the same order are serialized by the repository's status CAS;
    /// losers retry against a fresh read up to a bounded attempt count.
    #[instrument(skip(self), fields(order_id = %order_id, target = %target, cause = cause))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        cause: &str,
    ) -> Result<order::Model, ServiceError> {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let order = self
                .orders
                .get_order(order_id)
                .await?
                .ok_or(ServiceError::OrderNotFound(order_id))?;

            let current = order.status;
            if current == target {
                info!(order_id = %order_id, status = %target, "Transition is a no-op");
                return Ok(order);
            }

            if !is_allowed_transition(current, target) {
                return Err(ServiceError::InvalidTransition {
                    from: current.to_string(),
                    to: target.to_string(),
                });
            }

            if target == OrderStatus::Confirmed {
                self.verify_capture(&order).await?;
            }

            let reason = (target == OrderStatus::Cancelled).then_some(cause);
            match self
                .orders
                .update_status(order_id, current, target, reason)
                .await
            {
                Ok(updated) => {
                    if target == OrderStatus::Cancelled {
                        self.release_reserved_inventory(order_id).await;
                    }
                    self.emit_status_changed(order_id, current, target, cause)
                        .await;
                    return Ok(updated);
                }
                Err(ServiceError::StaleOrderState { .. }) => {
                    warn!(order_id = %order_id, attempt, "Lost status race, retrying transition");
                    continue;
                }
                Err(other) => return Err(other),
            }
        }

        Err(ServiceError::StaleOrderState {
            order_id,
            expected: target.to_string(),
        })
    }

    /// Confirmation requires the linked session to report a successful
    /// capture; an order that never reached the gateway cannot confirm.
    async fn verify_capture(&self, order: &order::Model) -> Result<(), ServiceError> {
        let session_id = order
            .payment_session_id
            .as_deref()
            .ok_or(ServiceError::PaymentNotConfirmed(order.id))?;

        let session = self.gateway.retrieve_session(session_id).await?;
        if session.payment_status != SessionPaymentStatus::Paid {
            warn!(
                order_id = %order.id,
                session_id,
                payment_status = ?session.payment_status,
                "Capture not confirmed by gateway"
            );
            return Err(ServiceError::PaymentNotConfirmed(order.id));
        }

        if let Some(intent) = session.payment_intent_id.as_deref() {
            if order.payment_intent_id.as_deref() != Some(intent) {
                self.orders.record_payment_intent(order.id, intent).await?;
            }
        }

        Ok(())
    }

    /// Returns every reserved unit to its magazine. The transition has
    /// already committed, so failures here are a reconciliation-required
    /// condition, not a rollback.
    async fn release_reserved_inventory(&self, order_id: Uuid) {
        let items = match self.orders.get_items(order_id).await {
            Ok(items) => items,
            Err(e) => {
                error!(
                    order_id = %order_id,
                    error = %e,
                    "Reconciliation required: could not load items for inventory release"
                );
                return;
            }
        };

        for item in items {
            if let Err(e) = self
                .inventory
                .release(item.magazine_id, item.quantity, Some(order_id))
                .await
            {
                error!(
                    order_id = %order_id,
                    magazine_id = %item.magazine_id,
                    error = %e,
                    "Reconciliation required: inventory release failed"
                );
            }
        }
    }

    async fn emit_status_changed(
        &self,
        order_id: Uuid,
        previous: OrderStatus,
        new: OrderStatus,
        cause: &str,
    ) {
        if let Err(e) = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                previous_status: previous,
                new_status: new,
                cause: cause.to_string(),
                timestamp: Utc::now(),
            })
            .await
        {
            warn!(order_id = %order_id, error = %e, "Failed to emit status change event");
        }
    }
}
