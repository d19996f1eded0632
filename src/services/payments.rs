use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::payments::{PaymentGateway, RefundRef};
use crate::services::orders::OrderService;

/// Refund orchestration on top of the gateway adapter. The gateway is the
/// system of record for captured and refunded amounts; this service only
/// locates the payment intent and relays the outcome.
#[derive(Clone)]
pub struct PaymentService {
    orders: Arc<OrderService>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
}

impl PaymentService {
    pub fn new(
        orders: Arc<OrderService>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            orders,
            gateway,
            event_sender,
        }
    }

    /// Refunds an order's captured payment. `amount` omitted means a full
    /// refund; when present it must be positive and is capped by the
    /// gateway at the captured amount (`RefundRejected` beyond it).
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn refund_order(
        &self,
        order_id: Uuid,
        amount: Option<Decimal>,
        reason: &str,
    ) -> Result<RefundRef, ServiceError> {
        if let Some(value) = amount {
            if value <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Refund amount must be positive".to_string(),
                ));
            }
        }

        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        if order.status == OrderStatus::Pending {
            return Err(ServiceError::RefundRejected(
                "Order has no captured payment yet".to_string(),
            ));
        }

        let payment_intent = order.payment_intent_id.as_deref().ok_or_else(|| {
            ServiceError::RefundRejected("Order has no payment intent on record".to_string())
        })?;

        let refund = self
            .gateway
            .create_refund(payment_intent, amount, reason)
            .await?;

        info!(
            order_id = %order_id,
            refund_id = %refund.refund_id,
            amount = ?amount,
            "Refund issued"
        );

        if let Err(e) = self
            .event_sender
            .send(Event::RefundIssued {
                order_id,
                refund_id: refund.refund_id.clone(),
                amount,
            })
            .await
        {
            warn!(order_id = %order_id, error = %e, "Failed to emit refund event");
        }

        Ok(refund)
    }
}
