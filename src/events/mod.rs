use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Domain events emitted by the order and payment core. Emission is
/// at-least-once; consumers de-duplicate by (order_id, status, timestamp).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        retailer_id: Uuid,
        total_amount: Decimal,
    },
    OrderStatusChanged {
        order_id: Uuid,
        previous_status: OrderStatus,
        new_status: OrderStatus,
        cause: String,
        timestamp: DateTime<Utc>,
    },
    CheckoutStarted {
        order_id: Uuid,
        session_id: String,
    },
    CheckoutFailed {
        retailer_id: Uuid,
        reason: String,
    },
    InventoryReserved {
        magazine_id: Uuid,
        quantity: i32,
        order_id: Option<Uuid>,
    },
    InventoryReleased {
        magazine_id: Uuid,
        quantity: i32,
        order_id: Option<Uuid>,
    },
    RefundIssued {
        order_id: Uuid,
        refund_id: String,
        amount: Option<Decimal>,
    },
}

/// Handle for emitting domain events into the processing channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event. Failures are reported, not fatal; transitions must
    /// not be rolled back because the notification channel is full.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Event processing loop. Delivery to the external notification
/// collaborator happens here; the core only guarantees emission.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderStatusChanged {
                order_id,
                previous_status,
                new_status,
                cause,
                ..
            } => {
                info!(
                    order_id = %order_id,
                    previous_status = %previous_status,
                    new_status = %new_status,
                    cause = %cause,
                    "Order status changed"
                );
            }
            Event::CheckoutFailed { retailer_id, reason } => {
                warn!(retailer_id = %retailer_id, reason = %reason, "Checkout failed");
            }
            other => {
                info!(event = ?other, "Domain event");
            }
        }
    }
    info!("Event channel closed; processor shutting down");
}
