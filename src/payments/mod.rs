use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

pub mod gateway;

pub use gateway::HttpPaymentGateway;

/// Converts a decimal major-unit amount (dollars) to the gateway's integer
/// minor-unit representation (cents), rounding halves away from zero.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    let cents = (amount * Decimal::from(100))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    cents.to_i64().ok_or_else(|| {
        ServiceError::ValidationError(format!("Amount {} out of range for minor units", amount))
    })
}

/// Gateway-side billing profile, deduplicated by email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRef {
    pub id: String,
    pub email: String,
}

/// Versioned line-item descriptor sent to the gateway. Amounts are minor
/// units; nothing here is free-form provider metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLineItem {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub unit_amount: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub customer: CustomerRef,
    pub currency: String,
    pub line_items: Vec<SessionLineItem>,
    /// Our order id, round-tripped through gateway metadata
    pub order_id: String,
}

/// Reference to an externally hosted checkout session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSessionRef {
    pub session_id: String,
    pub redirect_url: String,
    pub payment_intent_id: Option<String>,
}

/// Payment state the gateway reports for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPaymentStatus {
    Unpaid,
    Paid,
    Failed,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub payment_status: SessionPaymentStatus,
    pub payment_intent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRef {
    pub refund_id: String,
    pub status: String,
}

/// All interaction with the external payment provider. Implementations own
/// retries, timeouts, and wire formats; callers see order-free semantics
/// only.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Looks a customer up by email first and only creates one when no
    /// match exists. Sequential calls never produce duplicates; concurrent
    /// calls for the same email may race (best-effort dedup).
    async fn create_customer(&self, email: &str, name: &str) -> Result<CustomerRef, ServiceError>;

    /// Creates a hosted checkout session and returns its reference plus the
    /// redirect URL for the retailer.
    async fn create_checkout_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSessionRef, ServiceError>;

    /// Current payment status of a session; used to confirm capture and to
    /// reconcile when push notifications are unavailable.
    async fn retrieve_session(&self, session_id: &str) -> Result<SessionState, ServiceError>;

    /// Issues a refund against a captured payment intent. `amount` omitted
    /// means full refund.
    async fn create_refund(
        &self,
        payment_intent_id: &str,
        amount: Option<Decimal>,
        reason: &str,
    ) -> Result<RefundRef, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn minor_units_exact() {
        assert_eq!(to_minor_units(dec!(12.50)).unwrap(), 1250);
        assert_eq!(to_minor_units(dec!(0.00)).unwrap(), 0);
        assert_eq!(to_minor_units(dec!(25.00)).unwrap(), 2500);
    }

    #[test]
    fn minor_units_round_to_nearest() {
        assert_eq!(to_minor_units(dec!(0.994)).unwrap(), 99);
        assert_eq!(to_minor_units(dec!(0.995)).unwrap(), 100);
        assert_eq!(to_minor_units(dec!(0.996)).unwrap(), 100);
    }

    #[test]
    fn line_item_serializes_without_empty_description() {
        let item = SessionLineItem {
            name: "Gourmet Monthly".to_string(),
            description: None,
            unit_amount: 1250,
            quantity: 2,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert!(json.get("description").is_none());
        assert_eq!(json["unit_amount"], 1250);
        assert_eq!(json["quantity"], 2);
    }
}
