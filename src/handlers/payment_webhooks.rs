use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};

use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Notification pushed by the payment gateway when a checkout session
/// reaches a terminal payment state.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event_type: String,
    pub session_id: String,
    pub status: String,
}

// POST /api/v1/payments/webhook
//
// Replays of the same notification are safe: a transition into the order's
// current status is a no-op success, so the handler answers 200 both times.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = state.config.gateway.webhook_secret.as_deref() {
        let tolerance = state.config.gateway.webhook_tolerance_secs;
        if !verify_signature(&headers, &body, secret, tolerance) {
            warn!("Payment webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid webhook payload: {}", e)))?;

    let Some(order) = state
        .services
        .orders
        .find_by_session(&payload.session_id)
        .await?
    else {
        // Nothing to drive; retrying the delivery would not help
        warn!(session_id = %payload.session_id, "Webhook for unknown session ignored");
        return Ok((StatusCode::OK, "ignored"));
    };

    let (target, cause) = match payload.status.as_str() {
        "succeeded" | "paid" | "complete" => (OrderStatus::Confirmed, "payment-captured"),
        "failed" | "expired" => (OrderStatus::Cancelled, "payment-failed"),
        other => {
            info!(
                session_id = %payload.session_id,
                status = other,
                "Unhandled webhook payment status"
            );
            return Ok((StatusCode::OK, "ignored"));
        }
    };

    match state
        .services
        .lifecycle
        .transition(order.id, target, cause)
        .await
    {
        Ok(_) => Ok((StatusCode::OK, "ok")),
        // A conflicting terminal state is permanent; the gateway retrying
        // the delivery cannot resolve it, so acknowledge and flag it
        Err(ServiceError::InvalidTransition { from, to }) => {
            warn!(
                order_id = %order.id,
                from = %from,
                to = %to,
                "Reconciliation required: webhook conflicts with order state"
            );
            Ok((StatusCode::OK, "ignored"))
        }
        Err(other) => Err(other),
    }
}

/// HMAC-SHA256 over `"{timestamp}.{body}"` with the shared secret, carried
/// in `x-timestamp` / `x-signature`. Stale timestamps outside the tolerance
/// window are rejected to limit replays.
fn verify_signature(headers: &HeaderMap, payload: &Bytes, secret: &str, tolerance_secs: u64) -> bool {
    let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) else {
        return false;
    };
    let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) else {
        return false;
    };

    if let Ok(ts_i) = ts.parse::<i64>() {
        let now = chrono::Utc::now().timestamp();
        if (now - ts_i).unsigned_abs() > tolerance_secs {
            return false;
        }
    } else {
        return false;
    }

    let signed = format!("{}.{}", ts, std::str::from_utf8(payload).unwrap_or(""));
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signed.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, sig)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Computes the signature a caller must send. Shared with tests and any
/// internal redelivery tooling.
pub fn sign_payload(secret: &str, timestamp: &str, body: &str) -> String {
    let signed = format!("{}.{}", timestamp, body);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(signed.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
