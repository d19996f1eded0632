use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{instrument, warn};

use crate::config::GatewayConfig;
use crate::errors::ServiceError;

use super::{
    to_minor_units, CheckoutSessionRef, CreateSessionRequest, CustomerRef, PaymentGateway,
    RefundRef, SessionPaymentStatus, SessionState,
};

const RETRY_BASE_DELAY_MS: u64 = 100;

/// HTTP client for the hosted payment provider. Transient failures
/// (connect errors, timeouts, 5xx, 429) are retried with exponential
/// backoff up to the configured attempt count; 4xx rejections are not.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

#[derive(Debug, Deserialize)]
struct CustomerObject {
    id: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct CustomerListResponse {
    data: Vec<CustomerObject>,
}

#[derive(Debug, Deserialize)]
struct SessionObject {
    id: String,
    url: Option<String>,
    payment_intent: Option<String>,
    payment_status: String,
}

#[derive(Debug, Deserialize)]
struct RefundObject {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    error: ProviderErrorDetails,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetails {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateSessionBody<'a> {
    customer: &'a str,
    currency: &'a str,
    line_items: &'a [super::SessionLineItem],
    metadata: serde_json::Value,
}

impl HttpPaymentGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries.max(1),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends a request, retrying transient failures. `reject` maps a
    /// non-retryable provider refusal into the caller's error type.
    async fn send_with_retry<T>(
        &self,
        request: reqwest::RequestBuilder,
        reject: fn(String) -> ServiceError,
    ) -> Result<T, ServiceError>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut last_err = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY_MS * (1 << (attempt - 1));
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let req = request
                .try_clone()
                .ok_or_else(|| ServiceError::InternalError("request not cloneable".into()))?
                .bearer_auth(&self.api_key);

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<T>().await.map_err(|e| {
                            ServiceError::GatewayUnavailable(format!(
                                "malformed provider response: {}",
                                e
                            ))
                        });
                    }

                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        warn!(attempt, %status, "Transient gateway error, will retry");
                        last_err = Some(ServiceError::GatewayUnavailable(format!(
                            "provider returned {}",
                            status
                        )));
                        continue;
                    }

                    // 4xx-class refusal: surface the provider's reason, no retry
                    let reason = match response.json::<ProviderError>().await {
                        Ok(body) => match body.error.code {
                            Some(code) => format!("{} ({})", body.error.message, code),
                            None => body.error.message,
                        },
                        Err(_) => format!("provider returned {}", status),
                    };
                    return Err(reject(reason));
                }
                Err(e) if e.is_timeout() => {
                    warn!(attempt, "Gateway request timed out, will retry");
                    last_err = Some(ServiceError::GatewayTimeout(
                        "request deadline exceeded".to_string(),
                    ));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Gateway request failed, will retry");
                    last_err = Some(ServiceError::GatewayUnavailable(e.to_string()));
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| ServiceError::GatewayUnavailable("no attempts made".to_string())))
    }
}

fn map_payment_status(raw: &str) -> SessionPaymentStatus {
    match raw {
        "paid" | "succeeded" => SessionPaymentStatus::Paid,
        "failed" => SessionPaymentStatus::Failed,
        "expired" => SessionPaymentStatus::Expired,
        _ => SessionPaymentStatus::Unpaid,
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self))]
    async fn create_customer(&self, email: &str, name: &str) -> Result<CustomerRef, ServiceError> {
        // Look up before create so repeated checkouts reuse one billing profile
        let existing: CustomerListResponse = self
            .send_with_retry(
                self.client
                    .get(self.url("/v1/customers"))
                    .query(&[("email", email)]),
                ServiceError::GatewayRejected,
            )
            .await?;

        if let Some(found) = existing.data.into_iter().find(|c| c.email == email) {
            return Ok(CustomerRef {
                id: found.id,
                email: found.email,
            });
        }

        let created: CustomerObject = self
            .send_with_retry(
                self.client
                    .post(self.url("/v1/customers"))
                    .json(&json!({ "email": email, "name": name })),
                ServiceError::GatewayRejected,
            )
            .await?;

        Ok(CustomerRef {
            id: created.id,
            email: created.email,
        })
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_checkout_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSessionRef, ServiceError> {
        let body = CreateSessionBody {
            customer: &request.customer.id,
            currency: &request.currency,
            line_items: &request.line_items,
            metadata: json!({ "order_id": request.order_id }),
        };

        let session: SessionObject = self
            .send_with_retry(
                self.client
                    .post(self.url("/v1/checkout/sessions"))
                    .json(&body),
                ServiceError::GatewayRejected,
            )
            .await?;

        let redirect_url = session.url.ok_or_else(|| {
            ServiceError::GatewayUnavailable("provider session missing redirect url".to_string())
        })?;

        Ok(CheckoutSessionRef {
            session_id: session.id,
            redirect_url,
            payment_intent_id: session.payment_intent,
        })
    }

    #[instrument(skip(self))]
    async fn retrieve_session(&self, session_id: &str) -> Result<SessionState, ServiceError> {
        let session: SessionObject = self
            .send_with_retry(
                self.client
                    .get(self.url(&format!("/v1/checkout/sessions/{}", session_id))),
                ServiceError::GatewayRejected,
            )
            .await?;

        Ok(SessionState {
            session_id: session.id,
            payment_status: map_payment_status(&session.payment_status),
            payment_intent_id: session.payment_intent,
        })
    }

    #[instrument(skip(self))]
    async fn create_refund(
        &self,
        payment_intent_id: &str,
        amount: Option<Decimal>,
        reason: &str,
    ) -> Result<RefundRef, ServiceError> {
        let minor_amount = amount.map(to_minor_units).transpose()?;

        let refund: RefundObject = self
            .send_with_retry(
                self.client.post(self.url("/v1/refunds")).json(&json!({
                    "payment_intent": payment_intent_id,
                    "amount": minor_amount,
                    "reason": reason,
                })),
                ServiceError::RefundRejected,
            )
            .await?;

        Ok(RefundRef {
            refund_id: refund.id,
            status: refund.status,
        })
    }
}
