#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, Response, StatusCode},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use newsstand_api::{
    config::{AppConfig, GatewayConfig},
    db,
    entities::magazine,
    errors::ServiceError,
    events::{self, EventSender},
    payments::{
        to_minor_units, CheckoutSessionRef, CreateSessionRequest, CustomerRef, PaymentGateway,
        RefundRef, SessionLineItem, SessionPaymentStatus, SessionState,
    },
    services::AppServices,
    AppState,
};

/// One recorded gateway checkout session.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub payment_status: SessionPaymentStatus,
    pub payment_intent_id: String,
    pub line_items: Vec<SessionLineItem>,
    pub captured_minor: i64,
    pub refunded_minor: i64,
}

#[derive(Debug, Default)]
pub struct GatewayInner {
    pub customers: Vec<CustomerRef>,
    pub sessions: HashMap<String, SessionRecord>,
    pub refunds: Vec<RefundRef>,
    pub fail_next_session_create: bool,
    counter: u64,
}

/// In-process stand-in for the hosted payment provider. Tracks customers,
/// sessions, and refunds so tests can assert on what the adapter sent.
#[derive(Debug, Default)]
pub struct TestGateway {
    pub inner: Mutex<GatewayInner>,
}

impl TestGateway {
    pub fn mark_paid(&self, session_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get_mut(session_id)
            .expect("unknown session in mark_paid");
        session.payment_status = SessionPaymentStatus::Paid;
    }

    pub fn mark_failed(&self, session_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get_mut(session_id)
            .expect("unknown session in mark_failed");
        session.payment_status = SessionPaymentStatus::Failed;
    }

    pub fn fail_next_session_create(&self) {
        self.inner.lock().unwrap().fail_next_session_create = true;
    }

    pub fn session(&self, session_id: &str) -> SessionRecord {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .get(session_id)
            .expect("unknown session")
            .clone()
    }

    pub fn customer_count(&self) -> usize {
        self.inner.lock().unwrap().customers.len()
    }

    pub fn refund_count(&self) -> usize {
        self.inner.lock().unwrap().refunds.len()
    }
}

#[async_trait]
impl PaymentGateway for TestGateway {
    async fn create_customer(&self, email: &str, name: &str) -> Result<CustomerRef, ServiceError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.customers.iter().find(|c| c.email == email) {
            return Ok(existing.clone());
        }
        inner.counter += 1;
        let customer = CustomerRef {
            id: format!("cus_test_{}", inner.counter),
            email: email.to_string(),
        };
        let _ = name;
        inner.customers.push(customer.clone());
        Ok(customer)
    }

    async fn create_checkout_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSessionRef, ServiceError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_next_session_create {
            inner.fail_next_session_create = false;
            return Err(ServiceError::GatewayUnavailable(
                "provider returned 503".to_string(),
            ));
        }

        inner.counter += 1;
        let session_id = format!("cs_test_{}", inner.counter);
        let payment_intent_id = format!("pi_test_{}", inner.counter);
        let captured_minor: i64 = request
            .line_items
            .iter()
            .map(|item| item.unit_amount * i64::from(item.quantity))
            .sum();

        inner.sessions.insert(
            session_id.clone(),
            SessionRecord {
                payment_status: SessionPaymentStatus::Unpaid,
                payment_intent_id: payment_intent_id.clone(),
                line_items: request.line_items.clone(),
                captured_minor,
                refunded_minor: 0,
            },
        );

        Ok(CheckoutSessionRef {
            session_id: session_id.clone(),
            redirect_url: format!("https://gateway.test/pay/{}", session_id),
            payment_intent_id: Some(payment_intent_id),
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionState, ServiceError> {
        let inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get(session_id)
            .ok_or_else(|| ServiceError::GatewayRejected("no such session".to_string()))?;
        Ok(SessionState {
            session_id: session_id.to_string(),
            payment_status: session.payment_status,
            payment_intent_id: Some(session.payment_intent_id.clone()),
        })
    }

    async fn create_refund(
        &self,
        payment_intent_id: &str,
        amount: Option<Decimal>,
        _reason: &str,
    ) -> Result<RefundRef, ServiceError> {
        let mut inner = self.inner.lock().unwrap();
        inner.counter += 1;
        let refund_id = format!("re_test_{}", inner.counter);

        let session = inner
            .sessions
            .values_mut()
            .find(|s| s.payment_intent_id == payment_intent_id)
            .ok_or_else(|| ServiceError::RefundRejected("unknown payment intent".to_string()))?;

        if session.payment_status != SessionPaymentStatus::Paid {
            return Err(ServiceError::RefundRejected(
                "payment not captured".to_string(),
            ));
        }

        let minor = match amount {
            Some(a) => to_minor_units(a)?,
            None => session.captured_minor - session.refunded_minor,
        };
        if minor <= 0 || minor > session.captured_minor - session.refunded_minor {
            return Err(ServiceError::RefundRejected(
                "amount exceeds captured amount".to_string(),
            ));
        }
        session.refunded_minor += minor;

        let refund = RefundRef {
            refund_id,
            status: "succeeded".to_string(),
        };
        inner.refunds.push(refund.clone());
        Ok(refund)
    }
}

/// Test application backed by an in-memory SQLite database and the
/// in-process gateway.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub gateway: Arc<TestGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(None, 30).await
    }

    pub async fn with_webhook_secret(secret: &str) -> Self {
        Self::build(Some(secret.to_string()), 30).await
    }

    pub async fn with_checkout_expiry_minutes(expiry_minutes: i64) -> Self {
        Self::build(None, expiry_minutes).await
    }

    async fn build(webhook_secret: Option<String>, expiry_minutes: i64) -> Self {
        let config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            log_level: "info".to_string(),
            log_json: false,
            auto_migrate: true,
            currency: "USD".to_string(),
            checkout_expiry_minutes: expiry_minutes,
            reconciliation_interval_secs: 60,
            gateway: GatewayConfig {
                webhook_secret,
                ..GatewayConfig::default()
            },
        };

        let pool = db::establish_connection_from_app_config(&config)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool).await.expect("migrations");
        let db = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(TestGateway::default());
        let services = AppServices::new(db.clone(), gateway.clone(), event_sender.clone(), &config);

        let state = AppState {
            db,
            config,
            event_sender,
            services,
        };
        let router = newsstand_api::app_router(state.clone());

        Self {
            router,
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub async fn seed_magazine(
        &self,
        title: &str,
        wholesale_price: Decimal,
        available_quantity: i32,
    ) -> magazine::Model {
        let now = Utc::now();
        magazine::ActiveModel {
            id: Set(Uuid::new_v4()),
            publisher_id: Set(Uuid::new_v4()),
            title: Set(title.to_string()),
            description: Set(None),
            retail_price: Set(wholesale_price * Decimal::from(2)),
            wholesale_price: Set(wholesale_price),
            available_quantity: Set(available_quantity),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed magazine")
    }

    pub async fn magazine_quantity(&self, magazine_id: Uuid) -> i32 {
        magazine::Entity::find_by_id(magazine_id)
            .one(&*self.state.db)
            .await
            .expect("query magazine")
            .expect("magazine exists")
            .available_quantity
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                builder.body(Body::from(json.to_string())).unwrap()
            }
            None => builder.body(Body::empty()).unwrap(),
        };
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// POST /api/v1/checkout with the given cart.
    pub async fn checkout(
        &self,
        retailer_id: Uuid,
        email: &str,
        items: &[(Uuid, i32)],
    ) -> Response<Body> {
        let items: Vec<Value> = items
            .iter()
            .map(|(magazine_id, quantity)| {
                serde_json::json!({ "magazine_id": magazine_id, "quantity": quantity })
            })
            .collect();
        self.request(
            Method::POST,
            "/api/v1/checkout",
            Some(serde_json::json!({
                "retailer_id": retailer_id,
                "retailer_email": email,
                "items": items,
            })),
        )
        .await
    }
}

pub async fn response_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub async fn expect_status(response: Response<Body>, status: StatusCode) -> Value {
    assert_eq!(response.status(), status, "unexpected response status");
    response_json(response).await
}

/// Monetary fields serialize as strings, but SQLite round-trips can change
/// the scale, so comparisons go through `Decimal`.
pub fn decimal_field(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal value: {:?}", other),
    }
}
