//! Newsstand API Library
//!
//! Order and payment processing core for a two-sided magazine marketplace:
//! retailers buy publisher inventory through externally hosted checkout
//! sessions, and this crate tracks each order from creation through
//! fulfillment while coordinating with the payment gateway.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod payments;
pub mod services;

use axum::{
    routing::{get, post},
    Router,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: services::AppServices,
}

/// Builds the full HTTP router for the service.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/v1/checkout", post(handlers::checkout::start_checkout))
        .route(
            "/api/v1/payments/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        )
        .route("/api/v1/orders", get(handlers::orders::list_orders))
        .route("/api/v1/orders/:id", get(handlers::orders::get_order))
        .route("/api/v1/orders/:id/ship", post(handlers::orders::ship_order))
        .route(
            "/api/v1/orders/:id/deliver",
            post(handlers::orders::deliver_order),
        )
        .route(
            "/api/v1/orders/:id/cancel",
            post(handlers::orders::cancel_order),
        )
        .route(
            "/api/v1/orders/:id/refund",
            post(handlers::orders::refund_order),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
