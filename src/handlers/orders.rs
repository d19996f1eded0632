use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{order, order_item};
use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub id: Uuid,
    pub magazine_id: Uuid,
    pub title: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub retailer_id: Uuid,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_session_id: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItemResponse>,
}

fn to_response(order: order::Model, items: Vec<order_item::Model>) -> OrderResponse {
    OrderResponse {
        id: order.id,
        retailer_id: order.retailer_id,
        status: order.status,
        total_amount: order.total_amount,
        currency: order.currency,
        payment_session_id: order.payment_session_id,
        cancellation_reason: order.cancellation_reason,
        created_at: order.created_at,
        updated_at: order.updated_at,
        items: items
            .into_iter()
            .map(|item| OrderItemResponse {
                id: item.id,
                magazine_id: item.magazine_id,
                title: item.title,
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.line_total,
            })
            .collect(),
    }
}

// GET /api/v1/orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let (order, items) = state
        .services
        .orders
        .get_order_with_items(order_id)
        .await?
        .ok_or(ServiceError::OrderNotFound(order_id))?;
    Ok(Json(to_response(order, items)))
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub retailer_id: Uuid,
}

// GET /api/v1/orders?retailer_id=...
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let orders = state
        .services
        .orders
        .find_by_retailer(query.retailer_id)
        .await?;

    let mut responses = Vec::with_capacity(orders.len());
    for order in orders {
        let items = state.services.orders.get_items(order.id).await?;
        responses.push(to_response(order, items));
    }
    Ok(Json(responses))
}

async fn transition_to(
    state: &AppState,
    order_id: Uuid,
    target: OrderStatus,
    cause: &str,
) -> Result<Json<OrderResponse>, ServiceError> {
    let order = state
        .services
        .lifecycle
        .transition(order_id, target, cause)
        .await?;
    let items = state.services.orders.get_items(order.id).await?;
    Ok(Json(to_response(order, items)))
}

// POST /api/v1/orders/:id/ship
pub async fn ship_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    transition_to(&state, order_id, OrderStatus::Shipped, "shipped").await
}

// POST /api/v1/orders/:id/deliver
pub async fn deliver_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    transition_to(&state, order_id, OrderStatus::Delivered, "delivered").await
}

#[derive(Debug, Deserialize, Default)]
pub struct CancelOrderRequest {
    pub reason: Option<String>,
}

// POST /api/v1/orders/:id/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    body: Option<Json<CancelOrderRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let reason = body
        .and_then(|Json(req)| req.reason)
        .unwrap_or_else(|| "requested".to_string());
    transition_to(&state, order_id, OrderStatus::Cancelled, &reason).await
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
}

// POST /api/v1/orders/:id/refund
pub async fn refund_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<RefundRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let refund = state
        .services
        .payments
        .refund_order(
            order_id,
            request.amount,
            request.reason.as_deref().unwrap_or("requested_by_retailer"),
        )
        .await?;
    Ok(Json(refund))
}
