use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;
use crate::services::checkout::{CartItemInput, CheckoutInput};
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    pub retailer_id: Uuid,
    #[validate(email(message = "A valid retailer email is required"))]
    pub retailer_email: String,
    pub retailer_name: Option<String>,
    #[validate(length(min = 1, message = "Cart must not be empty"))]
    pub items: Vec<CartItemInput>,
}

// POST /api/v1/checkout
pub async fn start_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    request.validate()?;

    let result = state
        .services
        .checkout
        .start_checkout(CheckoutInput {
            retailer_id: request.retailer_id,
            retailer_email: request.retailer_email,
            retailer_name: request.retailer_name,
            items: request.items,
        })
        .await?;

    Ok(Json(result))
}
