use crate::auth::{AuthRouterExt, ADMIN_ROLE};
use crate::entities::payment;
use crate::errors::{ApiError, ServiceError};
use crate::handlers::common::success_response;
use crate::services::payments::{RefundOutcome, WebhookOutcome};
use crate::{ApiResponse, AppState};
use axum::{
    extract::{Json, Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// Admin payment operations, mounted under `/admin/payments`
pub fn payments_routes() -> Router<AppState> {
    Router::new()
        .route("/orders/:order_id", get(list_order_payments))
        .route("/orders/:order_id/refund", post(refund_order))
        .with_role(ADMIN_ROLE)
}

/// Provider callbacks, unauthenticated and verified by signature
pub fn payment_webhook_routes() -> Router<AppState> {
    Router::new().route("/stripe", post(stripe_webhook))
}

pub async fn list_order_payments(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let payments: Vec<payment::Model> = state
        .services
        .payments
        .list_payments_for_order(order_id)
        .await?;
    Ok(success_response(payments))
}

/// Refund an order, fully or partially
#[utoipa::path(
    post,
    path = "/api/v1/admin/payments/orders/{order_id}/refund",
    params(("order_id" = Uuid, Path, description = "Order id")),
    request_body = RefundRequest,
    responses(
        (status = 200, description = "Refund applied", body = ApiResponse<RefundOutcome>),
        (status = 400, description = "Amount exceeds what is refundable", body = crate::errors::ErrorResponse),
        (status = 502, description = "Provider rejected the refund", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn refund_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    payload: Option<Json<RefundRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let amount = payload.and_then(|Json(body)| body.amount);
    if let Some(amount) = amount {
        if amount <= Decimal::ZERO {
            return Err(ApiError::ValidationError(
                "Refund amount must be positive".to_string(),
            ));
        }
    }
    let outcome = state.services.payments.refund_order(order_id, amount).await?;
    Ok(success_response(outcome))
}

/// Stripe webhook endpoint
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/stripe",
    request_body(content = String, content_type = "application/json"),
    responses(
        (status = 200, description = "Event accepted", body = ApiResponse<WebhookOutcome>),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!("Stripe webhook without signature header");
            ServiceError::Unauthorized("Missing Stripe-Signature header".to_string())
        })?;

    let outcome = state
        .services
        .payments
        .handle_stripe_webhook(&body, signature)
        .await?;
    Ok(success_response(outcome))
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RefundRequest {
    /// Omit to refund everything still refundable
    pub amount: Option<Decimal>,
}
