use crate::handlers::common::{created_response, success_response, validate_input};
use crate::{
    auth::Identity,
    entities::commerce::CheckoutSessionModel,
    errors::ApiError,
    services::{
        commerce::checkout_service::{CodOrderInput, CompleteCheckoutInput, CreateCheckoutInput},
        orders::OrderWithItems,
    },
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use uuid::Uuid;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/complete", post(complete_session))
        .route("/sessions/:id/cancel", post(cancel_session))
        .route("/cod", post(place_cod_order))
}

/// Start an online-payment checkout for the caller's cart
#[utoipa::path(
    post,
    path = "/api/v1/checkout/sessions",
    request_body = CreateCheckoutInput,
    responses(
        (status = 201, description = "Checkout session created and stock reserved", body = ApiResponse<CheckoutSessionModel>),
        (status = 400, description = "Invalid address, empty cart or unusable coupon", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "Checkout"
)]
pub async fn create_session(
    State(state): State<AppState>,
    identity: Identity,
    Json(payload): Json<CreateCheckoutInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let owner = identity.owner()?;
    let session = state
        .services
        .checkout
        .create_session(&owner, payload)
        .await?;
    Ok(created_response(session))
}

pub async fn get_session(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = identity.owner()?;
    let session = state.services.checkout.get_session(&owner, id).await?;
    Ok(success_response(session))
}

/// Confirm the payment and place the order
#[utoipa::path(
    post,
    path = "/api/v1/checkout/sessions/{id}/complete",
    params(("id" = Uuid, Path, description = "Checkout session id")),
    request_body = CompleteCheckoutInput,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<OrderWithItems>),
        (status = 402, description = "Payment not confirmed", body = crate::errors::ErrorResponse),
        (status = 409, description = "Session expired or no longer active", body = crate::errors::ErrorResponse),
    ),
    tag = "Checkout"
)]
pub async fn complete_session(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
    payload: Option<Json<CompleteCheckoutInput>>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = identity.owner()?;
    let reference = payload.and_then(|Json(body)| body.payment_reference);
    let order = state
        .services
        .checkout
        .complete_session(&owner, id, reference)
        .await?;
    Ok(created_response(order))
}

pub async fn cancel_session(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = identity.owner()?;
    let session = state.services.checkout.cancel_session(&owner, id).await?;
    Ok(success_response(session))
}

/// Place a cash on delivery order straight from the cart
#[utoipa::path(
    post,
    path = "/api/v1/checkout/cod",
    request_body = CodOrderInput,
    responses(
        (status = 201, description = "Order placed with payment pending", body = ApiResponse<OrderWithItems>),
        (status = 400, description = "Order total above the cash on delivery limit", body = crate::errors::ErrorResponse),
    ),
    tag = "Checkout"
)]
pub async fn place_cod_order(
    State(state): State<AppState>,
    identity: Identity,
    Json(payload): Json<CodOrderInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let owner = identity.owner()?;
    let order = state
        .services
        .checkout
        .place_cod_order(&owner, payload)
        .await?;
    Ok(created_response(order))
}
