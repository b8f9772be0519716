use crate::auth::{AuthRouterExt, Identity, ADMIN_ROLE};
use crate::entities::{return_request, shipment, shipping_rate};
use crate::errors::ApiError;
use crate::handlers::common::{created_response, success_response, validate_input};
use crate::services::shipping::{
    CreateRateInput, CreateShipmentInput, RequestReturnInput, ShipmentTracking, ShippingQuote,
    TrackingUpdate, UpdateRateInput,
};
use crate::{ApiResponse, AppState};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

/// Storefront shipping routes, mounted under `/shipping`
pub fn shipping_routes() -> Router<AppState> {
    Router::new()
        .route("/rates", get(list_active_rates))
        .route("/quote", get(quote))
        .route("/track/:tracking_number", get(track))
        .route("/orders/:order_id/shipments", get(list_my_shipments))
        .route("/orders/:order_id/returns", post(request_return))
        .route("/returns", get(list_my_returns))
}

/// Back-office shipping routes, mounted under `/admin/shipping`
pub fn admin_shipping_routes() -> Router<AppState> {
    Router::new()
        .route("/rates", get(list_all_rates).post(create_rate))
        .route("/rates/:id", put(update_rate))
        .route(
            "/orders/:order_id/shipments",
            get(list_order_shipments).post(create_shipment),
        )
        .route("/shipments/:id", get(get_shipment))
        .route("/shipments/:id/events", post(add_tracking_event))
        .route("/orders/:order_id/returns", get(list_order_returns))
        .route("/returns/:id", get(get_return))
        .route("/returns/:id/approve", post(approve_return))
        .route("/returns/:id/reject", post(reject_return))
        .route("/returns/:id/receive", post(receive_return))
        .route("/returns/:id/refund", post(refund_return))
        .with_role(ADMIN_ROLE)
}

#[derive(Debug, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct QuoteQuery {
    pub subtotal: Decimal,
    #[validate(range(min = 1, max = 10000))]
    pub item_count: i32,
}

pub async fn list_active_rates(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let rates = state.services.shipping.list_rates(true).await?;
    Ok(success_response(rates))
}

/// Quote every active shipping method for a basket
#[utoipa::path(
    get,
    path = "/api/v1/shipping/quote",
    params(QuoteQuery),
    responses((status = 200, description = "Quotes cheapest first", body = ApiResponse<Vec<ShippingQuote>>)),
    tag = "Shipping"
)]
pub async fn quote(
    State(state): State<AppState>,
    Query(query): Query<QuoteQuery>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&query)?;
    if query.subtotal < Decimal::ZERO {
        return Err(ApiError::ValidationError(
            "subtotal must not be negative".to_string(),
        ));
    }
    let quotes = state
        .services
        .shipping
        .quote(query.subtotal, query.item_count)
        .await?;
    Ok(success_response(quotes))
}

/// Track a shipment by carrier tracking number
#[utoipa::path(
    get,
    path = "/api/v1/shipping/track/{tracking_number}",
    params(("tracking_number" = String, Path, description = "Carrier tracking number")),
    responses(
        (status = 200, description = "Shipment with its tracking history", body = ApiResponse<ShipmentTracking>),
        (status = 404, description = "Unknown tracking number", body = crate::errors::ErrorResponse),
    ),
    tag = "Shipping"
)]
pub async fn track(
    State(state): State<AppState>,
    Path(tracking_number): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tracking = state.services.shipping.track(&tracking_number).await?;
    Ok(success_response(tracking))
}

pub async fn list_my_shipments(
    State(state): State<AppState>,
    identity: Identity,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.require_user()?;
    state
        .services
        .orders
        .get_order_for_owner(user_id, order_id)
        .await?;
    let shipments: Vec<shipment::Model> = state
        .services
        .shipping
        .list_shipments_for_order(order_id)
        .await?;
    Ok(success_response(shipments))
}

/// Request a return for a delivered order
#[utoipa::path(
    post,
    path = "/api/v1/shipping/orders/{order_id}/returns",
    params(("order_id" = Uuid, Path, description = "Order id")),
    request_body = RequestReturnInput,
    responses(
        (status = 201, description = "Return requested", body = ApiResponse<return_request::Model>),
        (status = 400, description = "Order not delivered, window closed or quantities exceed the order", body = crate::errors::ErrorResponse),
    ),
    tag = "Returns"
)]
pub async fn request_return(
    State(state): State<AppState>,
    identity: Identity,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<RequestReturnInput>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.require_user()?;
    validate_input(&payload)?;
    let request = state
        .services
        .shipping
        .request_return(user_id, order_id, payload)
        .await?;
    Ok(created_response(request))
}

pub async fn list_my_returns(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.require_user()?;
    let returns = state.services.shipping.list_returns_for_user(user_id).await?;
    Ok(success_response(returns))
}

pub async fn list_all_rates(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let rates: Vec<shipping_rate::Model> = state.services.shipping.list_rates(false).await?;
    Ok(success_response(rates))
}

pub async fn create_rate(
    State(state): State<AppState>,
    Json(payload): Json<CreateRateInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let rate = state.services.shipping.create_rate(payload).await?;
    Ok(created_response(rate))
}

pub async fn update_rate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateRateInput>,
) -> Result<impl IntoResponse, ApiError> {
    let rate = state.services.shipping.update_rate(id, payload).await?;
    Ok(success_response(rate))
}

pub async fn list_order_shipments(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let shipments = state
        .services
        .shipping
        .list_shipments_for_order(order_id)
        .await?;
    Ok(success_response(shipments))
}

/// Ship an order
#[utoipa::path(
    post,
    path = "/api/v1/admin/shipping/orders/{order_id}/shipments",
    params(("order_id" = Uuid, Path, description = "Order id")),
    request_body = CreateShipmentInput,
    responses(
        (status = 201, description = "Shipment created and order marked shipped", body = ApiResponse<shipment::Model>),
        (status = 400, description = "Order cannot be shipped in its current status", body = crate::errors::ErrorResponse),
        (status = 409, description = "Tracking number already used", body = crate::errors::ErrorResponse),
    ),
    tag = "Shipping"
)]
pub async fn create_shipment(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<CreateShipmentInput>,
) -> Result<impl IntoResponse, ApiError> {
    let shipment = state
        .services
        .shipping
        .create_shipment(order_id, payload)
        .await?;
    Ok(created_response(shipment))
}

pub async fn get_shipment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let shipment = state.services.shipping.get_shipment(id).await?;
    Ok(success_response(shipment))
}

pub async fn add_tracking_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TrackingUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let shipment = state
        .services
        .shipping
        .add_tracking_event(id, payload)
        .await?;
    Ok(success_response(shipment))
}

pub async fn list_order_returns(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let returns = state
        .services
        .shipping
        .list_returns_for_order(order_id)
        .await?;
    Ok(success_response(returns))
}

pub async fn get_return(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let request = state.services.shipping.get_return(id).await?;
    Ok(success_response(request))
}

pub async fn approve_return(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<ReturnNoteRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let note = payload.and_then(|Json(body)| body.note);
    let request = state.services.shipping.approve_return(id, note).await?;
    Ok(success_response(request))
}

pub async fn reject_return(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReturnNoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let note = payload.note.ok_or_else(|| {
        ApiError::ValidationError("A note is required to reject a return".to_string())
    })?;
    let request = state.services.shipping.reject_return(id, note).await?;
    Ok(success_response(request))
}

pub async fn receive_return(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let request = state.services.shipping.receive_return(id).await?;
    Ok(success_response(request))
}

/// Refund a received return through the order's payment provider
pub async fn refund_return(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let request = state.services.shipping.refund_return(id).await?;
    Ok(success_response(request))
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ReturnNoteRequest {
    pub note: Option<String>,
}
