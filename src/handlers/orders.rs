use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{AuthRouterExt, Identity, ADMIN_ROLE};
use crate::entities::order::{Model as OrderModel, OrderStatus};
use crate::handlers::common::{success_response, validate_input, PaginatedResponse, PaginationParams};
use crate::services::orders::{OrderFilter, OrderWithItems};
use crate::{errors::ApiError, errors::ServiceError, ApiResponse, AppState};

/// Customer routes under `/orders`, admin routes under `/admin/orders`
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_my_orders))
        .route("/:id", get(get_my_order))
}

pub fn admin_orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/status", put(update_order_status))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/cod-collected", post(mark_cod_collected))
        .with_role(ADMIN_ROLE)
}

// The path segment may be a UUID or an order number
async fn resolve_order_id(state: &AppState, id: &str) -> Result<Uuid, ServiceError> {
    if let Ok(uuid) = Uuid::parse_str(id) {
        return Ok(uuid);
    }
    let order = state.services.orders.get_order_by_number(id).await?;
    Ok(order.order.id)
}

/// List the caller's orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(PaginationParams),
    responses(
        (status = 200, description = "Orders newest first", body = ApiResponse<PaginatedResponse<OrderModel>>),
        (status = 401, description = "Not signed in", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    identity: Identity,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.require_user()?;
    let (page, per_page) = pagination.normalized();
    let (orders, total) = state
        .services
        .orders
        .list_orders_for_user(user_id, page, per_page)
        .await?;
    Ok(success_response(PaginatedResponse::new(orders, page, per_page, total)))
}

/// Get one of the caller's orders by id or order number
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = String, Path, description = "Order id or order number")),
    responses(
        (status = 200, description = "Order with items", body = ApiResponse<OrderWithItems>),
        (status = 404, description = "No such order for this user", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn get_my_order(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.require_user()?;
    let order_id = resolve_order_id(&state, &id).await?;
    let order = state
        .services
        .orders
        .get_order_for_owner(user_id, order_id)
        .await?;
    Ok(success_response(order))
}

pub async fn list_orders(
    State(state): State<AppState>,
    Query(filter): Query<OrderFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (page, per_page) = pagination.normalized();
    let (orders, total) = state
        .services
        .orders
        .list_orders(filter, page, per_page)
        .await?;
    Ok(success_response(PaginatedResponse::new(orders, page, per_page, total)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let order_id = resolve_order_id(&state, &id).await?;
    let order = state.services.orders.get_order(order_id).await?;
    Ok(success_response(order))
}

/// Move an order to a new status
#[utoipa::path(
    put,
    path = "/api/v1/admin/orders/{id}/status",
    params(("id" = String, Path, description = "Order id or order number")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderModel>),
        (status = 400, description = "Illegal transition", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order_id = resolve_order_id(&state, &id).await?;
    let order = state
        .services
        .orders
        .update_status(order_id, payload.status)
        .await?;
    Ok(success_response(order))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Option<Json<CancelOrderRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    validate_input(&request)?;
    let order_id = resolve_order_id(&state, &id).await?;

    let reason = request
        .reason
        .unwrap_or_else(|| "Cancelled by administrator".to_string());
    let order = state.services.orders.cancel_order(order_id, reason).await?;
    Ok(success_response(order))
}

/// Courier handed over the cash for a cash on delivery order
pub async fn mark_cod_collected(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let order_id = resolve_order_id(&state, &id).await?;
    let order = state.services.orders.mark_paid(order_id).await?;
    Ok(success_response(order))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct CancelOrderRequest {
    #[validate(length(min = 1, max = 500))]
    pub reason: Option<String>,
}
