use crate::handlers::common::{success_response, validate_input};
use crate::{
    auth::Identity,
    errors::ApiError,
    services::commerce::{
        cart_merge::{MergePreview, MergeResult, MergeStrategy},
        cart_service::{AddToCartInput, CartWithItems},
    },
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_to_cart))
        .route("/items/:id", put(update_cart_item).delete(remove_cart_item))
        .route("/coupon", post(apply_coupon).delete(remove_coupon))
        .route("/merge", post(merge_carts))
        .route("/merge/preview", get(preview_merge))
}

/// Get the caller's cart
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Active cart, created when absent", body = ApiResponse<CartWithItems>),
        (status = 401, description = "No user or guest session", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
    let owner = identity.owner()?;
    let cart = state.services.cart.get_or_create_cart(&owner).await?;
    Ok(success_response(cart))
}

/// Add an item to the caller's cart
#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Item added", body = ApiResponse<CartWithItems>),
        (status = 400, description = "Invalid quantity or product unavailable", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<AppState>,
    identity: Identity,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let owner = identity.owner()?;

    let cart = state
        .services
        .cart
        .add_item(
            &owner,
            AddToCartInput {
                product_id: payload.product_id,
                quantity: payload.quantity,
            },
        )
        .await?;

    Ok(success_response(cart))
}

/// Set a line's quantity; zero removes it
pub async fn update_cart_item(
    State(state): State<AppState>,
    identity: Identity,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let owner = identity.owner()?;
    let cart = state
        .services
        .cart
        .update_item(&owner, item_id, payload.quantity)
        .await?;
    Ok(success_response(cart))
}

pub async fn remove_cart_item(
    State(state): State<AppState>,
    identity: Identity,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = identity.owner()?;
    let cart = state.services.cart.remove_item(&owner, item_id).await?;
    Ok(success_response(cart))
}

pub async fn clear_cart(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
    let owner = identity.owner()?;
    let cart = state.services.cart.clear_cart(&owner).await?;
    Ok(success_response(cart))
}

pub async fn apply_coupon(
    State(state): State<AppState>,
    identity: Identity,
    Json(payload): Json<ApplyCouponRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let owner = identity.owner()?;
    let cart = state
        .services
        .cart
        .apply_coupon(&owner, &payload.code)
        .await?;
    Ok(success_response(cart))
}

pub async fn remove_coupon(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
    let owner = identity.owner()?;
    let cart = state.services.cart.remove_coupon(&owner).await?;
    Ok(success_response(cart))
}

/// Conflicts between the guest cart and the signed-in user's cart
#[utoipa::path(
    get,
    path = "/api/v1/cart/merge/preview",
    responses(
        (status = 200, description = "Merge preview", body = ApiResponse<MergePreview>),
        (status = 401, description = "Both x-user-id and x-session-id are required", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn preview_merge(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
    let (user_id, session_id) = merge_identity(&identity)?;
    let preview = state
        .services
        .cart
        .preview_merge(user_id, &session_id)
        .await?;
    Ok(success_response(preview))
}

/// Merge the guest cart into the signed-in user's cart
#[utoipa::path(
    post,
    path = "/api/v1/cart/merge",
    request_body = MergeRequest,
    responses(
        (status = 200, description = "Carts merged", body = ApiResponse<MergeResult>),
        (status = 401, description = "Both x-user-id and x-session-id are required", body = crate::errors::ErrorResponse),
        (status = 422, description = "Strict merge could not be satisfied", body = crate::errors::ErrorResponse),
    ),
    tag = "Cart"
)]
pub async fn merge_carts(
    State(state): State<AppState>,
    identity: Identity,
    payload: Option<Json<MergeRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let (user_id, session_id) = merge_identity(&identity)?;
    let strategy = payload.map(|Json(p)| p.strategy).unwrap_or_default();
    let result = state
        .services
        .cart
        .merge_carts(user_id, &session_id, strategy)
        .await?;
    Ok(success_response(result))
}

fn merge_identity(identity: &Identity) -> Result<(Uuid, String), ApiError> {
    let user_id = identity.require_user()?;
    let session_id = identity
        .session_id
        .clone()
        .ok_or(ApiError::Unauthorized)?;
    Ok((user_id, session_id))
}

// Request DTOs

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 99))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateQuantityRequest {
    #[validate(range(min = 0, max = 99))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1, max = 50))]
    pub code: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct MergeRequest {
    #[serde(default)]
    pub strategy: MergeStrategy,
}
