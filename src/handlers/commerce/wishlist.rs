use crate::handlers::common::{success_response, validate_input};
use crate::{
    auth::Identity,
    errors::ApiError,
    services::commerce::wishlist_service::WishlistWithItems,
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Wishlists belong to signed-in users only
pub fn wishlist_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_wishlist).delete(clear_wishlist))
        .route("/items", post(add_item))
        .route("/items/:product_id", delete(remove_item))
        .route("/items/:product_id/move-to-cart", post(move_to_cart))
}

#[utoipa::path(
    get,
    path = "/api/v1/wishlist",
    responses(
        (status = 200, description = "The caller's wishlist", body = ApiResponse<WishlistWithItems>),
        (status = 401, description = "Not signed in", body = crate::errors::ErrorResponse),
    ),
    tag = "Wishlist"
)]
pub async fn get_wishlist(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.require_user()?;
    let wishlist = state.services.wishlist.get_wishlist(user_id).await?;
    Ok(success_response(wishlist))
}

pub async fn add_item(
    State(state): State<AppState>,
    identity: Identity,
    Json(payload): Json<AddWishlistItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.require_user()?;
    let wishlist = state
        .services
        .wishlist
        .add_item(user_id, payload.product_id)
        .await?;
    Ok(success_response(wishlist))
}

pub async fn remove_item(
    State(state): State<AppState>,
    identity: Identity,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.require_user()?;
    let wishlist = state
        .services
        .wishlist
        .remove_item(user_id, product_id)
        .await?;
    Ok(success_response(wishlist))
}

pub async fn move_to_cart(
    State(state): State<AppState>,
    identity: Identity,
    Path(product_id): Path<Uuid>,
    payload: Option<Json<MoveToCartRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.require_user()?;
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    validate_input(&request)?;

    let cart = state
        .services
        .wishlist
        .move_to_cart(user_id, product_id, request.quantity)
        .await?;
    Ok(success_response(cart))
}

pub async fn clear_wishlist(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = identity.require_user()?;
    let wishlist = state.services.wishlist.clear(user_id).await?;
    Ok(success_response(wishlist))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddWishlistItemRequest {
    pub product_id: Uuid,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct MoveToCartRequest {
    #[serde(default = "one")]
    #[validate(range(min = 1, max = 99))]
    pub quantity: i32,
}

impl Default for MoveToCartRequest {
    fn default() -> Self {
        Self { quantity: one() }
    }
}

fn one() -> i32 {
    1
}
