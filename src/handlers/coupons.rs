use crate::auth::{AuthRouterExt, ADMIN_ROLE};
use crate::entities::commerce::CouponModel;
use crate::errors::ApiError;
use crate::handlers::common::{created_response, success_response, PaginatedResponse, PaginationParams};
use crate::services::coupons::{CreateCouponInput, UpdateCouponInput};
use crate::{ApiResponse, AppState};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

/// Coupon administration, mounted under `/admin/coupons`
pub fn coupons_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_coupons).post(create_coupon))
        .route("/:id", get(get_coupon).put(update_coupon))
        .route("/:id/deactivate", post(deactivate_coupon))
        .route("/code/:code", get(get_coupon_by_code))
        .with_role(ADMIN_ROLE)
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CouponListQuery {
    #[serde(default)]
    pub active_only: bool,
}

/// List coupons
#[utoipa::path(
    get,
    path = "/api/v1/admin/coupons",
    params(CouponListQuery, PaginationParams),
    responses(
        (status = 200, description = "Coupons newest first", body = ApiResponse<PaginatedResponse<CouponModel>>),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
    ),
    tag = "Coupons"
)]
pub async fn list_coupons(
    State(state): State<AppState>,
    Query(query): Query<CouponListQuery>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (page, per_page) = pagination.normalized();
    let (coupons, total) = state
        .services
        .coupons
        .list_coupons(query.active_only, page, per_page)
        .await?;
    Ok(success_response(PaginatedResponse::new(coupons, page, per_page, total)))
}

/// Create a coupon
#[utoipa::path(
    post,
    path = "/api/v1/admin/coupons",
    request_body = CreateCouponInput,
    responses(
        (status = 201, description = "Coupon created", body = ApiResponse<CouponModel>),
        (status = 400, description = "Invalid discount settings", body = crate::errors::ErrorResponse),
        (status = 409, description = "Code already in use", body = crate::errors::ErrorResponse),
    ),
    tag = "Coupons"
)]
pub async fn create_coupon(
    State(state): State<AppState>,
    Json(payload): Json<CreateCouponInput>,
) -> Result<impl IntoResponse, ApiError> {
    let coupon = state.services.coupons.create_coupon(payload).await?;
    Ok(created_response(coupon))
}

pub async fn get_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let coupon = state.services.coupons.get_coupon(id).await?;
    Ok(success_response(coupon))
}

pub async fn get_coupon_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let coupon = state.services.coupons.get_by_code(&code).await?;
    Ok(success_response(coupon))
}

pub async fn update_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCouponInput>,
) -> Result<impl IntoResponse, ApiError> {
    let coupon = state.services.coupons.update_coupon(id, payload).await?;
    Ok(success_response(coupon))
}

pub async fn deactivate_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let coupon = state.services.coupons.deactivate_coupon(id).await?;
    Ok(success_response(coupon))
}
