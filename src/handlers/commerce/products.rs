use crate::handlers::common::{
    created_response, success_response, validate_input, PaginatedResponse, PaginationParams,
};
use crate::{
    auth::{AuthRouterExt, ADMIN_ROLE},
    entities::commerce::ProductModel,
    errors::ApiError,
    services::commerce::product_catalog_service::{
        CreateProductInput, ProductFilter, ProductSeo, UpdateProductInput,
    },
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for product endpoints
pub fn products_routes() -> Router<AppState> {
    let public = Router::new()
        .route("/", get(list_products))
        .route("/:id", get(get_product))
        .route("/:id/seo", get(get_product_seo))
        .route("/by-slug/:slug", get(get_product_by_slug));

    let admin = Router::new()
        .route("/", post(create_product))
        .route("/:id", axum::routing::put(update_product).delete(delete_product))
        .route("/:id/stock", post(adjust_stock))
        .with_role(ADMIN_ROLE);

    public.merge(admin)
}

/// List products
#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(ProductFilter, PaginationParams),
    responses(
        (status = 200, description = "Products page", body = ApiResponse<PaginatedResponse<ProductModel>>),
    ),
    tag = "Catalog"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(filter): Query<ProductFilter>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (page, per_page) = pagination.normalized();
    let (products, total) = state
        .services
        .catalog
        .list_products(filter, page, per_page)
        .await?;
    Ok(success_response(PaginatedResponse::new(
        products, page, per_page, total,
    )))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state.services.catalog.get_product(id).await?;
    Ok(success_response(product))
}

pub async fn get_product_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state.services.catalog.get_product_by_slug(&slug).await?;
    Ok(success_response(product))
}

/// SEO metadata with fallbacks applied
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}/seo",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "SEO metadata", body = ApiResponse<ProductSeo>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Catalog"
)]
pub async fn get_product_seo(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let seo = state.services.catalog.seo(id).await?;
    Ok(success_response(seo))
}

pub async fn create_product(
    State(state): State<AppState>,
    Json(payload): Json<CreateProductInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let product = state.services.catalog.create_product(payload).await?;
    Ok(created_response(product))
}

pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProductInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let product = state.services.catalog.update_product(id, payload).await?;
    Ok(success_response(product))
}

/// Archives the product
pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state.services.catalog.delete_product(id).await?;
    Ok(success_response(product))
}

pub async fn adjust_stock(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdjustStockRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let product = state.services.catalog.adjust_stock(id, payload.delta).await?;
    Ok(success_response(product))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AdjustStockRequest {
    /// Signed change; the result never drops below zero
    #[validate(range(min = -1_000_000, max = 1_000_000))]
    pub delta: i32,
}
