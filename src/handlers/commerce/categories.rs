use crate::handlers::common::{created_response, no_content_response, success_response, validate_input};
use crate::{
    auth::{AuthRouterExt, ADMIN_ROLE},
    errors::ApiError,
    services::commerce::category_service::{
        CategoryNode, CreateCategoryInput, UpdateCategoryInput,
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
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

pub fn categories_routes() -> Router<AppState> {
    let public = Router::new()
        .route("/tree", get(category_tree))
        .route("/:id", get(get_category))
        .route("/:id/breadcrumbs", get(breadcrumbs))
        .route("/:id/descendants", get(descendants));

    let admin = Router::new()
        .route("/", post(create_category))
        .route("/:id", axum::routing::put(update_category).delete(delete_category))
        .route("/:id/move", post(move_category))
        .with_role(ADMIN_ROLE);

    public.merge(admin)
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TreeQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

/// Nested category tree
#[utoipa::path(
    get,
    path = "/api/v1/categories/tree",
    params(TreeQuery),
    responses((status = 200, description = "Category tree", body = ApiResponse<Vec<CategoryNode>>)),
    tag = "Catalog"
)]
pub async fn category_tree(
    State(state): State<AppState>,
    Query(query): Query<TreeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let tree = state.services.categories.tree(query.include_inactive).await?;
    Ok(success_response(tree))
}

pub async fn get_category(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let category = state.services.categories.get_category(id).await?;
    Ok(success_response(category))
}

/// Root-first path to the category
pub async fn breadcrumbs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let trail = state.services.categories.breadcrumbs(id).await?;
    Ok(success_response(trail))
}

pub async fn descendants(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let ids = state.services.categories.descendant_ids(id).await?;
    Ok(success_response(ids))
}

pub async fn create_category(
    State(state): State<AppState>,
    Json(payload): Json<CreateCategoryInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let category = state.services.categories.create_category(payload).await?;
    Ok(created_response(category))
}

pub async fn update_category(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateCategoryInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let category = state.services.categories.update_category(id, payload).await?;
    Ok(success_response(category))
}

pub async fn delete_category(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.services.categories.delete_category(id).await?;
    Ok(no_content_response())
}

/// Re-parent a category; `parent_id: null` makes it a root
#[utoipa::path(
    post,
    path = "/api/v1/categories/{id}/move",
    params(("id" = Uuid, Path, description = "Category id")),
    request_body = MoveCategoryRequest,
    responses(
        (status = 200, description = "Category moved", body = ApiResponse<crate::entities::commerce::CategoryModel>),
        (status = 400, description = "Move would create a cycle or exceed the depth limit", body = crate::errors::ErrorResponse),
    ),
    tag = "Catalog"
)]
pub async fn move_category(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<MoveCategoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let category = state
        .services
        .categories
        .move_category(id, payload.parent_id)
        .await?;
    Ok(success_response(category))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct MoveCategoryRequest {
    pub parent_id: Option<Uuid>,
}
