use crate::errors::ApiError;
use crate::handlers::common::success_response;
use crate::services::search::{PopularSearch, SearchQuery, SearchResults};
use crate::{ApiResponse, AppState};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;

const DEFAULT_SUGGESTIONS: u64 = 8;
const MAX_SUGGESTIONS: u64 = 20;

pub fn search_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(search_products))
        .route("/suggest", get(suggest))
        .route("/popular", get(popular))
}

/// Full-text product search with facets
#[utoipa::path(
    get,
    path = "/api/v1/search",
    params(SearchQuery),
    responses(
        (status = 200, description = "Matching products with facet counts", body = ApiResponse<SearchResults>),
        (status = 400, description = "Invalid price range", body = crate::errors::ErrorResponse),
    ),
    tag = "Search"
)]
pub async fn search_products(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let results = state.services.search.search(query).await?;
    Ok(success_response(results))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SuggestQuery {
    pub q: String,
    pub limit: Option<u64>,
}

/// Product names starting with the prefix
#[utoipa::path(
    get,
    path = "/api/v1/search/suggest",
    params(SuggestQuery),
    responses((status = 200, description = "Suggested product names", body = ApiResponse<Vec<String>>)),
    tag = "Search"
)]
pub async fn suggest(
    State(state): State<AppState>,
    Query(query): Query<SuggestQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SUGGESTIONS)
        .clamp(1, MAX_SUGGESTIONS);
    let suggestions = state.services.search.suggest(&query.q, limit).await?;
    Ok(success_response(suggestions))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PopularQuery {
    pub limit: Option<u64>,
}

pub async fn popular(
    State(state): State<AppState>,
    Query(query): Query<PopularQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(10).clamp(1, 50);
    let popular: Vec<PopularSearch> = state.services.search.popular_searches(limit).await?;
    Ok(success_response(popular))
}
