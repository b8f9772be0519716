use crate::{
    entities::{
        commerce::{product, Category, Product, ProductModel, ProductStatus},
        search_query,
    },
    errors::ServiceError,
    services::commerce::category_service::subtree_ids,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Alias, Expr, Func},
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, FromQueryResult,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use strum::{Display, EnumString};
use tracing::{debug, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

pub const MAX_PER_PAGE: u64 = 100;
pub const MAX_SUGGESTIONS: u64 = 20;

/// Upper bounds of the price facet buckets; the last bucket is open-ended.
const PRICE_BUCKETS: [i64; 4] = [25, 50, 100, 200];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SearchSort {
    #[default]
    Relevance,
    PriceAsc,
    PriceDesc,
    Newest,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// Free-text term matched against name, description and SKU
    pub q: Option<String>,
    /// Restrict to this category and everything beneath it
    pub category_id: Option<Uuid>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub in_stock: Option<bool>,
    #[serde(default)]
    pub sort: SearchSort,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SearchResults {
    pub products: Vec<ProductModel>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub facets: SearchFacets,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct SearchFacets {
    pub categories: Vec<CategoryFacet>,
    pub price_ranges: Vec<PriceFacet>,
    pub availability: AvailabilityFacet,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CategoryFacet {
    pub category_id: Uuid,
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PriceFacet {
    pub min: Decimal,
    /// `None` for the open-ended top bucket
    pub max: Option<Decimal>,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct AvailabilityFacet {
    pub in_stock: u64,
    pub out_of_stock: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromQueryResult, ToSchema)]
pub struct PopularSearch {
    pub term: String,
    pub searches: i64,
}

/// Trimmed, lower-cased term with whitespace collapsed; `None` when blank.
pub fn normalize_term(raw: &str) -> Option<String> {
    let term = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    (!term.is_empty()).then_some(term)
}

/// LIKE wildcards in user input are matched literally by dropping them.
fn like_safe(term: &str) -> String {
    term.replace(['%', '_', '\\'], "")
}

/// Lower is better: exact name, name prefix, name substring, then matches
/// on SKU or description only.
pub fn relevance_rank(product: &ProductModel, term: &str) -> u8 {
    let name = product.name.to_lowercase();
    if name == term {
        0
    } else if name.starts_with(term) {
        1
    } else if name.contains(term) {
        2
    } else {
        3
    }
}

pub fn sort_products(products: &mut [ProductModel], sort: SearchSort, term: Option<&str>) {
    match sort {
        SearchSort::Relevance => products.sort_by(|a, b| {
            let by_rank = match term {
                Some(term) => relevance_rank(a, term).cmp(&relevance_rank(b, term)),
                None => Ordering::Equal,
            };
            by_rank.then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        }),
        SearchSort::PriceAsc => {
            products.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.name.cmp(&b.name)))
        }
        SearchSort::PriceDesc => {
            products.sort_by(|a, b| b.price.cmp(&a.price).then_with(|| a.name.cmp(&b.name)))
        }
        SearchSort::Newest => products.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
    }
}

/// Counts across the whole filtered result set, not just the current page.
pub fn build_facets(products: &[ProductModel], category_names: &HashMap<Uuid, String>) -> SearchFacets {
    let mut by_category: BTreeMap<Uuid, u64> = BTreeMap::new();
    let mut price_counts = vec![0u64; PRICE_BUCKETS.len() + 1];
    let mut availability = AvailabilityFacet::default();

    for product in products {
        if let Some(category_id) = product.category_id {
            *by_category.entry(category_id).or_default() += 1;
        }
        let bucket = PRICE_BUCKETS
            .iter()
            .position(|upper| product.price < Decimal::from(*upper))
            .unwrap_or(PRICE_BUCKETS.len());
        price_counts[bucket] += 1;
        if product.stock_quantity > 0 {
            availability.in_stock += 1;
        } else {
            availability.out_of_stock += 1;
        }
    }

    let mut categories: Vec<CategoryFacet> = by_category
        .into_iter()
        .filter_map(|(category_id, count)| {
            category_names.get(&category_id).map(|name| CategoryFacet {
                category_id,
                name: name.clone(),
                count,
            })
        })
        .collect();
    categories.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));

    let price_ranges = price_counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| PriceFacet {
            min: if i == 0 { Decimal::ZERO } else { Decimal::from(PRICE_BUCKETS[i - 1]) },
            max: PRICE_BUCKETS.get(i).copied().map(Decimal::from),
            count,
        })
        .collect();

    SearchFacets {
        categories,
        price_ranges,
        availability,
    }
}

/// Product search over the active catalog.
#[derive(Clone)]
pub struct SearchService {
    db: Arc<DatabaseConnection>,
    default_per_page: u64,
}

impl SearchService {
    pub fn new(db: Arc<DatabaseConnection>, default_per_page: u64) -> Self {
        Self {
            db,
            default_per_page,
        }
    }

    #[instrument(skip(self))]
    pub async fn search(&self, query: SearchQuery) -> Result<SearchResults, ServiceError> {
        if let (Some(min), Some(max)) = (query.min_price, query.max_price) {
            if min > max {
                return Err(ServiceError::ValidationError(
                    "min_price must not exceed max_price".to_string(),
                ));
            }
        }
        let page = query.page.unwrap_or(1).max(1);
        let per_page = query
            .per_page
            .unwrap_or(self.default_per_page)
            .clamp(1, MAX_PER_PAGE);
        let term = query.q.as_deref().and_then(normalize_term);

        let categories = Category::find().all(&*self.db).await?;
        let category_names: HashMap<Uuid, String> =
            categories.iter().map(|c| (c.id, c.name.clone())).collect();

        let mut select = Product::find().filter(product::Column::Status.eq(ProductStatus::Active));
        if let Some(term) = term.as_deref() {
            let pattern = format!("%{}%", like_safe(term));
            select = select.filter(
                Condition::any()
                    .add(Expr::expr(Func::lower(Expr::col(product::Column::Name))).like(pattern.clone()))
                    .add(Expr::expr(Func::lower(Expr::col(product::Column::Description))).like(pattern.clone()))
                    .add(Expr::expr(Func::lower(Expr::col(product::Column::Sku))).like(pattern)),
            );
        }
        if let Some(category_id) = query.category_id {
            if !category_names.contains_key(&category_id) {
                return Err(ServiceError::not_found("Category", category_id));
            }
            let scope: Vec<Uuid> = subtree_ids(&categories, category_id).into_iter().collect();
            select = select.filter(product::Column::CategoryId.is_in(scope));
        }
        if let Some(min_price) = query.min_price {
            select = select.filter(product::Column::Price.gte(min_price));
        }
        if let Some(max_price) = query.max_price {
            select = select.filter(product::Column::Price.lte(max_price));
        }
        if query.in_stock == Some(true) {
            select = select.filter(product::Column::StockQuantity.gt(0));
        }

        let mut products = select.all(&*self.db).await?;
        let facets = build_facets(&products, &category_names);
        sort_products(&mut products, query.sort, term.as_deref());

        let total = products.len() as u64;
        let start = ((page - 1) * per_page).min(total) as usize;
        let end = (start + per_page as usize).min(products.len());
        let products = products.drain(start..end).collect();

        if let Some(term) = term {
            self.log_query(term, total).await;
        }
        metrics::counter!("storefront.search.queries", 1);

        Ok(SearchResults {
            products,
            total,
            page,
            per_page,
            facets,
        })
    }

    /// Active product names starting with `prefix`, alphabetically.
    pub async fn suggest(&self, prefix: &str, limit: u64) -> Result<Vec<String>, ServiceError> {
        let Some(prefix) = normalize_term(prefix) else {
            return Ok(Vec::new());
        };
        let pattern = format!("{}%", like_safe(&prefix));
        let names = Product::find()
            .select_only()
            .column(product::Column::Name)
            .filter(product::Column::Status.eq(ProductStatus::Active))
            .filter(Expr::expr(Func::lower(Expr::col(product::Column::Name))).like(pattern))
            .order_by_asc(product::Column::Name)
            .limit(limit.clamp(1, MAX_SUGGESTIONS))
            .into_tuple::<String>()
            .all(&*self.db)
            .await?;
        Ok(names)
    }

    /// Most frequent logged terms that returned at least one product.
    pub async fn popular_searches(&self, limit: u64) -> Result<Vec<PopularSearch>, ServiceError> {
        let popular = search_query::Entity::find()
            .select_only()
            .column(search_query::Column::Term)
            .column_as(Expr::col(search_query::Column::Id).count(), "searches")
            .filter(search_query::Column::ResultCount.gt(0))
            .group_by(search_query::Column::Term)
            .order_by_desc(Expr::col(Alias::new("searches")))
            .order_by_asc(search_query::Column::Term)
            .limit(limit.clamp(1, MAX_PER_PAGE))
            .into_model::<PopularSearch>()
            .all(&*self.db)
            .await?;
        Ok(popular)
    }

    /// Best effort: a failed insert must not fail the search.
    async fn log_query(&self, term: String, result_count: u64) {
        let entry = search_query::ActiveModel {
            id: Set(Uuid::new_v4()),
            term: Set(term.clone()),
            result_count: Set(i32::try_from(result_count).unwrap_or(i32::MAX)),
            created_at: Set(Utc::now()),
        };
        match entry.insert(&*self.db).await {
            Ok(_) => debug!(%term, result_count, "Search logged"),
            Err(e) => warn!(%term, error = %e, "Failed to log search query"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product(name: &str, price: Decimal, stock: i32, category_id: Option<Uuid>) -> ProductModel {
        let now = Utc::now();
        ProductModel {
            id: Uuid::new_v4(),
            name: name.into(),
            slug: name.to_lowercase().replace(' ', "-"),
            sku: format!("SKU-{}", name.len()),
            description: None,
            price,
            compare_at_price: None,
            stock_quantity: stock,
            category_id,
            status: ProductStatus::Active,
            seo_title: None,
            seo_description: None,
            seo_keywords: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn normalizes_terms() {
        assert_eq!(normalize_term("  Red   SHOES "), Some("red shoes".into()));
        assert_eq!(normalize_term("   "), None);
    }

    #[test]
    fn like_wildcards_are_dropped() {
        assert_eq!(like_safe("50%_off"), "50off");
    }

    #[test]
    fn relevance_puts_name_matches_first() {
        let mut products = vec![
            product("Blue Mug", dec!(5), 1, None),
            product("Mug", dec!(5), 1, None),
            product("Travel mug lid", dec!(5), 1, None),
            product("Mugwort Tea", dec!(5), 1, None),
        ];
        products[0].name = "Coffee cup".into();
        products[0].description = Some("a mug".into());

        sort_products(&mut products, SearchSort::Relevance, Some("mug"));
        let names: Vec<_> = products.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Mug", "Mugwort Tea", "Travel mug lid", "Coffee cup"]);
    }

    #[test]
    fn price_sorts() {
        let mut products = vec![
            product("A", dec!(30), 1, None),
            product("B", dec!(10), 1, None),
            product("C", dec!(20), 1, None),
        ];
        sort_products(&mut products, SearchSort::PriceAsc, None);
        assert_eq!(products[0].price, dec!(10));
        sort_products(&mut products, SearchSort::PriceDesc, None);
        assert_eq!(products[0].price, dec!(30));
    }

    #[test]
    fn facets_count_buckets_and_availability() {
        let shoes = Uuid::new_v4();
        let hats = Uuid::new_v4();
        let names = HashMap::from([(shoes, "Shoes".to_string()), (hats, "Hats".to_string())]);
        let products = vec![
            product("a", dec!(10), 3, Some(shoes)),
            product("b", dec!(25), 0, Some(shoes)),
            product("c", dec!(99.99), 1, Some(hats)),
            product("d", dec!(500), 1, None),
        ];

        let facets = build_facets(&products, &names);

        assert_eq!(facets.categories[0].name, "Shoes");
        assert_eq!(facets.categories[0].count, 2);
        assert_eq!(facets.categories[1].count, 1);
        let counts: Vec<u64> = facets.price_ranges.iter().map(|b| b.count).collect();
        assert_eq!(counts, [1, 1, 1, 0, 1]);
        assert_eq!(facets.price_ranges[4].max, None);
        assert_eq!(facets.availability, AvailabilityFacet { in_stock: 3, out_of_stock: 1 });
    }
}
