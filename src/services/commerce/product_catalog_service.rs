use crate::{
    entities::commerce::{product, Category, Product, ProductModel, ProductStatus},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationError};

const SEO_DESCRIPTION_LEN: usize = 160;

static NON_SLUG_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Lower-case, hyphen-separated form of `name`.
pub fn slugify(name: &str) -> String {
    NON_SLUG_CHARS
        .replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

pub(crate) fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ValidationError::new("must_not_be_negative"));
    }
    Ok(())
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

/// Product catalog service
#[derive(Clone)]
pub struct ProductCatalogService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl ProductCatalogService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Create a new product. The slug is derived from the name when omitted.
    #[instrument(skip(self, input), fields(sku = %input.sku))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<ProductModel, ServiceError> {
        input.validate()?;
        self.ensure_unique_sku(&input.sku, None).await?;
        if let Some(category_id) = input.category_id {
            self.ensure_category_exists(category_id).await?;
        }

        let slug = match input.slug.as_deref() {
            Some(slug) => {
                let slug = slugify(slug);
                self.ensure_unique_slug(&slug, None).await?;
                slug
            }
            None => self.unique_slug_for(&input.name).await?,
        };

        let now = Utc::now();
        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            slug: Set(slug),
            sku: Set(input.sku),
            description: Set(input.description),
            price: Set(input.price),
            compare_at_price: Set(input.compare_at_price),
            stock_quantity: Set(input.stock_quantity),
            category_id: Set(input.category_id),
            status: Set(input.status.unwrap_or(ProductStatus::Active)),
            seo_title: Set(input.seo_title),
            seo_description: Set(input.seo_description),
            seo_keywords: Set(input.seo_keywords),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(product_id = %product.id, slug = %product.slug, "Created product");
        Ok(product)
    }

    pub async fn get_product(&self, product_id: Uuid) -> Result<ProductModel, ServiceError> {
        Product::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", product_id))
    }

    pub async fn get_product_by_slug(&self, slug: &str) -> Result<ProductModel, ServiceError> {
        Product::find()
            .filter(product::Column::Slug.eq(slug))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", slug))
    }

    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        filter: ProductFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<ProductModel>, u64), ServiceError> {
        let mut query = Product::find();

        if let Some(status) = filter.status {
            query = query.filter(product::Column::Status.eq(status));
        }
        if let Some(category_id) = filter.category_id {
            query = query.filter(product::Column::CategoryId.eq(category_id));
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.filter(
                Condition::any()
                    .add(product::Column::Name.contains(search))
                    .add(product::Column::Sku.contains(search)),
            );
        }
        if let Some(min_price) = filter.min_price {
            query = query.filter(product::Column::Price.gte(min_price));
        }
        if let Some(max_price) = filter.max_price {
            query = query.filter(product::Column::Price.lte(max_price));
        }
        if filter.in_stock == Some(true) {
            query = query.filter(product::Column::StockQuantity.gt(0));
        }

        let paginator = query
            .order_by_desc(product::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((products, total))
    }

    #[instrument(skip(self, input))]
    pub async fn update_product(
        &self,
        product_id: Uuid,
        input: UpdateProductInput,
    ) -> Result<ProductModel, ServiceError> {
        input.validate()?;
        if let Some(ref sku) = input.sku {
            self.ensure_unique_sku(sku, Some(product_id)).await?;
        }
        if let Some(category_id) = input.category_id {
            self.ensure_category_exists(category_id).await?;
        }

        let product = self.get_product(product_id).await?;
        let mut active: product::ActiveModel = product.into();

        if let Some(name) = input.name {
            active.name = Set(name);
        }
        if let Some(slug) = input.slug {
            let slug = slugify(&slug);
            self.ensure_unique_slug(&slug, Some(product_id)).await?;
            active.slug = Set(slug);
        }
        if let Some(sku) = input.sku {
            active.sku = Set(sku);
        }
        if let Some(description) = input.description {
            active.description = Set(Some(description));
        }
        if let Some(price) = input.price {
            active.price = Set(price);
        }
        if let Some(compare_at_price) = input.compare_at_price {
            active.compare_at_price = Set(Some(compare_at_price));
        }
        if let Some(category_id) = input.category_id {
            active.category_id = Set(Some(category_id));
        }
        if let Some(status) = input.status {
            active.status = Set(status);
        }
        if let Some(seo_title) = input.seo_title {
            active.seo_title = Set(Some(seo_title));
        }
        if let Some(seo_description) = input.seo_description {
            active.seo_description = Set(Some(seo_description));
        }
        if let Some(seo_keywords) = input.seo_keywords {
            active.seo_keywords = Set(Some(seo_keywords));
        }
        active.updated_at = Set(Utc::now());

        let product = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::ProductUpdated(product.id))
            .await;
        info!(%product_id, "Updated product");
        Ok(product)
    }

    /// Archives the product; order history keeps referencing it.
    #[instrument(skip(self))]
    pub async fn delete_product(&self, product_id: Uuid) -> Result<ProductModel, ServiceError> {
        let product = self.get_product(product_id).await?;
        let mut active: product::ActiveModel = product.into();
        active.status = Set(ProductStatus::Archived);
        active.updated_at = Set(Utc::now());
        let product = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::ProductUpdated(product.id))
            .await;
        info!(%product_id, "Archived product");
        Ok(product)
    }

    /// Adds `delta` (possibly negative) to the on-hand stock.
    #[instrument(skip(self))]
    pub async fn adjust_stock(
        &self,
        product_id: Uuid,
        delta: i32,
    ) -> Result<ProductModel, ServiceError> {
        let txn = self.db.begin().await?;
        let (old_quantity, product) = change_stock(&txn, product_id, delta).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::StockAdjusted {
                product_id,
                old_quantity,
                new_quantity: product.stock_quantity,
            })
            .await;
        info!(%product_id, old_quantity, new_quantity = product.stock_quantity, "Stock adjusted");
        Ok(product)
    }

    /// SEO metadata with fallbacks to the product's own fields.
    pub async fn seo(&self, product_id: Uuid) -> Result<ProductSeo, ServiceError> {
        let product = self.get_product(product_id).await?;
        Ok(ProductSeo::for_product(&product))
    }

    async fn ensure_unique_sku(
        &self,
        sku: &str,
        exclude_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        let mut query = Product::find().filter(product::Column::Sku.eq(sku));
        if let Some(id) = exclude_id {
            query = query.filter(product::Column::Id.ne(id));
        }

        if query.one(&*self.db).await?.is_some() {
            return Err(ServiceError::Conflict(format!("SKU {} already exists", sku)));
        }
        Ok(())
    }

    async fn ensure_unique_slug(
        &self,
        slug: &str,
        exclude_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        if slug.is_empty() {
            return Err(ServiceError::ValidationError(
                "Slug must contain at least one letter or digit".to_string(),
            ));
        }
        let mut query = Product::find().filter(product::Column::Slug.eq(slug));
        if let Some(id) = exclude_id {
            query = query.filter(product::Column::Id.ne(id));
        }

        if query.one(&*self.db).await?.is_some() {
            return Err(ServiceError::Conflict(format!("Slug {} already exists", slug)));
        }
        Ok(())
    }

    /// Slug from the name, suffixed `-2`, `-3`, ... until unused.
    async fn unique_slug_for(&self, name: &str) -> Result<String, ServiceError> {
        let base = slugify(name);
        if base.is_empty() {
            return Err(ServiceError::ValidationError(
                "Product name must contain at least one letter or digit".to_string(),
            ));
        }

        let taken: Vec<String> = Product::find()
            .filter(product::Column::Slug.starts_with(&base))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|p| p.slug)
            .collect();

        if !taken.contains(&base) {
            return Ok(base);
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}", base, n);
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    async fn ensure_category_exists(&self, category_id: Uuid) -> Result<(), ServiceError> {
        Category::find_by_id(category_id)
            .one(&*self.db)
            .await?
            .map(|_| ())
            .ok_or_else(|| ServiceError::not_found("Category", category_id))
    }
}

/// Applies a stock delta inside the caller's transaction. Returns the
/// previous quantity and the updated product.
pub(crate) async fn change_stock(
    conn: &impl ConnectionTrait,
    product_id: Uuid,
    delta: i32,
) -> Result<(i32, ProductModel), ServiceError> {
    let product = Product::find_by_id(product_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Product", product_id))?;

    let old_quantity = product.stock_quantity;
    let new_quantity = old_quantity + delta;
    if new_quantity < 0 {
        return Err(ServiceError::InsufficientStock(format!(
            "only {} units of product {} in stock",
            old_quantity, product_id
        )));
    }

    let mut active: product::ActiveModel = product.into();
    active.stock_quantity = Set(new_quantity);
    active.updated_at = Set(Utc::now());
    Ok((old_quantity, active.update(conn).await?))
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProductSeo {
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub canonical_path: String,
}

impl ProductSeo {
    pub fn for_product(product: &ProductModel) -> Self {
        let title = product
            .seo_title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| product.name.clone());
        let description = product
            .seo_description
            .clone()
            .filter(|d| !d.trim().is_empty())
            .or_else(|| {
                product
                    .description
                    .as_deref()
                    .map(|d| truncate_chars(d.trim(), SEO_DESCRIPTION_LEN))
                    .filter(|d| !d.is_empty())
            })
            .unwrap_or_else(|| product.name.clone());
        let keywords = product
            .seo_keywords
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            title,
            description,
            keywords,
            canonical_path: format!("/products/{}", product.slug),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub slug: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub sku: String,
    pub description: Option<String>,
    #[validate(custom = "validate_non_negative")]
    pub price: Decimal,
    #[validate(custom = "validate_non_negative")]
    pub compare_at_price: Option<Decimal>,
    #[validate(range(min = 0))]
    #[serde(default)]
    pub stock_quantity: i32,
    pub category_id: Option<Uuid>,
    pub status: Option<ProductStatus>,
    #[validate(length(max = 70))]
    pub seo_title: Option<String>,
    #[validate(length(max = 320))]
    pub seo_description: Option<String>,
    pub seo_keywords: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateProductInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub slug: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub sku: Option<String>,
    pub description: Option<String>,
    #[validate(custom = "validate_non_negative")]
    pub price: Option<Decimal>,
    #[validate(custom = "validate_non_negative")]
    pub compare_at_price: Option<Decimal>,
    pub category_id: Option<Uuid>,
    pub status: Option<ProductStatus>,
    #[validate(length(max = 70))]
    pub seo_title: Option<String>,
    #[validate(length(max = 320))]
    pub seo_description: Option<String>,
    pub seo_keywords: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProductFilter {
    pub status: Option<ProductStatus>,
    pub category_id: Option<Uuid>,
    pub search: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub in_stock: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product() -> ProductModel {
        let now = Utc::now();
        ProductModel {
            id: Uuid::new_v4(),
            name: "Trail Runner 2".into(),
            slug: "trail-runner-2".into(),
            sku: "TR-2".into(),
            description: None,
            price: dec!(120),
            compare_at_price: None,
            stock_quantity: 3,
            category_id: None,
            status: ProductStatus::Active,
            seo_title: None,
            seo_description: None,
            seo_keywords: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("  Trail Runner 2 (Blue) "), "trail-runner-2-blue");
        assert_eq!(slugify("Café & Co"), "caf-co");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn seo_falls_back_to_name_and_description() {
        let mut p = product();
        p.description = Some("x".repeat(200));

        let seo = ProductSeo::for_product(&p);
        assert_eq!(seo.title, "Trail Runner 2");
        assert_eq!(seo.description.chars().count(), 160);
        assert_eq!(seo.canonical_path, "/products/trail-runner-2");
        assert!(seo.keywords.is_empty());
    }

    #[test]
    fn seo_prefers_explicit_fields() {
        let mut p = product();
        p.seo_title = Some("Best trail shoe".into());
        p.seo_description = Some("Light and grippy".into());
        p.seo_keywords = Some("running, trail ,, shoes".into());

        let seo = ProductSeo::for_product(&p);
        assert_eq!(seo.title, "Best trail shoe");
        assert_eq!(seo.description, "Light and grippy");
        assert_eq!(seo.keywords, vec!["running", "trail", "shoes"]);
    }

    #[test]
    fn seo_without_description_uses_name() {
        let seo = ProductSeo::for_product(&product());
        assert_eq!(seo.description, "Trail Runner 2");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 160), "short");
    }

    #[test]
    fn negative_prices_fail_validation() {
        let input = CreateProductInput {
            name: "Mug".into(),
            slug: None,
            sku: "MUG-1".into(),
            description: None,
            price: dec!(-1),
            compare_at_price: None,
            stock_quantity: 0,
            category_id: None,
            status: None,
            seo_title: None,
            seo_description: None,
            seo_keywords: None,
        };
        assert!(input.validate().is_err());
        assert!(validate_non_negative(&dec!(0)).is_ok());
    }
}
