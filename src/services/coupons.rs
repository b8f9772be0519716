use crate::{
    entities::commerce::{
        coupon::{self, DiscountType},
        coupon_usage, Coupon, CouponModel, CouponUsage,
    },
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

/// One priced line a coupon is evaluated against.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscountLine {
    pub product_id: Uuid,
    pub category_id: Option<Uuid>,
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl DiscountLine {
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CouponContext {
    pub user_id: Option<Uuid>,
    pub lines: Vec<DiscountLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CouponEvaluation {
    pub coupon: CouponModel,
    pub eligible_subtotal: Decimal,
    pub discount: Decimal,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateCouponInput {
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub min_order_amount: Option<Decimal>,
    pub max_discount_amount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub per_user_limit: Option<i32>,
    #[serde(default)]
    pub applicable_category_ids: Vec<Uuid>,
    #[serde(default)]
    pub applicable_product_ids: Vec<Uuid>,
    #[serde(default)]
    pub allowed_user_ids: Vec<Uuid>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateCouponInput {
    pub description: Option<String>,
    pub value: Option<Decimal>,
    pub min_order_amount: Option<Decimal>,
    pub max_discount_amount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub per_user_limit: Option<i32>,
    pub applicable_category_ids: Option<Vec<Uuid>>,
    pub applicable_product_ids: Option<Vec<Uuid>>,
    pub allowed_user_ids: Option<Vec<Uuid>>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

/// Codes are stored upper-case; lookups normalize the same way.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

fn validate_code(code: &str) -> Result<(), ServiceError> {
    let valid_chars = code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if code.len() < 3 || code.len() > 32 || !valid_chars {
        return Err(ServiceError::ValidationError(
            "Coupon code must be 3-32 characters of A-Z, 0-9, '-' or '_'".to_string(),
        ));
    }
    Ok(())
}

fn validate_value(discount_type: DiscountType, value: Decimal) -> Result<(), ServiceError> {
    if discount_type != DiscountType::Bogo && value <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Coupon value must be positive".to_string(),
        ));
    }
    if discount_type == DiscountType::Percentage && value > Decimal::from(100) {
        return Err(ServiceError::ValidationError(
            "Percentage coupons cannot exceed 100".to_string(),
        ));
    }
    Ok(())
}

fn validate_window(
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
) -> Result<(), ServiceError> {
    if let (Some(start), Some(end)) = (starts_at, ends_at) {
        if start >= end {
            return Err(ServiceError::ValidationError(
                "Coupon must start before it ends".to_string(),
            ));
        }
    }
    Ok(())
}

fn uuid_json(ids: &[Uuid]) -> serde_json::Value {
    serde_json::Value::Array(
        ids.iter()
            .map(|id| serde_json::Value::String(id.to_string()))
            .collect(),
    )
}

/// Lines the coupon's product and category scope allows. Empty scope lists
/// allow every line.
pub fn eligible_lines<'a>(coupon: &CouponModel, lines: &'a [DiscountLine]) -> Vec<&'a DiscountLine> {
    let product_ids = coupon.product_ids();
    let category_ids = coupon.category_ids();

    lines
        .iter()
        .filter(|line| {
            let product_ok = product_ids.is_empty() || product_ids.contains(&line.product_id);
            let category_ok = category_ids.is_empty()
                || line
                    .category_id
                    .map_or(false, |category| category_ids.contains(&category));
            product_ok && category_ok
        })
        .collect()
}

/// Discount granted by `coupon` on `lines`. Never more than the eligible
/// subtotal or the coupon's cap; zero below the minimum order amount.
pub fn calculate_discount(coupon: &CouponModel, lines: &[DiscountLine]) -> Decimal {
    let eligible = eligible_lines(coupon, lines);
    let eligible_subtotal: Decimal = eligible.iter().map(|line| line.subtotal()).sum();

    if eligible_subtotal <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    if let Some(min_amount) = coupon.min_order_amount {
        if eligible_subtotal < min_amount {
            debug!(
                "Eligible subtotal {} is below minimum order amount {}",
                eligible_subtotal, min_amount
            );
            return Decimal::ZERO;
        }
    }

    let discount = match coupon.discount_type {
        DiscountType::Percentage => eligible_subtotal * coupon.value / Decimal::from(100),
        DiscountType::Fixed => coupon.value,
        DiscountType::Bogo => eligible
            .iter()
            .map(|line| line.unit_price * Decimal::from(line.quantity / 2))
            .sum(),
    };

    let capped = match coupon.max_discount_amount {
        Some(max_discount) => discount.min(max_discount),
        None => discount,
    };

    capped.min(eligible_subtotal).max(Decimal::ZERO).round_dp(2)
}

#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_coupon(&self, input: CreateCouponInput) -> Result<CouponModel, ServiceError> {
        let code = normalize_code(&input.code);
        validate_code(&code)?;
        validate_value(input.discount_type, input.value)?;
        validate_window(input.starts_at, input.ends_at)?;

        let exists = Coupon::find()
            .filter(coupon::Column::Code.eq(code.clone()))
            .one(&*self.db)
            .await?;
        if exists.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Coupon code {} already exists",
                code
            )));
        }

        let now = Utc::now();
        let coupon = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            description: Set(input.description),
            discount_type: Set(input.discount_type),
            value: Set(input.value),
            min_order_amount: Set(input.min_order_amount),
            max_discount_amount: Set(input.max_discount_amount),
            usage_limit: Set(input.usage_limit),
            usage_count: Set(0),
            per_user_limit: Set(input.per_user_limit),
            applicable_category_ids: Set(uuid_json(&input.applicable_category_ids)),
            applicable_product_ids: Set(uuid_json(&input.applicable_product_ids)),
            allowed_user_ids: Set(uuid_json(&input.allowed_user_ids)),
            starts_at: Set(input.starts_at),
            ends_at: Set(input.ends_at),
            is_active: Set(input.is_active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(coupon_id = %coupon.id, code = %coupon.code, "Coupon created");
        Ok(coupon)
    }

    pub async fn get_coupon(&self, id: Uuid) -> Result<CouponModel, ServiceError> {
        Coupon::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Coupon", id))
    }

    pub async fn get_by_code(&self, code: &str) -> Result<CouponModel, ServiceError> {
        self.find_by_code(&*self.db, code).await
    }

    pub async fn list_coupons(
        &self,
        active_only: bool,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<CouponModel>, u64), ServiceError> {
        let mut query = Coupon::find().order_by_desc(coupon::Column::CreatedAt);
        if active_only {
            query = query.filter(coupon::Column::IsActive.eq(true));
        }

        let paginator = query.paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let coupons = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((coupons, total))
    }

    #[instrument(skip(self, input))]
    pub async fn update_coupon(
        &self,
        id: Uuid,
        input: UpdateCouponInput,
    ) -> Result<CouponModel, ServiceError> {
        let coupon = self.get_coupon(id).await?;

        let value = input.value.unwrap_or(coupon.value);
        validate_value(coupon.discount_type, value)?;
        validate_window(
            input.starts_at.or(coupon.starts_at),
            input.ends_at.or(coupon.ends_at),
        )?;

        let mut active: coupon::ActiveModel = coupon.into();
        active.value = Set(value);
        if let Some(description) = input.description {
            active.description = Set(Some(description));
        }
        if let Some(min_order_amount) = input.min_order_amount {
            active.min_order_amount = Set(Some(min_order_amount));
        }
        if let Some(max_discount_amount) = input.max_discount_amount {
            active.max_discount_amount = Set(Some(max_discount_amount));
        }
        if let Some(usage_limit) = input.usage_limit {
            active.usage_limit = Set(Some(usage_limit));
        }
        if let Some(per_user_limit) = input.per_user_limit {
            active.per_user_limit = Set(Some(per_user_limit));
        }
        if let Some(ids) = input.applicable_category_ids {
            active.applicable_category_ids = Set(uuid_json(&ids));
        }
        if let Some(ids) = input.applicable_product_ids {
            active.applicable_product_ids = Set(uuid_json(&ids));
        }
        if let Some(ids) = input.allowed_user_ids {
            active.allowed_user_ids = Set(uuid_json(&ids));
        }
        if let Some(starts_at) = input.starts_at {
            active.starts_at = Set(Some(starts_at));
        }
        if let Some(ends_at) = input.ends_at {
            active.ends_at = Set(Some(ends_at));
        }
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(Utc::now());

        Ok(active.update(&*self.db).await?)
    }

    pub async fn deactivate_coupon(&self, id: Uuid) -> Result<CouponModel, ServiceError> {
        self.update_coupon(
            id,
            UpdateCouponInput {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
    }

    /// Checks every eligibility rule and prices the discount. Any rule
    /// failure is a `ValidationError`; an unknown code is `NotFound`.
    #[instrument(skip(self, conn, context))]
    pub async fn evaluate(
        &self,
        conn: &impl ConnectionTrait,
        code: &str,
        context: &CouponContext,
    ) -> Result<CouponEvaluation, ServiceError> {
        let coupon = self.find_by_code(conn, code).await?;
        let now = Utc::now();

        if !coupon.is_active {
            return Err(ServiceError::ValidationError(format!(
                "Coupon {} is not active",
                coupon.code
            )));
        }
        if coupon.starts_at.map_or(false, |start| now < start) {
            return Err(ServiceError::ValidationError(format!(
                "Coupon {} is not valid yet",
                coupon.code
            )));
        }
        if coupon.ends_at.map_or(false, |end| now > end) {
            return Err(ServiceError::ValidationError(format!(
                "Coupon {} has expired",
                coupon.code
            )));
        }
        if let Some(limit) = coupon.usage_limit {
            if coupon.usage_count >= limit {
                return Err(ServiceError::ValidationError(format!(
                    "Coupon {} has reached its usage limit",
                    coupon.code
                )));
            }
        }

        let allowed_users = coupon.user_ids();
        if !allowed_users.is_empty()
            && !context
                .user_id
                .map_or(false, |user| allowed_users.contains(&user))
        {
            return Err(ServiceError::ValidationError(format!(
                "Coupon {} is not available for this customer",
                coupon.code
            )));
        }

        if let (Some(limit), Some(user_id)) = (coupon.per_user_limit, context.user_id) {
            let used = CouponUsage::find()
                .filter(coupon_usage::Column::CouponId.eq(coupon.id))
                .filter(coupon_usage::Column::UserId.eq(user_id))
                .count(conn)
                .await?;
            if used >= limit.max(0) as u64 {
                return Err(ServiceError::ValidationError(format!(
                    "Coupon {} has already been used the maximum number of times",
                    coupon.code
                )));
            }
        }

        let eligible_subtotal: Decimal = eligible_lines(&coupon, &context.lines)
            .iter()
            .map(|line| line.subtotal())
            .sum();
        if eligible_subtotal <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Coupon {} does not apply to any items",
                coupon.code
            )));
        }
        if let Some(min_amount) = coupon.min_order_amount {
            if eligible_subtotal < min_amount {
                return Err(ServiceError::ValidationError(format!(
                    "Coupon {} requires a minimum order of {}",
                    coupon.code, min_amount
                )));
            }
        }

        let discount = calculate_discount(&coupon, &context.lines);
        Ok(CouponEvaluation {
            coupon,
            eligible_subtotal,
            discount,
        })
    }

    /// Records a redemption and bumps the global usage counter.
    pub async fn record_usage(
        &self,
        conn: &impl ConnectionTrait,
        coupon_id: Uuid,
        user_id: Option<Uuid>,
        order_id: Uuid,
        discount_amount: Decimal,
    ) -> Result<coupon_usage::Model, ServiceError> {
        let usage = coupon_usage::ActiveModel {
            id: Set(Uuid::new_v4()),
            coupon_id: Set(coupon_id),
            user_id: Set(user_id),
            order_id: Set(order_id),
            discount_amount: Set(discount_amount),
            created_at: Set(Utc::now()),
        }
        .insert(conn)
        .await?;

        Coupon::update_many()
            .col_expr(
                coupon::Column::UsageCount,
                Expr::col(coupon::Column::UsageCount).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(coupon::Column::Id.eq(coupon_id))
            .exec(conn)
            .await?;

        Ok(usage)
    }

    pub(crate) async fn find_by_code(
        &self,
        conn: &impl ConnectionTrait,
        code: &str,
    ) -> Result<CouponModel, ServiceError> {
        let code = normalize_code(code);
        Coupon::find()
            .filter(coupon::Column::Code.eq(code.clone()))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Coupon", code))
    }
}
