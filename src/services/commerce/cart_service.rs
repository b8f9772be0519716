use crate::{
    auth::CartOwner,
    config::AppConfig,
    entities::commerce::{
        cart, cart_item, product, Cart, CartItem, CartItemModel, CartModel, CartStatus, Product,
        ProductModel, MAX_ITEM_QUANTITY,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        coupons::{normalize_code, CouponContext, CouponService, DiscountLine},
        stock_reservation_service::StockReservationService,
    },
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, ModelTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

const USER_CART_TTL_DAYS: i64 = 30;
const GUEST_CART_TTL_DAYS: i64 = 7;

/// Shopping cart service.
///
/// Carts belong to a signed-in user or to a guest session. Every mutation
/// runs in one transaction, keeps the owner's stock reservations in step with
/// the cart lines and recomputes totals from the persisted items.
#[derive(Clone)]
pub struct CartService {
    pub(super) db: Arc<DatabaseConnection>,
    pub(super) event_sender: Arc<EventSender>,
    pub(super) config: Arc<AppConfig>,
    pub(super) reservations: Arc<StockReservationService>,
    pub(super) coupons: Arc<CouponService>,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        reservations: Arc<StockReservationService>,
        coupons: Arc<CouponService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
            reservations,
            coupons,
        }
    }

    /// Returns the owner's active cart, creating an empty one when absent.
    #[instrument(skip(self))]
    pub async fn get_or_create_cart(&self, owner: &CartOwner) -> Result<CartWithItems, ServiceError> {
        let cart = match find_active_cart(&*self.db, owner).await? {
            Some(cart) => cart,
            None => self.create_cart(&*self.db, owner).await?,
        };
        let items = load_items(&*self.db, cart.id).await?;
        Ok(CartWithItems { cart, items })
    }

    /// Returns the owner's active cart. Reading a cart counts as activity and
    /// keeps its stock holds alive.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, owner: &CartOwner) -> Result<CartWithItems, ServiceError> {
        let cart = find_active_cart(&*self.db, owner)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No active cart for {}", owner)))?;
        self.reservations.refresh(&*self.db, owner).await?;
        let items = load_items(&*self.db, cart.id).await?;
        Ok(CartWithItems { cart, items })
    }

    pub async fn get_cart_by_id(&self, cart_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let cart = Cart::find_by_id(cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Cart", cart_id))?;
        let items = load_items(&*self.db, cart.id).await?;
        Ok(CartWithItems { cart, items })
    }

    /// Adds a product to the owner's cart, merging into an existing line for
    /// the same product. Stock is reserved before anything is committed.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        owner: &CartOwner,
        input: AddToCartInput,
    ) -> Result<CartWithItems, ServiceError> {
        if input.quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".to_string(),
            ));
        }
        check_line_quantity(input.quantity)?;

        let txn = self.db.begin().await?;

        let product = purchasable_product(&txn, input.product_id).await?;
        let cart = match find_active_cart(&txn, owner).await? {
            Some(cart) => cart,
            None => self.create_cart(&txn, owner).await?,
        };

        let existing_item = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product.id))
            .one(&txn)
            .await?;

        let new_quantity = existing_item
            .as_ref()
            .map_or(0, |item| item.quantity)
            .saturating_add(input.quantity);
        check_line_quantity(new_quantity)?;

        self.reservations
            .reserve(&txn, owner, product.id, new_quantity)
            .await?;

        let now = Utc::now();
        match existing_item {
            Some(item) => {
                let mut item: cart_item::ActiveModel = item.into();
                item.quantity = Set(new_quantity);
                item.unit_price = Set(product.price);
                item.subtotal = Set(product.price * Decimal::from(new_quantity));
                item.updated_at = Set(now);
                item.update(&txn).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product.id),
                    quantity: Set(new_quantity),
                    unit_price: Set(product.price),
                    subtotal: Set(product.price * Decimal::from(new_quantity)),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        self.reservations.refresh(&txn, owner).await?;
        let cart = self.recalculate_cart_totals(&txn, cart.id).await?;
        let items = load_items(&txn, cart.id).await?;

        txn.commit().await?;

        metrics::counter!("storefront.cart.items_added", 1);
        self.event_sender.send_or_log(Event::CartUpdated(cart.id)).await;
        info!(cart_id = %cart.id, product_id = %product.id, quantity = input.quantity, "Item added to cart");

        Ok(CartWithItems { cart, items })
    }

    /// Sets a line's quantity; zero removes the line.
    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        owner: &CartOwner,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "Quantity cannot be negative".to_string(),
            ));
        }
        if quantity == 0 {
            return self.remove_item(owner, item_id).await;
        }
        check_line_quantity(quantity)?;

        let txn = self.db.begin().await?;

        let (cart, item) = owned_item(&txn, owner, item_id).await?;
        self.reservations
            .reserve(&txn, owner, item.product_id, quantity)
            .await?;

        let unit_price = item.unit_price;
        let mut item: cart_item::ActiveModel = item.into();
        item.quantity = Set(quantity);
        item.subtotal = Set(unit_price * Decimal::from(quantity));
        item.updated_at = Set(Utc::now());
        item.update(&txn).await?;

        self.reservations.refresh(&txn, owner).await?;
        let cart = self.recalculate_cart_totals(&txn, cart.id).await?;
        let items = load_items(&txn, cart.id).await?;

        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartUpdated(cart.id)).await;
        info!(cart_id = %cart.id, %item_id, quantity, "Cart item updated");

        Ok(CartWithItems { cart, items })
    }

    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        owner: &CartOwner,
        item_id: Uuid,
    ) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;

        let (cart, item) = owned_item(&txn, owner, item_id).await?;
        self.reservations
            .release(&txn, owner, item.product_id)
            .await?;
        item.delete(&txn).await?;

        let cart = self.recalculate_cart_totals(&txn, cart.id).await?;
        let items = load_items(&txn, cart.id).await?;

        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartUpdated(cart.id)).await;
        info!(cart_id = %cart.id, %item_id, "Cart item removed");

        Ok(CartWithItems { cart, items })
    }

    /// Empties the cart, drops its coupon and releases every stock hold.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, owner: &CartOwner) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = find_active_cart(&txn, owner)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No active cart for {}", owner)))?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;
        self.reservations.release_all(&txn, owner).await?;

        let cart_id = cart.id;
        let mut active: cart::ActiveModel = cart.into();
        active.coupon_code = Set(None);
        active.update(&txn).await?;

        let cart = self.recalculate_cart_totals(&txn, cart_id).await?;

        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartUpdated(cart_id)).await;
        info!(%cart_id, "Cart cleared");

        Ok(CartWithItems {
            cart,
            items: Vec::new(),
        })
    }

    /// Applies a coupon code. Unlike later re-evaluation, a coupon that does
    /// not apply right now is reported to the caller.
    #[instrument(skip(self))]
    pub async fn apply_coupon(
        &self,
        owner: &CartOwner,
        code: &str,
    ) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = find_active_cart(&txn, owner)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No active cart for {}", owner)))?;
        let items = load_items(&txn, cart.id).await?;
        if items.is_empty() {
            return Err(ServiceError::ValidationError(
                "Cannot apply a coupon to an empty cart".to_string(),
            ));
        }

        let context = CouponContext {
            user_id: cart.user_id,
            lines: discount_lines(&txn, &items).await?,
        };
        let evaluation = self.coupons.evaluate(&txn, code, &context).await?;

        let mut active: cart::ActiveModel = cart.into();
        active.coupon_code = Set(Some(evaluation.coupon.code.clone()));
        let cart = active.update(&txn).await?;

        let cart = self.recalculate_cart_totals(&txn, cart.id).await?;

        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartUpdated(cart.id)).await;
        info!(cart_id = %cart.id, code = %evaluation.coupon.code, discount = %cart.discount_total, "Coupon applied");

        Ok(CartWithItems { cart, items })
    }

    #[instrument(skip(self))]
    pub async fn remove_coupon(&self, owner: &CartOwner) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = find_active_cart(&txn, owner)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No active cart for {}", owner)))?;

        let mut active: cart::ActiveModel = cart.into();
        active.coupon_code = Set(None);
        let cart = active.update(&txn).await?;

        let cart = self.recalculate_cart_totals(&txn, cart.id).await?;
        let items = load_items(&txn, cart.id).await?;

        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartUpdated(cart.id)).await;
        Ok(CartWithItems { cart, items })
    }

    /// Marks active carts past their expiry as abandoned.
    #[instrument(skip(self))]
    pub async fn abandon_expired_carts(&self) -> Result<u64, ServiceError> {
        let now = Utc::now();
        let result = Cart::update_many()
            .col_expr(cart::Column::Status, Expr::value(CartStatus::Abandoned))
            .col_expr(cart::Column::UpdatedAt, Expr::value(now))
            .filter(cart::Column::Status.eq(CartStatus::Active))
            .filter(cart::Column::ExpiresAt.lte(now))
            .exec(&*self.db)
            .await?;

        let abandoned = result.rows_affected;
        if abandoned > 0 {
            self.event_sender
                .send_or_log(Event::CartsAbandoned(abandoned))
                .await;
            info!(abandoned, "Marked expired carts as abandoned");
        }
        Ok(abandoned)
    }

    /// Deletes the cart's lines and marks it converted after checkout.
    pub(crate) async fn convert_cart(
        &self,
        conn: &impl ConnectionTrait,
        cart_id: Uuid,
    ) -> Result<(), ServiceError> {
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .exec(conn)
            .await?;

        let cart = Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Cart", cart_id))?;
        let mut active: cart::ActiveModel = cart.into();
        active.status = Set(CartStatus::Converted);
        active.subtotal = Set(Decimal::ZERO);
        active.discount_total = Set(Decimal::ZERO);
        active.total = Set(Decimal::ZERO);
        active.item_count = Set(0);
        active.updated_at = Set(Utc::now());
        active.update(conn).await?;
        Ok(())
    }

    pub(super) async fn create_cart(
        &self,
        conn: &impl ConnectionTrait,
        owner: &CartOwner,
    ) -> Result<CartModel, ServiceError> {
        let now = Utc::now();
        let (user_id, session_id) = owner.columns();
        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            session_id: Set(session_id),
            currency: Set(self.config.default_currency.clone()),
            status: Set(CartStatus::Active),
            coupon_code: Set(None),
            subtotal: Set(Decimal::ZERO),
            discount_total: Set(Decimal::ZERO),
            total: Set(Decimal::ZERO),
            item_count: Set(0),
            expires_at: Set(cart_expiry(owner, now)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?;

        debug!(cart_id = %cart.id, %owner, "Cart created");
        Ok(cart)
    }

    /// Recomputes subtotal, discount, total and item count from the persisted
    /// lines and pushes the expiry forward. A coupon that no longer applies is
    /// dropped without an error.
    pub(crate) async fn recalculate_cart_totals(
        &self,
        conn: &impl ConnectionTrait,
        cart_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        let cart = Cart::find_by_id(cart_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Cart", cart_id))?;
        let items = load_items(conn, cart_id).await?;

        let totals = CartTotals::from_items(&items);

        let mut coupon_code = cart.coupon_code.clone();
        let mut discount = Decimal::ZERO;
        if let Some(code) = cart.coupon_code.as_deref() {
            let context = CouponContext {
                user_id: cart.user_id,
                lines: discount_lines(conn, &items).await?,
            };
            match self.coupons.evaluate(conn, code, &context).await {
                Ok(evaluation) => discount = evaluation.discount,
                Err(ServiceError::ValidationError(reason)) | Err(ServiceError::NotFound(reason)) => {
                    debug!(%cart_id, code, %reason, "Dropping coupon that no longer applies");
                    coupon_code = None;
                }
                Err(e) => return Err(e),
            }
        }

        let now = Utc::now();
        let expires_at = match CartOwner::from_columns(cart.user_id, cart.session_id.as_deref()) {
            Some(owner) => cart_expiry(&owner, now),
            None => cart.expires_at,
        };

        let mut active: cart::ActiveModel = cart.into();
        active.subtotal = Set(totals.subtotal);
        active.discount_total = Set(discount);
        active.total = Set((totals.subtotal - discount).max(Decimal::ZERO));
        active.item_count = Set(totals.item_count);
        active.coupon_code = Set(coupon_code);
        active.expires_at = Set(expires_at);
        active.updated_at = Set(now);

        Ok(active.update(conn).await?)
    }
}

/// Subtotal and unit count of a set of cart lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartTotals {
    pub subtotal: Decimal,
    pub item_count: i32,
}

impl CartTotals {
    pub fn from_items(items: &[CartItemModel]) -> Self {
        Self {
            subtotal: items.iter().map(|item| item.subtotal).sum(),
            item_count: items.iter().map(|item| item.quantity).sum(),
        }
    }
}

pub(crate) fn cart_expiry(owner: &CartOwner, now: DateTime<Utc>) -> DateTime<Utc> {
    match owner {
        CartOwner::User(_) => now + Duration::days(USER_CART_TTL_DAYS),
        CartOwner::Guest(_) => now + Duration::days(GUEST_CART_TTL_DAYS),
    }
}

pub(crate) fn cart_owner_condition(owner: &CartOwner) -> Condition {
    match owner {
        CartOwner::User(id) => Condition::all().add(cart::Column::UserId.eq(*id)),
        CartOwner::Guest(session) => Condition::all()
            .add(cart::Column::UserId.is_null())
            .add(cart::Column::SessionId.eq(session.clone())),
    }
}

pub(crate) fn check_line_quantity(quantity: i32) -> Result<(), ServiceError> {
    if quantity > MAX_ITEM_QUANTITY {
        return Err(ServiceError::ValidationError(format!(
            "Quantity {} exceeds the maximum of {} per item",
            quantity, MAX_ITEM_QUANTITY
        )));
    }
    Ok(())
}

pub(crate) async fn find_active_cart(
    conn: &impl ConnectionTrait,
    owner: &CartOwner,
) -> Result<Option<CartModel>, ServiceError> {
    Ok(Cart::find()
        .filter(cart_owner_condition(owner))
        .filter(cart::Column::Status.eq(CartStatus::Active))
        .order_by_desc(cart::Column::UpdatedAt)
        .one(conn)
        .await?)
}

pub(crate) async fn load_items(
    conn: &impl ConnectionTrait,
    cart_id: Uuid,
) -> Result<Vec<CartItemModel>, ServiceError> {
    Ok(CartItem::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .all(conn)
        .await?)
}

pub(crate) async fn products_by_id(
    conn: &impl ConnectionTrait,
    ids: Vec<Uuid>,
) -> Result<HashMap<Uuid, ProductModel>, ServiceError> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    Ok(Product::find()
        .filter(product::Column::Id.is_in(ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect())
}

/// Cart lines enriched with product categories for coupon evaluation.
pub(crate) async fn discount_lines(
    conn: &impl ConnectionTrait,
    items: &[CartItemModel],
) -> Result<Vec<DiscountLine>, ServiceError> {
    let products = products_by_id(conn, items.iter().map(|i| i.product_id).collect()).await?;
    Ok(items
        .iter()
        .map(|item| DiscountLine {
            product_id: item.product_id,
            category_id: products.get(&item.product_id).and_then(|p| p.category_id),
            unit_price: item.unit_price,
            quantity: item.quantity,
        })
        .collect())
}

pub(crate) async fn purchasable_product(
    conn: &impl ConnectionTrait,
    product_id: Uuid,
) -> Result<ProductModel, ServiceError> {
    let product = Product::find_by_id(product_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Product", product_id))?;
    if !product.is_purchasable() {
        return Err(ServiceError::ValidationError(format!(
            "Product {} is not available for purchase",
            product_id
        )));
    }
    Ok(product)
}

async fn owned_item(
    conn: &impl ConnectionTrait,
    owner: &CartOwner,
    item_id: Uuid,
) -> Result<(CartModel, CartItemModel), ServiceError> {
    let cart = find_active_cart(conn, owner)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("No active cart for {}", owner)))?;
    let item = CartItem::find_by_id(item_id)
        .filter(cart_item::Column::CartId.eq(cart.id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Cart item", item_id))?;
    Ok((cart, item))
}

/// Normalized coupon code, if any, from optional user input.
pub(crate) fn clean_coupon_code(code: Option<&str>) -> Option<String> {
    code.map(normalize_code).filter(|c| !c.is_empty())
}

// Input/Output DTOs

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AddToCartInput {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartWithItems {
    pub cart: CartModel,
    pub items: Vec<CartItemModel>,
}
