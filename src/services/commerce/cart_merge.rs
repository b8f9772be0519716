//! Folding a guest cart into the signed-in user's cart at login.
//!
//! | user cart | guest cart | outcome                                              |
//! |-----------|------------|------------------------------------------------------|
//! | none      | none       | empty user cart                                      |
//! | any       | none       | user cart unchanged                                  |
//! | none      | some       | guest cart re-owned (`keep_user`: fresh user cart)   |
//! | some      | some       | combined per [`MergeStrategy`], guest cart deleted   |

use super::cart_service::{
    cart_expiry, find_active_cart, load_items, products_by_id, CartService, CartWithItems,
};
use crate::{
    auth::CartOwner,
    db::transaction::with_transaction,
    entities::commerce::{cart, cart_item, Cart, CartItem, CartItemModel, CartModel, MAX_ITEM_QUANTITY},
    errors::ServiceError,
    events::Event,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MergeStrategy {
    /// Sum overlapping lines, clamped to stock and the per-line maximum.
    #[default]
    Auto,
    /// Guest lines replace the user's lines.
    Replace,
    /// Guest cart is discarded.
    KeepUser,
    /// Sum overlapping lines exactly; fail if any line cannot be satisfied.
    Merge,
}

/// A product present in both carts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MergeConflict {
    pub product_id: Uuid,
    pub user_quantity: i32,
    pub guest_quantity: i32,
    /// guest - user
    pub quantity_delta: i32,
    pub user_unit_price: Decimal,
    pub guest_unit_price: Decimal,
    /// guest - user
    pub price_delta: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MergePreview {
    pub user_cart_id: Option<Uuid>,
    pub guest_cart_id: Option<Uuid>,
    pub conflicts: Vec<MergeConflict>,
    pub guest_only_items: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MergeResult {
    pub cart: CartWithItems,
    pub strategy: MergeStrategy,
    pub conflicts: Vec<MergeConflict>,
    /// Products whose merged quantity was reduced to fit stock or the line limit.
    pub adjusted_products: Vec<Uuid>,
    /// Guest lines left behind because the product can no longer be bought.
    pub dropped_products: Vec<Uuid>,
}

/// Pairs up lines for the same product in both carts.
pub fn detect_conflicts(
    user_items: &[CartItemModel],
    guest_items: &[CartItemModel],
) -> Vec<MergeConflict> {
    let user_by_product: HashMap<Uuid, &CartItemModel> =
        user_items.iter().map(|item| (item.product_id, item)).collect();

    guest_items
        .iter()
        .filter_map(|guest| {
            user_by_product.get(&guest.product_id).map(|user| MergeConflict {
                product_id: guest.product_id,
                user_quantity: user.quantity,
                guest_quantity: guest.quantity,
                quantity_delta: guest.quantity - user.quantity,
                user_unit_price: user.unit_price,
                guest_unit_price: guest.unit_price,
                price_delta: guest.unit_price - user.unit_price,
            })
        })
        .collect()
}

#[derive(Default)]
struct MergeOutcome {
    adjusted_products: Vec<Uuid>,
    dropped_products: Vec<Uuid>,
}

impl CartService {
    /// Reports what a merge would combine without writing anything.
    #[instrument(skip(self))]
    pub async fn preview_merge(
        &self,
        user_id: Uuid,
        session_id: &str,
    ) -> Result<MergePreview, ServiceError> {
        let user_cart = find_active_cart(&*self.db, &CartOwner::User(user_id)).await?;
        let guest_cart =
            find_active_cart(&*self.db, &CartOwner::Guest(session_id.to_string())).await?;

        let user_items = match &user_cart {
            Some(cart) => load_items(&*self.db, cart.id).await?,
            None => Vec::new(),
        };
        let guest_items = match &guest_cart {
            Some(cart) => load_items(&*self.db, cart.id).await?,
            None => Vec::new(),
        };

        let conflicts = detect_conflicts(&user_items, &guest_items);
        let guest_only_items = guest_items.len() - conflicts.len();

        Ok(MergePreview {
            user_cart_id: user_cart.map(|c| c.id),
            guest_cart_id: guest_cart.map(|c| c.id),
            conflicts,
            guest_only_items,
        })
    }

    /// Merges the guest session's cart into the user's cart in a single
    /// transaction. With `MergeStrategy::Merge` a line that cannot be
    /// satisfied fails the whole merge and nothing is written.
    #[instrument(skip(self))]
    pub async fn merge_carts(
        &self,
        user_id: Uuid,
        session_id: &str,
        strategy: MergeStrategy,
    ) -> Result<MergeResult, ServiceError> {
        let service = self.clone();
        let session_id = session_id.to_string();

        let (result, guest_cart_id) = with_transaction(&self.db, move |txn| {
            Box::pin(async move {
                service
                    .merge_in(txn, user_id, session_id, strategy)
                    .await
            })
        })
        .await?;

        metrics::counter!("storefront.cart.merges", 1, "strategy" => strategy.to_string());
        if let Some(guest_cart_id) = guest_cart_id {
            self.event_sender
                .send_or_log(Event::CartsMerged {
                    user_cart_id: result.cart.cart.id,
                    guest_cart_id,
                    strategy: strategy.to_string(),
                })
                .await;
            info!(
                user_cart_id = %result.cart.cart.id,
                %guest_cart_id,
                %strategy,
                conflicts = result.conflicts.len(),
                "Guest cart merged"
            );
        }

        Ok(result)
    }

    async fn merge_in(
        &self,
        conn: &impl ConnectionTrait,
        user_id: Uuid,
        session_id: String,
        strategy: MergeStrategy,
    ) -> Result<(MergeResult, Option<Uuid>), ServiceError> {
        let user = CartOwner::User(user_id);
        let guest = CartOwner::Guest(session_id);

        let user_cart = find_active_cart(conn, &user).await?;
        let guest_cart = find_active_cart(conn, &guest).await?;

        let (cart, conflicts, outcome, guest_cart_id) = match (user_cart, guest_cart) {
            (user_cart, None) => {
                let cart = match user_cart {
                    Some(cart) => cart,
                    None => self.create_cart(conn, &user).await?,
                };
                (cart, Vec::new(), MergeOutcome::default(), None)
            }
            (None, Some(guest_cart)) => {
                let guest_cart_id = guest_cart.id;
                let cart = if strategy == MergeStrategy::KeepUser {
                    self.discard_guest_cart(conn, &guest, guest_cart.id).await?;
                    self.create_cart(conn, &user).await?
                } else {
                    self.adopt_guest_cart(conn, &guest, &user, guest_cart).await?
                };
                (cart, Vec::new(), MergeOutcome::default(), Some(guest_cart_id))
            }
            (Some(user_cart), Some(guest_cart)) => {
                let user_items = load_items(conn, user_cart.id).await?;
                let guest_items = load_items(conn, guest_cart.id).await?;
                let conflicts = detect_conflicts(&user_items, &guest_items);

                let outcome = match strategy {
                    MergeStrategy::Auto | MergeStrategy::Merge => {
                        self.combine_lines(conn, &user, &guest, &user_cart, &user_items, &guest_items, strategy)
                            .await?
                    }
                    MergeStrategy::Replace => {
                        self.replace_lines(conn, &user, &guest, &user_cart, &guest_items)
                            .await?
                    }
                    MergeStrategy::KeepUser => MergeOutcome::default(),
                };

                if strategy != MergeStrategy::KeepUser
                    && user_cart.coupon_code.is_none()
                    && guest_cart.coupon_code.is_some()
                {
                    let mut active: cart::ActiveModel = user_cart.clone().into();
                    active.coupon_code = Set(guest_cart.coupon_code.clone());
                    active.update(conn).await?;
                }

                let guest_cart_id = guest_cart.id;
                self.discard_guest_cart(conn, &guest, guest_cart_id).await?;
                (user_cart, conflicts, outcome, Some(guest_cart_id))
            }
        };

        self.reservations.refresh(conn, &user).await?;
        let cart = self.recalculate_cart_totals(conn, cart.id).await?;
        let items = load_items(conn, cart.id).await?;

        Ok((
            MergeResult {
                cart: CartWithItems { cart, items },
                strategy,
                conflicts,
                adjusted_products: outcome.adjusted_products,
                dropped_products: outcome.dropped_products,
            },
            guest_cart_id,
        ))
    }

    async fn adopt_guest_cart(
        &self,
        conn: &impl ConnectionTrait,
        guest: &CartOwner,
        user: &CartOwner,
        guest_cart: CartModel,
    ) -> Result<CartModel, ServiceError> {
        let now = Utc::now();
        let mut active: cart::ActiveModel = guest_cart.into();
        active.user_id = Set(user.user_id());
        active.session_id = Set(None);
        active.expires_at = Set(cart_expiry(user, now));
        active.updated_at = Set(now);
        let cart = active.update(conn).await?;

        self.reservations.transfer(conn, guest, user).await?;
        Ok(cart)
    }

    /// `auto` and `merge`: sum overlapping lines and move guest-only lines.
    #[allow(clippy::too_many_arguments)]
    async fn combine_lines(
        &self,
        conn: &impl ConnectionTrait,
        user: &CartOwner,
        guest: &CartOwner,
        user_cart: &CartModel,
        user_items: &[CartItemModel],
        guest_items: &[CartItemModel],
        strategy: MergeStrategy,
    ) -> Result<MergeOutcome, ServiceError> {
        let strict = strategy == MergeStrategy::Merge;
        let mut outcome = MergeOutcome::default();

        let user_by_product: HashMap<Uuid, &CartItemModel> =
            user_items.iter().map(|item| (item.product_id, item)).collect();
        let guest_holds = self.hold_quantities(conn, guest).await?;
        let products = products_by_id(conn, guest_items.iter().map(|i| i.product_id).collect()).await?;
        let now = Utc::now();

        for guest_item in guest_items {
            let product = match products.get(&guest_item.product_id) {
                Some(product) if product.is_purchasable() => product,
                _ => {
                    if strict {
                        return Err(ServiceError::ValidationError(format!(
                            "Product {} is not available for purchase",
                            guest_item.product_id
                        )));
                    }
                    outcome.dropped_products.push(guest_item.product_id);
                    continue;
                }
            };

            let user_item = user_by_product.get(&product.id).copied();
            let wanted = user_item.map_or(0, |item| item.quantity) + guest_item.quantity;
            let available = self
                .reservations
                .available_quantity(conn, product.id, Some(user))
                .await?
                + guest_holds.get(&product.id).copied().unwrap_or(0);

            let quantity = if strict {
                if wanted > MAX_ITEM_QUANTITY {
                    return Err(ServiceError::ValidationError(format!(
                        "Merged quantity {} for product {} exceeds the maximum of {} per item",
                        wanted, product.id, MAX_ITEM_QUANTITY
                    )));
                }
                if wanted > available {
                    return Err(ServiceError::InsufficientStock(format!(
                        "only {} units of product {} available",
                        available, product.id
                    )));
                }
                wanted
            } else {
                let clamped = wanted.min(available).min(MAX_ITEM_QUANTITY);
                if clamped < wanted {
                    outcome.adjusted_products.push(product.id);
                }
                clamped
            };

            if quantity <= 0 {
                self.reservations.release(conn, user, product.id).await?;
                if let Some(item) = user_item {
                    CartItem::delete_by_id(item.id).exec(conn).await?;
                }
                outcome.dropped_products.push(product.id);
                continue;
            }

            self.reservations.release(conn, guest, product.id).await?;
            self.reservations
                .reserve(conn, user, product.id, quantity)
                .await?;

            let mut line: cart_item::ActiveModel = match user_item {
                Some(item) => item.clone().into(),
                None => {
                    let mut moved: cart_item::ActiveModel = guest_item.clone().into();
                    moved.cart_id = Set(user_cart.id);
                    moved
                }
            };
            line.quantity = Set(quantity);
            line.unit_price = Set(product.price);
            line.subtotal = Set(product.price * Decimal::from(quantity));
            line.updated_at = Set(now);
            line.update(conn).await?;
        }

        Ok(outcome)
    }

    /// `replace`: drop the user's lines and move the guest's lines over as-is.
    async fn replace_lines(
        &self,
        conn: &impl ConnectionTrait,
        user: &CartOwner,
        guest: &CartOwner,
        user_cart: &CartModel,
        guest_items: &[CartItemModel],
    ) -> Result<MergeOutcome, ServiceError> {
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(user_cart.id))
            .exec(conn)
            .await?;
        self.reservations.release_all(conn, user).await?;
        self.reservations.transfer(conn, guest, user).await?;

        let now = Utc::now();
        for guest_item in guest_items {
            let mut moved: cart_item::ActiveModel = guest_item.clone().into();
            moved.cart_id = Set(user_cart.id);
            moved.updated_at = Set(now);
            moved.update(conn).await?;
        }

        Ok(MergeOutcome::default())
    }

    async fn discard_guest_cart(
        &self,
        conn: &impl ConnectionTrait,
        guest: &CartOwner,
        guest_cart_id: Uuid,
    ) -> Result<(), ServiceError> {
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(guest_cart_id))
            .exec(conn)
            .await?;
        Cart::delete_by_id(guest_cart_id).exec(conn).await?;
        self.reservations.release_all(conn, guest).await?;
        Ok(())
    }

    async fn hold_quantities(
        &self,
        conn: &impl ConnectionTrait,
        owner: &CartOwner,
    ) -> Result<HashMap<Uuid, i32>, ServiceError> {
        let mut holds = HashMap::new();
        for reservation in self.reservations.list_active(conn, owner).await? {
            if reservation.expires_at > Utc::now() {
                *holds.entry(reservation.product_id).or_insert(0) += reservation.quantity;
            }
        }
        Ok(holds)
    }
}
