use crate::{
    auth::CartOwner,
    config::AppConfig,
    db::transaction::with_transaction,
    entities::{
        commerce::{
            checkout_session, Cart, CartItemModel, CartModel, CartStatus, CheckoutSession,
            CheckoutSessionModel, CheckoutStatus,
        },
        order::{OrderPaymentStatus, OrderStatus},
        payment::{PaymentMethod, PaymentStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        commerce::{
            cart_service::{
                clean_coupon_code, find_active_cart, load_items, products_by_id, CartService,
            },
            product_catalog_service::change_stock,
        },
        coupons::{CouponContext, CouponService, DiscountLine},
        orders::{insert_order, NewOrder, OrderWithItems},
        payments::{IntentRequest, NewPayment, PaymentConfirmation, PaymentService},
        shipping::cost_for,
        stock_reservation_service::StockReservationService,
    },
    tracing::with_metrics,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Checkout service.
///
/// Online payments go through a checkout session: the cart is priced and
/// snapshotted, a payment intent is opened with the gateway, and completing
/// the session turns the snapshot into an order in one transaction. Cash on
/// delivery skips the session and creates the order directly.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
    carts: Arc<CartService>,
    reservations: Arc<StockReservationService>,
    coupons: Arc<CouponService>,
    payments: Arc<PaymentService>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        carts: Arc<CartService>,
        reservations: Arc<StockReservationService>,
        coupons: Arc<CouponService>,
        payments: Arc<PaymentService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
            carts,
            reservations,
            coupons,
            payments,
        }
    }

    /// Prices the owner's cart and opens a payment intent for it. Any other
    /// active session on the same cart is cancelled.
    #[instrument(skip(self, input), fields(payment_method = %input.payment_method))]
    pub async fn create_session(
        &self,
        owner: &CartOwner,
        input: CreateCheckoutInput,
    ) -> Result<CheckoutSessionModel, ServiceError> {
        input.validate()?;
        if !input.payment_method.is_online() {
            return Err(ServiceError::ValidationError(
                "Cash on delivery orders are placed without a checkout session".to_string(),
            ));
        }
        let gateway = self.payments.gateway(input.payment_method)?;

        let txn = self.db.begin().await?;

        let cart = find_active_cart(&txn, owner)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No active cart for {}", owner)))?;
        let items = load_items(&txn, cart.id).await?;
        let coupon_code = clean_coupon_code(input.coupon_code.as_deref()).or(cart.coupon_code.clone());
        let pricing = self
            .price(&txn, owner, &items, &input.shipping_method, coupon_code)
            .await?;

        for line in &pricing.lines {
            self.reservations
                .reserve(&txn, owner, line.product_id, line.quantity)
                .await?;
        }
        cancel_active_sessions(&txn, cart.id).await?;

        let now = Utc::now();
        let (user_id, session_id) = owner.columns();
        let session = checkout_session::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart.id),
            user_id: Set(user_id),
            session_id: Set(session_id),
            email: Set(input.email.trim().to_lowercase()),
            status: Set(CheckoutStatus::Active),
            lines: Set(serde_json::to_value(&pricing.lines)?),
            shipping_address: Set(serde_json::to_value(&input.shipping_address)?),
            billing_address: Set(input
                .billing_address
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?),
            shipping_method: Set(input.shipping_method.trim().to_lowercase()),
            payment_method: Set(input.payment_method),
            payment_reference: Set(None),
            payment_client_secret: Set(None),
            coupon_code: Set(pricing.coupon_code.clone()),
            currency: Set(cart.currency.clone()),
            subtotal: Set(pricing.subtotal),
            discount_total: Set(pricing.discount_total),
            shipping_total: Set(pricing.shipping_total),
            tax_total: Set(pricing.tax_total),
            total: Set(pricing.total),
            order_id: Set(None),
            expires_at: Set(now + Duration::minutes(self.config.checkout_session_ttl_mins)),
            completed_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        let intent = gateway
            .create_intent(&IntentRequest {
                amount: session.total,
                currency: session.currency.clone(),
                reference_id: session.id,
                description: Some(format!("Checkout {}", session.id)),
            })
            .await;
        let intent = match intent {
            Ok(intent) => intent,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Payment intent creation failed");
                self.set_status(session, CheckoutStatus::Cancelled).await?;
                return Err(e);
            }
        };

        let mut active: checkout_session::ActiveModel = session.into();
        active.payment_reference = Set(Some(intent.reference));
        active.payment_client_secret = Set(intent.client_secret);
        active.updated_at = Set(Utc::now());
        let session = active.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::CheckoutSessionCreated(session.id))
            .await;
        metrics::counter!("storefront.checkout.sessions_created", 1, "method" => session.payment_method.to_string());

        info!(session_id = %session.id, total = %session.total, "Checkout session created");
        Ok(session)
    }

    pub async fn get_session(
        &self,
        owner: &CartOwner,
        session_id: Uuid,
    ) -> Result<CheckoutSessionModel, ServiceError> {
        find_owned_session(&*self.db, owner, session_id).await
    }

    /// Confirms the payment and turns the session into an order.
    #[instrument(skip(self, payment_reference))]
    pub async fn complete_session(
        &self,
        owner: &CartOwner,
        session_id: Uuid,
        payment_reference: Option<String>,
    ) -> Result<OrderWithItems, ServiceError> {
        with_metrics("storefront.checkout.complete", || async {
            let session = self.active_session(owner, session_id).await?;

            let reference = match (payment_reference, session.payment_reference.clone()) {
                (Some(given), Some(stored)) if given != stored => {
                    return Err(ServiceError::ValidationError(
                        "Payment reference does not belong to this checkout session".to_string(),
                    ))
                }
                (Some(given), _) => given,
                (None, Some(stored)) => stored,
                (None, None) => {
                    return Err(ServiceError::ValidationError(
                        "Checkout session has no payment to confirm".to_string(),
                    ))
                }
            };

            let confirmation = self
                .payments
                .gateway(session.payment_method)?
                .confirm(&reference)
                .await?;
            check_confirmation(&session, &confirmation)?;

            let service = self.clone();
            let owner = owner.clone();
            let confirmed = confirmation.clone();
            let placed = with_transaction(&self.db, move |txn| {
                Box::pin(async move { service.place_from_session(txn, &owner, session_id, confirmed).await })
            })
            .await?;

            self.announce(&placed, Some(session_id)).await;
            if confirmation.status == PaymentStatus::Captured {
                self.event_sender
                    .send_or_log(Event::OrderPaid(placed.order.id))
                    .await;
            }
            metrics::counter!("storefront.checkout.completed", 1, "method" => placed.order.payment_method.to_string());
            info!(%session_id, order_id = %placed.order.id, order_number = %placed.order.order_number, "Checkout completed");
            Ok(placed)
        })
        .await
    }

    pub async fn cancel_session(
        &self,
        owner: &CartOwner,
        session_id: Uuid,
    ) -> Result<CheckoutSessionModel, ServiceError> {
        let session = find_owned_session(&*self.db, owner, session_id).await?;
        if session.status != CheckoutStatus::Active {
            return Err(ServiceError::Conflict(format!(
                "Checkout session {} is already {}",
                session_id, session.status
            )));
        }
        self.set_status(session, CheckoutStatus::Cancelled).await
    }

    /// Cash on delivery: prices the cart and creates a confirmed order with
    /// payment still pending.
    #[instrument(skip(self, input))]
    pub async fn place_cod_order(
        &self,
        owner: &CartOwner,
        input: CodOrderInput,
    ) -> Result<OrderWithItems, ServiceError> {
        input.validate()?;
        self.payments.gateway(PaymentMethod::Cod)?;

        with_metrics("storefront.checkout.cod", || async {
            let service = self.clone();
            let owner = owner.clone();
            let placed = with_transaction(&self.db, move |txn| {
                Box::pin(async move { service.place_cod(txn, &owner, input).await })
            })
            .await?;

            self.announce(&placed, None).await;
            metrics::counter!("storefront.checkout.completed", 1, "method" => PaymentMethod::Cod.to_string());
            info!(order_id = %placed.order.id, order_number = %placed.order.order_number, total = %placed.order.total, "Cash on delivery order placed");
            Ok(placed)
        })
        .await
    }

    /// Marks active sessions past their deadline as expired.
    pub async fn expire_sessions(&self) -> Result<u64, ServiceError> {
        let now = Utc::now();
        let result = CheckoutSession::update_many()
            .col_expr(checkout_session::Column::Status, Expr::value(CheckoutStatus::Expired))
            .col_expr(checkout_session::Column::UpdatedAt, Expr::value(now))
            .filter(checkout_session::Column::Status.eq(CheckoutStatus::Active))
            .filter(checkout_session::Column::ExpiresAt.lt(now))
            .exec(&*self.db)
            .await?;

        let expired = result.rows_affected;
        if expired > 0 {
            self.event_sender
                .send_or_log(Event::CheckoutSessionsExpired(expired))
                .await;
            info!(expired, "Expired checkout sessions");
        }
        Ok(expired)
    }

    async fn active_session(
        &self,
        owner: &CartOwner,
        session_id: Uuid,
    ) -> Result<CheckoutSessionModel, ServiceError> {
        let session = find_owned_session(&*self.db, owner, session_id).await?;
        match session.status {
            CheckoutStatus::Active if session.expires_at < Utc::now() => {
                self.set_status(session, CheckoutStatus::Expired).await?;
                Err(ServiceError::Conflict(format!(
                    "Checkout session {} has expired",
                    session_id
                )))
            }
            CheckoutStatus::Active => Ok(session),
            status => Err(ServiceError::Conflict(format!(
                "Checkout session {} is already {}",
                session_id, status
            ))),
        }
    }

    async fn set_status(
        &self,
        session: CheckoutSessionModel,
        status: CheckoutStatus,
    ) -> Result<CheckoutSessionModel, ServiceError> {
        let mut active: checkout_session::ActiveModel = session.into();
        active.status = Set(status);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    async fn place_from_session(
        &self,
        txn: &impl ConnectionTrait,
        owner: &CartOwner,
        session_id: Uuid,
        confirmation: PaymentConfirmation,
    ) -> Result<OrderWithItems, ServiceError> {
        let session = find_owned_session(txn, owner, session_id).await?;
        if session.status != CheckoutStatus::Active {
            return Err(ServiceError::Conflict(format!(
                "Checkout session {} is already {}",
                session_id, session.status
            )));
        }
        let cart = active_cart_by_id(txn, session.cart_id).await?;
        let lines: Vec<CheckoutLine> = serde_json::from_value(session.lines.clone())?;

        self.take_stock(txn, owner, &lines).await?;

        let (status, payment_status) = match confirmation.status {
            PaymentStatus::Captured => (OrderStatus::Confirmed, OrderPaymentStatus::Paid),
            PaymentStatus::Authorized => (OrderStatus::Confirmed, OrderPaymentStatus::Pending),
            _ => (OrderStatus::Pending, OrderPaymentStatus::Pending),
        };

        let placed = insert_order(
            txn,
            NewOrder {
                owner: owner.clone(),
                email: session.email.clone(),
                status,
                payment_status,
                payment_method: session.payment_method,
                currency: session.currency.clone(),
                subtotal: session.subtotal,
                discount_total: session.discount_total,
                shipping_total: session.shipping_total,
                tax_total: session.tax_total,
                total: session.total,
                coupon_code: session.coupon_code.clone(),
                shipping_address: session.shipping_address.clone(),
                billing_address: session.billing_address.clone(),
                shipping_method: session.shipping_method.clone(),
                checkout_session_id: Some(session.id),
                lines,
            },
        )
        .await?;

        self.payments
            .record_payment(
                txn,
                NewPayment {
                    order_id: Some(placed.order.id),
                    checkout_session_id: Some(session.id),
                    provider: session.payment_method,
                    provider_reference: Some(confirmation.reference.clone()),
                    amount: session.total,
                    currency: session.currency.clone(),
                    status: confirmation.status,
                },
            )
            .await?;
        self.record_coupon(txn, owner, &placed).await?;

        let now = Utc::now();
        let mut active: checkout_session::ActiveModel = session.into();
        active.status = Set(CheckoutStatus::Completed);
        active.order_id = Set(Some(placed.order.id));
        active.payment_reference = Set(Some(confirmation.reference));
        active.completed_at = Set(Some(now));
        active.updated_at = Set(now);
        active.update(txn).await?;

        self.carts.convert_cart(txn, cart.id).await?;
        Ok(placed)
    }

    async fn place_cod(
        &self,
        txn: &impl ConnectionTrait,
        owner: &CartOwner,
        input: CodOrderInput,
    ) -> Result<OrderWithItems, ServiceError> {
        let cart = find_active_cart(txn, owner)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No active cart for {}", owner)))?;
        let items = load_items(txn, cart.id).await?;
        let coupon_code = clean_coupon_code(input.coupon_code.as_deref()).or(cart.coupon_code.clone());
        let pricing = self
            .price(txn, owner, &items, &input.shipping_method, coupon_code)
            .await?;

        if pricing.total > self.config.cod_max_order_amount {
            return Err(ServiceError::ValidationError(format!(
                "Cash on delivery is limited to orders of {} {}",
                self.config.cod_max_order_amount, cart.currency
            )));
        }

        self.take_stock(txn, owner, &pricing.lines).await?;

        let placed = insert_order(
            txn,
            NewOrder {
                owner: owner.clone(),
                email: input.email.clone(),
                status: OrderStatus::Confirmed,
                payment_status: OrderPaymentStatus::Pending,
                payment_method: PaymentMethod::Cod,
                currency: cart.currency.clone(),
                subtotal: pricing.subtotal,
                discount_total: pricing.discount_total,
                shipping_total: pricing.shipping_total,
                tax_total: pricing.tax_total,
                total: pricing.total,
                coupon_code: pricing.coupon_code.clone(),
                shipping_address: serde_json::to_value(&input.shipping_address)?,
                billing_address: input
                    .billing_address
                    .as_ref()
                    .map(serde_json::to_value)
                    .transpose()?,
                shipping_method: input.shipping_method.trim().to_lowercase(),
                checkout_session_id: None,
                lines: pricing.lines,
            },
        )
        .await?;

        self.payments
            .record_payment(
                txn,
                NewPayment {
                    order_id: Some(placed.order.id),
                    checkout_session_id: None,
                    provider: PaymentMethod::Cod,
                    provider_reference: Some(format!("cod_{}", placed.order.id.simple())),
                    amount: placed.order.total,
                    currency: placed.order.currency.clone(),
                    status: PaymentStatus::Pending,
                },
            )
            .await?;
        self.record_coupon(txn, owner, &placed).await?;

        cancel_active_sessions(txn, cart.id).await?;
        self.carts.convert_cart(txn, cart.id).await?;
        Ok(placed)
    }

    /// Line snapshot and money totals for a cart.
    async fn price(
        &self,
        conn: &impl ConnectionTrait,
        owner: &CartOwner,
        items: &[CartItemModel],
        shipping_method: &str,
        coupon_code: Option<String>,
    ) -> Result<Pricing, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }

        let products = products_by_id(conn, items.iter().map(|i| i.product_id).collect()).await?;
        let mut lines = Vec::with_capacity(items.len());
        let mut discount_lines = Vec::with_capacity(items.len());
        for item in items {
            let product = products
                .get(&item.product_id)
                .filter(|p| p.is_purchasable())
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "Product {} is no longer available",
                        item.product_id
                    ))
                })?;
            let available = self
                .reservations
                .available_quantity(conn, product.id, Some(owner))
                .await?;
            if available < item.quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "only {} units of {} available",
                    available, product.name
                )));
            }

            lines.push(CheckoutLine {
                product_id: product.id,
                product_name: product.name.clone(),
                sku: product.sku.clone(),
                unit_price: product.price,
                quantity: item.quantity,
                subtotal: product.price * Decimal::from(item.quantity),
            });
            discount_lines.push(DiscountLine {
                product_id: product.id,
                category_id: product.category_id,
                unit_price: product.price,
                quantity: item.quantity,
            });
        }

        let subtotal: Decimal = lines.iter().map(|l| l.subtotal).sum();
        let item_count: i32 = lines.iter().map(|l| l.quantity).sum();

        let discount_total = match coupon_code.as_deref() {
            Some(code) => {
                let context = CouponContext {
                    user_id: owner.user_id(),
                    lines: discount_lines,
                };
                self.coupons.evaluate(conn, code, &context).await?.discount
            }
            None => Decimal::ZERO,
        };

        let shipping_total = cost_for(conn, shipping_method, subtotal, item_count).await?;
        let taxable = (subtotal - discount_total).max(Decimal::ZERO);
        let tax_total = (taxable * self.config.tax_rate()).round_dp(2);

        Ok(Pricing {
            lines,
            subtotal,
            discount_total,
            shipping_total,
            tax_total,
            total: taxable + shipping_total + tax_total,
            coupon_code,
        })
    }

    /// Deducts each line from stock and consumes the owner's holds.
    async fn take_stock(
        &self,
        conn: &impl ConnectionTrait,
        owner: &CartOwner,
        lines: &[CheckoutLine],
    ) -> Result<(), ServiceError> {
        for line in lines {
            let available = self
                .reservations
                .available_quantity(conn, line.product_id, Some(owner))
                .await?;
            if available < line.quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "only {} units of {} available",
                    available, line.product_name
                )));
            }
            change_stock(conn, line.product_id, -line.quantity).await?;
        }
        self.reservations.consume(conn, owner).await?;
        Ok(())
    }

    async fn record_coupon(
        &self,
        conn: &impl ConnectionTrait,
        owner: &CartOwner,
        placed: &OrderWithItems,
    ) -> Result<(), ServiceError> {
        if let Some(code) = placed.order.coupon_code.as_deref() {
            if placed.order.discount_total > Decimal::ZERO {
                let coupon = self.coupons.find_by_code(conn, code).await?;
                self.coupons
                    .record_usage(
                        conn,
                        coupon.id,
                        owner.user_id(),
                        placed.order.id,
                        placed.order.discount_total,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn announce(&self, placed: &OrderWithItems, session_id: Option<Uuid>) {
        if let Some(session_id) = session_id {
            self.event_sender
                .send_or_log(Event::CheckoutCompleted {
                    session_id,
                    order_id: placed.order.id,
                })
                .await;
        }
        self.event_sender
            .send_or_log(Event::OrderCreated(placed.order.id))
            .await;
    }
}

/// The gateway must report a usable payment for exactly the session total.
fn check_confirmation(
    session: &CheckoutSessionModel,
    confirmation: &PaymentConfirmation,
) -> Result<(), ServiceError> {
    match confirmation.status {
        PaymentStatus::Failed | PaymentStatus::Refunded => {
            error!(session_id = %session.id, reason = ?confirmation.failure_reason, "Payment was not completed");
            Err(ServiceError::PaymentFailed(
                confirmation
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| format!("payment {}", confirmation.status)),
            ))
        }
        PaymentStatus::Captured | PaymentStatus::Authorized
            if confirmation.amount.round_dp(2) != session.total.round_dp(2) =>
        {
            Err(ServiceError::PaymentFailed(format!(
                "paid amount {} does not match the order total {}",
                confirmation.amount, session.total
            )))
        }
        _ => Ok(()),
    }
}

fn session_owner_condition(owner: &CartOwner) -> Condition {
    match owner {
        CartOwner::User(id) => Condition::all().add(checkout_session::Column::UserId.eq(*id)),
        CartOwner::Guest(session) => Condition::all()
            .add(checkout_session::Column::UserId.is_null())
            .add(checkout_session::Column::SessionId.eq(session.clone())),
    }
}

async fn find_owned_session(
    conn: &impl ConnectionTrait,
    owner: &CartOwner,
    session_id: Uuid,
) -> Result<CheckoutSessionModel, ServiceError> {
    CheckoutSession::find_by_id(session_id)
        .filter(session_owner_condition(owner))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Checkout session", session_id))
}

async fn active_cart_by_id(conn: &impl ConnectionTrait, cart_id: Uuid) -> Result<CartModel, ServiceError> {
    let cart = Cart::find_by_id(cart_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Cart", cart_id))?;
    if cart.status != CartStatus::Active {
        return Err(ServiceError::Conflict(format!("Cart {} is {}", cart_id, cart.status)));
    }
    Ok(cart)
}

async fn cancel_active_sessions(conn: &impl ConnectionTrait, cart_id: Uuid) -> Result<u64, ServiceError> {
    let result = CheckoutSession::update_many()
        .col_expr(checkout_session::Column::Status, Expr::value(CheckoutStatus::Cancelled))
        .col_expr(checkout_session::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(checkout_session::Column::CartId.eq(cart_id))
        .filter(checkout_session::Column::Status.eq(CheckoutStatus::Active))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

#[derive(Debug, Clone)]
struct Pricing {
    lines: Vec<CheckoutLine>,
    subtotal: Decimal,
    discount_total: Decimal,
    shipping_total: Decimal,
    tax_total: Decimal,
    total: Decimal,
    coupon_code: Option<String>,
}

/// Priced cart line frozen into a checkout session and copied to the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub subtotal: Decimal,
}

/// Postal address
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct Address {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    pub company: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub address_line_1: String,
    pub address_line_2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub province: String,
    #[validate(length(equal = 2))]
    pub country_code: String,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateCheckoutInput {
    #[validate(email)]
    pub email: String,
    #[validate]
    pub shipping_address: Address,
    #[validate]
    pub billing_address: Option<Address>,
    #[validate(length(min = 1, max = 50))]
    pub shipping_method: String,
    pub payment_method: PaymentMethod,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CodOrderInput {
    #[validate(email)]
    pub email: String,
    #[validate]
    pub shipping_address: Address,
    #[validate]
    pub billing_address: Option<Address>,
    #[validate(length(min = 1, max = 50))]
    pub shipping_method: String,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CompleteCheckoutInput {
    pub payment_reference: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn session(total: Decimal) -> CheckoutSessionModel {
        let now = Utc::now();
        CheckoutSessionModel {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            user_id: Some(Uuid::new_v4()),
            session_id: None,
            email: "a@example.com".into(),
            status: CheckoutStatus::Active,
            lines: serde_json::json!([]),
            shipping_address: serde_json::json!({}),
            billing_address: None,
            shipping_method: "standard".into(),
            payment_method: PaymentMethod::Stripe,
            payment_reference: Some("pi_1".into()),
            payment_client_secret: None,
            coupon_code: None,
            currency: "USD".into(),
            subtotal: total,
            discount_total: Decimal::ZERO,
            shipping_total: Decimal::ZERO,
            tax_total: Decimal::ZERO,
            total,
            order_id: None,
            expires_at: now + Duration::minutes(30),
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn confirmation(status: PaymentStatus, amount: Decimal) -> PaymentConfirmation {
        PaymentConfirmation {
            reference: "pi_1".into(),
            status,
            amount,
            failure_reason: None,
        }
    }

    #[test]
    fn captured_payment_must_match_total() {
        let s = session(dec!(42.50));
        assert!(check_confirmation(&s, &confirmation(PaymentStatus::Captured, dec!(42.50))).is_ok());
        assert!(matches!(
            check_confirmation(&s, &confirmation(PaymentStatus::Captured, dec!(40))),
            Err(ServiceError::PaymentFailed(_))
        ));
    }

    #[test]
    fn failed_payment_is_rejected_and_pending_passes() {
        let s = session(dec!(10));
        assert!(matches!(
            check_confirmation(&s, &confirmation(PaymentStatus::Failed, dec!(10))),
            Err(ServiceError::PaymentFailed(_))
        ));
        assert!(check_confirmation(&s, &confirmation(PaymentStatus::Pending, Decimal::ZERO)).is_ok());
    }

    #[test]
    fn address_requires_two_letter_country() {
        let mut address = Address {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            company: None,
            address_line_1: "1 Analytical Way".into(),
            address_line_2: None,
            city: "London".into(),
            province: "LDN".into(),
            country_code: "GB".into(),
            postal_code: "N1 9GU".into(),
            phone: None,
        };
        assert!(address.validate().is_ok());
        address.country_code = "GBR".into();
        assert!(address.validate().is_err());
    }
}
