use crate::{
    auth::CartOwner,
    entities::{
        order::{self, Entity as OrderEntity, Model as OrderModel, OrderPaymentStatus, OrderStatus},
        order_item::{self, Entity as OrderItemEntity, Model as OrderItemModel},
        payment::{self, PaymentMethod, PaymentStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        commerce::{checkout_service::CheckoutLine, product_catalog_service::change_stock},
        payments::PaymentService,
    },
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

const ORDER_NUMBER_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const ORDER_NUMBER_SUFFIX_LEN: usize = 6;

/// `ORD-YYYYMMDD-XXXXXX` with an unambiguous upper-case suffix.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ORDER_NUMBER_SUFFIX_LEN)
        .map(|_| ORDER_NUMBER_ALPHABET[rng.gen_range(0..ORDER_NUMBER_ALPHABET.len())] as char)
        .collect();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

/// Admin order listing filter
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<OrderPaymentStatus>,
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

impl OrderFilter {
    fn condition(&self) -> Condition {
        let mut condition = Condition::all();
        if let Some(status) = self.status {
            condition = condition.add(order::Column::Status.eq(status));
        }
        if let Some(payment_status) = self.payment_status {
            condition = condition.add(order::Column::PaymentStatus.eq(payment_status));
        }
        if let Some(user_id) = self.user_id {
            condition = condition.add(order::Column::UserId.eq(user_id));
        }
        if let Some(email) = self.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            condition = condition.add(order::Column::Email.eq(email.to_lowercase()));
        }
        if let Some(from) = self.created_from {
            condition = condition.add(order::Column::CreatedAt.gte(from));
        }
        if let Some(to) = self.created_to {
            condition = condition.add(order::Column::CreatedAt.lte(to));
        }
        condition
    }
}

/// Everything needed to persist an order and its lines.
#[derive(Debug, Clone)]
pub(crate) struct NewOrder {
    pub owner: CartOwner,
    pub email: String,
    pub status: OrderStatus,
    pub payment_status: OrderPaymentStatus,
    pub payment_method: PaymentMethod,
    pub currency: String,
    pub subtotal: Decimal,
    pub discount_total: Decimal,
    pub shipping_total: Decimal,
    pub tax_total: Decimal,
    pub total: Decimal,
    pub coupon_code: Option<String>,
    pub shipping_address: serde_json::Value,
    pub billing_address: Option<serde_json::Value>,
    pub shipping_method: String,
    pub checkout_session_id: Option<Uuid>,
    pub lines: Vec<CheckoutLine>,
}

/// Inserts the order and copies its lines inside the caller's transaction.
pub(crate) async fn insert_order(
    conn: &impl ConnectionTrait,
    new_order: NewOrder,
) -> Result<OrderWithItems, ServiceError> {
    let now = Utc::now();
    let order_id = Uuid::new_v4();
    let (user_id, session_id) = new_order.owner.columns();
    let paid_at = (new_order.payment_status == OrderPaymentStatus::Paid).then_some(now);

    let order = order::ActiveModel {
        id: Set(order_id),
        order_number: Set(generate_order_number(now)),
        user_id: Set(user_id),
        session_id: Set(session_id),
        email: Set(new_order.email.trim().to_lowercase()),
        status: Set(new_order.status),
        payment_status: Set(new_order.payment_status),
        payment_method: Set(new_order.payment_method),
        currency: Set(new_order.currency),
        subtotal: Set(new_order.subtotal),
        discount_total: Set(new_order.discount_total),
        shipping_total: Set(new_order.shipping_total),
        tax_total: Set(new_order.tax_total),
        total: Set(new_order.total),
        refunded_total: Set(Decimal::ZERO),
        coupon_code: Set(new_order.coupon_code),
        shipping_address: Set(new_order.shipping_address),
        billing_address: Set(new_order.billing_address),
        shipping_method: Set(new_order.shipping_method),
        checkout_session_id: Set(new_order.checkout_session_id),
        cancel_reason: Set(None),
        paid_at: Set(paid_at),
        cancelled_at: Set(None),
        delivered_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;

    let mut items = Vec::with_capacity(new_order.lines.len());
    for line in new_order.lines {
        let item = order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(line.product_id),
            product_name: Set(line.product_name),
            sku: Set(line.sku),
            unit_price: Set(line.unit_price),
            quantity: Set(line.quantity),
            subtotal: Set(line.subtotal),
            created_at: Set(now),
        }
        .insert(conn)
        .await?;
        items.push(item);
    }

    Ok(OrderWithItems { order, items })
}

/// Moves `order` to `next` if the transition is allowed, stamping the
/// matching timestamp. Cancellation side effects belong to `cancel_order`.
pub(crate) async fn apply_transition(
    conn: &impl ConnectionTrait,
    order: OrderModel,
    next: OrderStatus,
) -> Result<OrderModel, ServiceError> {
    if !order.status.can_transition_to(next) {
        return Err(ServiceError::InvalidStatus(format!(
            "Order {} cannot move from {} to {}",
            order.order_number, order.status, next
        )));
    }

    let now = Utc::now();
    let mut active: order::ActiveModel = order.into();
    active.status = Set(next);
    match next {
        OrderStatus::Delivered => active.delivered_at = Set(Some(now)),
        OrderStatus::Cancelled => active.cancelled_at = Set(Some(now)),
        _ => {}
    }
    active.updated_at = Set(now);
    Ok(active.update(conn).await?)
}

/// Order queries and lifecycle transitions
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    payments: Arc<PaymentService>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        payments: Arc<PaymentService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            payments,
        }
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderWithItems, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        self.with_items(order).await
    }

    /// Same as `get_order` but hides orders that belong to someone else.
    #[instrument(skip(self))]
    pub async fn get_order_for_owner(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .filter(order::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        self.with_items(order).await
    }

    #[instrument(skip(self))]
    pub async fn get_order_by_number(&self, order_number: &str) -> Result<OrderWithItems, ServiceError> {
        let order = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number.trim().to_uppercase()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_number))?;
        self.with_items(order).await
    }

    #[instrument(skip(self))]
    pub async fn list_orders_for_user(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        self.list_orders(
            OrderFilter {
                user_id: Some(user_id),
                ..Default::default()
            },
            page,
            per_page,
        )
        .await
    }

    /// Lists orders newest first
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        filter: OrderFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = OrderEntity::find()
            .filter(filter.condition())
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        info!(total, page, per_page, returned = orders.len(), "Orders listed");
        Ok((orders, total))
    }

    /// Moves an order along its lifecycle. Cancelling goes through
    /// `cancel_order` so stock and payments are unwound.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        if new_status == OrderStatus::Cancelled {
            return self
                .cancel_order(order_id, "Cancelled by administrator".to_string())
                .await;
        }

        let txn = self.db.begin().await?;
        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        let old_status = order.status;
        let updated = apply_transition(&txn, order, new_status).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .await;
        if new_status == OrderStatus::Delivered {
            self.event_sender
                .send_or_log(Event::OrderDelivered(order_id))
                .await;
        }

        info!(%order_id, %old_status, %new_status, "Order status updated");
        Ok(updated)
    }

    /// Cancels an order that has not shipped yet: restocks every line, fails
    /// pending payments and refunds whatever was captured.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: Uuid, reason: String) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        if !order.status.is_cancellable() {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} is {} and can no longer be cancelled",
                order.order_number, order.status
            )));
        }
        let old_status = order.status;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        for item in &items {
            change_stock(&txn, item.product_id, item.quantity).await?;
        }

        payment::Entity::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Failed))
            .col_expr(
                payment::Column::FailureReason,
                Expr::value(Some("order cancelled".to_string())),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(payment::Column::Status.is_in([PaymentStatus::Pending, PaymentStatus::Authorized]))
            .exec(&txn)
            .await?;

        let needs_refund = matches!(
            order.payment_status,
            OrderPaymentStatus::Paid | OrderPaymentStatus::PartiallyRefunded
        );
        let now = Utc::now();
        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled);
        active.cancel_reason = Set(Some(reason.clone()));
        active.cancelled_at = Set(Some(now));
        active.updated_at = Set(now);
        let order_model = active.update(&txn).await?;

        txn.commit().await?;

        let order_model = if needs_refund {
            match self.payments.refund_order(order_id, None).await {
                Ok(outcome) => {
                    info!(%order_id, refunded = %outcome.refunded, "Refunded cancelled order");
                    OrderEntity::find_by_id(order_id)
                        .one(&*self.db)
                        .await?
                        .unwrap_or(order_model)
                }
                Err(e) => {
                    error!(%order_id, error = %e, "Refund for cancelled order failed");
                    return Err(e);
                }
            }
        } else {
            order_model
        };

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: OrderStatus::Cancelled.to_string(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::OrderCancelled {
                order_id,
                reason: reason.clone(),
            })
            .await;
        metrics::counter!("storefront.orders.cancelled", 1);

        info!(%order_id, %reason, restocked_lines = items.len(), "Order cancelled");
        Ok(order_model)
    }

    /// Cash collected for a COD order.
    pub async fn mark_paid(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        self.payments.mark_cod_collected(order_id).await
    }

    /// Cancels online-payment orders that never got paid within `ttl`.
    #[instrument(skip(self))]
    pub async fn cancel_stale_pending_orders(&self, ttl: Duration) -> Result<u64, ServiceError> {
        let cutoff = Utc::now() - ttl;
        let stale = OrderEntity::find()
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(
                order::Column::PaymentStatus
                    .is_in([OrderPaymentStatus::Pending, OrderPaymentStatus::Failed]),
            )
            .filter(order::Column::PaymentMethod.ne(PaymentMethod::Cod))
            .filter(order::Column::CreatedAt.lt(cutoff))
            .all(&*self.db)
            .await?;

        let mut cancelled = 0;
        for order in stale {
            match self
                .cancel_order(order.id, "Payment not completed in time".to_string())
                .await
            {
                Ok(_) => cancelled += 1,
                Err(e) => warn!(order_id = %order.id, error = %e, "Could not cancel stale order"),
            }
        }
        if cancelled > 0 {
            info!(cancelled, "Cancelled stale pending orders");
        }
        Ok(cancelled)
    }

    async fn with_items(&self, order: OrderModel) -> Result<OrderWithItems, ServiceError> {
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(OrderWithItems { order, items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn order_numbers_follow_the_documented_format() {
        let re = Regex::new(r"^ORD-\d{8}-[A-Z2-9]{6}$").unwrap();
        let now = Utc::now();
        for _ in 0..50 {
            let number = generate_order_number(now);
            assert!(re.is_match(&number), "{}", number);
            assert!(number.contains(&now.format("%Y%m%d").to_string()));
        }
    }

    #[test]
    fn order_number_alphabet_avoids_ambiguous_characters() {
        for forbidden in [b'0', b'O', b'1', b'I'] {
            assert!(!ORDER_NUMBER_ALPHABET.contains(&forbidden));
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = OrderFilter::default();
        assert!(filter.condition().is_empty());

        let filter = OrderFilter {
            status: Some(OrderStatus::Pending),
            email: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(filter.condition().len(), 1);
    }
}
