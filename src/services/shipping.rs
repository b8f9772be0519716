use crate::{
    config::AppConfig,
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus},
        order_item::{self, Entity as OrderItemEntity},
        return_request::{self, ReturnLine, ReturnStatus},
        shipment::{self, ShipmentStatus, TrackingEvent},
        shipping_rate,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        commerce::product_catalog_service::{change_stock, validate_non_negative},
        orders::apply_transition,
        payments::PaymentService,
    },
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Flat-plus-per-item cost of a rate, waived at the free-shipping threshold.
pub fn rate_cost(rate: &shipping_rate::Model, subtotal: Decimal, item_count: i32) -> Decimal {
    if let Some(threshold) = rate.free_shipping_threshold {
        if subtotal >= threshold {
            return Decimal::ZERO;
        }
    }
    (rate.base_cost + rate.per_item_cost * Decimal::from(item_count.max(0))).round_dp(2)
}

/// Shipping cost for `method_code` inside the caller's transaction.
pub(crate) async fn cost_for(
    conn: &impl ConnectionTrait,
    method_code: &str,
    subtotal: Decimal,
    item_count: i32,
) -> Result<Decimal, ServiceError> {
    let code = method_code.trim().to_lowercase();
    let rate = shipping_rate::Entity::find()
        .filter(shipping_rate::Column::MethodCode.eq(code.as_str()))
        .filter(shipping_rate::Column::IsActive.eq(true))
        .one(conn)
        .await?
        .ok_or_else(|| {
            ServiceError::ValidationError(format!("Shipping method '{}' is not available", code))
        })?;
    Ok(rate_cost(&rate, subtotal, item_count))
}

fn validate_day_range(min: i32, max: i32) -> Result<(), ServiceError> {
    if min < 0 || max < min {
        return Err(ServiceError::ValidationError(format!(
            "Invalid delivery estimate {}-{} days",
            min, max
        )));
    }
    Ok(())
}

/// Distinguishes an absent field from an explicit `null`.
fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<Decimal>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Decimal>::deserialize(deserializer).map(Some)
}

fn check_return_transition(from: ReturnStatus, to: ReturnStatus) -> Result<(), ServiceError> {
    use ReturnStatus::*;
    let allowed = matches!(
        (from, to),
        (Requested, Approved) | (Requested, Rejected) | (Approved, Received) | (Received, Refunded)
    );
    if allowed {
        Ok(())
    } else {
        Err(ServiceError::InvalidStatus(format!(
            "Return cannot move from {} to {}",
            from, to
        )))
    }
}

/// Merges duplicate lines and rejects non-positive quantities.
fn aggregate_return_lines(lines: &[ReturnLine]) -> Result<HashMap<Uuid, i32>, ServiceError> {
    let mut merged: HashMap<Uuid, i32> = HashMap::new();
    for line in lines {
        if line.quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "Return quantity for item {} must be at least 1",
                line.order_item_id
            )));
        }
        *merged.entry(line.order_item_id).or_default() += line.quantity;
    }
    Ok(merged)
}

/// Value of the returned units with the order-level discount spread
/// proportionally over the lines.
pub fn return_refund_amount(
    order: &order::Model,
    items: &[order_item::Model],
    quantities: &HashMap<Uuid, i32>,
) -> Decimal {
    let gross: Decimal = items
        .iter()
        .filter_map(|item| {
            quantities
                .get(&item.id)
                .map(|qty| item.unit_price * Decimal::from(*qty))
        })
        .sum();
    if order.subtotal.is_zero() || order.discount_total.is_zero() {
        return gross.round_dp(2);
    }
    let ratio = (order.subtotal - order.discount_total).max(Decimal::ZERO) / order.subtotal;
    (gross * ratio).round_dp(2)
}

/// Shipping rates, shipments and returns
#[derive(Clone)]
pub struct ShippingService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
    payments: Arc<PaymentService>,
}

impl ShippingService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        payments: Arc<PaymentService>,
    ) -> Self {
        Self {
            db,
            event_sender,
            config,
            payments,
        }
    }

    // ----- rates -----

    #[instrument(skip(self, input), fields(method_code = %input.method_code))]
    pub async fn create_rate(&self, input: CreateRateInput) -> Result<shipping_rate::Model, ServiceError> {
        input.validate()?;
        validate_day_range(input.estimated_days_min, input.estimated_days_max)?;

        let code = input.method_code.trim().to_lowercase();
        let exists = shipping_rate::Entity::find()
            .filter(shipping_rate::Column::MethodCode.eq(code.as_str()))
            .one(&*self.db)
            .await?
            .is_some();
        if exists {
            return Err(ServiceError::Conflict(format!(
                "Shipping method '{}' already exists",
                code
            )));
        }

        let now = Utc::now();
        let rate = shipping_rate::ActiveModel {
            id: Set(Uuid::new_v4()),
            method_code: Set(code),
            name: Set(input.name.trim().to_string()),
            base_cost: Set(input.base_cost),
            per_item_cost: Set(input.per_item_cost),
            free_shipping_threshold: Set(input.free_shipping_threshold),
            estimated_days_min: Set(input.estimated_days_min),
            estimated_days_max: Set(input.estimated_days_max),
            is_active: Set(input.is_active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(rate_id = %rate.id, method_code = %rate.method_code, "Shipping rate created");
        Ok(rate)
    }

    pub async fn list_rates(&self, active_only: bool) -> Result<Vec<shipping_rate::Model>, ServiceError> {
        let mut query = shipping_rate::Entity::find();
        if active_only {
            query = query.filter(shipping_rate::Column::IsActive.eq(true));
        }
        Ok(query
            .order_by_asc(shipping_rate::Column::BaseCost)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self, input))]
    pub async fn update_rate(
        &self,
        rate_id: Uuid,
        input: UpdateRateInput,
    ) -> Result<shipping_rate::Model, ServiceError> {
        input.validate()?;
        let rate = shipping_rate::Entity::find_by_id(rate_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Shipping rate", rate_id))?;

        validate_day_range(
            input.estimated_days_min.unwrap_or(rate.estimated_days_min),
            input.estimated_days_max.unwrap_or(rate.estimated_days_max),
        )?;

        let mut active: shipping_rate::ActiveModel = rate.into();
        if let Some(name) = input.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(base_cost) = input.base_cost {
            active.base_cost = Set(base_cost);
        }
        if let Some(per_item_cost) = input.per_item_cost {
            active.per_item_cost = Set(per_item_cost);
        }
        if let Some(threshold) = input.free_shipping_threshold {
            if threshold.is_some_and(|t| t < Decimal::ZERO) {
                return Err(ServiceError::ValidationError(
                    "free_shipping_threshold must not be negative".to_string(),
                ));
            }
            active.free_shipping_threshold = Set(threshold);
        }
        if let Some(min) = input.estimated_days_min {
            active.estimated_days_min = Set(min);
        }
        if let Some(max) = input.estimated_days_max {
            active.estimated_days_max = Set(max);
        }
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(Utc::now());

        Ok(active.update(&*self.db).await?)
    }

    pub async fn calculate_cost(
        &self,
        method_code: &str,
        subtotal: Decimal,
        item_count: i32,
    ) -> Result<Decimal, ServiceError> {
        cost_for(&*self.db, method_code, subtotal, item_count).await
    }

    /// Costs for every active method, cheapest first.
    pub async fn quote(&self, subtotal: Decimal, item_count: i32) -> Result<Vec<ShippingQuote>, ServiceError> {
        let mut quotes: Vec<ShippingQuote> = self
            .list_rates(true)
            .await?
            .into_iter()
            .map(|rate| ShippingQuote {
                cost: rate_cost(&rate, subtotal, item_count),
                method_code: rate.method_code,
                name: rate.name,
                estimated_days_min: rate.estimated_days_min,
                estimated_days_max: rate.estimated_days_max,
            })
            .collect();
        quotes.sort_by(|a, b| a.cost.cmp(&b.cost).then_with(|| a.method_code.cmp(&b.method_code)));
        Ok(quotes)
    }

    // ----- shipments -----

    /// Hands an order to a carrier; the order becomes shipped.
    #[instrument(skip(self, input), fields(carrier = %input.carrier))]
    pub async fn create_shipment(
        &self,
        order_id: Uuid,
        input: CreateShipmentInput,
    ) -> Result<shipment::Model, ServiceError> {
        input.validate()?;
        let tracking_number = input.tracking_number.trim().to_uppercase();

        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        if !matches!(order.status, OrderStatus::Confirmed | OrderStatus::Processing) {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} is {} and cannot be shipped",
                order.order_number, order.status
            )));
        }

        let duplicate = shipment::Entity::find()
            .filter(shipment::Column::TrackingNumber.eq(tracking_number.as_str()))
            .one(&txn)
            .await?
            .is_some();
        if duplicate {
            return Err(ServiceError::Conflict(format!(
                "Tracking number {} is already in use",
                tracking_number
            )));
        }

        let now = Utc::now();
        let first_event = TrackingEvent {
            status: ShipmentStatus::InTransit,
            location: None,
            description: Some(format!("Handed to {}", input.carrier.trim())),
            occurred_at: now,
        };
        let shipment = shipment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            carrier: Set(input.carrier.trim().to_string()),
            tracking_number: Set(tracking_number),
            status: Set(ShipmentStatus::InTransit),
            tracking_events: Set(serde_json::to_value(vec![first_event])?),
            shipped_at: Set(now),
            delivered_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let old_status = order.status;
        apply_transition(&txn, order, OrderStatus::Shipped).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: OrderStatus::Shipped.to_string(),
            })
            .await;
        self.event_sender
            .send_or_log(Event::OrderShipped {
                order_id,
                shipment_id: shipment.id,
            })
            .await;
        metrics::counter!("storefront.shipments.created", 1, "carrier" => shipment.carrier.clone());

        info!(shipment_id = %shipment.id, %order_id, tracking_number = %shipment.tracking_number, "Shipment created");
        Ok(shipment)
    }

    /// Appends a carrier scan. A delivered scan closes the shipment and
    /// marks the order delivered.
    #[instrument(skip(self, update), fields(status = %update.status))]
    pub async fn add_tracking_event(
        &self,
        shipment_id: Uuid,
        update: TrackingUpdate,
    ) -> Result<shipment::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let shipment = shipment::Entity::find_by_id(shipment_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Shipment", shipment_id))?;
        if shipment.status == ShipmentStatus::Delivered {
            return Err(ServiceError::InvalidStatus(format!(
                "Shipment {} is already delivered",
                shipment.tracking_number
            )));
        }

        let now = Utc::now();
        let mut events = shipment.events();
        events.push(TrackingEvent {
            status: update.status,
            location: update.location,
            description: update.description,
            occurred_at: update.occurred_at.unwrap_or(now),
        });

        let order_id = shipment.order_id;
        let mut active: shipment::ActiveModel = shipment.into();
        active.status = Set(update.status);
        active.tracking_events = Set(serde_json::to_value(&events)?);
        if update.status == ShipmentStatus::Delivered {
            active.delivered_at = Set(Some(now));
        }
        active.updated_at = Set(now);
        let shipment = active.update(&txn).await?;

        let mut delivered = false;
        if update.status == ShipmentStatus::Delivered {
            let order = OrderEntity::find_by_id(order_id)
                .one(&txn)
                .await?
                .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
            if order.status == OrderStatus::Shipped {
                apply_transition(&txn, order, OrderStatus::Delivered).await?;
                delivered = true;
            }
        }

        txn.commit().await?;

        if delivered {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status: OrderStatus::Shipped.to_string(),
                    new_status: OrderStatus::Delivered.to_string(),
                })
                .await;
            self.event_sender
                .send_or_log(Event::OrderDelivered(order_id))
                .await;
        }
        Ok(shipment)
    }

    pub async fn track(&self, tracking_number: &str) -> Result<ShipmentTracking, ServiceError> {
        let tracking_number = tracking_number.trim().to_uppercase();
        let shipment = shipment::Entity::find()
            .filter(shipment::Column::TrackingNumber.eq(tracking_number.as_str()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Shipment", &tracking_number))?;
        Ok(ShipmentTracking {
            events: shipment.events(),
            shipment,
        })
    }

    pub async fn get_shipment(&self, shipment_id: Uuid) -> Result<shipment::Model, ServiceError> {
        shipment::Entity::find_by_id(shipment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Shipment", shipment_id))
    }

    pub async fn list_shipments_for_order(&self, order_id: Uuid) -> Result<Vec<shipment::Model>, ServiceError> {
        Ok(shipment::Entity::find()
            .filter(shipment::Column::OrderId.eq(order_id))
            .order_by_asc(shipment::Column::ShippedAt)
            .all(&*self.db)
            .await?)
    }

    // ----- returns -----

    /// Opens a return for a delivered order inside the return window.
    #[instrument(skip(self, input))]
    pub async fn request_return(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        input: RequestReturnInput,
    ) -> Result<return_request::Model, ServiceError> {
        input.validate()?;
        let requested = aggregate_return_lines(&input.items)?;

        let txn = self.db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .filter(order::Column::UserId.eq(user_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        if order.status != OrderStatus::Delivered {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} is {}; only delivered orders can be returned",
                order.order_number, order.status
            )));
        }
        let delivered_at = order.delivered_at.unwrap_or(order.updated_at);
        if Utc::now() > delivered_at + Duration::days(self.config.return_window_days) {
            return Err(ServiceError::ValidationError(format!(
                "The {}-day return window for order {} has closed",
                self.config.return_window_days, order.order_number
            )));
        }

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        let already_returned = self.returned_quantities(&txn, order_id).await?;

        for (item_id, quantity) in &requested {
            let item = items
                .iter()
                .find(|i| i.id == *item_id)
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!(
                        "Item {} is not part of order {}",
                        item_id, order.order_number
                    ))
                })?;
            let remaining = item.quantity - already_returned.get(item_id).copied().unwrap_or(0);
            if *quantity > remaining {
                return Err(ServiceError::ValidationError(format!(
                    "Only {} unit(s) of {} can still be returned",
                    remaining.max(0),
                    item.product_name
                )));
            }
        }

        let refund_amount = return_refund_amount(&order, &items, &requested);
        let mut lines: Vec<ReturnLine> = Vec::with_capacity(requested.len());
        for line in &input.items {
            if !lines.iter().any(|l| l.order_item_id == line.order_item_id) {
                lines.push(ReturnLine {
                    order_item_id: line.order_item_id,
                    quantity: requested[&line.order_item_id],
                });
            }
        }

        let now = Utc::now();
        let request = return_request::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            user_id: Set(user_id),
            reason: Set(input.reason.trim().to_string()),
            items: Set(serde_json::to_value(&lines)?),
            status: Set(ReturnStatus::Requested),
            refund_amount: Set(refund_amount),
            admin_note: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::ReturnRequested(request.id))
            .await;
        info!(return_id = %request.id, %order_id, %refund_amount, "Return requested");
        Ok(request)
    }

    pub async fn get_return(&self, return_id: Uuid) -> Result<return_request::Model, ServiceError> {
        return_request::Entity::find_by_id(return_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Return", return_id))
    }

    pub async fn list_returns_for_order(&self, order_id: Uuid) -> Result<Vec<return_request::Model>, ServiceError> {
        Ok(return_request::Entity::find()
            .filter(return_request::Column::OrderId.eq(order_id))
            .order_by_desc(return_request::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    pub async fn list_returns_for_user(&self, user_id: Uuid) -> Result<Vec<return_request::Model>, ServiceError> {
        Ok(return_request::Entity::find()
            .filter(return_request::Column::UserId.eq(user_id))
            .order_by_desc(return_request::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    pub async fn approve_return(
        &self,
        return_id: Uuid,
        note: Option<String>,
    ) -> Result<return_request::Model, ServiceError> {
        let updated = self
            .set_return_status(&*self.db, return_id, ReturnStatus::Approved, note)
            .await?;
        self.notify_return(&updated).await;
        Ok(updated)
    }

    pub async fn reject_return(
        &self,
        return_id: Uuid,
        note: String,
    ) -> Result<return_request::Model, ServiceError> {
        if note.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "A note is required when rejecting a return".to_string(),
            ));
        }
        let updated = self
            .set_return_status(&*self.db, return_id, ReturnStatus::Rejected, Some(note))
            .await?;
        self.notify_return(&updated).await;
        Ok(updated)
    }

    /// Goods arrived back at the warehouse; returned units go back on sale.
    #[instrument(skip(self))]
    pub async fn receive_return(&self, return_id: Uuid) -> Result<return_request::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let request = return_request::Entity::find_by_id(return_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Return", return_id))?;
        check_return_transition(request.status, ReturnStatus::Received)?;

        let lines = request.lines();
        let item_ids: Vec<Uuid> = lines.iter().map(|l| l.order_item_id).collect();
        let items: HashMap<Uuid, order_item::Model> = OrderItemEntity::find()
            .filter(order_item::Column::Id.is_in(item_ids))
            .all(&txn)
            .await?
            .into_iter()
            .map(|item| (item.id, item))
            .collect();
        for line in &lines {
            if let Some(item) = items.get(&line.order_item_id) {
                change_stock(&txn, item.product_id, line.quantity).await?;
            }
        }

        let updated = self
            .set_return_status(&txn, return_id, ReturnStatus::Received, None)
            .await?;
        txn.commit().await?;
        self.notify_return(&updated).await;

        info!(%return_id, restocked_lines = lines.len(), "Return received");
        Ok(updated)
    }

    /// Pays the return's refund amount back; the order becomes refunded
    /// once everything it charged has been returned.
    #[instrument(skip(self))]
    pub async fn refund_return(&self, return_id: Uuid) -> Result<return_request::Model, ServiceError> {
        let request = self.get_return(return_id).await?;
        check_return_transition(request.status, ReturnStatus::Refunded)?;

        if request.refund_amount > Decimal::ZERO {
            self.payments
                .refund_order(request.order_id, Some(request.refund_amount))
                .await?;
        }

        let txn = self.db.begin().await?;
        let updated = self
            .set_return_status(&txn, return_id, ReturnStatus::Refunded, None)
            .await?;

        let order = OrderEntity::find_by_id(request.order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", request.order_id))?;
        let fully_refunded = order.refunded_total >= order.total;
        let mut order_refunded = false;
        if fully_refunded && order.status == OrderStatus::Delivered {
            apply_transition(&txn, order, OrderStatus::Refunded).await?;
            order_refunded = true;
        }
        txn.commit().await?;
        self.notify_return(&updated).await;

        if order_refunded {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id: request.order_id,
                    old_status: OrderStatus::Delivered.to_string(),
                    new_status: OrderStatus::Refunded.to_string(),
                })
                .await;
        }
        Ok(updated)
    }

    async fn set_return_status(
        &self,
        conn: &impl ConnectionTrait,
        return_id: Uuid,
        status: ReturnStatus,
        note: Option<String>,
    ) -> Result<return_request::Model, ServiceError> {
        let request = return_request::Entity::find_by_id(return_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Return", return_id))?;
        check_return_transition(request.status, status)?;

        let mut active: return_request::ActiveModel = request.into();
        active.status = Set(status);
        if let Some(note) = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
            active.admin_note = Set(Some(note));
        }
        active.updated_at = Set(Utc::now());
        Ok(active.update(conn).await?)
    }

    async fn notify_return(&self, request: &return_request::Model) {
        self.event_sender
            .send_or_log(Event::ReturnStatusChanged {
                return_id: request.id,
                status: request.status.to_string(),
            })
            .await;
    }

    /// Units already claimed by returns that were not rejected.
    async fn returned_quantities(
        &self,
        conn: &impl ConnectionTrait,
        order_id: Uuid,
    ) -> Result<HashMap<Uuid, i32>, ServiceError> {
        let returns = return_request::Entity::find()
            .filter(return_request::Column::OrderId.eq(order_id))
            .filter(return_request::Column::Status.ne(ReturnStatus::Rejected))
            .all(conn)
            .await?;
        let mut totals = HashMap::new();
        for line in returns.iter().flat_map(|r| r.lines()) {
            *totals.entry(line.order_item_id).or_default() += line.quantity;
        }
        Ok(totals)
    }
}

// Input/Output DTOs

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateRateInput {
    #[validate(length(min = 1, max = 50))]
    pub method_code: String,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(custom = "validate_non_negative")]
    pub base_cost: Decimal,
    #[validate(custom = "validate_non_negative")]
    pub per_item_cost: Decimal,
    #[validate(custom = "validate_non_negative")]
    pub free_shipping_threshold: Option<Decimal>,
    pub estimated_days_min: i32,
    pub estimated_days_max: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateRateInput {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(custom = "validate_non_negative")]
    pub base_cost: Option<Decimal>,
    #[validate(custom = "validate_non_negative")]
    pub per_item_cost: Option<Decimal>,
    /// `Some(None)` removes the threshold.
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<Decimal>)]
    pub free_shipping_threshold: Option<Option<Decimal>>,
    pub estimated_days_min: Option<i32>,
    pub estimated_days_max: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ShippingQuote {
    pub method_code: String,
    pub name: String,
    pub cost: Decimal,
    pub estimated_days_min: i32,
    pub estimated_days_max: i32,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateShipmentInput {
    #[validate(length(min = 1, max = 50))]
    pub carrier: String,
    #[validate(length(min = 4, max = 64))]
    pub tracking_number: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TrackingUpdate {
    pub status: ShipmentStatus,
    pub location: Option<String>,
    pub description: Option<String>,
    pub occurred_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ShipmentTracking {
    pub shipment: shipment::Model,
    pub events: Vec<TrackingEvent>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct RequestReturnInput {
    #[validate(length(min = 1))]
    pub items: Vec<ReturnLine>,
    #[validate(length(min = 3, max = 2000))]
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rate(base: Decimal, per_item: Decimal, threshold: Option<Decimal>) -> shipping_rate::Model {
        let now = Utc::now();
        shipping_rate::Model {
            id: Uuid::new_v4(),
            method_code: "standard".into(),
            name: "Standard".into(),
            base_cost: base,
            per_item_cost: per_item,
            free_shipping_threshold: threshold,
            estimated_days_min: 3,
            estimated_days_max: 5,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn cost_is_base_plus_per_item() {
        let r = rate(dec!(5.00), dec!(1.25), None);
        assert_eq!(rate_cost(&r, dec!(10), 4), dec!(10.00));
    }

    #[test]
    fn threshold_makes_shipping_free() {
        let r = rate(dec!(5.00), dec!(1.00), Some(dec!(50)));
        assert_eq!(rate_cost(&r, dec!(49.99), 1), dec!(6.00));
        assert_eq!(rate_cost(&r, dec!(50), 1), Decimal::ZERO);
    }

    #[test]
    fn return_transitions_follow_the_workflow() {
        use ReturnStatus::*;
        assert!(check_return_transition(Requested, Approved).is_ok());
        assert!(check_return_transition(Requested, Rejected).is_ok());
        assert!(check_return_transition(Approved, Received).is_ok());
        assert!(check_return_transition(Received, Refunded).is_ok());
        assert!(check_return_transition(Requested, Refunded).is_err());
        assert!(check_return_transition(Rejected, Approved).is_err());
    }

    #[test]
    fn duplicate_return_lines_are_merged() {
        let id = Uuid::new_v4();
        let merged = aggregate_return_lines(&[
            ReturnLine { order_item_id: id, quantity: 1 },
            ReturnLine { order_item_id: id, quantity: 2 },
        ])
        .unwrap();
        assert_eq!(merged[&id], 3);

        assert!(aggregate_return_lines(&[ReturnLine { order_item_id: id, quantity: 0 }]).is_err());
    }

    #[test]
    fn refund_amount_spreads_order_discount() {
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order = order::Model {
            id: order_id,
            order_number: "ORD-20260101-ABCDEF".into(),
            user_id: Some(Uuid::new_v4()),
            session_id: None,
            email: "a@example.com".into(),
            status: OrderStatus::Delivered,
            payment_status: order::OrderPaymentStatus::Paid,
            payment_method: crate::entities::payment::PaymentMethod::Stripe,
            currency: "USD".into(),
            subtotal: dec!(100),
            discount_total: dec!(10),
            shipping_total: dec!(5),
            tax_total: Decimal::ZERO,
            total: dec!(95),
            refunded_total: Decimal::ZERO,
            coupon_code: Some("TEN".into()),
            shipping_address: serde_json::json!({}),
            billing_address: None,
            shipping_method: "standard".into(),
            checkout_session_id: None,
            cancel_reason: None,
            paid_at: Some(now),
            cancelled_at: None,
            delivered_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        let item = order_item::Model {
            id: Uuid::new_v4(),
            order_id,
            product_id: Uuid::new_v4(),
            product_name: "Mug".into(),
            sku: "MUG".into(),
            unit_price: dec!(25),
            quantity: 4,
            subtotal: dec!(100),
            created_at: now,
        };
        let quantities = HashMap::from([(item.id, 2)]);
        assert_eq!(return_refund_amount(&order, &[item], &quantities), dec!(45.00));
    }
}
