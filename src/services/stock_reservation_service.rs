use crate::{
    auth::CartOwner,
    entities::{
        commerce::Product,
        stock_reservation::{self, ReservationStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Result of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupResult {
    pub released: u64,
}

/// Holds stock for cart owners between "add to cart" and order placement.
///
/// Everything except [`cleanup_expired`](Self::cleanup_expired) takes a
/// connection so it can run inside the caller's transaction.
#[derive(Clone)]
pub struct StockReservationService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    ttl: Duration,
}

pub(crate) fn owner_condition(owner: &CartOwner) -> Condition {
    match owner {
        CartOwner::User(id) => Condition::all().add(stock_reservation::Column::UserId.eq(*id)),
        CartOwner::Guest(session) => Condition::all()
            .add(stock_reservation::Column::UserId.is_null())
            .add(stock_reservation::Column::SessionId.eq(session.clone())),
    }
}

fn belongs_to(reservation: &stock_reservation::Model, owner: &CartOwner) -> bool {
    match owner {
        CartOwner::User(id) => reservation.user_id == Some(*id),
        CartOwner::Guest(session) => {
            reservation.user_id.is_none() && reservation.session_id.as_deref() == Some(session)
        }
    }
}

impl StockReservationService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>, ttl_mins: i64) -> Self {
        Self {
            db,
            event_sender,
            ttl: Duration::minutes(ttl_mins),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Product stock minus the active, unexpired holds of every owner other
    /// than `exclude`.
    pub async fn available_quantity(
        &self,
        conn: &impl ConnectionTrait,
        product_id: Uuid,
        exclude: Option<&CartOwner>,
    ) -> Result<i32, ServiceError> {
        let product = Product::find_by_id(product_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Product", product_id))?;

        let held: i32 = stock_reservation::Entity::find()
            .filter(stock_reservation::Column::ProductId.eq(product_id))
            .filter(stock_reservation::Column::Status.eq(ReservationStatus::Active))
            .filter(stock_reservation::Column::ExpiresAt.gt(Utc::now()))
            .all(conn)
            .await?
            .iter()
            .filter(|r| exclude.map_or(true, |owner| !belongs_to(r, owner)))
            .map(|r| r.quantity)
            .sum();

        Ok((product.stock_quantity - held).max(0))
    }

    /// Sets the owner's hold on `product_id` to exactly `quantity` units.
    #[instrument(skip(self, conn))]
    pub async fn reserve(
        &self,
        conn: &impl ConnectionTrait,
        owner: &CartOwner,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<stock_reservation::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Reservation quantity must be positive".to_string(),
            ));
        }

        let available = self.available_quantity(conn, product_id, Some(owner)).await?;
        if available < quantity {
            metrics::counter!("storefront.reservations.rejected", 1);
            return Err(ServiceError::InsufficientStock(format!(
                "only {} units of product {} available",
                available, product_id
            )));
        }

        let now = Utc::now();
        let expires_at = now + self.ttl;
        let existing = self.find_active(conn, owner, product_id).await?;

        let reservation = match existing {
            Some(reservation) => {
                let mut active: stock_reservation::ActiveModel = reservation.into();
                active.quantity = Set(quantity);
                active.expires_at = Set(expires_at);
                active.updated_at = Set(now);
                active.update(conn).await?
            }
            None => {
                let (user_id, session_id) = owner.columns();
                stock_reservation::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    product_id: Set(product_id),
                    user_id: Set(user_id),
                    session_id: Set(session_id),
                    quantity: Set(quantity),
                    status: Set(ReservationStatus::Active),
                    expires_at: Set(expires_at),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(conn)
                .await?
            }
        };

        metrics::counter!("storefront.reservations.created", 1);
        debug!(%owner, %product_id, quantity, "stock reserved");
        Ok(reservation)
    }

    pub async fn release(
        &self,
        conn: &impl ConnectionTrait,
        owner: &CartOwner,
        product_id: Uuid,
    ) -> Result<u64, ServiceError> {
        let result = stock_reservation::Entity::update_many()
            .col_expr(
                stock_reservation::Column::Status,
                Expr::value(ReservationStatus::Released),
            )
            .col_expr(stock_reservation::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(owner_condition(owner))
            .filter(stock_reservation::Column::ProductId.eq(product_id))
            .filter(stock_reservation::Column::Status.eq(ReservationStatus::Active))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn release_all(
        &self,
        conn: &impl ConnectionTrait,
        owner: &CartOwner,
    ) -> Result<u64, ServiceError> {
        self.set_status_for_owner(conn, owner, ReservationStatus::Released)
            .await
    }

    /// Marks the owner's holds consumed once an order has taken the stock.
    pub async fn consume(
        &self,
        conn: &impl ConnectionTrait,
        owner: &CartOwner,
    ) -> Result<u64, ServiceError> {
        self.set_status_for_owner(conn, owner, ReservationStatus::Consumed)
            .await
    }

    /// Extends every live hold of the owner by a full TTL. Holds that have
    /// already lapsed are released instead; their stock may belong to
    /// someone else by now.
    pub async fn refresh(
        &self,
        conn: &impl ConnectionTrait,
        owner: &CartOwner,
    ) -> Result<u64, ServiceError> {
        let now = Utc::now();
        self.release_lapsed(conn, owner, now).await?;
        let result = stock_reservation::Entity::update_many()
            .col_expr(stock_reservation::Column::ExpiresAt, Expr::value(now + self.ttl))
            .col_expr(stock_reservation::Column::UpdatedAt, Expr::value(now))
            .filter(owner_condition(owner))
            .filter(stock_reservation::Column::Status.eq(ReservationStatus::Active))
            .filter(stock_reservation::Column::ExpiresAt.gt(now))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Moves the live holds of `from` to `to`. Holds on a product `to`
    /// already reserves are summed into the existing row. Lapsed holds on
    /// either side are released, not moved.
    #[instrument(skip(self, conn))]
    pub async fn transfer(
        &self,
        conn: &impl ConnectionTrait,
        from: &CartOwner,
        to: &CartOwner,
    ) -> Result<u64, ServiceError> {
        let now = Utc::now();
        let expires_at = now + self.ttl;
        self.release_lapsed(conn, from, now).await?;
        self.release_lapsed(conn, to, now).await?;
        let moving = stock_reservation::Entity::find()
            .filter(owner_condition(from))
            .filter(stock_reservation::Column::Status.eq(ReservationStatus::Active))
            .filter(stock_reservation::Column::ExpiresAt.gt(now))
            .all(conn)
            .await?;

        let mut moved = 0;
        for reservation in moving {
            match self.find_active(conn, to, reservation.product_id).await? {
                Some(target) => {
                    let combined = target.quantity + reservation.quantity;
                    let mut target: stock_reservation::ActiveModel = target.into();
                    target.quantity = Set(combined);
                    target.expires_at = Set(expires_at);
                    target.updated_at = Set(now);
                    target.update(conn).await?;

                    let mut source: stock_reservation::ActiveModel = reservation.into();
                    source.status = Set(ReservationStatus::Released);
                    source.updated_at = Set(now);
                    source.update(conn).await?;
                }
                None => {
                    let (user_id, session_id) = to.columns();
                    let mut source: stock_reservation::ActiveModel = reservation.into();
                    source.user_id = Set(user_id);
                    source.session_id = Set(session_id);
                    source.expires_at = Set(expires_at);
                    source.updated_at = Set(now);
                    source.update(conn).await?;
                }
            }
            moved += 1;
        }

        debug!(%from, %to, moved, "reservations transferred");
        Ok(moved)
    }

    /// Releases every active hold past its expiry. Safe to run repeatedly.
    #[instrument(skip(self))]
    pub async fn cleanup_expired(&self) -> Result<CleanupResult, ServiceError> {
        let now = Utc::now();
        let result = stock_reservation::Entity::update_many()
            .col_expr(
                stock_reservation::Column::Status,
                Expr::value(ReservationStatus::Released),
            )
            .col_expr(stock_reservation::Column::UpdatedAt, Expr::value(now))
            .filter(stock_reservation::Column::Status.eq(ReservationStatus::Active))
            .filter(stock_reservation::Column::ExpiresAt.lte(now))
            .exec(&*self.db)
            .await?;

        let released = result.rows_affected;
        if released > 0 {
            metrics::counter!("storefront.reservations.expired", released);
            self.event_sender
                .send_or_log(Event::ReservationsExpired(released))
                .await;
            info!(released, "Released expired stock reservations");
        }

        Ok(CleanupResult { released })
    }

    /// Active holds of an owner, newest first.
    pub async fn list_active(
        &self,
        conn: &impl ConnectionTrait,
        owner: &CartOwner,
    ) -> Result<Vec<stock_reservation::Model>, ServiceError> {
        use sea_orm::QueryOrder;
        Ok(stock_reservation::Entity::find()
            .filter(owner_condition(owner))
            .filter(stock_reservation::Column::Status.eq(ReservationStatus::Active))
            .order_by_desc(stock_reservation::Column::CreatedAt)
            .all(conn)
            .await?)
    }

    async fn find_active(
        &self,
        conn: &impl ConnectionTrait,
        owner: &CartOwner,
        product_id: Uuid,
    ) -> Result<Option<stock_reservation::Model>, ServiceError> {
        Ok(stock_reservation::Entity::find()
            .filter(owner_condition(owner))
            .filter(stock_reservation::Column::ProductId.eq(product_id))
            .filter(stock_reservation::Column::Status.eq(ReservationStatus::Active))
            .one(conn)
            .await?)
    }

    async fn release_lapsed(
        &self,
        conn: &impl ConnectionTrait,
        owner: &CartOwner,
        now: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let result = stock_reservation::Entity::update_many()
            .col_expr(
                stock_reservation::Column::Status,
                Expr::value(ReservationStatus::Released),
            )
            .col_expr(stock_reservation::Column::UpdatedAt, Expr::value(now))
            .filter(owner_condition(owner))
            .filter(stock_reservation::Column::Status.eq(ReservationStatus::Active))
            .filter(stock_reservation::Column::ExpiresAt.lte(now))
            .exec(conn)
            .await?;
        if result.rows_affected > 0 {
            debug!(%owner, released = result.rows_affected, "lapsed holds released");
        }
        Ok(result.rows_affected)
    }

    async fn set_status_for_owner(
        &self,
        conn: &impl ConnectionTrait,
        owner: &CartOwner,
        status: ReservationStatus,
    ) -> Result<u64, ServiceError> {
        let result = stock_reservation::Entity::update_many()
            .col_expr(stock_reservation::Column::Status, Expr::value(status))
            .col_expr(stock_reservation::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(owner_condition(owner))
            .filter(stock_reservation::Column::Status.eq(ReservationStatus::Active))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }
}
