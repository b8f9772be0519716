use crate::services::{
    commerce::{cart_service::CartService, checkout_service::CheckoutService},
    orders::OrderService,
    stock_reservation_service::StockReservationService,
};
use chrono::Duration as ChronoDuration;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

/// What one maintenance pass cleaned up. A step that failed reports zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct MaintenanceReport {
    pub reservations_released: u64,
    pub carts_abandoned: u64,
    pub sessions_expired: u64,
    pub orders_cancelled: u64,
}

impl MaintenanceReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Periodic housekeeping. Every step only touches rows already past their
/// deadline, so passes may overlap or repeat.
#[derive(Clone)]
pub struct MaintenanceWorker {
    reservations: Arc<StockReservationService>,
    carts: Arc<CartService>,
    checkout: Arc<CheckoutService>,
    orders: Arc<OrderService>,
    pending_order_ttl: ChronoDuration,
}

impl MaintenanceWorker {
    pub fn new(
        reservations: Arc<StockReservationService>,
        carts: Arc<CartService>,
        checkout: Arc<CheckoutService>,
        orders: Arc<OrderService>,
        pending_order_ttl_mins: i64,
    ) -> Self {
        Self {
            reservations,
            carts,
            checkout,
            orders,
            pending_order_ttl: ChronoDuration::minutes(pending_order_ttl_mins),
        }
    }

    /// Runs every step once. Failures are logged and the remaining steps
    /// still run.
    pub async fn run_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.reservations.cleanup_expired().await {
            Ok(result) => report.reservations_released = result.released,
            Err(e) => warn!(error = %e, "Reservation cleanup failed"),
        }
        match self.carts.abandon_expired_carts().await {
            Ok(count) => report.carts_abandoned = count,
            Err(e) => warn!(error = %e, "Abandoning expired carts failed"),
        }
        match self.checkout.expire_sessions().await {
            Ok(count) => report.sessions_expired = count,
            Err(e) => warn!(error = %e, "Expiring checkout sessions failed"),
        }
        match self
            .orders
            .cancel_stale_pending_orders(self.pending_order_ttl)
            .await
        {
            Ok(count) => report.orders_cancelled = count,
            Err(e) => warn!(error = %e, "Cancelling stale orders failed"),
        }

        if report.is_empty() {
            debug!("Maintenance pass found nothing to do");
        } else {
            info!(?report, "Maintenance pass completed");
        }
        report
    }

    /// Spawns the worker on a fixed interval. The first pass runs immediately.
    pub fn spawn(self, every: Duration) -> JoinHandle<()> {
        info!(interval_secs = every.as_secs(), "Starting maintenance worker");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.run_once().await;
            }
        })
    }
}
