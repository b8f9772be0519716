pub mod commerce;
pub mod common;
pub mod coupons;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod search;
pub mod shipping;

use crate::{
    config::AppConfig,
    errors::ServiceError,
    events::EventSender,
    services::{
        commerce::{
            CartService, CategoryService, CheckoutService, ProductCatalogService, WishlistService,
        },
        coupons::CouponService,
        maintenance::MaintenanceWorker,
        notifications::{transport_from_config, EmailService, EmailTransport},
        orders::OrderService,
        payments::PaymentService,
        search::SearchService,
        shipping::ShippingService,
        stock_reservation_service::StockReservationService,
    },
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub reservations: Arc<StockReservationService>,
    pub coupons: Arc<CouponService>,
    pub catalog: Arc<ProductCatalogService>,
    pub categories: Arc<CategoryService>,
    pub cart: Arc<CartService>,
    pub payments: Arc<PaymentService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub shipping: Arc<ShippingService>,
    pub search: Arc<SearchService>,
    pub wishlist: Arc<WishlistService>,
    pub email: Arc<EmailService>,
}

impl AppServices {
    /// Wires every service from configuration: payment gateways for the
    /// enabled providers and SMTP or logging mail delivery.
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
    ) -> Result<Self, ServiceError> {
        let payments = PaymentService::new(db.clone(), event_sender.clone(), &config);
        let transport = transport_from_config(&config.email)?;
        Ok(Self::with_parts(db, event_sender, config, payments, transport))
    }

    /// Same wiring with caller-supplied payment and mail collaborators.
    pub fn with_parts(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        config: Arc<AppConfig>,
        payments: PaymentService,
        transport: Arc<dyn EmailTransport>,
    ) -> Self {
        let reservations = Arc::new(StockReservationService::new(
            db.clone(),
            event_sender.clone(),
            config.reservation_ttl_mins,
        ));
        let coupons = Arc::new(CouponService::new(db.clone()));
        let catalog = Arc::new(ProductCatalogService::new(db.clone(), event_sender.clone()));
        let categories = Arc::new(CategoryService::new(db.clone()));
        let cart = Arc::new(CartService::new(
            db.clone(),
            event_sender.clone(),
            config.clone(),
            reservations.clone(),
            coupons.clone(),
        ));
        let payments = Arc::new(payments);
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            event_sender.clone(),
            config.clone(),
            cart.clone(),
            reservations.clone(),
            coupons.clone(),
            payments.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            event_sender.clone(),
            payments.clone(),
        ));
        let shipping = Arc::new(ShippingService::new(
            db.clone(),
            event_sender,
            config.clone(),
            payments.clone(),
        ));
        let search = Arc::new(SearchService::new(db.clone(), config.page_size(None)));
        let wishlist = Arc::new(WishlistService::new(db.clone(), cart.clone(), catalog.clone()));
        let email = Arc::new(EmailService::new(db, transport));

        Self {
            reservations,
            coupons,
            catalog,
            categories,
            cart,
            payments,
            checkout,
            orders,
            shipping,
            search,
            wishlist,
            email,
        }
    }

    pub fn maintenance_worker(&self, config: &AppConfig) -> MaintenanceWorker {
        MaintenanceWorker::new(
            self.reservations.clone(),
            self.cart.clone(),
            self.checkout.clone(),
            self.orders.clone(),
            config.pending_order_ttl_mins,
        )
    }
}
