#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::Value;
use storefront_api::{
    auth::{CartOwner, ROLES_HEADER, SESSION_ID_HEADER, USER_ID_HEADER},
    config::AppConfig,
    db,
    entities::{
        commerce::{CategoryModel, ProductModel, ProductStatus},
        payment::{PaymentMethod, PaymentStatus},
        shipping_rate,
        stock_reservation::{self, ReservationStatus},
    },
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        commerce::{
            cart_service::AddToCartInput,
            category_service::CreateCategoryInput,
            checkout_service::{Address, CodOrderInput, CreateCheckoutInput},
            product_catalog_service::CreateProductInput,
        },
        notifications::{EmailTransport, OutgoingEmail},
        orders::OrderWithItems,
        payments::{
            IntentRequest, PaymentConfirmation, PaymentGateway, PaymentIntent, PaymentService,
            RefundReceipt,
        },
        shipping::CreateRateInput,
    },
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// In-process stand-in for an online payment provider.
#[derive(Default)]
pub struct FakeGateway {
    intents: Mutex<HashMap<String, Decimal>>,
    refunds: Mutex<Vec<(String, Decimal)>>,
    decline: AtomicBool,
    fail_intents: AtomicBool,
}

impl FakeGateway {
    pub fn decline_next_confirmations(&self) {
        self.decline.store(true, Ordering::SeqCst);
    }

    pub fn fail_intent_creation(&self) {
        self.fail_intents.store(true, Ordering::SeqCst);
    }

    pub fn refunds(&self) -> Vec<(String, Decimal)> {
        self.refunds.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Stripe
    }

    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, ServiceError> {
        if self.fail_intents.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError("provider unavailable".into()));
        }
        let reference = format!("pi_{}", request.reference_id.simple());
        self.intents
            .lock()
            .unwrap()
            .insert(reference.clone(), request.amount);
        Ok(PaymentIntent {
            client_secret: Some(format!("{}_secret", reference)),
            reference,
            status: PaymentStatus::Pending,
        })
    }

    async fn confirm(&self, reference: &str) -> Result<PaymentConfirmation, ServiceError> {
        let amount = self
            .intents
            .lock()
            .unwrap()
            .get(reference)
            .copied()
            .ok_or_else(|| ServiceError::PaymentFailed(format!("unknown intent {}", reference)))?;
        if self.decline.load(Ordering::SeqCst) {
            return Ok(PaymentConfirmation {
                reference: reference.to_string(),
                status: PaymentStatus::Failed,
                amount,
                failure_reason: Some("card declined".into()),
            });
        }
        Ok(PaymentConfirmation {
            reference: reference.to_string(),
            status: PaymentStatus::Captured,
            amount,
            failure_reason: None,
        })
    }

    async fn refund(
        &self,
        reference: &str,
        amount: Decimal,
        _currency: &str,
    ) -> Result<RefundReceipt, ServiceError> {
        self.refunds
            .lock()
            .unwrap()
            .push((reference.to_string(), amount));
        Ok(RefundReceipt {
            reference: format!("re_{}", reference),
            amount,
        })
    }
}

/// Keeps every delivered email in memory.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailTransport for RecordingTransport {
    async fn deliver(&self, email: &OutgoingEmail) -> Result<(), ServiceError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// Headers a request carries on behalf of a caller.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub roles: Option<String>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn guest(session_id: &str) -> Self {
        Self {
            session_id: Some(session_id.to_string()),
            ..Self::default()
        }
    }

    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn admin() -> Self {
        Self {
            user_id: Some(Uuid::new_v4()),
            roles: Some("admin".to_string()),
            ..Self::default()
        }
    }
}

/// Application backed by a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    pub mailbox: Arc<RecordingTransport>,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir");
        let db_path = db_dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.stripe.webhook_secret = Some(STRIPE_WEBHOOK_SECRET.to_string());
        customize(&mut cfg);
        let cfg = Arc::new(cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to open test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx, Vec::new()));

        let gateway = Arc::new(FakeGateway::default());
        let mailbox = Arc::new(RecordingTransport::default());
        let payments = PaymentService::new(db.clone(), event_sender.clone(), &cfg)
            .with_gateway(gateway.clone());
        let services = AppServices::with_parts(
            db.clone(),
            event_sender.clone(),
            cfg.clone(),
            payments,
            mailbox.clone(),
        );

        let state = AppState {
            db,
            config: cfg,
            event_sender,
            services,
        };

        Self {
            router: storefront_api::app(state.clone()),
            state,
            gateway,
            mailbox,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    pub fn services(&self) -> &AppServices {
        &self.state.services
    }

    // ----- fixtures -----

    pub async fn product(&self, name: &str, price: Decimal, stock: i32) -> ProductModel {
        self.product_in(name, price, stock, None).await
    }

    pub async fn product_in(
        &self,
        name: &str,
        price: Decimal,
        stock: i32,
        category_id: Option<Uuid>,
    ) -> ProductModel {
        self.services()
            .catalog
            .create_product(CreateProductInput {
                name: name.to_string(),
                slug: None,
                sku: format!("SKU-{}", Uuid::new_v4().simple()),
                description: Some(format!("{} for tests", name)),
                price,
                compare_at_price: None,
                stock_quantity: stock,
                category_id,
                status: Some(ProductStatus::Active),
                seo_title: None,
                seo_description: None,
                seo_keywords: None,
            })
            .await
            .expect("create product")
    }

    pub async fn category(&self, name: &str, parent_id: Option<Uuid>) -> CategoryModel {
        self.services()
            .categories
            .create_category(CreateCategoryInput {
                name: name.to_string(),
                slug: None,
                description: None,
                parent_id,
                sort_order: None,
                is_active: Some(true),
                seo_title: None,
                seo_description: None,
            })
            .await
            .expect("create category")
    }

    pub async fn shipping_rate(
        &self,
        code: &str,
        base_cost: Decimal,
        free_over: Option<Decimal>,
    ) -> shipping_rate::Model {
        self.services()
            .shipping
            .create_rate(CreateRateInput {
                method_code: code.to_string(),
                name: code.to_uppercase(),
                base_cost,
                per_item_cost: Decimal::ZERO,
                free_shipping_threshold: free_over,
                estimated_days_min: 2,
                estimated_days_max: 5,
                is_active: true,
            })
            .await
            .expect("create shipping rate")
    }

    pub async fn add_to_cart(&self, owner: &CartOwner, product_id: Uuid, quantity: i32) {
        self.services()
            .cart
            .add_item(
                owner,
                AddToCartInput {
                    product_id,
                    quantity,
                },
            )
            .await
            .expect("add to cart");
    }

    /// Runs a card checkout through the fake gateway.
    pub async fn checkout(&self, owner: &CartOwner, shipping_method: &str) -> OrderWithItems {
        let session = self
            .services()
            .checkout
            .create_session(owner, checkout_input(shipping_method, PaymentMethod::Stripe))
            .await
            .expect("create checkout session");
        self.services()
            .checkout
            .complete_session(owner, session.id, None)
            .await
            .expect("complete checkout session")
    }

    pub async fn cod_order(&self, owner: &CartOwner, shipping_method: &str) -> OrderWithItems {
        self.services()
            .checkout
            .place_cod_order(
                owner,
                CodOrderInput {
                    email: "cod@example.com".to_string(),
                    shipping_address: address(),
                    billing_address: None,
                    shipping_method: shipping_method.to_string(),
                    coupon_code: None,
                },
            )
            .await
            .expect("place cod order")
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        self.services()
            .catalog
            .get_product(product_id)
            .await
            .expect("product exists")
            .stock_quantity
    }

    /// Backdates the owner's active holds so they have lapsed but are not
    /// yet swept.
    pub async fn expire_holds(&self, owner: &CartOwner) {
        let holds = self
            .services()
            .reservations
            .list_active(&*self.state.db, owner)
            .await
            .expect("list holds");
        for hold in holds {
            let mut active: stock_reservation::ActiveModel = hold.into();
            active.expires_at = Set(Utc::now() - chrono::Duration::seconds(5));
            active.update(&*self.state.db).await.expect("backdate hold");
        }
    }

    /// Units of a product held by live (active and unexpired) reservations.
    pub async fn live_held(&self, product_id: Uuid) -> i32 {
        stock_reservation::Entity::find()
            .filter(stock_reservation::Column::ProductId.eq(product_id))
            .filter(stock_reservation::Column::Status.eq(ReservationStatus::Active))
            .filter(stock_reservation::Column::ExpiresAt.gt(Utc::now()))
            .all(&*self.state.db)
            .await
            .expect("load holds")
            .iter()
            .map(|hold| hold.quantity)
            .sum()
    }

    // ----- HTTP -----

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        caller: &Caller,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user_id) = caller.user_id {
            builder = builder.header(USER_ID_HEADER, user_id.to_string());
        }
        if let Some(session_id) = caller.session_id.as_deref() {
            builder = builder.header(SESSION_ID_HEADER, session_id);
        }
        if let Some(roles) = caller.roles.as_deref() {
            builder = builder.header(ROLES_HEADER, roles);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router responds");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str, caller: &Caller) -> (StatusCode, Value) {
        self.request(Method::GET, uri, caller, None).await
    }

    pub async fn post(&self, uri: &str, caller: &Caller, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, caller, Some(body)).await
    }
}

pub fn address() -> Address {
    Address {
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        company: None,
        address_line_1: "12 Analytical Row".to_string(),
        address_line_2: None,
        city: "London".to_string(),
        province: "Greater London".to_string(),
        country_code: "GB".to_string(),
        postal_code: "N1 9GU".to_string(),
        phone: None,
    }
}

pub fn checkout_input(shipping_method: &str, payment_method: PaymentMethod) -> CreateCheckoutInput {
    CreateCheckoutInput {
        email: "shopper@example.com".to_string(),
        shipping_address: address(),
        billing_address: None,
        shipping_method: shipping_method.to_string(),
        payment_method,
        coupon_code: None,
    }
}
