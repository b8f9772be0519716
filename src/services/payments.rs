/*!
 * Payments
 *
 * `PaymentGateway` hides the provider behind three calls: create an intent
 * before the shopper pays, confirm it when checkout completes, and refund.
 * Stripe and PayPal talk HTTP through `reqwest`; cash on delivery never
 * leaves the process. `PaymentService` owns the `payments` rows, refunds
 * and the Stripe webhook.
 */

use crate::{
    config::AppConfig,
    entities::{
        order::{self, OrderPaymentStatus, OrderStatus},
        payment::{self, PaymentMethod, PaymentStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const GATEWAY_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentRequest {
    pub amount: Decimal,
    pub currency: String,
    /// Checkout session the intent pays for.
    pub reference_id: Uuid,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentIntent {
    pub reference: String,
    /// Stripe client secret or PayPal approval URL.
    pub client_secret: Option<String>,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentConfirmation {
    /// Reference to store on the payment row; for PayPal this is the capture id.
    pub reference: String,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefundReceipt {
    pub reference: String,
    pub amount: Decimal,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn method(&self) -> PaymentMethod;

    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, ServiceError>;

    async fn confirm(&self, reference: &str) -> Result<PaymentConfirmation, ServiceError>;

    async fn refund(
        &self,
        reference: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<RefundReceipt, ServiceError>;
}

/// Amount in the currency's minor unit (cents).
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::InvalidInput(format!("Amount {} is out of range", amount)))
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(GATEWAY_TIMEOUT_SECS))
        .build()
        .unwrap_or_default()
}

/// Maps a non-2xx provider response: client errors are declined payments,
/// everything else is the provider's problem.
async fn gateway_error(provider: &str, response: reqwest::Response) -> ServiceError {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let message = body
        .pointer("/error/message")
        .or_else(|| body.pointer("/message"))
        .or_else(|| body.pointer("/error_description"))
        .and_then(Value::as_str)
        .unwrap_or("no error message")
        .to_string();

    if status.is_client_error() && status != StatusCode::UNAUTHORIZED {
        ServiceError::PaymentFailed(format!("{} declined the request: {}", provider, message))
    } else {
        ServiceError::ExternalServiceError(format!("{} returned {}: {}", provider, status, message))
    }
}

// ---------------------------------------------------------------------------
// Stripe
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    client_secret: Option<String>,
    status: String,
    amount: i64,
    amount_received: Option<i64>,
    last_payment_error: Option<StripeErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    amount: i64,
    status: String,
}

fn stripe_status(status: &str) -> PaymentStatus {
    match status {
        "succeeded" => PaymentStatus::Captured,
        "requires_capture" => PaymentStatus::Authorized,
        "canceled" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

/// Stripe Payment Intents over the form-encoded REST API.
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(api_base: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            client: http_client(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Stripe
    }

    #[instrument(skip(self, request), fields(reference_id = %request.reference_id))]
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, ServiceError> {
        let amount = to_minor_units(request.amount)?.to_string();
        let currency = request.currency.to_lowercase();
        let reference_id = request.reference_id.to_string();
        let mut form = vec![
            ("amount", amount.as_str()),
            ("currency", currency.as_str()),
            ("metadata[checkout_session_id]", reference_id.as_str()),
            ("automatic_payment_methods[enabled]", "true"),
        ];
        if let Some(description) = request.description.as_deref() {
            form.push(("description", description));
        }

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", reference_id.as_str())
            .form(&form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(gateway_error("Stripe", response).await);
        }

        let intent: StripePaymentIntent = response.json().await?;
        Ok(PaymentIntent {
            reference: intent.id,
            client_secret: intent.client_secret,
            status: stripe_status(&intent.status),
        })
    }

    #[instrument(skip(self))]
    async fn confirm(&self, reference: &str) -> Result<PaymentConfirmation, ServiceError> {
        let response = self
            .client
            .get(format!("{}/v1/payment_intents/{}", self.api_base, reference))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(gateway_error("Stripe", response).await);
        }

        let intent: StripePaymentIntent = response.json().await?;
        let status = stripe_status(&intent.status);
        let amount = match status {
            PaymentStatus::Captured => intent.amount_received.unwrap_or(intent.amount),
            _ => intent.amount,
        };

        Ok(PaymentConfirmation {
            reference: intent.id,
            status,
            amount: from_minor_units(amount),
            failure_reason: intent.last_payment_error.and_then(|e| e.message),
        })
    }

    #[instrument(skip(self))]
    async fn refund(
        &self,
        reference: &str,
        amount: Decimal,
        _currency: &str,
    ) -> Result<RefundReceipt, ServiceError> {
        let minor = to_minor_units(amount)?.to_string();
        let response = self
            .client
            .post(format!("{}/v1/refunds", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&[("payment_intent", reference), ("amount", minor.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(gateway_error("Stripe", response).await);
        }

        let refund: StripeRefund = response.json().await?;
        if matches!(refund.status.as_str(), "failed" | "canceled") {
            return Err(ServiceError::PaymentFailed(format!(
                "Stripe refund {} {}",
                refund.id, refund.status
            )));
        }

        Ok(RefundReceipt {
            reference: refund.id,
            amount: from_minor_units(refund.amount),
        })
    }
}

// ---------------------------------------------------------------------------
// PayPal
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PayPalToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct PayPalLink {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct PayPalOrder {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<PayPalLink>,
    #[serde(default)]
    purchase_units: Vec<PayPalPurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct PayPalPurchaseUnit {
    payments: Option<PayPalPayments>,
}

#[derive(Debug, Deserialize)]
struct PayPalPayments {
    #[serde(default)]
    captures: Vec<PayPalCapture>,
}

#[derive(Debug, Deserialize)]
struct PayPalCapture {
    id: String,
    status: String,
    amount: PayPalAmount,
}

#[derive(Debug, Deserialize)]
struct PayPalAmount {
    value: String,
}

#[derive(Debug, Deserialize)]
struct PayPalRefund {
    id: String,
    status: String,
}

/// PayPal Orders v2 with client-credentials OAuth.
pub struct PayPalGateway {
    client: reqwest::Client,
    api_base: String,
    client_id: String,
    client_secret: String,
}

impl PayPalGateway {
    pub fn new(
        api_base: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client: http_client(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "PayPal authentication failed with {}",
                response.status()
            )));
        }
        Ok(response.json::<PayPalToken>().await?.access_token)
    }
}

#[async_trait]
impl PaymentGateway for PayPalGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::PayPal
    }

    #[instrument(skip(self, request), fields(reference_id = %request.reference_id))]
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, ServiceError> {
        let token = self.access_token().await?;
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.reference_id.to_string(),
                "description": request.description,
                "amount": {
                    "currency_code": request.currency.to_uppercase(),
                    "value": request.amount.round_dp(2).to_string(),
                }
            }]
        });

        let response = self
            .client
            .post(format!("{}/v2/checkout/orders", self.api_base))
            .bearer_auth(token)
            .header("PayPal-Request-Id", request.reference_id.to_string())
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(gateway_error("PayPal", response).await);
        }

        let order: PayPalOrder = response.json().await?;
        let approval_url = order
            .links
            .into_iter()
            .find(|link| link.rel == "approve" || link.rel == "payer-action")
            .map(|link| link.href);

        Ok(PaymentIntent {
            reference: order.id,
            client_secret: approval_url,
            status: PaymentStatus::Pending,
        })
    }

    #[instrument(skip(self))]
    async fn confirm(&self, reference: &str) -> Result<PaymentConfirmation, ServiceError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!(
                "{}/v2/checkout/orders/{}/capture",
                self.api_base, reference
            ))
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(gateway_error("PayPal", response).await);
        }

        let order: PayPalOrder = response.json().await?;
        let capture = order
            .purchase_units
            .into_iter()
            .filter_map(|unit| unit.payments)
            .flat_map(|payments| payments.captures)
            .next();

        match capture {
            Some(capture) => {
                let amount = capture.amount.value.parse::<Decimal>().map_err(|e| {
                    ServiceError::ExternalServiceError(format!(
                        "PayPal returned an unreadable amount: {}",
                        e
                    ))
                })?;
                let status = match (order.status.as_str(), capture.status.as_str()) {
                    ("COMPLETED", "COMPLETED") => PaymentStatus::Captured,
                    (_, "DECLINED") | (_, "FAILED") => PaymentStatus::Failed,
                    _ => PaymentStatus::Pending,
                };
                Ok(PaymentConfirmation {
                    reference: capture.id,
                    status,
                    amount,
                    failure_reason: None,
                })
            }
            None => Ok(PaymentConfirmation {
                reference: order.id,
                status: PaymentStatus::Pending,
                amount: Decimal::ZERO,
                failure_reason: Some(format!("PayPal order is {}", order.status)),
            }),
        }
    }

    #[instrument(skip(self))]
    async fn refund(
        &self,
        reference: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<RefundReceipt, ServiceError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!(
                "{}/v2/payments/captures/{}/refund",
                self.api_base, reference
            ))
            .bearer_auth(token)
            .json(&json!({
                "amount": {
                    "value": amount.round_dp(2).to_string(),
                    "currency_code": currency.to_uppercase(),
                }
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(gateway_error("PayPal", response).await);
        }

        let refund: PayPalRefund = response.json().await?;
        if refund.status == "CANCELLED" || refund.status == "FAILED" {
            return Err(ServiceError::PaymentFailed(format!(
                "PayPal refund {} {}",
                refund.id, refund.status
            )));
        }

        Ok(RefundReceipt {
            reference: refund.id,
            amount,
        })
    }
}

// ---------------------------------------------------------------------------
// Cash on delivery
// ---------------------------------------------------------------------------

/// Money changes hands at the door; nothing to call.
pub struct CashOnDelivery;

#[async_trait]
impl PaymentGateway for CashOnDelivery {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Cod
    }

    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, ServiceError> {
        Ok(PaymentIntent {
            reference: format!("cod_{}", request.reference_id.simple()),
            client_secret: None,
            status: PaymentStatus::Pending,
        })
    }

    async fn confirm(&self, reference: &str) -> Result<PaymentConfirmation, ServiceError> {
        Ok(PaymentConfirmation {
            reference: reference.to_string(),
            status: PaymentStatus::Pending,
            amount: Decimal::ZERO,
            failure_reason: None,
        })
    }

    async fn refund(
        &self,
        reference: &str,
        amount: Decimal,
        _currency: &str,
    ) -> Result<RefundReceipt, ServiceError> {
        Ok(RefundReceipt {
            reference: format!("{}_refund", reference),
            amount,
        })
    }
}

// ---------------------------------------------------------------------------
// Stripe webhook signatures
// ---------------------------------------------------------------------------

fn signature_mac(secret: &str, timestamp: i64, payload: &str) -> Result<HmacSha256, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("invalid webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// `Stripe-Signature` header value for `payload` signed at `timestamp`.
pub fn sign_stripe_payload(payload: &str, secret: &str, timestamp: i64) -> Result<String, ServiceError> {
    let mac = signature_mac(secret, timestamp, payload)?;
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Checks a `t=...,v1=...` header against `payload`. Any `v1` entry may
/// match; the timestamp must be within `tolerance_secs` of `now`.
pub fn verify_stripe_signature(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), ServiceError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| ServiceError::Unauthorized("webhook signature has no timestamp".into()))?;
    if signatures.is_empty() {
        return Err(ServiceError::Unauthorized(
            "webhook signature has no v1 entry".into(),
        ));
    }
    if (now - timestamp).unsigned_abs() > tolerance_secs {
        return Err(ServiceError::Unauthorized(
            "webhook timestamp outside tolerance".into(),
        ));
    }

    let mac = signature_mac(secret, timestamp, payload)?;
    let valid = signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });

    if valid {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized("invalid webhook signature".into()))
    }
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: Value,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: Option<Uuid>,
    pub checkout_session_id: Option<Uuid>,
    pub provider: PaymentMethod,
    pub provider_reference: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RefundOutcome {
    pub order_id: Uuid,
    pub refunded: Decimal,
    pub order_payment_status: OrderPaymentStatus,
    pub payments: Vec<payment::Model>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct WebhookOutcome {
    pub event_id: String,
    pub event_type: String,
    pub handled: bool,
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateways: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
    stripe_webhook_secret: Option<String>,
    webhook_tolerance_secs: u64,
}

impl PaymentService {
    /// Registers cash on delivery plus every online gateway enabled in config.
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>, config: &AppConfig) -> Self {
        let mut service = Self {
            db,
            event_sender,
            gateways: HashMap::new(),
            stripe_webhook_secret: config.stripe.webhook_secret.clone(),
            webhook_tolerance_secs: config.stripe.webhook_tolerance_secs,
        }
        .with_gateway(Arc::new(CashOnDelivery));

        if let (true, Some(key)) = (config.stripe.enabled, config.stripe.secret_key.as_deref()) {
            service = service.with_gateway(Arc::new(StripeGateway::new(&config.stripe.api_base, key)));
        }
        if let (true, Some(id), Some(secret)) = (
            config.paypal.enabled,
            config.paypal.client_id.as_deref(),
            config.paypal.client_secret.as_deref(),
        ) {
            service = service.with_gateway(Arc::new(PayPalGateway::new(
                &config.paypal.api_base,
                id,
                secret,
            )));
        }
        service
    }

    /// Adds or replaces the gateway for its payment method.
    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.method(), gateway);
        self
    }

    pub fn gateway(&self, method: PaymentMethod) -> Result<Arc<dyn PaymentGateway>, ServiceError> {
        self.gateways.get(&method).cloned().ok_or_else(|| {
            ServiceError::ValidationError(format!("Payment method {} is not available", method))
        })
    }

    pub async fn record_payment(
        &self,
        conn: &impl ConnectionTrait,
        new_payment: NewPayment,
    ) -> Result<payment::Model, ServiceError> {
        let now = Utc::now();
        let payment = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(new_payment.order_id),
            checkout_session_id: Set(new_payment.checkout_session_id),
            provider: Set(new_payment.provider),
            provider_reference: Set(new_payment.provider_reference),
            amount: Set(new_payment.amount),
            currency: Set(new_payment.currency),
            status: Set(new_payment.status),
            failure_reason: Set(None),
            refunded_amount: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?;

        metrics::counter!("storefront.payments.recorded", 1, "provider" => payment.provider.to_string());
        Ok(payment)
    }

    pub async fn list_payments_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<payment::Model>, ServiceError> {
        Ok(payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .order_by_asc(payment::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Refunds `amount` (default: everything still refundable) across the
    /// order's captured payments, oldest first.
    #[instrument(skip(self))]
    pub async fn refund_order(
        &self,
        order_id: Uuid,
        amount: Option<Decimal>,
    ) -> Result<RefundOutcome, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;

        let captured: Vec<payment::Model> = self
            .list_payments_for_order(order_id)
            .await?
            .into_iter()
            .filter(|p| p.status == PaymentStatus::Captured)
            .collect();
        let refundable: Decimal = captured.iter().map(|p| p.refundable_amount()).sum();

        let requested = match amount {
            Some(amount) if amount <= Decimal::ZERO => {
                return Err(ServiceError::ValidationError(
                    "Refund amount must be positive".to_string(),
                ))
            }
            Some(amount) if amount > refundable => {
                return Err(ServiceError::ValidationError(format!(
                    "Refund of {} exceeds the refundable {}",
                    amount, refundable
                )))
            }
            Some(amount) => amount,
            None => refundable,
        };
        if requested.is_zero() {
            return Ok(RefundOutcome {
                order_id,
                refunded: Decimal::ZERO,
                order_payment_status: order.payment_status,
                payments: Vec::new(),
            });
        }

        let mut remaining = requested;
        let mut touched = Vec::new();
        for payment in captured {
            if remaining.is_zero() {
                break;
            }
            let take = remaining.min(payment.refundable_amount());
            if take.is_zero() {
                continue;
            }
            let reference = payment.provider_reference.clone().ok_or_else(|| {
                ServiceError::InternalError(format!("Payment {} has no provider reference", payment.id))
            })?;

            let receipt = self
                .gateway(payment.provider)?
                .refund(&reference, take, &payment.currency)
                .await?;

            let refunded_amount = payment.refunded_amount + take;
            let fully_refunded = refunded_amount >= payment.amount;
            let payment_id = payment.id;
            let mut active: payment::ActiveModel = payment.into();
            active.refunded_amount = Set(refunded_amount);
            if fully_refunded {
                active.status = Set(PaymentStatus::Refunded);
            }
            active.updated_at = Set(Utc::now());
            touched.push(active.update(&*self.db).await?);

            remaining -= take;
            self.event_sender
                .send_or_log(Event::PaymentRefunded {
                    payment_id,
                    amount: take,
                })
                .await;
            info!(%payment_id, refund_reference = %receipt.reference, amount = %take, "Payment refunded");
        }

        let refunded = requested - remaining;
        let refunded_total = order.refunded_total + refunded;
        let order_payment_status = if refunded_total >= order.total {
            OrderPaymentStatus::Refunded
        } else {
            OrderPaymentStatus::PartiallyRefunded
        };

        let mut active: order::ActiveModel = order.into();
        active.refunded_total = Set(refunded_total);
        active.payment_status = Set(order_payment_status);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        metrics::counter!("storefront.payments.refunds", 1);
        Ok(RefundOutcome {
            order_id,
            refunded,
            order_payment_status,
            payments: touched,
        })
    }

    /// Records the courier handing over the cash for a COD order.
    #[instrument(skip(self))]
    pub async fn mark_cod_collected(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        if order.payment_method != PaymentMethod::Cod {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is not a cash on delivery order",
                order.order_number
            )));
        }
        if order.payment_status != OrderPaymentStatus::Pending {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} payment is already {}",
                order.order_number, order.payment_status
            )));
        }
        if order.status == OrderStatus::Cancelled {
            return Err(ServiceError::InvalidStatus(format!(
                "Order {} is cancelled",
                order.order_number
            )));
        }

        let pending = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(payment::Column::Provider.eq(PaymentMethod::Cod))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending))
            .one(&txn)
            .await?;
        let now = Utc::now();
        let payment = match pending {
            Some(payment) => {
                let mut active: payment::ActiveModel = payment.into();
                active.status = Set(PaymentStatus::Captured);
                active.updated_at = Set(now);
                active.update(&txn).await?
            }
            None => {
                self.record_payment(
                    &txn,
                    NewPayment {
                        order_id: Some(order_id),
                        checkout_session_id: order.checkout_session_id,
                        provider: PaymentMethod::Cod,
                        provider_reference: Some(format!("cod_{}", order_id.simple())),
                        amount: order.total,
                        currency: order.currency.clone(),
                        status: PaymentStatus::Captured,
                    },
                )
                .await?
            }
        };

        let mut active: order::ActiveModel = order.into();
        active.payment_status = Set(OrderPaymentStatus::Paid);
        active.paid_at = Set(Some(now));
        active.updated_at = Set(now);
        let order = active.update(&txn).await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentCaptured(payment.id))
            .await;
        self.event_sender.send_or_log(Event::OrderPaid(order.id)).await;
        info!(order_id = %order.id, "Cash on delivery payment collected");
        Ok(order)
    }

    /// Verifies and applies a Stripe webhook delivery.
    #[instrument(skip(self, payload, signature_header))]
    pub async fn handle_stripe_webhook(
        &self,
        payload: &str,
        signature_header: &str,
    ) -> Result<WebhookOutcome, ServiceError> {
        let secret = self.stripe_webhook_secret.as_deref().ok_or_else(|| {
            ServiceError::InvalidOperation("Stripe webhooks are not configured".to_string())
        })?;
        if let Err(e) = verify_stripe_signature(
            payload,
            signature_header,
            secret,
            self.webhook_tolerance_secs,
            Utc::now().timestamp(),
        ) {
            warn!(error = %e, "Stripe webhook signature verification failed");
            metrics::counter!("storefront.payments.webhook_rejected", 1);
            return Err(e);
        }

        let event: StripeEvent = serde_json::from_str(payload)
            .map_err(|e| ServiceError::InvalidInput(format!("invalid webhook payload: {}", e)))?;
        let object = &event.data.object;

        let handled = match event.event_type.as_str() {
            "payment_intent.succeeded" => match object.get("id").and_then(Value::as_str) {
                Some(intent_id) => self.apply_stripe_capture(intent_id).await?,
                None => false,
            },
            "payment_intent.payment_failed" => match object.get("id").and_then(Value::as_str) {
                Some(intent_id) => {
                    let reason = object
                        .pointer("/last_payment_error/message")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    self.apply_stripe_failure(intent_id, reason).await?
                }
                None => false,
            },
            "charge.refunded" => {
                let intent_id = object.get("payment_intent").and_then(Value::as_str);
                let refunded = object.get("amount_refunded").and_then(Value::as_i64);
                match (intent_id, refunded) {
                    (Some(intent_id), Some(refunded)) => {
                        self.apply_stripe_refund(intent_id, from_minor_units(refunded))
                            .await?
                    }
                    _ => false,
                }
            }
            other => {
                info!(event_type = other, "Ignoring Stripe webhook");
                false
            }
        };

        Ok(WebhookOutcome {
            event_id: event.id,
            event_type: event.event_type,
            handled,
        })
    }

    async fn find_stripe_payment(
        &self,
        conn: &impl ConnectionTrait,
        intent_id: &str,
    ) -> Result<Option<payment::Model>, ServiceError> {
        Ok(payment::Entity::find()
            .filter(payment::Column::Provider.eq(PaymentMethod::Stripe))
            .filter(payment::Column::ProviderReference.eq(intent_id))
            .one(conn)
            .await?)
    }

    async fn apply_stripe_capture(&self, intent_id: &str) -> Result<bool, ServiceError> {
        let txn = self.db.begin().await?;
        let Some(payment) = self.find_stripe_payment(&txn, intent_id).await? else {
            warn!(intent_id, "No payment recorded for Stripe intent");
            return Ok(false);
        };
        if matches!(payment.status, PaymentStatus::Captured | PaymentStatus::Refunded) {
            return Ok(true);
        }

        let now = Utc::now();
        let order_id = payment.order_id;
        let mut active: payment::ActiveModel = payment.into();
        active.status = Set(PaymentStatus::Captured);
        active.failure_reason = Set(None);
        active.updated_at = Set(now);
        let payment = active.update(&txn).await?;

        let mut paid_order = None;
        if let Some(order_id) = order_id {
            if let Some(order) = order::Entity::find_by_id(order_id).one(&txn).await? {
                if order.payment_status == OrderPaymentStatus::Pending {
                    let confirm = order.status == OrderStatus::Pending;
                    let mut active: order::ActiveModel = order.into();
                    active.payment_status = Set(OrderPaymentStatus::Paid);
                    active.paid_at = Set(Some(now));
                    if confirm {
                        active.status = Set(OrderStatus::Confirmed);
                    }
                    active.updated_at = Set(now);
                    paid_order = Some(active.update(&txn).await?.id);
                }
            }
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentCaptured(payment.id))
            .await;
        if let Some(order_id) = paid_order {
            self.event_sender.send_or_log(Event::OrderPaid(order_id)).await;
        }
        info!(payment_id = %payment.id, intent_id, "Stripe payment captured");
        Ok(true)
    }

    async fn apply_stripe_failure(
        &self,
        intent_id: &str,
        reason: Option<String>,
    ) -> Result<bool, ServiceError> {
        let txn = self.db.begin().await?;
        let Some(payment) = self.find_stripe_payment(&txn, intent_id).await? else {
            return Ok(false);
        };
        if payment.status != PaymentStatus::Pending && payment.status != PaymentStatus::Authorized {
            return Ok(true);
        }

        let order_id = payment.order_id;
        let mut active: payment::ActiveModel = payment.into();
        active.status = Set(PaymentStatus::Failed);
        active.failure_reason = Set(reason);
        active.updated_at = Set(Utc::now());
        let payment = active.update(&txn).await?;

        if let Some(order_id) = order_id {
            if let Some(order) = order::Entity::find_by_id(order_id).one(&txn).await? {
                if order.payment_status == OrderPaymentStatus::Pending {
                    let mut active: order::ActiveModel = order.into();
                    active.payment_status = Set(OrderPaymentStatus::Failed);
                    active.updated_at = Set(Utc::now());
                    active.update(&txn).await?;
                }
            }
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentFailed(payment.id))
            .await;
        Ok(true)
    }

    /// Syncs a refund issued from the Stripe dashboard.
    async fn apply_stripe_refund(
        &self,
        intent_id: &str,
        refunded: Decimal,
    ) -> Result<bool, ServiceError> {
        let Some(payment) = self.find_stripe_payment(&*self.db, intent_id).await? else {
            return Ok(false);
        };
        if refunded <= payment.refunded_amount {
            return Ok(true);
        }

        let fully_refunded = refunded >= payment.amount;
        let mut active: payment::ActiveModel = payment.into();
        active.refunded_amount = Set(refunded);
        if fully_refunded {
            active.status = Set(PaymentStatus::Refunded);
        }
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SECRET: &str = "whsec_test";

    #[test]
    fn minor_units_round_trip() {
        assert_eq!(to_minor_units(dec!(12.34)).unwrap(), 1234);
        assert_eq!(to_minor_units(dec!(0.005)).unwrap(), 0);
        assert_eq!(from_minor_units(1999), dec!(19.99));
    }

    #[test]
    fn stripe_statuses_map_to_payment_statuses() {
        assert_eq!(stripe_status("succeeded"), PaymentStatus::Captured);
        assert_eq!(stripe_status("requires_capture"), PaymentStatus::Authorized);
        assert_eq!(stripe_status("processing"), PaymentStatus::Pending);
        assert_eq!(stripe_status("canceled"), PaymentStatus::Failed);
    }

    #[test]
    fn signed_payload_verifies() {
        let payload = r#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;
        let header = sign_stripe_payload(payload, SECRET, 1_700_000_000).unwrap();
        assert!(verify_stripe_signature(payload, &header, SECRET, 300, 1_700_000_100).is_ok());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let header = sign_stripe_payload(r#"{"amount":100}"#, SECRET, 1_700_000_000).unwrap();
        let result =
            verify_stripe_signature(r#"{"amount":999}"#, &header, SECRET, 300, 1_700_000_000);
        assert!(matches!(result, Err(ServiceError::Unauthorized(_))));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let payload = "{}";
        let header = sign_stripe_payload(payload, SECRET, 1_700_000_000).unwrap();
        assert!(verify_stripe_signature(payload, &header, SECRET, 300, 1_700_000_301).is_err());
    }

    #[test]
    fn any_v1_entry_may_match() {
        let payload = "{}";
        let good = sign_stripe_payload(payload, SECRET, 42).unwrap();
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t=42,v1=deadbeef,v1={}", good_sig);
        assert!(verify_stripe_signature(payload, &header, SECRET, 300, 42).is_ok());
        assert!(verify_stripe_signature(payload, "v1=abc", SECRET, 300, 42).is_err());
    }

    #[tokio::test]
    async fn cash_on_delivery_never_captures() {
        let gateway = CashOnDelivery;
        let intent = gateway
            .create_intent(&IntentRequest {
                amount: dec!(10),
                currency: "USD".into(),
                reference_id: Uuid::nil(),
                description: None,
            })
            .await
            .unwrap();
        assert_eq!(intent.status, PaymentStatus::Pending);
        assert!(intent.reference.starts_with("cod_"));

        let confirmation = gateway.confirm(&intent.reference).await.unwrap();
        assert_eq!(confirmation.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn registered_gateway_replaces_default() {
        let db = Arc::new(sea_orm::DatabaseConnection::Disconnected);
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let config = AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "test".into(),
        );

        let mut mock = MockPaymentGateway::new();
        mock.expect_method().return_const(PaymentMethod::Stripe);

        let service = PaymentService::new(db, Arc::new(EventSender::new(tx)), &config)
            .with_gateway(Arc::new(mock));

        assert_eq!(service.gateway(PaymentMethod::Stripe).unwrap().method(), PaymentMethod::Stripe);
        assert_eq!(service.gateway(PaymentMethod::Cod).unwrap().method(), PaymentMethod::Cod);
        assert!(matches!(
            service.gateway(PaymentMethod::PayPal),
            Err(ServiceError::ValidationError(_))
        ));
    }
}
