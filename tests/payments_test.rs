mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::Utc;
use common::{TestApp, STRIPE_WEBHOOK_SECRET};
use mockall::{mock, predicate::eq};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::json;
use storefront_api::{
    auth::CartOwner,
    entities::{
        order::OrderPaymentStatus,
        payment::{self, PaymentMethod, PaymentStatus},
    },
    errors::ServiceError,
    services::payments::{
        sign_stripe_payload, IntentRequest, NewPayment, PaymentConfirmation, PaymentGateway,
        PaymentIntent, PaymentService, RefundReceipt, StripeGateway,
    },
};
use uuid::Uuid;
use wiremock::{
    matchers::{body_string_contains, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

mock! {
    pub Gateway {}

    #[async_trait]
    impl PaymentGateway for Gateway {
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
}

/// Card order for 2 x 20.00 plus 5.00 shipping.
async fn card_order(app: &TestApp) -> (Uuid, payment::Model) {
    app.shipping_rate("standard", dec!(5.00), None).await;
    let tee = app.product("Classic Tee", dec!(20.00), 10).await;
    let owner = CartOwner::User(Uuid::new_v4());
    app.add_to_cart(&owner, tee.id, 2).await;
    let placed = app.checkout(&owner, "standard").await;
    let payments = app
        .services()
        .payments
        .list_payments_for_order(placed.order.id)
        .await
        .unwrap();
    (placed.order.id, payments[0].clone())
}

fn stripe_intent(id: &str, status: &str, amount: i64) -> serde_json::Value {
    json!({
        "id": id,
        "object": "payment_intent",
        "client_secret": format!("{}_secret_abc", id),
        "status": status,
        "amount": amount,
        "amount_received": if status == "succeeded" { amount } else { 0 },
        "currency": "usd"
    })
}

#[tokio::test]
async fn partial_then_full_refund_walks_the_payment_status() {
    let app = TestApp::new().await;
    let (order_id, captured) = card_order(&app).await;
    assert_eq!(captured.amount, dec!(45.00));
    let payments = &app.services().payments;

    let partial = payments.refund_order(order_id, Some(dec!(10.00))).await.unwrap();
    assert_eq!(partial.refunded, dec!(10.00));
    assert_eq!(partial.order_payment_status, OrderPaymentStatus::PartiallyRefunded);
    assert_eq!(partial.payments[0].status, PaymentStatus::Captured);
    assert_eq!(partial.payments[0].refunded_amount, dec!(10.00));

    let too_much = payments.refund_order(order_id, Some(dec!(40.00))).await;
    assert_matches!(too_much, Err(ServiceError::ValidationError(_)));

    let rest = payments.refund_order(order_id, None).await.unwrap();
    assert_eq!(rest.refunded, dec!(35.00));
    assert_eq!(rest.order_payment_status, OrderPaymentStatus::Refunded);
    assert_eq!(rest.payments[0].status, PaymentStatus::Refunded);

    let nothing_left = payments.refund_order(order_id, None).await.unwrap();
    assert_eq!(nothing_left.refunded, Decimal::ZERO);
    assert_eq!(app.gateway.refunds().len(), 2);
}

#[tokio::test]
async fn refunds_go_to_the_gateway_that_took_the_payment() {
    let app = TestApp::new().await;
    let (order_id, captured) = card_order(&app).await;
    let reference = captured.provider_reference.clone().unwrap();

    let mut gateway = MockGateway::new();
    gateway.expect_method().return_const(PaymentMethod::Stripe);
    gateway
        .expect_refund()
        .with(eq(reference.clone()), eq(dec!(12.50)), eq("USD".to_string()))
        .times(1)
        .returning(|reference, amount, _| {
            Ok(RefundReceipt {
                reference: format!("re_{}", reference),
                amount,
            })
        });
    gateway.expect_create_intent().never();
    gateway.expect_confirm().never();

    let payments = PaymentService::new(
        app.state.db.clone(),
        app.state.event_sender.clone(),
        &app.state.config,
    )
    .with_gateway(Arc::new(gateway));

    let outcome = payments.refund_order(order_id, Some(dec!(12.50))).await.unwrap();
    assert_eq!(outcome.refunded, dec!(12.50));
    assert!(app.gateway.refunds().is_empty());
}

#[tokio::test]
async fn gateway_failure_leaves_the_payment_untouched() {
    let app = TestApp::new().await;
    let (order_id, captured) = card_order(&app).await;

    let mut gateway = MockGateway::new();
    gateway.expect_method().return_const(PaymentMethod::Stripe);
    gateway
        .expect_refund()
        .returning(|_, _, _| Err(ServiceError::ExternalServiceError("timeout".into())));

    let payments = PaymentService::new(
        app.state.db.clone(),
        app.state.event_sender.clone(),
        &app.state.config,
    )
    .with_gateway(Arc::new(gateway));

    let result = payments.refund_order(order_id, None).await;
    assert_matches!(result, Err(ServiceError::ExternalServiceError(_)));

    let stored = payment::Entity::find_by_id(captured.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, PaymentStatus::Captured);
    assert_eq!(stored.refunded_amount, Decimal::ZERO);
}

#[tokio::test]
async fn stripe_gateway_creates_and_confirms_intents() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(header("authorization", "Bearer sk_test_123"))
        .and(body_string_contains("amount=4899"))
        .and(body_string_contains("currency=usd"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(stripe_intent("pi_123", "requires_payment_method", 4899)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_123"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(stripe_intent("pi_123", "succeeded", 4899)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let gateway = StripeGateway::new(server.uri(), "sk_test_123");
    let intent = gateway
        .create_intent(&IntentRequest {
            amount: dec!(48.99),
            currency: "USD".into(),
            reference_id: Uuid::new_v4(),
            description: Some("Checkout".into()),
        })
        .await
        .unwrap();
    assert_eq!(intent.reference, "pi_123");
    assert_eq!(intent.client_secret.as_deref(), Some("pi_123_secret_abc"));
    assert_eq!(intent.status, PaymentStatus::Pending);

    let confirmation = gateway.confirm("pi_123").await.unwrap();
    assert_eq!(confirmation.status, PaymentStatus::Captured);
    assert_eq!(confirmation.amount, dec!(48.99));
    assert!(confirmation.failure_reason.is_none());
}

#[tokio::test]
async fn stripe_gateway_reports_declines_and_outages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_declined"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_declined",
            "client_secret": null,
            "status": "requires_payment_method",
            "amount": 1500,
            "last_payment_error": { "message": "Your card was declined." }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": { "message": "Charge has already been refunded." }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_outage"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let gateway = StripeGateway::new(format!("{}/", server.uri()), "sk_test_123");

    let declined = gateway.confirm("pi_declined").await.unwrap();
    assert_eq!(declined.status, PaymentStatus::Pending);
    assert_eq!(declined.failure_reason.as_deref(), Some("Your card was declined."));

    let refund = gateway.refund("pi_declined", dec!(15.00), "USD").await;
    assert_matches!(refund, Err(ServiceError::PaymentFailed(message)) if message.contains("already been refunded"));

    let outage = gateway.confirm("pi_outage").await;
    assert_matches!(outage, Err(ServiceError::ExternalServiceError(_)));
}

#[tokio::test]
async fn stripe_refunds_are_sent_in_minor_units() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/refunds"))
        .and(body_string_contains("payment_intent=pi_123"))
        .and(body_string_contains("amount=1250"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "re_1", "amount": 1250, "status": "succeeded"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = StripeGateway::new(server.uri(), "sk_test_123");
    let receipt = gateway.refund("pi_123", dec!(12.50), "USD").await.unwrap();
    assert_eq!(receipt.reference, "re_1");
    assert_eq!(receipt.amount, dec!(12.50));
}

async fn pending_stripe_payment(app: &TestApp, reference: &str) -> payment::Model {
    app.services()
        .payments
        .record_payment(
            &*app.state.db,
            NewPayment {
                order_id: None,
                checkout_session_id: None,
                provider: PaymentMethod::Stripe,
                provider_reference: Some(reference.to_string()),
                amount: dec!(30.00),
                currency: "USD".into(),
                status: PaymentStatus::Pending,
            },
        )
        .await
        .unwrap()
}

fn signed(payload: &serde_json::Value) -> (String, String) {
    let body = payload.to_string();
    let header = sign_stripe_payload(&body, STRIPE_WEBHOOK_SECRET, Utc::now().timestamp()).unwrap();
    (body, header)
}

#[tokio::test]
async fn webhook_captures_and_fails_payments() {
    let app = TestApp::new().await;
    let payments = &app.services().payments;
    let captured = pending_stripe_payment(&app, "pi_hook_ok").await;
    let failed = pending_stripe_payment(&app, "pi_hook_bad").await;

    let (body, header) = signed(&json!({
        "id": "evt_1",
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": "pi_hook_ok" } }
    }));
    let outcome = payments.handle_stripe_webhook(&body, &header).await.unwrap();
    assert!(outcome.handled);
    assert_eq!(outcome.event_id, "evt_1");

    let (body, header) = signed(&json!({
        "id": "evt_2",
        "type": "payment_intent.payment_failed",
        "data": { "object": {
            "id": "pi_hook_bad",
            "last_payment_error": { "message": "Insufficient funds" }
        } }
    }));
    payments.handle_stripe_webhook(&body, &header).await.unwrap();

    let captured = payment::Entity::find_by_id(captured.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(captured.status, PaymentStatus::Captured);
    let failed = payment::Entity::find_by_id(failed.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("Insufficient funds"));

    // a late failure notice does not undo a capture
    let (body, header) = signed(&json!({
        "id": "evt_3",
        "type": "payment_intent.payment_failed",
        "data": { "object": { "id": "pi_hook_ok" } }
    }));
    payments.handle_stripe_webhook(&body, &header).await.unwrap();
    let still = payment::Entity::find_by_id(captured.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(still.status, PaymentStatus::Captured);
}

#[tokio::test]
async fn webhook_syncs_dashboard_refunds() {
    let app = TestApp::new().await;
    let (_, captured) = card_order(&app).await;
    let reference = captured.provider_reference.clone().unwrap();

    let (body, header) = signed(&json!({
        "id": "evt_refund",
        "type": "charge.refunded",
        "data": { "object": { "payment_intent": reference, "amount_refunded": 4500 } }
    }));
    let outcome = app
        .services()
        .payments
        .handle_stripe_webhook(&body, &header)
        .await
        .unwrap();
    assert!(outcome.handled);

    let stored = payment::Entity::find_by_id(captured.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, PaymentStatus::Refunded);
    assert_eq!(stored.refunded_amount, dec!(45.00));
}

#[tokio::test]
async fn webhook_rejects_bad_signatures_and_ignores_unknown_events() {
    let app = TestApp::new().await;
    let payments = &app.services().payments;
    let payload = json!({
        "id": "evt_other",
        "type": "customer.created",
        "data": { "object": { "id": "cus_1" } }
    });

    let (body, header) = signed(&payload);
    let tampered = body.replace("cus_1", "cus_2");
    assert_matches!(
        payments.handle_stripe_webhook(&tampered, &header).await,
        Err(ServiceError::Unauthorized(_))
    );

    let stale = sign_stripe_payload(&body, STRIPE_WEBHOOK_SECRET, Utc::now().timestamp() - 3600)
        .unwrap();
    assert_matches!(
        payments.handle_stripe_webhook(&body, &stale).await,
        Err(ServiceError::Unauthorized(_))
    );

    let wrong_secret = sign_stripe_payload(&body, "whsec_other", Utc::now().timestamp()).unwrap();
    assert_matches!(
        payments.handle_stripe_webhook(&body, &wrong_secret).await,
        Err(ServiceError::Unauthorized(_))
    );

    let outcome = payments.handle_stripe_webhook(&body, &header).await.unwrap();
    assert!(!outcome.handled);
    assert_eq!(outcome.event_type, "customer.created");
}

#[tokio::test]
async fn webhooks_are_refused_without_a_configured_secret() {
    let app = TestApp::with_config(|cfg| cfg.stripe.webhook_secret = None).await;
    let (body, header) = signed(&json!({ "id": "evt", "type": "x", "data": { "object": {} } }));

    let result = app.services().payments.handle_stripe_webhook(&body, &header).await;
    assert_matches!(result, Err(ServiceError::InvalidOperation(_)));
}
