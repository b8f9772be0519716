mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::{checkout_input, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use storefront_api::{
    auth::CartOwner,
    entities::{
        commerce::{checkout_session, CheckoutSession, CheckoutStatus},
        order::{OrderPaymentStatus, OrderStatus},
        payment::{PaymentMethod, PaymentStatus},
    },
    errors::ServiceError,
    services::commerce::checkout_service::CodOrderInput,
};
use uuid::Uuid;

#[tokio::test]
async fn card_checkout_turns_the_cart_into_a_paid_order() {
    let app = TestApp::with_config(|cfg| cfg.default_tax_rate = 0.10).await;
    app.shipping_rate("standard", dec!(4.99), None).await;
    let tee = app.product("Classic Tee", dec!(20.00), 10).await;
    let owner = CartOwner::User(Uuid::new_v4());
    app.add_to_cart(&owner, tee.id, 2).await;

    let checkout = &app.services().checkout;
    let session = checkout
        .create_session(&owner, checkout_input("standard", PaymentMethod::Stripe))
        .await
        .unwrap();
    assert_eq!(session.status, CheckoutStatus::Active);
    assert_eq!(session.subtotal, dec!(40.00));
    assert_eq!(session.shipping_total, dec!(4.99));
    assert_eq!(session.tax_total, dec!(4.00));
    assert_eq!(session.total, dec!(48.99));
    assert!(session.payment_reference.is_some());
    assert!(session.payment_client_secret.is_some());

    let placed = checkout
        .complete_session(&owner, session.id, None)
        .await
        .unwrap();
    assert_eq!(placed.order.status, OrderStatus::Confirmed);
    assert_eq!(placed.order.payment_status, OrderPaymentStatus::Paid);
    assert_eq!(placed.order.total, dec!(48.99));
    assert_eq!(placed.order.checkout_session_id, Some(session.id));
    assert!(placed.order.order_number.starts_with("ORD-"));
    assert_eq!(placed.items.len(), 1);
    assert_eq!(placed.items[0].quantity, 2);

    assert_eq!(app.stock_of(tee.id).await, 8);
    assert_matches!(
        app.services().cart.get_cart(&owner).await,
        Err(ServiceError::NotFound(_))
    );
    assert!(app
        .services()
        .reservations
        .list_active(&*app.state.db, &owner)
        .await
        .unwrap()
        .is_empty());

    let payments = app
        .services()
        .payments
        .list_payments_for_order(placed.order.id)
        .await
        .unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Captured);
    assert_eq!(payments[0].amount, dec!(48.99));

    let session = checkout.get_session(&owner, session.id).await.unwrap();
    assert_eq!(session.status, CheckoutStatus::Completed);
    assert_eq!(session.order_id, Some(placed.order.id));
}

#[tokio::test]
async fn free_shipping_applies_over_the_threshold() {
    let app = TestApp::new().await;
    app.shipping_rate("standard", dec!(4.99), Some(dec!(50))).await;
    let shirt = app.product("Oxford Shirt", dec!(59.00), 10).await;
    let owner = CartOwner::Guest("free-shipping".into());
    app.add_to_cart(&owner, shirt.id, 1).await;

    let session = app
        .services()
        .checkout
        .create_session(&owner, checkout_input("standard", PaymentMethod::Stripe))
        .await
        .unwrap();
    assert_eq!(session.shipping_total, dec!(0));
    assert_eq!(session.total, dec!(59.00));
}

#[tokio::test]
async fn completing_a_session_twice_is_a_conflict() {
    let app = TestApp::new().await;
    app.shipping_rate("standard", dec!(4.99), None).await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let owner = CartOwner::Guest("double-complete".into());
    app.add_to_cart(&owner, tee.id, 1).await;

    let checkout = &app.services().checkout;
    let session = checkout
        .create_session(&owner, checkout_input("standard", PaymentMethod::Stripe))
        .await
        .unwrap();
    checkout.complete_session(&owner, session.id, None).await.unwrap();

    let again = checkout.complete_session(&owner, session.id, None).await;
    assert_matches!(again, Err(ServiceError::Conflict(_)));
    assert_eq!(app.stock_of(tee.id).await, 9);
}

#[tokio::test]
async fn declined_payment_places_no_order() {
    let app = TestApp::new().await;
    app.shipping_rate("standard", dec!(4.99), None).await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let owner = CartOwner::Guest("declined".into());
    app.add_to_cart(&owner, tee.id, 1).await;

    let checkout = &app.services().checkout;
    let session = checkout
        .create_session(&owner, checkout_input("standard", PaymentMethod::Stripe))
        .await
        .unwrap();
    app.gateway.decline_next_confirmations();

    let result = checkout.complete_session(&owner, session.id, None).await;
    assert_matches!(result, Err(ServiceError::PaymentFailed(reason)) if reason.contains("declined"));

    assert_eq!(app.stock_of(tee.id).await, 10);
    let cart = app.services().cart.get_cart(&owner).await.unwrap();
    assert_eq!(cart.items.len(), 1);
}

#[tokio::test]
async fn foreign_payment_reference_is_rejected() {
    let app = TestApp::new().await;
    app.shipping_rate("standard", dec!(4.99), None).await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let owner = CartOwner::Guest("wrong-ref".into());
    app.add_to_cart(&owner, tee.id, 1).await;

    let checkout = &app.services().checkout;
    let session = checkout
        .create_session(&owner, checkout_input("standard", PaymentMethod::Stripe))
        .await
        .unwrap();
    let result = checkout
        .complete_session(&owner, session.id, Some("pi_someone_else".into()))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn expired_session_cannot_be_completed() {
    let app = TestApp::new().await;
    app.shipping_rate("standard", dec!(4.99), None).await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let owner = CartOwner::Guest("expired-session".into());
    app.add_to_cart(&owner, tee.id, 1).await;

    let checkout = &app.services().checkout;
    let session = checkout
        .create_session(&owner, checkout_input("standard", PaymentMethod::Stripe))
        .await
        .unwrap();
    let mut active: checkout_session::ActiveModel = session.clone().into();
    active.expires_at = Set(Utc::now() - Duration::minutes(1));
    active.update(&*app.state.db).await.unwrap();

    let result = checkout.complete_session(&owner, session.id, None).await;
    assert_matches!(result, Err(ServiceError::Conflict(_)));

    let stored = CheckoutSession::find_by_id(session.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, CheckoutStatus::Expired);
}

#[tokio::test]
async fn maintenance_expires_stale_sessions() {
    let app = TestApp::new().await;
    app.shipping_rate("standard", dec!(4.99), None).await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let owner = CartOwner::Guest("stale-session".into());
    app.add_to_cart(&owner, tee.id, 1).await;

    let session = app
        .services()
        .checkout
        .create_session(&owner, checkout_input("standard", PaymentMethod::Stripe))
        .await
        .unwrap();
    let mut active: checkout_session::ActiveModel = session.into();
    active.expires_at = Set(Utc::now() - Duration::minutes(1));
    active.update(&*app.state.db).await.unwrap();

    assert_eq!(app.services().checkout.expire_sessions().await.unwrap(), 1);
    assert_eq!(app.services().checkout.expire_sessions().await.unwrap(), 0);
}

#[tokio::test]
async fn sessions_belong_to_their_owner() {
    let app = TestApp::new().await;
    app.shipping_rate("standard", dec!(4.99), None).await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let owner = CartOwner::Guest("session-owner".into());
    app.add_to_cart(&owner, tee.id, 1).await;

    let session = app
        .services()
        .checkout
        .create_session(&owner, checkout_input("standard", PaymentMethod::Stripe))
        .await
        .unwrap();

    let stranger = CartOwner::Guest("session-stranger".into());
    let result = app.services().checkout.get_session(&stranger, session.id).await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn cash_on_delivery_is_not_a_checkout_session() {
    let app = TestApp::new().await;
    app.shipping_rate("standard", dec!(4.99), None).await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let owner = CartOwner::Guest("cod-session".into());
    app.add_to_cart(&owner, tee.id, 1).await;

    let result = app
        .services()
        .checkout
        .create_session(&owner, checkout_input("standard", PaymentMethod::Cod))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn unknown_shipping_method_is_rejected() {
    let app = TestApp::new().await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let owner = CartOwner::Guest("no-rate".into());
    app.add_to_cart(&owner, tee.id, 1).await;

    let result = app
        .services()
        .checkout
        .create_session(&owner, checkout_input("teleport", PaymentMethod::Stripe))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn failed_intent_cancels_the_session() {
    let app = TestApp::new().await;
    app.shipping_rate("standard", dec!(4.99), None).await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let owner = CartOwner::Guest("intent-down".into());
    app.add_to_cart(&owner, tee.id, 1).await;
    app.gateway.fail_intent_creation();

    let result = app
        .services()
        .checkout
        .create_session(&owner, checkout_input("standard", PaymentMethod::Stripe))
        .await;
    assert_matches!(result, Err(ServiceError::ExternalServiceError(_)));

    let sessions = CheckoutSession::find().all(&*app.state.db).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, CheckoutStatus::Cancelled);
}

#[tokio::test]
async fn cod_order_is_confirmed_with_payment_pending_until_collected() {
    let app = TestApp::new().await;
    app.shipping_rate("standard", dec!(4.99), None).await;
    let tote = app.product("Canvas Tote", dec!(24.50), 10).await;
    let owner = CartOwner::User(Uuid::new_v4());
    app.add_to_cart(&owner, tote.id, 2).await;

    let placed = app.cod_order(&owner, "standard").await;
    assert_eq!(placed.order.status, OrderStatus::Confirmed);
    assert_eq!(placed.order.payment_status, OrderPaymentStatus::Pending);
    assert_eq!(placed.order.payment_method, PaymentMethod::Cod);
    assert_eq!(placed.order.total, dec!(53.99));
    assert_eq!(app.stock_of(tote.id).await, 8);

    let paid = app.services().orders.mark_paid(placed.order.id).await.unwrap();
    assert_eq!(paid.payment_status, OrderPaymentStatus::Paid);
    assert!(paid.paid_at.is_some());

    let again = app.services().orders.mark_paid(placed.order.id).await;
    assert_matches!(again, Err(ServiceError::InvalidOperation(_)));

    let payments = app
        .services()
        .payments
        .list_payments_for_order(placed.order.id)
        .await
        .unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Captured);
}

#[tokio::test]
async fn cod_is_capped_by_order_amount() {
    let app = TestApp::with_config(|cfg| cfg.cod_max_order_amount = dec!(30)).await;
    app.shipping_rate("standard", dec!(4.99), None).await;
    let shirt = app.product("Oxford Shirt", dec!(59.00), 10).await;
    let owner = CartOwner::Guest("cod-cap".into());
    app.add_to_cart(&owner, shirt.id, 1).await;

    let result = app
        .services()
        .checkout
        .place_cod_order(
            &owner,
            CodOrderInput {
                email: "cap@example.com".into(),
                shipping_address: common::address(),
                billing_address: None,
                shipping_method: "standard".into(),
                coupon_code: None,
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
    assert_eq!(app.stock_of(shirt.id).await, 10);
}

#[tokio::test]
async fn checkout_of_an_empty_cart_fails() {
    let app = TestApp::new().await;
    app.shipping_rate("standard", dec!(4.99), None).await;
    let owner = CartOwner::Guest("empty-checkout".into());
    app.services().cart.get_or_create_cart(&owner).await.unwrap();

    let result = app
        .services()
        .checkout
        .create_session(&owner, checkout_input("standard", PaymentMethod::Stripe))
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}
