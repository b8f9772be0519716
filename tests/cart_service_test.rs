mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use storefront_api::{
    auth::CartOwner,
    entities::commerce::{cart, CartStatus},
    errors::ServiceError,
    services::commerce::AddToCartInput,
};
use uuid::Uuid;

#[tokio::test]
async fn adding_the_same_product_twice_merges_into_one_line() {
    let app = TestApp::new().await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let owner = CartOwner::Guest("guest-merge-line".into());

    app.add_to_cart(&owner, tee.id, 1).await;
    app.add_to_cart(&owner, tee.id, 2).await;

    let cart = app.services().cart.get_cart(&owner).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 3);
    assert_eq!(cart.items[0].subtotal, dec!(59.97));
    assert_eq!(cart.cart.item_count, 3);
}

#[tokio::test]
async fn cart_totals_equal_the_sum_of_lines() {
    let app = TestApp::new().await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let tote = app.product("Canvas Tote", dec!(24.50), 10).await;
    let owner = CartOwner::User(Uuid::new_v4());

    app.add_to_cart(&owner, tee.id, 2).await;
    app.add_to_cart(&owner, tote.id, 1).await;

    let cart = app.services().cart.get_cart(&owner).await.unwrap();
    let line_sum: rust_decimal::Decimal = cart.items.iter().map(|i| i.subtotal).sum();
    assert_eq!(cart.cart.subtotal, line_sum);
    assert_eq!(cart.cart.subtotal, dec!(64.48));
    assert_eq!(cart.cart.discount_total, dec!(0));
    assert_eq!(cart.cart.total, dec!(64.48));
    assert_eq!(cart.cart.item_count, 3);
}

#[tokio::test]
async fn zero_or_negative_quantity_is_rejected() {
    let app = TestApp::new().await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let owner = CartOwner::Guest("guest-bad-qty".into());

    let result = app
        .services()
        .cart
        .add_item(
            &owner,
            AddToCartInput {
                product_id: tee.id,
                quantity: 0,
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn oversized_quantities_are_rejected_without_overflow() {
    let app = TestApp::new().await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let owner = CartOwner::Guest("guest-huge-qty".into());
    app.add_to_cart(&owner, tee.id, 1).await;

    let result = app
        .services()
        .cart
        .add_item(
            &owner,
            AddToCartInput {
                product_id: tee.id,
                quantity: i32::MAX,
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));

    let cart = app.services().cart.get_cart(&owner).await.unwrap();
    assert_eq!(cart.items[0].quantity, 1);
}

#[tokio::test]
async fn holds_of_other_shoppers_limit_what_can_be_added() {
    let app = TestApp::new().await;
    let belt = app.product("Leather Belt", dec!(35.00), 3).await;
    let first = CartOwner::Guest("guest-first".into());
    let second = CartOwner::Guest("guest-second".into());

    app.add_to_cart(&first, belt.id, 2).await;

    let result = app
        .services()
        .cart
        .add_item(
            &second,
            AddToCartInput {
                product_id: belt.id,
                quantity: 2,
            },
        )
        .await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));

    app.add_to_cart(&second, belt.id, 1).await;
}

#[tokio::test]
async fn setting_quantity_to_zero_removes_the_line_and_its_hold() {
    let app = TestApp::new().await;
    let tee = app.product("Classic Tee", dec!(19.99), 5).await;
    let owner = CartOwner::Guest("guest-zero".into());
    app.add_to_cart(&owner, tee.id, 4).await;

    let cart = app.services().cart.get_cart(&owner).await.unwrap();
    let item_id = cart.items[0].id;
    let cart = app
        .services()
        .cart
        .update_item(&owner, item_id, 0)
        .await
        .unwrap();
    assert!(cart.items.is_empty());
    assert_eq!(cart.cart.subtotal, dec!(0));

    let available = app
        .services()
        .reservations
        .available_quantity(&*app.state.db, tee.id, None)
        .await
        .unwrap();
    assert_eq!(available, 5);
}

#[tokio::test]
async fn clearing_the_cart_releases_every_hold() {
    let app = TestApp::new().await;
    let tee = app.product("Classic Tee", dec!(19.99), 5).await;
    let tote = app.product("Canvas Tote", dec!(24.50), 5).await;
    let owner = CartOwner::User(Uuid::new_v4());
    app.add_to_cart(&owner, tee.id, 2).await;
    app.add_to_cart(&owner, tote.id, 3).await;

    let cleared = app.services().cart.clear_cart(&owner).await.unwrap();
    assert!(cleared.items.is_empty());
    assert_eq!(cleared.cart.total, dec!(0));

    let holds = app
        .services()
        .reservations
        .list_active(&*app.state.db, &owner)
        .await
        .unwrap();
    assert!(holds.is_empty());
}

#[tokio::test]
async fn reading_a_missing_cart_is_not_found() {
    let app = TestApp::new().await;
    let owner = CartOwner::Guest("nobody".into());

    let result = app.services().cart.get_cart(&owner).await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));

    let created = app.services().cart.get_or_create_cart(&owner).await.unwrap();
    assert_eq!(created.cart.session_id.as_deref(), Some("nobody"));
    assert!(created.cart.user_id.is_none());
}

#[tokio::test]
async fn coupon_cannot_be_applied_to_an_empty_cart() {
    let app = TestApp::new().await;
    let owner = CartOwner::Guest("guest-empty-coupon".into());
    app.services().cart.get_or_create_cart(&owner).await.unwrap();

    let result = app.services().cart.apply_coupon(&owner, "WELCOME10").await;
    assert_matches!(result, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn expired_carts_are_abandoned() {
    let app = TestApp::new().await;
    let tee = app.product("Classic Tee", dec!(19.99), 5).await;
    let stale = CartOwner::Guest("guest-stale".into());
    let fresh = CartOwner::Guest("guest-fresh".into());
    app.add_to_cart(&stale, tee.id, 1).await;
    app.add_to_cart(&fresh, tee.id, 1).await;

    let stale_cart = app.services().cart.get_cart(&stale).await.unwrap().cart;
    let mut active: cart::ActiveModel = stale_cart.clone().into();
    active.expires_at = Set(Utc::now() - Duration::minutes(1));
    active.update(&*app.state.db).await.unwrap();

    let abandoned = app.services().cart.abandon_expired_carts().await.unwrap();
    assert_eq!(abandoned, 1);

    let reloaded = app
        .services()
        .cart
        .get_cart_by_id(stale_cart.id)
        .await
        .unwrap();
    assert_eq!(reloaded.cart.status, CartStatus::Abandoned);
    assert!(app.services().cart.get_cart(&fresh).await.is_ok());
}
