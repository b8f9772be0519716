mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use storefront_api::{
    auth::CartOwner,
    entities::stock_reservation::{self, ReservationStatus},
    errors::ServiceError,
};
use uuid::Uuid;

#[tokio::test]
async fn reserve_sets_the_absolute_quantity() {
    let app = TestApp::new().await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let owner = CartOwner::Guest("hold-absolute".into());
    let reservations = &app.services().reservations;

    reservations
        .reserve(&*app.state.db, &owner, tee.id, 4)
        .await
        .unwrap();
    let hold = reservations
        .reserve(&*app.state.db, &owner, tee.id, 2)
        .await
        .unwrap();
    assert_eq!(hold.quantity, 2);

    let active = reservations.list_active(&*app.state.db, &owner).await.unwrap();
    assert_eq!(active.len(), 1);

    let available = reservations
        .available_quantity(&*app.state.db, tee.id, None)
        .await
        .unwrap();
    assert_eq!(available, 8);

    let own_view = reservations
        .available_quantity(&*app.state.db, tee.id, Some(&owner))
        .await
        .unwrap();
    assert_eq!(own_view, 10);
}

#[tokio::test]
async fn reservations_expire_with_the_configured_ttl() {
    let app = TestApp::with_config(|cfg| cfg.reservation_ttl_mins = 5).await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let owner = CartOwner::User(Uuid::new_v4());

    let before = Utc::now();
    let hold = app
        .services()
        .reservations
        .reserve(&*app.state.db, &owner, tee.id, 1)
        .await
        .unwrap();

    let ttl = hold.expires_at - before;
    assert!(ttl <= Duration::minutes(5) + Duration::seconds(1));
    assert!(ttl >= Duration::minutes(5) - Duration::seconds(5));
    assert_eq!(app.services().reservations.ttl(), Duration::minutes(5));
}

#[tokio::test]
async fn expired_holds_stop_counting_and_are_released_by_cleanup() {
    let app = TestApp::new().await;
    let belt = app.product("Leather Belt", dec!(35.00), 2).await;
    let sleeper = CartOwner::Guest("hold-sleeper".into());
    let buyer = CartOwner::Guest("hold-buyer".into());
    let reservations = &app.services().reservations;

    reservations
        .reserve(&*app.state.db, &sleeper, belt.id, 2)
        .await
        .unwrap();
    let blocked = reservations.reserve(&*app.state.db, &buyer, belt.id, 1).await;
    assert_matches!(blocked, Err(ServiceError::InsufficientStock(_)));

    app.expire_holds(&sleeper).await;

    // expired holds no longer block even before cleanup runs
    reservations
        .reserve(&*app.state.db, &buyer, belt.id, 2)
        .await
        .unwrap();

    let cleaned = reservations.cleanup_expired().await.unwrap();
    assert_eq!(cleaned.released, 1);
    let again = reservations.cleanup_expired().await.unwrap();
    assert_eq!(again.released, 0);

    let rows = stock_reservation::Entity::find()
        .all(&*app.state.db)
        .await
        .unwrap();
    let sleeper_row = rows
        .iter()
        .find(|r| r.session_id.as_deref() == Some("hold-sleeper"))
        .unwrap();
    assert_eq!(sleeper_row.status, ReservationStatus::Released);
}

#[tokio::test]
async fn transfer_moves_guest_holds_to_the_user() {
    let app = TestApp::new().await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let tote = app.product("Canvas Tote", dec!(24.50), 10).await;
    let guest = CartOwner::Guest("hold-transfer".into());
    let user = CartOwner::User(Uuid::new_v4());
    let reservations = &app.services().reservations;

    reservations.reserve(&*app.state.db, &guest, tee.id, 2).await.unwrap();
    reservations.reserve(&*app.state.db, &guest, tote.id, 1).await.unwrap();
    reservations.reserve(&*app.state.db, &user, tee.id, 3).await.unwrap();

    let moved = reservations
        .transfer(&*app.state.db, &guest, &user)
        .await
        .unwrap();
    assert_eq!(moved, 2);

    assert!(reservations
        .list_active(&*app.state.db, &guest)
        .await
        .unwrap()
        .is_empty());
    let user_holds = reservations.list_active(&*app.state.db, &user).await.unwrap();
    assert_eq!(user_holds.len(), 2);
    let tee_hold = user_holds.iter().find(|h| h.product_id == tee.id).unwrap();
    assert_eq!(tee_hold.quantity, 5);
}

#[tokio::test]
async fn maintenance_pass_reports_what_it_cleaned() {
    let app = TestApp::new().await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let owner = CartOwner::Guest("hold-maintenance".into());
    app.add_to_cart(&owner, tee.id, 1).await;
    app.expire_holds(&owner).await;

    let worker = app.services().maintenance_worker(&app.state.config);
    let report = worker.run_once().await;
    assert_eq!(report.reservations_released, 1);
    assert_eq!(report.sessions_expired, 0);
    assert_eq!(report.orders_cancelled, 0);

    let second = worker.run_once().await;
    assert!(second.is_empty());
}

#[tokio::test]
async fn refresh_releases_lapsed_holds_instead_of_reviving_them() {
    let app = TestApp::new().await;
    let scarf = app.product("Wool Scarf", dec!(45.00), 5).await;
    let sleeper = CartOwner::Guest("hold-lapsed".into());
    let buyer = CartOwner::Guest("hold-next-in-line".into());
    let reservations = &app.services().reservations;

    reservations
        .reserve(&*app.state.db, &sleeper, scarf.id, 5)
        .await
        .unwrap();
    app.expire_holds(&sleeper).await;
    reservations
        .reserve(&*app.state.db, &buyer, scarf.id, 5)
        .await
        .unwrap();

    let refreshed = reservations.refresh(&*app.state.db, &sleeper).await.unwrap();
    assert_eq!(refreshed, 0);
    assert_eq!(app.live_held(scarf.id).await, 5);
    assert!(reservations
        .list_active(&*app.state.db, &sleeper)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        reservations
            .available_quantity(&*app.state.db, scarf.id, Some(&buyer))
            .await
            .unwrap(),
        5
    );
}

#[tokio::test]
async fn reading_a_cart_does_not_bring_back_a_lapsed_hold() {
    let app = TestApp::new().await;
    let scarf = app.product("Wool Scarf", dec!(45.00), 5).await;
    let sleeper = CartOwner::Guest("cart-lapsed".into());
    let buyer = CartOwner::Guest("cart-next-in-line".into());

    app.add_to_cart(&sleeper, scarf.id, 5).await;
    app.expire_holds(&sleeper).await;
    app.add_to_cart(&buyer, scarf.id, 5).await;

    let cart = app.services().cart.get_cart(&sleeper).await.unwrap();
    assert_eq!(cart.items[0].quantity, 5);
    assert_eq!(app.live_held(scarf.id).await, 5);

    let retry = app
        .services()
        .reservations
        .reserve(&*app.state.db, &sleeper, scarf.id, 1)
        .await;
    assert_matches!(retry, Err(ServiceError::InsufficientStock(_)));
}

#[tokio::test]
async fn transfer_drops_lapsed_holds_on_both_sides() {
    let app = TestApp::new().await;
    let tee = app.product("Classic Tee", dec!(19.99), 4).await;
    let tote = app.product("Canvas Tote", dec!(24.50), 10).await;
    let guest = CartOwner::Guest("transfer-lapsed".into());
    let user = CartOwner::User(Uuid::new_v4());
    let other = CartOwner::Guest("transfer-other".into());
    let reservations = &app.services().reservations;

    reservations.reserve(&*app.state.db, &guest, tee.id, 4).await.unwrap();
    reservations.reserve(&*app.state.db, &user, tote.id, 2).await.unwrap();
    app.expire_holds(&guest).await;
    app.expire_holds(&user).await;
    reservations.reserve(&*app.state.db, &other, tee.id, 4).await.unwrap();

    let moved = reservations
        .transfer(&*app.state.db, &guest, &user)
        .await
        .unwrap();
    assert_eq!(moved, 0);
    assert!(reservations
        .list_active(&*app.state.db, &user)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(app.live_held(tee.id).await, 4);
    assert_eq!(app.live_held(tote.id).await, 0);

    let rows = stock_reservation::Entity::find()
        .all(&*app.state.db)
        .await
        .unwrap();
    let released = rows
        .iter()
        .filter(|r| r.status == ReservationStatus::Released)
        .count();
    assert_eq!(released, 2);
}
