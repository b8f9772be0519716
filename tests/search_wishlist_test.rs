mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use storefront_api::{
    auth::CartOwner,
    entities::commerce::CategoryModel,
    errors::ServiceError,
    services::search::{SearchQuery, SearchSort},
};
use uuid::Uuid;

struct Catalog {
    app: TestApp,
    apparel: CategoryModel,
    shirts: CategoryModel,
}

async fn catalog() -> Catalog {
    let app = TestApp::new().await;
    let apparel = app.category("Apparel", None).await;
    let shirts = app.category("Shirts", Some(apparel.id)).await;
    let bags = app.category("Bags", None).await;

    app.product_in("Classic Tee", dec!(19.99), 10, Some(shirts.id)).await;
    app.product_in("Vintage Tee", dec!(29.00), 3, Some(shirts.id)).await;
    app.product_in("Canvas Tote", dec!(24.50), 5, Some(bags.id)).await;
    app.product("Tee Shirt Dress", dec!(80.00), 0).await;
    let retired = app.product("Old Tee", dec!(9.00), 4).await;
    app.services().catalog.delete_product(retired.id).await.unwrap();

    Catalog {
        app,
        apparel,
        shirts,
    }
}

fn names(results: &storefront_api::services::search::SearchResults) -> Vec<&str> {
    results.products.iter().map(|p| p.name.as_str()).collect()
}

#[tokio::test]
async fn relevance_puts_prefix_matches_first_and_skips_archived_products() {
    let c = catalog().await;

    let results = c
        .app
        .services()
        .search
        .search(SearchQuery {
            q: Some("  TEE ".into()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(results.total, 3);
    assert_eq!(names(&results), ["Tee Shirt Dress", "Classic Tee", "Vintage Tee"]);

    let facets = &results.facets;
    assert_eq!(facets.categories.len(), 1);
    assert_eq!(facets.categories[0].category_id, c.shirts.id);
    assert_eq!(facets.categories[0].count, 2);
    assert_eq!(facets.availability.in_stock, 2);
    assert_eq!(facets.availability.out_of_stock, 1);
    let bucket_counts: Vec<u64> = facets.price_ranges.iter().map(|b| b.count).collect();
    assert_eq!(bucket_counts, [1, 1, 1, 0, 0]);
    assert_eq!(facets.price_ranges[4].max, None);
}

#[tokio::test]
async fn filters_narrow_the_result_set() {
    let c = catalog().await;
    let search = &c.app.services().search;

    let in_apparel = search
        .search(SearchQuery {
            category_id: Some(c.apparel.id),
            sort: SearchSort::PriceDesc,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(names(&in_apparel), ["Vintage Tee", "Classic Tee"]);

    let priced = search
        .search(SearchQuery {
            min_price: Some(dec!(20)),
            max_price: Some(dec!(30)),
            sort: SearchSort::PriceAsc,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(names(&priced), ["Canvas Tote", "Vintage Tee"]);

    let available = search
        .search(SearchQuery {
            q: Some("tee".into()),
            in_stock: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(available.total, 2);
    assert!(available.products.iter().all(|p| p.stock_quantity > 0));
}

#[tokio::test]
async fn results_are_paginated_after_sorting() {
    let c = catalog().await;

    let second_page = c
        .app
        .services()
        .search
        .search(SearchQuery {
            sort: SearchSort::PriceAsc,
            page: Some(2),
            per_page: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(second_page.total, 4);
    assert_eq!(second_page.page, 2);
    assert_eq!(second_page.per_page, 2);
    assert_eq!(names(&second_page), ["Vintage Tee", "Tee Shirt Dress"]);

    let past_the_end = c
        .app
        .services()
        .search
        .search(SearchQuery {
            page: Some(9),
            per_page: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(past_the_end.products.is_empty());
    assert_eq!(past_the_end.total, 4);
}

#[tokio::test]
async fn invalid_queries_are_rejected() {
    let c = catalog().await;
    let search = &c.app.services().search;

    let inverted = search
        .search(SearchQuery {
            min_price: Some(dec!(50)),
            max_price: Some(dec!(10)),
            ..Default::default()
        })
        .await;
    assert_matches!(inverted, Err(ServiceError::ValidationError(_)));

    let unknown_category = search
        .search(SearchQuery {
            category_id: Some(Uuid::new_v4()),
            ..Default::default()
        })
        .await;
    assert_matches!(unknown_category, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn searches_feed_suggestions_and_popular_terms() {
    let c = catalog().await;
    let search = &c.app.services().search;
    for term in ["Tee", " tee", "TEE", "tote", "zeppelin"] {
        search
            .search(SearchQuery {
                q: Some(term.into()),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let popular = search.popular_searches(10).await.unwrap();
    let ranked: Vec<(&str, i64)> = popular.iter().map(|p| (p.term.as_str(), p.searches)).collect();
    assert_eq!(ranked, [("tee", 3), ("tote", 1)]);

    assert_eq!(search.suggest("cla", 5).await.unwrap(), ["Classic Tee"]);
    assert_eq!(search.suggest("T", 5).await.unwrap(), ["Tee Shirt Dress"]);
    assert!(search.suggest("   ", 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn wishlist_keeps_one_entry_per_product() {
    let app = TestApp::new().await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let tote = app.product("Canvas Tote", dec!(24.50), 10).await;
    let user_id = Uuid::new_v4();
    let wishlist = &app.services().wishlist;

    let empty = wishlist.get_wishlist(user_id).await.unwrap();
    assert!(empty.items.is_empty());
    assert_eq!(empty.wishlist.user_id, user_id);

    wishlist.add_item(user_id, tee.id).await.unwrap();
    wishlist.add_item(user_id, tee.id).await.unwrap();
    let list = wishlist.add_item(user_id, tote.id).await.unwrap();
    assert_eq!(list.items.len(), 2);
    assert_eq!(list.wishlist.id, empty.wishlist.id);

    assert_matches!(
        wishlist.add_item(user_id, Uuid::new_v4()).await,
        Err(ServiceError::NotFound(_))
    );

    let list = wishlist.remove_item(user_id, tote.id).await.unwrap();
    assert_eq!(list.items.len(), 1);
    assert_matches!(
        wishlist.remove_item(user_id, tote.id).await,
        Err(ServiceError::NotFound(_))
    );

    let cleared = wishlist.clear(user_id).await.unwrap();
    assert!(cleared.items.is_empty());
    assert!(wishlist.get_wishlist(user_id).await.unwrap().items.is_empty());
}

#[tokio::test]
async fn moving_to_the_cart_takes_the_product_off_the_list() {
    let app = TestApp::new().await;
    let tee = app.product("Classic Tee", dec!(19.99), 10).await;
    let user_id = Uuid::new_v4();
    let wishlist = &app.services().wishlist;
    wishlist.add_item(user_id, tee.id).await.unwrap();

    let cart = wishlist.move_to_cart(user_id, tee.id, 2).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 2);
    assert_eq!(cart.cart.subtotal, dec!(39.98));
    assert!(wishlist.get_wishlist(user_id).await.unwrap().items.is_empty());

    let again = wishlist.move_to_cart(user_id, tee.id, 1).await;
    assert_matches!(again, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn a_rejected_move_leaves_the_wishlist_alone() {
    let app = TestApp::new().await;
    let belt = app.product("Leather Belt", dec!(35.00), 1).await;
    let user_id = Uuid::new_v4();
    let wishlist = &app.services().wishlist;
    wishlist.add_item(user_id, belt.id).await.unwrap();

    let result = wishlist.move_to_cart(user_id, belt.id, 2).await;
    assert_matches!(result, Err(ServiceError::InsufficientStock(_)));
    assert_eq!(wishlist.get_wishlist(user_id).await.unwrap().items.len(), 1);

    let cart = app.services().cart.get_cart(&CartOwner::User(user_id)).await;
    assert!(cart.map(|c| c.items.is_empty()).unwrap_or(true));
    assert_eq!(app.stock_of(belt.id).await, 1);
}
