use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use serde_json::json;
use storefront_api::{
    entities::{
        commerce::{CartItemModel, CouponModel, DiscountType, MAX_ITEM_QUANTITY},
        shipping_rate,
    },
    services::{
        commerce::{cart_service::CartTotals, product_catalog_service::slugify},
        coupons::{calculate_discount, DiscountLine},
        payments::{from_minor_units, to_minor_units},
        search::normalize_term,
        shipping::rate_cost,
    },
};
use uuid::Uuid;

fn cents() -> impl Strategy<Value = Decimal> {
    (0i64..1_000_000).prop_map(|minor| Decimal::new(minor, 2))
}

fn discount_type() -> impl Strategy<Value = DiscountType> {
    prop_oneof![
        Just(DiscountType::Percentage),
        Just(DiscountType::Fixed),
        Just(DiscountType::Bogo),
    ]
}

fn coupon(
    discount_type: DiscountType,
    value: Decimal,
    min_order_amount: Option<Decimal>,
    max_discount_amount: Option<Decimal>,
) -> CouponModel {
    let now = Utc::now();
    CouponModel {
        id: Uuid::new_v4(),
        code: "PROP".to_string(),
        description: None,
        discount_type,
        value,
        min_order_amount,
        max_discount_amount,
        usage_limit: None,
        usage_count: 0,
        per_user_limit: None,
        applicable_category_ids: json!([]),
        applicable_product_ids: json!([]),
        allowed_user_ids: json!([]),
        starts_at: None,
        ends_at: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

fn rate(base: Decimal, per_item: Decimal, threshold: Option<Decimal>) -> shipping_rate::Model {
    let now = Utc::now();
    shipping_rate::Model {
        id: Uuid::new_v4(),
        method_code: "standard".to_string(),
        name: "Standard".to_string(),
        base_cost: base,
        per_item_cost: per_item,
        free_shipping_threshold: threshold,
        estimated_days_min: 2,
        estimated_days_max: 5,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

fn cart_line(unit_price: Decimal, quantity: i32) -> CartItemModel {
    let now = Utc::now();
    CartItemModel {
        id: Uuid::new_v4(),
        cart_id: Uuid::nil(),
        product_id: Uuid::new_v4(),
        quantity,
        unit_price,
        subtotal: unit_price * Decimal::from(quantity),
        created_at: now,
        updated_at: now,
    }
}

proptest! {
    #[test]
    fn cart_totals_add_up_the_lines(
        lines in proptest::collection::vec((cents(), 1..=MAX_ITEM_QUANTITY), 0..8),
    ) {
        let items: Vec<CartItemModel> = lines
            .iter()
            .map(|(price, quantity)| cart_line(*price, *quantity))
            .collect();

        let totals = CartTotals::from_items(&items);

        let expected: Decimal = lines
            .iter()
            .map(|(price, quantity)| *price * Decimal::from(*quantity))
            .sum();
        prop_assert_eq!(totals.subtotal, expected);
        prop_assert_eq!(totals.item_count, lines.iter().map(|(_, q)| *q).sum::<i32>());
        prop_assert!(totals.subtotal >= Decimal::ZERO);
    }

    #[test]
    fn slugs_are_lowercase_hyphenated_and_idempotent(name in ".{0,60}") {
        let slug = slugify(&name);
        prop_assert!(slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        prop_assert!(!slug.starts_with('-') && !slug.ends_with('-'));
        prop_assert!(!slug.contains("--"));
        prop_assert_eq!(slugify(&slug), slug);
    }

    #[test]
    fn discounts_stay_within_the_subtotal_and_cap(
        kind in discount_type(),
        value in cents(),
        cap in proptest::option::of(cents()),
        lines in proptest::collection::vec((cents(), 1i32..10), 1..5),
    ) {
        let lines: Vec<DiscountLine> = lines
            .into_iter()
            .map(|(unit_price, quantity)| DiscountLine {
                product_id: Uuid::new_v4(),
                category_id: None,
                unit_price,
                quantity,
            })
            .collect();
        let subtotal: Decimal = lines.iter().map(DiscountLine::subtotal).sum();

        let discount = calculate_discount(&coupon(kind, value, None, cap), &lines);

        prop_assert!(discount >= Decimal::ZERO);
        prop_assert!(discount <= subtotal.round_dp(2));
        if let Some(cap) = cap {
            prop_assert!(discount <= cap);
        }
    }

    #[test]
    fn nothing_is_discounted_below_the_minimum_order(
        unit_price in cents(),
        quantity in 1i32..5,
        shortfall in 1i64..10_000,
    ) {
        let line = DiscountLine {
            product_id: Uuid::new_v4(),
            category_id: None,
            unit_price,
            quantity,
        };
        let minimum = line.subtotal() + Decimal::new(shortfall, 2);
        let coupon = coupon(DiscountType::Fixed, Decimal::from(5), Some(minimum), None);

        prop_assert_eq!(calculate_discount(&coupon, &[line]), Decimal::ZERO);
    }

    #[test]
    fn shipping_is_free_at_the_threshold_and_grows_with_items(
        base in cents(),
        per_item in cents(),
        subtotal in cents(),
        threshold in proptest::option::of(cents()),
        items in 0i32..20,
    ) {
        let rate = rate(base, per_item, threshold);
        let cost = rate_cost(&rate, subtotal, items);

        match threshold {
            Some(threshold) if subtotal >= threshold => prop_assert_eq!(cost, Decimal::ZERO),
            _ => {
                prop_assert!(cost >= base);
                prop_assert!(rate_cost(&rate, subtotal, items + 1) >= cost);
            }
        }
    }

    #[test]
    fn minor_units_round_trip_for_whole_cents(minor in -10_000_000i64..10_000_000) {
        let amount = from_minor_units(minor);
        prop_assert_eq!(to_minor_units(amount).ok(), Some(minor));
    }

    #[test]
    fn search_terms_normalize_once(raw in "[ a-zA-Z0-9\\t]{0,40}") {
        match normalize_term(&raw) {
            Some(term) => {
                prop_assert!(!term.is_empty());
                prop_assert!(!term.contains("  "));
                prop_assert_eq!(term.trim(), term.as_str());
                prop_assert_eq!(term.to_lowercase(), term.clone());
                prop_assert_eq!(normalize_term(&term), Some(term.clone()));
            }
            None => prop_assert!(raw.trim().is_empty()),
        }
    }
}
