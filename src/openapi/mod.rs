use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "0.1.0",
        description = r#"
# Storefront API

Backend for an online store: carts, catalog, checkout, orders, payments,
coupons, shipping, returns, search, wishlists and transactional email.

## Identity

Requests are authenticated upstream. The gateway forwards:
- `X-User-Id`: signed-in customer (UUID)
- `X-Session-Id`: guest cart session, used when no user is present
- `X-User-Roles`: comma-separated roles; `/admin/*` routes require `admin`

## Responses

Successful responses are wrapped as
`{ "success": true, "data": ..., "meta": { "request_id", "timestamp" } }`.
Errors use the `ErrorResponse` shape with the matching HTTP status.

## Pagination

List endpoints accept `page` (default 1) and `per_page` (default 20, max 100).
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Cart", description = "Shopping cart and guest cart merging"),
        (name = "Catalog", description = "Products and categories"),
        (name = "Search", description = "Product search, suggestions and facets"),
        (name = "Checkout", description = "Checkout sessions and cash on delivery"),
        (name = "Orders", description = "Customer and back-office order endpoints"),
        (name = "Payments", description = "Refunds and payment provider webhooks"),
        (name = "Coupons", description = "Discount code administration"),
        (name = "Shipping", description = "Rates, quotes, shipments and tracking"),
        (name = "Returns", description = "Return requests and refunds"),
        (name = "Wishlist", description = "Saved products"),
        (name = "Notifications", description = "Email templates and delivery log")
    ),
    paths(
        crate::handlers::commerce::carts::get_cart,
        crate::handlers::commerce::carts::add_to_cart,
        crate::handlers::commerce::carts::preview_merge,
        crate::handlers::commerce::carts::merge_carts,
        crate::handlers::commerce::products::list_products,
        crate::handlers::commerce::products::get_product_seo,
        crate::handlers::commerce::categories::category_tree,
        crate::handlers::commerce::categories::move_category,
        crate::handlers::commerce::checkout::create_session,
        crate::handlers::commerce::checkout::complete_session,
        crate::handlers::commerce::checkout::place_cod_order,
        crate::handlers::commerce::wishlist::get_wishlist,
        crate::handlers::search::search_products,
        crate::handlers::search::suggest,
        crate::handlers::orders::list_my_orders,
        crate::handlers::orders::get_my_order,
        crate::handlers::orders::update_order_status,
        crate::handlers::payments::refund_order,
        crate::handlers::payments::stripe_webhook,
        crate::handlers::coupons::list_coupons,
        crate::handlers::coupons::create_coupon,
        crate::handlers::shipping::quote,
        crate::handlers::shipping::track,
        crate::handlers::shipping::request_return,
        crate::handlers::shipping::create_shipment,
        crate::handlers::notifications::upsert_template,
        crate::handlers::notifications::preview_template,
    ),
    components(
        schemas(
            crate::errors::ErrorResponse,
            crate::handlers::common::PaginationMeta,
            crate::auth::CartOwner,
            crate::services::commerce::checkout_service::Address,
            crate::services::commerce::checkout_service::CheckoutLine,
            crate::services::maintenance::MaintenanceReport,
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_lists_storefront_routes() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string(&openapi).unwrap();
        assert!(json.contains("Storefront API"));
        assert!(json.contains("/api/v1/cart"));
        assert!(json.contains("/api/v1/checkout/sessions/{id}/complete"));
        assert!(json.contains("/api/v1/webhooks/stripe"));
        assert!(json.contains("ErrorResponse"));
    }
}
