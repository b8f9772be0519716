/// Storefront handlers: carts, catalog, checkout and wishlist
pub mod carts;
pub mod categories;
pub mod checkout;
pub mod products;
pub mod wishlist;

// Re-export route builders
pub use carts::carts_routes;
pub use categories::categories_routes;
pub use checkout::checkout_routes;
pub use products::products_routes;
pub use wishlist::wishlist_routes;
