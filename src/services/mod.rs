// Inventory holds
pub mod stock_reservation_service;

// Storefront: catalog, carts, checkout, wishlist
pub mod commerce;

// Pricing
pub mod coupons;

// Orders and money
pub mod orders;
pub mod payments;

// Fulfilment
pub mod shipping;

// Discovery
pub mod search;

// Customer email
pub mod notifications;

// Background housekeeping
pub mod maintenance;
