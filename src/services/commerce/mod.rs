/// Commerce services module - storefront-facing business logic
pub mod cart_merge;
pub mod cart_service;
pub mod category_service;
pub mod checkout_service;
pub mod product_catalog_service;
pub mod wishlist_service;

// Re-export services for convenience
pub use cart_merge::{MergePreview, MergeResult, MergeStrategy};
pub use cart_service::{AddToCartInput, CartService, CartWithItems};
pub use category_service::CategoryService;
pub use checkout_service::CheckoutService;
pub use product_catalog_service::ProductCatalogService;
pub use wishlist_service::WishlistService;
