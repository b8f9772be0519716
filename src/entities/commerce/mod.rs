//! Storefront-facing entities: catalog, carts, checkout, coupons and wishlists.
pub mod cart;
pub mod cart_item;
pub mod category;
pub mod checkout_session;
pub mod coupon;
pub mod coupon_usage;
pub mod product;
pub mod wishlist;
pub mod wishlist_item;

pub use cart::{CartStatus, Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel, MAX_ITEM_QUANTITY};
pub use category::{Entity as Category, Model as CategoryModel, MAX_CATEGORY_DEPTH};
pub use checkout_session::{CheckoutStatus, Entity as CheckoutSession, Model as CheckoutSessionModel};
pub use coupon::{DiscountType, Entity as Coupon, Model as CouponModel};
pub use coupon_usage::{Entity as CouponUsage, Model as CouponUsageModel};
pub use product::{Entity as Product, Model as ProductModel, ProductStatus};
pub use wishlist::{Entity as Wishlist, Model as WishlistModel};
pub use wishlist_item::{Entity as WishlistItem, Model as WishlistItemModel};
