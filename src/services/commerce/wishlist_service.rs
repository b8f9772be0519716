use crate::{
    auth::CartOwner,
    entities::commerce::{
        wishlist, wishlist_item, Wishlist, WishlistItem, WishlistItemModel, WishlistModel,
    },
    errors::ServiceError,
    services::commerce::{
        cart_service::{purchasable_product, AddToCartInput, CartService, CartWithItems},
        product_catalog_service::ProductCatalogService,
    },
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

const DEFAULT_WISHLIST_NAME: &str = "My wishlist";

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WishlistWithItems {
    pub wishlist: WishlistModel,
    pub items: Vec<WishlistItemModel>,
}

/// One default wishlist per signed-in user.
#[derive(Clone)]
pub struct WishlistService {
    db: Arc<DatabaseConnection>,
    carts: Arc<CartService>,
    catalog: Arc<ProductCatalogService>,
}

impl WishlistService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        carts: Arc<CartService>,
        catalog: Arc<ProductCatalogService>,
    ) -> Self {
        Self { db, carts, catalog }
    }

    pub async fn get_wishlist(&self, user_id: Uuid) -> Result<WishlistWithItems, ServiceError> {
        let wishlist = get_or_create(&*self.db, user_id).await?;
        let items = items_of(&*self.db, wishlist.id).await?;
        Ok(WishlistWithItems { wishlist, items })
    }

    /// Adding a product already on the list is a no-op.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<WishlistWithItems, ServiceError> {
        self.catalog.get_product(product_id).await?;
        let wishlist = get_or_create(&*self.db, user_id).await?;

        let existing = WishlistItem::find()
            .filter(wishlist_item::Column::WishlistId.eq(wishlist.id))
            .filter(wishlist_item::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?;
        if existing.is_none() {
            wishlist_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                wishlist_id: Set(wishlist.id),
                product_id: Set(product_id),
                added_at: Set(Utc::now()),
            }
            .insert(&*self.db)
            .await?;
            touch(&*self.db, wishlist.clone()).await?;
            info!(%user_id, %product_id, "Added product to wishlist");
        }

        self.get_wishlist(user_id).await
    }

    pub async fn remove_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<WishlistWithItems, ServiceError> {
        let wishlist = get_or_create(&*self.db, user_id).await?;
        let result = WishlistItem::delete_many()
            .filter(wishlist_item::Column::WishlistId.eq(wishlist.id))
            .filter(wishlist_item::Column::ProductId.eq(product_id))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Product {} is not on the wishlist",
                product_id
            )));
        }
        touch(&*self.db, wishlist).await?;
        self.get_wishlist(user_id).await
    }

    /// Adds the product to the user's cart, then takes it off the wishlist.
    /// The wishlist is left untouched when the cart rejects the line.
    #[instrument(skip(self))]
    pub async fn move_to_cart(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        let wishlist = get_or_create(&*self.db, user_id).await?;
        let on_list = WishlistItem::find()
            .filter(wishlist_item::Column::WishlistId.eq(wishlist.id))
            .filter(wishlist_item::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?
            .is_some();
        if !on_list {
            return Err(ServiceError::NotFound(format!(
                "Product {} is not on the wishlist",
                product_id
            )));
        }
        purchasable_product(&*self.db, product_id).await?;

        let cart = self
            .carts
            .add_item(
                &CartOwner::User(user_id),
                AddToCartInput {
                    product_id,
                    quantity,
                },
            )
            .await?;
        self.remove_item(user_id, product_id).await?;

        info!(%user_id, %product_id, quantity, "Moved wishlist item to cart");
        Ok(cart)
    }

    pub async fn clear(&self, user_id: Uuid) -> Result<WishlistWithItems, ServiceError> {
        let wishlist = get_or_create(&*self.db, user_id).await?;
        WishlistItem::delete_many()
            .filter(wishlist_item::Column::WishlistId.eq(wishlist.id))
            .exec(&*self.db)
            .await?;
        let wishlist = touch(&*self.db, wishlist).await?;
        Ok(WishlistWithItems {
            wishlist,
            items: Vec::new(),
        })
    }
}

async fn get_or_create(conn: &impl ConnectionTrait, user_id: Uuid) -> Result<WishlistModel, ServiceError> {
    if let Some(found) = Wishlist::find()
        .filter(wishlist::Column::UserId.eq(user_id))
        .one(conn)
        .await?
    {
        return Ok(found);
    }

    let now = Utc::now();
    Ok(wishlist::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        name: Set(DEFAULT_WISHLIST_NAME.to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?)
}

async fn items_of(conn: &impl ConnectionTrait, wishlist_id: Uuid) -> Result<Vec<WishlistItemModel>, ServiceError> {
    Ok(WishlistItem::find()
        .filter(wishlist_item::Column::WishlistId.eq(wishlist_id))
        .order_by_desc(wishlist_item::Column::AddedAt)
        .all(conn)
        .await?)
}

async fn touch(conn: &impl ConnectionTrait, wishlist: WishlistModel) -> Result<WishlistModel, ServiceError> {
    let mut active: wishlist::ActiveModel = wishlist.into();
    active.updated_at = Set(Utc::now());
    Ok(active.update(conn).await?)
}
