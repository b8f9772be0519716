use super::product_catalog_service::slugify;
use crate::{
    entities::commerce::{category, product, Category, CategoryModel, Product, MAX_CATEGORY_DEPTH},
    errors::ServiceError,
};
use async_recursion::async_recursion;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Category with its children, sorted by `sort_order` then name.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: CategoryModel,
    #[schema(no_recursion)]
    pub children: Vec<CategoryNode>,
}

/// Hierarchical product categories. The tree is kept acyclic and at most
/// `MAX_CATEGORY_DEPTH + 1` levels deep.
#[derive(Clone)]
pub struct CategoryService {
    db: Arc<DatabaseConnection>,
}

impl CategoryService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_category(
        &self,
        input: CreateCategoryInput,
    ) -> Result<CategoryModel, ServiceError> {
        input.validate()?;

        let depth = match input.parent_id {
            Some(parent_id) => {
                let parent = self.get_category(parent_id).await?;
                let depth = parent.depth + 1;
                if depth > MAX_CATEGORY_DEPTH {
                    return Err(ServiceError::ValidationError(format!(
                        "Categories cannot be nested more than {} levels deep",
                        MAX_CATEGORY_DEPTH + 1
                    )));
                }
                depth
            }
            None => 0,
        };

        let slug = slugify(input.slug.as_deref().unwrap_or(&input.name));
        self.ensure_unique_slug(&slug, None).await?;

        let now = Utc::now();
        let category = category::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            slug: Set(slug),
            description: Set(input.description),
            parent_id: Set(input.parent_id),
            depth: Set(depth),
            sort_order: Set(input.sort_order.unwrap_or(0)),
            is_active: Set(input.is_active.unwrap_or(true)),
            seo_title: Set(input.seo_title),
            seo_description: Set(input.seo_description),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(category_id = %category.id, depth, "Created category");
        Ok(category)
    }

    pub async fn get_category(&self, id: Uuid) -> Result<CategoryModel, ServiceError> {
        Category::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Category", id))
    }

    #[instrument(skip(self, input))]
    pub async fn update_category(
        &self,
        id: Uuid,
        input: UpdateCategoryInput,
    ) -> Result<CategoryModel, ServiceError> {
        input.validate()?;
        let category = self.get_category(id).await?;
        let mut active: category::ActiveModel = category.into();

        if let Some(name) = input.name {
            active.name = Set(name);
        }
        if let Some(slug) = input.slug {
            let slug = slugify(&slug);
            self.ensure_unique_slug(&slug, Some(id)).await?;
            active.slug = Set(slug);
        }
        if let Some(description) = input.description {
            active.description = Set(Some(description));
        }
        if let Some(sort_order) = input.sort_order {
            active.sort_order = Set(sort_order);
        }
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }
        if let Some(seo_title) = input.seo_title {
            active.seo_title = Set(Some(seo_title));
        }
        if let Some(seo_description) = input.seo_description {
            active.seo_description = Set(Some(seo_description));
        }
        active.updated_at = Set(Utc::now());

        Ok(active.update(&*self.db).await?)
    }

    /// Deletes a leaf category that no product references.
    #[instrument(skip(self))]
    pub async fn delete_category(&self, id: Uuid) -> Result<(), ServiceError> {
        let category = self.get_category(id).await?;

        let children = Category::find()
            .filter(category::Column::ParentId.eq(id))
            .count(&*self.db)
            .await?;
        if children > 0 {
            return Err(ServiceError::Conflict(format!(
                "Category {} still has {} subcategories",
                id, children
            )));
        }

        let products = Product::find()
            .filter(product::Column::CategoryId.eq(id))
            .count(&*self.db)
            .await?;
        if products > 0 {
            return Err(ServiceError::Conflict(format!(
                "Category {} still has {} products",
                id, products
            )));
        }

        Category::delete_by_id(category.id).exec(&*self.db).await?;
        info!(category_id = %id, "Deleted category");
        Ok(())
    }

    /// Re-parents a category (or makes it a root) and re-depths its subtree.
    #[instrument(skip(self))]
    pub async fn move_category(
        &self,
        id: Uuid,
        new_parent_id: Option<Uuid>,
    ) -> Result<CategoryModel, ServiceError> {
        if new_parent_id == Some(id) {
            return Err(ServiceError::ValidationError(
                "A category cannot be its own parent".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let all = Category::find().all(&txn).await?;
        let by_id: HashMap<Uuid, &CategoryModel> = all.iter().map(|c| (c.id, c)).collect();
        let moving = by_id
            .get(&id)
            .copied()
            .ok_or_else(|| ServiceError::not_found("Category", id))?;

        let subtree = subtree_ids(&all, id);
        let new_depth = match new_parent_id {
            Some(parent_id) => {
                let parent = by_id
                    .get(&parent_id)
                    .copied()
                    .ok_or_else(|| ServiceError::not_found("Category", parent_id))?;
                if subtree.contains(&parent_id) {
                    return Err(ServiceError::ValidationError(format!(
                        "Moving category {} under its descendant {} would create a cycle",
                        id, parent_id
                    )));
                }
                parent.depth + 1
            }
            None => 0,
        };

        let height = subtree
            .iter()
            .filter_map(|cid| by_id.get(cid))
            .map(|c| c.depth - moving.depth)
            .max()
            .unwrap_or(0);
        if new_depth + height > MAX_CATEGORY_DEPTH {
            return Err(ServiceError::ValidationError(format!(
                "Move would nest categories more than {} levels deep",
                MAX_CATEGORY_DEPTH + 1
            )));
        }

        let shift = new_depth - moving.depth;
        let now = Utc::now();
        for cid in &subtree {
            let Some(node) = by_id.get(cid) else { continue };
            let mut active: category::ActiveModel = (*node).clone().into();
            active.depth = Set(node.depth + shift);
            if *cid == id {
                active.parent_id = Set(new_parent_id);
            }
            active.updated_at = Set(now);
            active.update(&txn).await?;
        }

        let moved = Category::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Category", id))?;

        txn.commit().await?;

        info!(category_id = %id, ?new_parent_id, new_depth, "Moved category");
        Ok(moved)
    }

    /// Whole category forest, roots first.
    pub async fn tree(&self, include_inactive: bool) -> Result<Vec<CategoryNode>, ServiceError> {
        let mut query = Category::find()
            .order_by_asc(category::Column::SortOrder)
            .order_by_asc(category::Column::Name);
        if !include_inactive {
            query = query.filter(category::Column::IsActive.eq(true));
        }
        Ok(build_tree(query.all(&*self.db).await?))
    }

    /// Path from the root down to `id`, inclusive.
    pub async fn breadcrumbs(&self, id: Uuid) -> Result<Vec<CategoryModel>, ServiceError> {
        let mut trail = vec![self.get_category(id).await?];
        let mut seen = HashSet::from([id]);

        while let Some(parent_id) = trail.last().and_then(|c| c.parent_id) {
            if !seen.insert(parent_id) || trail.len() > (MAX_CATEGORY_DEPTH + 1) as usize {
                return Err(ServiceError::InternalError(format!(
                    "Category {} has a corrupt ancestry",
                    id
                )));
            }
            trail.push(self.get_category(parent_id).await?);
        }

        trail.reverse();
        Ok(trail)
    }

    /// Every category below `id`, excluding `id` itself.
    pub async fn descendant_ids(&self, id: Uuid) -> Result<Vec<Uuid>, ServiceError> {
        self.get_category(id).await?;
        let mut found = Vec::new();
        collect_descendants(&self.db, id, 0, &mut found).await?;
        Ok(found)
    }

    async fn ensure_unique_slug(
        &self,
        slug: &str,
        exclude_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        if slug.is_empty() {
            return Err(ServiceError::ValidationError(
                "Category slug must contain at least one letter or digit".to_string(),
            ));
        }
        let mut query = Category::find().filter(category::Column::Slug.eq(slug));
        if let Some(id) = exclude_id {
            query = query.filter(category::Column::Id.ne(id));
        }
        if query.one(&*self.db).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Category slug {} already exists",
                slug
            )));
        }
        Ok(())
    }
}

#[async_recursion]
async fn collect_descendants(
    db: &DatabaseConnection,
    parent_id: Uuid,
    level: i32,
    found: &mut Vec<Uuid>,
) -> Result<(), ServiceError> {
    if level > MAX_CATEGORY_DEPTH {
        return Ok(());
    }
    let children = Category::find()
        .filter(category::Column::ParentId.eq(parent_id))
        .all(db)
        .await?;
    for child in children {
        found.push(child.id);
        collect_descendants(db, child.id, level + 1, found).await?;
    }
    Ok(())
}

/// `root` and every category beneath it.
pub fn subtree_ids(all: &[CategoryModel], root: Uuid) -> HashSet<Uuid> {
    let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for c in all {
        if let Some(parent_id) = c.parent_id {
            children.entry(parent_id).or_default().push(c.id);
        }
    }

    let mut subtree = HashSet::from([root]);
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        for child in children.get(&id).into_iter().flatten() {
            if subtree.insert(*child) {
                stack.push(*child);
            }
        }
    }
    subtree
}

/// Nests a flat list. Input order is preserved among siblings; categories
/// whose parent is missing from the list are dropped.
pub fn build_tree(categories: Vec<CategoryModel>) -> Vec<CategoryNode> {
    let mut children: HashMap<Option<Uuid>, Vec<CategoryModel>> = HashMap::new();
    for c in categories {
        children.entry(c.parent_id).or_default().push(c);
    }

    fn attach(
        parent: Option<Uuid>,
        children: &mut HashMap<Option<Uuid>, Vec<CategoryModel>>,
    ) -> Vec<CategoryNode> {
        children
            .remove(&parent)
            .unwrap_or_default()
            .into_iter()
            .map(|category| {
                let nested = attach(Some(category.id), children);
                CategoryNode {
                    category,
                    children: nested,
                }
            })
            .collect()
    }

    attach(None, &mut children)
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateCategoryInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<Uuid>,
    pub sort_order: Option<i32>,
    pub is_active: Option<bool>,
    #[validate(length(max = 70))]
    pub seo_title: Option<String>,
    #[validate(length(max = 320))]
    pub seo_description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct UpdateCategoryInput {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub sort_order: Option<i32>,
    pub is_active: Option<bool>,
    #[validate(length(max = 70))]
    pub seo_title: Option<String>,
    #[validate(length(max = 320))]
    pub seo_description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(name: &str, parent: Option<&CategoryModel>) -> CategoryModel {
        let now = Utc::now();
        CategoryModel {
            id: Uuid::new_v4(),
            name: name.into(),
            slug: slugify(name),
            description: None,
            parent_id: parent.map(|p| p.id),
            depth: parent.map_or(0, |p| p.depth + 1),
            sort_order: 0,
            is_active: true,
            seo_title: None,
            seo_description: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn tree_nests_children_under_parents() {
        let apparel = category("Apparel", None);
        let shoes = category("Shoes", Some(&apparel));
        let trail = category("Trail", Some(&shoes));
        let books = category("Books", None);

        let tree = build_tree(vec![apparel.clone(), shoes.clone(), trail.clone(), books.clone()]);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].category.id, apparel.id);
        assert_eq!(tree[0].children[0].category.id, shoes.id);
        assert_eq!(tree[0].children[0].children[0].category.id, trail.id);
        assert!(tree[1].children.is_empty());
    }

    #[test]
    fn subtree_contains_root_and_all_descendants() {
        let a = category("A", None);
        let b = category("B", Some(&a));
        let c = category("C", Some(&b));
        let d = category("D", None);
        let all = vec![a.clone(), b.clone(), c.clone(), d.clone()];

        let subtree = subtree_ids(&all, b.id);
        assert_eq!(subtree, HashSet::from([b.id, c.id]));
        assert!(!subtree_ids(&all, a.id).contains(&d.id));
    }
}
