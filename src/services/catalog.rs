use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::{
    category, product, product_detail, product_image, product_size,
};
use crate::errors::ServiceError;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CategoryInput {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 100))]
    pub slug: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CategoryNode {
    #[serde(flatten)]
    pub category: category::Model,
    pub children: Vec<CategoryNode>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ProductInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 255))]
    pub slug: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub category_id: Option<Uuid>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Image URLs in display order; replaces the existing set on update.
    #[serde(default)]
    pub images: Vec<String>,
    /// Label/value attribute rows; replaces the existing set on update.
    #[serde(default)]
    pub details: Vec<DetailInput>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct DetailInput {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SizeInput {
    #[validate(length(min = 1, max = 32))]
    pub size: String,
    #[validate(range(min = 0))]
    pub stock: i32,
}

#[derive(Debug, Serialize)]
pub struct ProductWithRelations {
    #[serde(flatten)]
    pub product: product::Model,
    pub images: Vec<product_image::Model>,
    pub details: Vec<product_detail::Model>,
    pub sizes: Vec<product_size::Model>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductFilter {
    pub category_id: Option<Uuid>,
    pub search: Option<String>,
    /// Admin listings include inactive products.
    pub include_inactive: bool,
}

fn conflict_on_unique(e: sea_orm::DbErr, what: &str) -> ServiceError {
    match e.sql_err() {
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_)) => {
            ServiceError::Conflict(format!("{what} already exists"))
        }
        _ => e.into(),
    }
}

#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DbPool>,
}

impl CatalogService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    // ---- Categories ----

    /// Full category tree, roots first, children nested.
    pub async fn category_tree(&self) -> Result<Vec<CategoryNode>, ServiceError> {
        let all = category::Entity::find()
            .order_by_asc(category::Column::Name)
            .all(&*self.db)
            .await?;
        Ok(build_tree(all, None))
    }

    #[instrument(skip(self, input))]
    pub async fn create_category(
        &self,
        input: CategoryInput,
    ) -> Result<category::Model, ServiceError> {
        input.validate()?;
        if let Some(parent_id) = input.parent_id {
            category::Entity::find_by_id(parent_id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Parent category {parent_id} not found"))
                })?;
        }

        category::ActiveModel {
            id: Set(Uuid::new_v4()),
            parent_id: Set(input.parent_id),
            name: Set(input.name),
            slug: Set(input.slug),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| conflict_on_unique(e, "Category slug"))
    }

    #[instrument(skip(self, input))]
    pub async fn update_category(
        &self,
        id: Uuid,
        input: CategoryInput,
    ) -> Result<category::Model, ServiceError> {
        input.validate()?;
        let existing = category::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Category {id} not found")))?;

        if input.parent_id == Some(id) {
            return Err(ServiceError::ValidationError(
                "A category cannot be its own parent".to_string(),
            ));
        }

        let mut active: category::ActiveModel = existing.into();
        active.name = Set(input.name);
        active.slug = Set(input.slug);
        active.parent_id = Set(input.parent_id);
        active
            .update(&*self.db)
            .await
            .map_err(|e| conflict_on_unique(e, "Category slug"))
    }

    /// Deletion is refused while the category still has children or
    /// products; the caller must re-home them first.
    #[instrument(skip(self))]
    pub async fn delete_category(&self, id: Uuid) -> Result<(), ServiceError> {
        category::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Category {id} not found")))?;

        let child_count = category::Entity::find()
            .filter(category::Column::ParentId.eq(id))
            .count(&*self.db)
            .await?;
        if child_count > 0 {
            return Err(ServiceError::Conflict(format!(
                "Category has {child_count} child categories"
            )));
        }

        let product_count = product::Entity::find()
            .filter(product::Column::CategoryId.eq(id))
            .count(&*self.db)
            .await?;
        if product_count > 0 {
            return Err(ServiceError::Conflict(format!(
                "Category has {product_count} products"
            )));
        }

        category::Entity::delete_by_id(id).exec(&*self.db).await?;
        Ok(())
    }

    // ---- Products ----

    pub async fn list_products(
        &self,
        filter: ProductFilter,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<product::Model>, u64), ServiceError> {
        let mut query = product::Entity::find().order_by_asc(product::Column::Name);
        if !filter.include_inactive {
            query = query.filter(product::Column::IsActive.eq(true));
        }
        if let Some(category_id) = filter.category_id {
            query = query.filter(product::Column::CategoryId.eq(category_id));
        }
        if let Some(search) = filter.search.as_deref() {
            query = query.filter(product::Column::Name.contains(search));
        }

        let paginator = query.paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((products, total))
    }

    pub async fn get_product(&self, id: Uuid) -> Result<ProductWithRelations, ServiceError> {
        let product = product::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {id} not found")))?;

        let images = product_image::Entity::find()
            .filter(product_image::Column::ProductId.eq(id))
            .order_by_asc(product_image::Column::Position)
            .all(&*self.db)
            .await?;
        let details = product_detail::Entity::find()
            .filter(product_detail::Column::ProductId.eq(id))
            .all(&*self.db)
            .await?;
        let sizes = product_size::Entity::find()
            .filter(product_size::Column::ProductId.eq(id))
            .order_by_asc(product_size::Column::Size)
            .all(&*self.db)
            .await?;

        Ok(ProductWithRelations {
            product,
            images,
            details,
            sizes,
        })
    }

    #[instrument(skip(self, input))]
    pub async fn create_product(
        &self,
        input: ProductInput,
    ) -> Result<ProductWithRelations, ServiceError> {
        input.validate()?;
        self.check_category(input.category_id).await?;

        let txn = self.db.begin().await?;
        let id = Uuid::new_v4();

        let saved = product::ActiveModel {
            id: Set(id),
            category_id: Set(input.category_id),
            name: Set(input.name.clone()),
            slug: Set(input.slug.clone()),
            description: Set(input.description.clone()),
            price: Set(input.price),
            is_active: Set(input.is_active),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await
        .map_err(|e| conflict_on_unique(e, "Product slug"))?;

        let (images, details) =
            replace_product_relations(&txn, id, &input.images, &input.details).await?;
        txn.commit().await?;

        Ok(ProductWithRelations {
            product: saved,
            images,
            details,
            sizes: Vec::new(),
        })
    }

    #[instrument(skip(self, input))]
    pub async fn update_product(
        &self,
        id: Uuid,
        input: ProductInput,
    ) -> Result<ProductWithRelations, ServiceError> {
        input.validate()?;
        let existing = product::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {id} not found")))?;
        self.check_category(input.category_id).await?;

        let txn = self.db.begin().await?;

        let mut active: product::ActiveModel = existing.into();
        active.category_id = Set(input.category_id);
        active.name = Set(input.name.clone());
        active.slug = Set(input.slug.clone());
        active.description = Set(input.description.clone());
        active.price = Set(input.price);
        active.is_active = Set(input.is_active);
        let updated = active
            .update(&txn)
            .await
            .map_err(|e| conflict_on_unique(e, "Product slug"))?;

        let (images, details) =
            replace_product_relations(&txn, id, &input.images, &input.details).await?;
        txn.commit().await?;

        let sizes = product_size::Entity::find()
            .filter(product_size::Column::ProductId.eq(id))
            .all(&*self.db)
            .await?;

        Ok(ProductWithRelations {
            product: updated,
            images,
            details,
            sizes,
        })
    }

    /// Order items snapshot name and price, so deleting a product never
    /// orphans an order. Related rows go with it.
    #[instrument(skip(self))]
    pub async fn delete_product(&self, id: Uuid) -> Result<(), ServiceError> {
        product::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {id} not found")))?;

        let txn = self.db.begin().await?;
        product_image::Entity::delete_many()
            .filter(product_image::Column::ProductId.eq(id))
            .exec(&txn)
            .await?;
        product_detail::Entity::delete_many()
            .filter(product_detail::Column::ProductId.eq(id))
            .exec(&txn)
            .await?;
        product_size::Entity::delete_many()
            .filter(product_size::Column::ProductId.eq(id))
            .exec(&txn)
            .await?;
        product::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    /// Replaces a product's size/stock set wholesale.
    #[instrument(skip(self, sizes))]
    pub async fn replace_sizes(
        &self,
        product_id: Uuid,
        sizes: Vec<SizeInput>,
    ) -> Result<Vec<product_size::Model>, ServiceError> {
        for s in &sizes {
            s.validate()?;
        }
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {product_id} not found")))?;

        let txn = self.db.begin().await?;
        product_size::Entity::delete_many()
            .filter(product_size::Column::ProductId.eq(product_id))
            .exec(&txn)
            .await?;

        let mut saved = Vec::with_capacity(sizes.len());
        for s in sizes {
            let row = product_size::ActiveModel {
                product_id: Set(product_id),
                size: Set(s.size),
                stock: Set(s.stock),
            }
            .insert(&txn)
            .await?;
            saved.push(row);
        }
        txn.commit().await?;
        Ok(saved)
    }

    async fn check_category(&self, category_id: Option<Uuid>) -> Result<(), ServiceError> {
        if let Some(id) = category_id {
            category::Entity::find_by_id(id)
                .one(&*self.db)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Category {id} not found")))?;
        }
        Ok(())
    }
}

async fn replace_product_relations<C: sea_orm::ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    images: &[String],
    details: &[DetailInput],
) -> Result<(Vec<product_image::Model>, Vec<product_detail::Model>), ServiceError> {
    product_image::Entity::delete_many()
        .filter(product_image::Column::ProductId.eq(product_id))
        .exec(conn)
        .await?;
    product_detail::Entity::delete_many()
        .filter(product_detail::Column::ProductId.eq(product_id))
        .exec(conn)
        .await?;

    let mut saved_images = Vec::with_capacity(images.len());
    for (position, url) in images.iter().enumerate() {
        let row = product_image::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            url: Set(url.clone()),
            position: Set(position as i32),
        }
        .insert(conn)
        .await?;
        saved_images.push(row);
    }

    let mut saved_details = Vec::with_capacity(details.len());
    for d in details {
        let row = product_detail::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product_id),
            label: Set(d.label.clone()),
            value: Set(d.value.clone()),
        }
        .insert(conn)
        .await?;
        saved_details.push(row);
    }

    Ok((saved_images, saved_details))
}

fn build_tree(pool: Vec<category::Model>, parent: Option<Uuid>) -> Vec<CategoryNode> {
    let (mine, rest): (Vec<_>, Vec<_>) = pool.into_iter().partition(|c| c.parent_id == parent);
    mine.into_iter()
        .map(|category| {
            let children = build_tree(rest.clone(), Some(category.id));
            CategoryNode { category, children }
        })
        .collect()
}
