use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::Deserialize;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::{address, product, product_review, recently_viewed, wishlist_item};
use crate::errors::ServiceError;

/// Most recent views kept per user; older rows are pruned on insert.
const RECENTLY_VIEWED_CAP: u64 = 20;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AddressInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 7, max = 20))]
    pub phone: String,
    #[validate(length(min = 1, max = 255))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    pub postal_code: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ReviewInput {
    #[validate(range(min = 1, max = 5))]
    pub rating: i32,
    pub comment: Option<String>,
}

#[derive(Clone)]
pub struct CustomerService {
    db: Arc<DbPool>,
}

impl CustomerService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    // ---- Addresses ----

    pub async fn list_addresses(&self, user_id: Uuid) -> Result<Vec<address::Model>, ServiceError> {
        let addresses = address::Entity::find()
            .filter(address::Column::UserId.eq(user_id))
            .order_by_desc(address::Column::IsDefault)
            .order_by_desc(address::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(addresses)
    }

    #[instrument(skip(self, input), fields(user_id = %user_id))]
    pub async fn create_address(
        &self,
        user_id: Uuid,
        input: AddressInput,
    ) -> Result<address::Model, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;
        if input.is_default {
            unset_default_addresses(&txn, user_id).await?;
        }
        let saved = address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            name: Set(input.name),
            phone: Set(input.phone),
            line1: Set(input.line1),
            line2: Set(input.line2),
            city: Set(input.city),
            postal_code: Set(input.postal_code),
            is_default: Set(input.is_default),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;
        Ok(saved)
    }

    #[instrument(skip(self, input), fields(user_id = %user_id))]
    pub async fn update_address(
        &self,
        user_id: Uuid,
        address_id: Uuid,
        input: AddressInput,
    ) -> Result<address::Model, ServiceError> {
        input.validate()?;
        let existing = self.find_owned_address(user_id, address_id).await?;

        let txn = self.db.begin().await?;
        if input.is_default && !existing.is_default {
            unset_default_addresses(&txn, user_id).await?;
        }
        let mut active: address::ActiveModel = existing.into();
        active.name = Set(input.name);
        active.phone = Set(input.phone);
        active.line1 = Set(input.line1);
        active.line2 = Set(input.line2);
        active.city = Set(input.city);
        active.postal_code = Set(input.postal_code);
        active.is_default = Set(input.is_default);
        let updated = active.update(&txn).await?;
        txn.commit().await?;
        Ok(updated)
    }

    pub async fn delete_address(&self, user_id: Uuid, address_id: Uuid) -> Result<(), ServiceError> {
        self.find_owned_address(user_id, address_id).await?;
        address::Entity::delete_by_id(address_id)
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    /// Flips the default flag to this address, unsetting siblings in the
    /// same transaction so at most one default exists per user.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn set_default_address(
        &self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<address::Model, ServiceError> {
        let existing = self.find_owned_address(user_id, address_id).await?;

        let txn = self.db.begin().await?;
        unset_default_addresses(&txn, user_id).await?;
        let mut active: address::ActiveModel = existing.into();
        active.is_default = Set(true);
        let updated = active.update(&txn).await?;
        txn.commit().await?;
        Ok(updated)
    }

    async fn find_owned_address(
        &self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<address::Model, ServiceError> {
        address::Entity::find_by_id(address_id)
            .filter(address::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Address {address_id} not found")))
    }

    // ---- Wishlist ----

    pub async fn list_wishlist(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<(wishlist_item::Model, Option<product::Model>)>, ServiceError> {
        let items = wishlist_item::Entity::find()
            .filter(wishlist_item::Column::UserId.eq(user_id))
            .order_by_desc(wishlist_item::Column::CreatedAt)
            .find_also_related(product::Entity)
            .all(&*self.db)
            .await?;
        Ok(items)
    }

    /// Adding an item already on the wishlist returns the existing row.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn add_to_wishlist(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<wishlist_item::Model, ServiceError> {
        self.check_product(product_id).await?;

        let result = wishlist_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(product_id),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await;

        match result {
            Ok(saved) => Ok(saved),
            Err(e) if matches!(e.sql_err(), Some(sea_orm::SqlErr::UniqueConstraintViolation(_))) => {
                wishlist_item::Entity::find()
                    .filter(wishlist_item::Column::UserId.eq(user_id))
                    .filter(wishlist_item::Column::ProductId.eq(product_id))
                    .one(&*self.db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InternalError("wishlist row vanished".to_string())
                    })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn remove_from_wishlist(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<(), ServiceError> {
        let result = wishlist_item::Entity::delete_many()
            .filter(wishlist_item::Column::UserId.eq(user_id))
            .filter(wishlist_item::Column::ProductId.eq(product_id))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(
                "Product is not on the wishlist".to_string(),
            ));
        }
        Ok(())
    }

    // ---- Reviews ----

    pub async fn list_reviews(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<product_review::Model>, ServiceError> {
        let reviews = product_review::Entity::find()
            .filter(product_review::Column::ProductId.eq(product_id))
            .order_by_desc(product_review::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(reviews)
    }

    #[instrument(skip(self, input), fields(user_id = %user_id))]
    pub async fn add_review(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        input: ReviewInput,
    ) -> Result<product_review::Model, ServiceError> {
        input.validate()?;
        self.check_product(product_id).await?;

        product_review::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(product_id),
            rating: Set(input.rating),
            comment: Set(input.comment),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| match e.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(_)) => {
                ServiceError::Conflict("You have already reviewed this product".to_string())
            }
            _ => e.into(),
        })
    }

    // ---- Recently viewed ----

    pub async fn list_recently_viewed(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<(recently_viewed::Model, Option<product::Model>)>, ServiceError> {
        let rows = recently_viewed::Entity::find()
            .filter(recently_viewed::Column::UserId.eq(user_id))
            .order_by_desc(recently_viewed::Column::ViewedAt)
            .limit(RECENTLY_VIEWED_CAP)
            .find_also_related(product::Entity)
            .all(&*self.db)
            .await?;
        Ok(rows)
    }

    /// Records a product view: re-views bump the timestamp, and anything
    /// past the cap is pruned oldest-first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn record_view(&self, user_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        self.check_product(product_id).await?;
        let now = Utc::now();

        let existing = recently_viewed::Entity::find()
            .filter(recently_viewed::Column::UserId.eq(user_id))
            .filter(recently_viewed::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?;

        match existing {
            Some(row) => {
                let mut active: recently_viewed::ActiveModel = row.into();
                active.viewed_at = Set(now);
                active.update(&*self.db).await?;
            }
            None => {
                recently_viewed::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    product_id: Set(product_id),
                    viewed_at: Set(now),
                }
                .insert(&*self.db)
                .await?;

                let total = recently_viewed::Entity::find()
                    .filter(recently_viewed::Column::UserId.eq(user_id))
                    .count(&*self.db)
                    .await?;
                if total > RECENTLY_VIEWED_CAP {
                    let stale = recently_viewed::Entity::find()
                        .filter(recently_viewed::Column::UserId.eq(user_id))
                        .order_by_asc(recently_viewed::Column::ViewedAt)
                        .limit(total - RECENTLY_VIEWED_CAP)
                        .all(&*self.db)
                        .await?;
                    for row in stale {
                        recently_viewed::Entity::delete_by_id(row.id)
                            .exec(&*self.db)
                            .await?;
                    }
                }
            }
        }

        Ok(())
    }

    async fn check_product(&self, product_id: Uuid) -> Result<(), ServiceError> {
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {product_id} not found")))?;
        Ok(())
    }
}

async fn unset_default_addresses<C: sea_orm::ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<(), ServiceError> {
    use sea_orm::sea_query::Expr;
    address::Entity::update_many()
        .col_expr(address::Column::IsDefault, Expr::value(false))
        .filter(address::Column::UserId.eq(user_id))
        .filter(address::Column::IsDefault.eq(true))
        .exec(conn)
        .await?;
    Ok(())
}
