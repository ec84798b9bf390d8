use std::sync::Arc;

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::product_size::{self, Entity as ProductSize};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Atomically reserves `quantity` units of a size. The decrement is guarded
/// by `stock >= quantity` in the same statement, so two concurrent checkouts
/// can never drive the counter negative.
pub async fn reserve_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    size: &str,
    quantity: i32,
) -> Result<(), ServiceError> {
    let result = ProductSize::update_many()
        .col_expr(
            product_size::Column::Stock,
            Expr::col(product_size::Column::Stock).sub(quantity),
        )
        .filter(product_size::Column::ProductId.eq(product_id))
        .filter(product_size::Column::Size.eq(size))
        .filter(product_size::Column::Stock.gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        // Distinguish a missing size row from one that exists but is short.
        let exists = ProductSize::find_by_id((product_id, size.to_string()))
            .one(conn)
            .await?;
        return match exists {
            None => Err(ServiceError::NotFound(format!(
                "Product {product_id} has no size {size}"
            ))),
            Some(row) => Err(ServiceError::InsufficientStock(format!(
                "Size {size} has {} left, {quantity} requested",
                row.stock
            ))),
        };
    }

    Ok(())
}

/// Atomically returns `quantity` units to a size's stock counter.
pub async fn restore_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    size: &str,
    quantity: i32,
) -> Result<(), ServiceError> {
    let result = ProductSize::update_many()
        .col_expr(
            product_size::Column::Stock,
            Expr::col(product_size::Column::Stock).add(quantity),
        )
        .filter(product_size::Column::ProductId.eq(product_id))
        .filter(product_size::Column::Size.eq(size))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::NotFound(format!(
            "Product {product_id} has no size {size}"
        )));
    }

    Ok(())
}

/// Returns stock to every line item of a cancelled order. Per-item failures
/// are logged and skipped; cancellation must not be blocked by a size row
/// that was deleted after the order was placed.
pub async fn restore_order_stock<C: ConnectionTrait>(
    conn: &C,
    items: &[crate::entities::order_item::Model],
) {
    for item in items {
        if let Err(e) = restore_stock(conn, item.product_id, &item.size, item.quantity).await {
            warn!(
                order_item_id = %item.id,
                product_id = %item.product_id,
                size = %item.size,
                error = %e,
                "Failed to restore stock for cancelled order item"
            );
        }
    }
}

/// Administrative stock operations.
#[derive(Clone)]
pub struct StockService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl StockService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    pub async fn get_sizes(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<product_size::Model>, ServiceError> {
        let sizes = ProductSize::find()
            .filter(product_size::Column::ProductId.eq(product_id))
            .all(&*self.db)
            .await?;
        Ok(sizes)
    }

    /// Adjusts a size's stock by a signed delta. Negative adjustments are
    /// guarded the same way checkout reservations are.
    #[instrument(skip(self))]
    pub async fn adjust_stock(
        &self,
        product_id: Uuid,
        size: &str,
        delta: i32,
    ) -> Result<(), ServiceError> {
        if delta >= 0 {
            restore_stock(&*self.db, product_id, size, delta).await?;
        } else {
            reserve_stock(&*self.db, product_id, size, -delta).await?;
        }

        if let Err(e) = self
            .event_sender
            .send(Event::StockAdjusted {
                product_id,
                size: size.to_string(),
                delta,
            })
            .await
        {
            warn!(error = %e, "Failed to emit stock adjustment event");
        }

        Ok(())
    }
}
