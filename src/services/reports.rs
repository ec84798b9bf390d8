use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{order, product, product_size};
use crate::errors::ServiceError;
use crate::services::orders::OrderStatus;

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RevenueQuery {
    /// Inclusive lower bound on order creation time.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on order creation time.
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RevenueReport {
    /// Sum of order totals, cancelled orders excluded.
    pub revenue: Decimal,
    pub order_count: u64,
    pub by_status: Vec<StatusCount>,
}

#[derive(Debug, Serialize, FromQueryResult, ToSchema)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, FromQueryResult)]
struct RevenueRow {
    revenue: Option<Decimal>,
    order_count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StockReport {
    pub threshold: i32,
    pub total_products: u64,
    pub out_of_stock_sizes: u64,
    pub low_stock: Vec<LowStockRow>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LowStockRow {
    pub product_id: Uuid,
    pub product_name: String,
    pub size: String,
    pub stock: i32,
}

#[derive(Clone)]
pub struct ReportsService {
    db: Arc<DbPool>,
    low_stock_threshold: i32,
}

impl ReportsService {
    pub fn new(db: Arc<DbPool>, low_stock_threshold: i32) -> Self {
        Self {
            db,
            low_stock_threshold,
        }
    }

    #[instrument(skip(self))]
    pub async fn revenue(&self, query: RevenueQuery) -> Result<RevenueReport, ServiceError> {
        let mut base = order::Entity::find();
        if let Some(from) = query.from {
            base = base.filter(order::Column::CreatedAt.gte(from));
        }
        if let Some(to) = query.to {
            base = base.filter(order::Column::CreatedAt.lte(to));
        }

        let row = base
            .clone()
            .filter(order::Column::Status.ne(OrderStatus::Cancelled.to_string()))
            .select_only()
            .column_as(order::Column::Total.sum(), "revenue")
            .column_as(order::Column::Id.count(), "order_count")
            .into_model::<RevenueRow>()
            .one(&*self.db)
            .await?;

        let (revenue, order_count) = match row {
            Some(r) => (r.revenue.unwrap_or_default(), r.order_count.max(0) as u64),
            None => (Decimal::ZERO, 0),
        };

        let by_status = base
            .select_only()
            .column(order::Column::Status)
            .column_as(order::Column::Id.count(), "count")
            .group_by(order::Column::Status)
            .into_model::<StatusCount>()
            .all(&*self.db)
            .await?;

        Ok(RevenueReport {
            revenue,
            order_count,
            by_status,
        })
    }

    #[instrument(skip(self))]
    pub async fn stock(&self) -> Result<StockReport, ServiceError> {
        let total_products = product::Entity::find().count(&*self.db).await?;

        let out_of_stock_sizes = product_size::Entity::find()
            .filter(product_size::Column::Stock.eq(0))
            .count(&*self.db)
            .await?;

        let rows = product_size::Entity::find()
            .filter(product_size::Column::Stock.lte(self.low_stock_threshold))
            .order_by_asc(product_size::Column::Stock)
            .find_also_related(product::Entity)
            .all(&*self.db)
            .await?;

        let low_stock = rows
            .into_iter()
            .map(|(size, product)| LowStockRow {
                product_id: size.product_id,
                product_name: product.map(|p| p.name).unwrap_or_default(),
                size: size.size,
                stock: size.stock,
            })
            .collect();

        Ok(StockReport {
            threshold: self.low_stock_threshold,
            total_products,
            out_of_stock_sizes,
            low_stock,
        })
    }
}
