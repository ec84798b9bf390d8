use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{authorize, Action, AuthUser};
use crate::errors::ServiceError;
use crate::services::orders::OrderStatus;
use crate::services::reports::{RevenueQuery, RevenueReport, StockReport};
use crate::{ApiResponse, ApiResult, AppState, ListQuery, PaginatedResponse};

#[derive(Debug, Deserialize)]
pub struct AdminOrderFilter {
    pub status: Option<OrderStatus>,
    pub customer_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdjustStockRequest {
    pub size: String,
    /// Signed stock delta; negative values are guarded against underflow.
    pub delta: i32,
}

/// List orders across all customers.
#[utoipa::path(
    get,
    path = "/api/admin/orders",
    responses((status = 200, description = "Orders"), (status = 403, description = "Admin only")),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(filter): Query<AdminOrderFilter>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ManageOrders)?;
    let (items, total) = state
        .services
        .orders
        .list_orders(filter.status, filter.customer_id, query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, total, &query,
    ))))
}

/// Transition an order's status. Lifecycle rules are enforced: CANCELLED
/// and DELIVERED orders are immutable, and cancelling is only legal from
/// PENDING or PROCESSING (restoring stock and voiding open payments).
#[utoipa::path(
    patch,
    path = "/api/admin/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Order updated"),
        (status = 400, description = "Illegal transition"),
        (status = 403, description = "Admin only"),
        (status = 404, description = "Order not found"),
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ManageOrders)?;
    let order = state
        .services
        .orders
        .update_status(id, payload.status)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Adjust one size's stock level by a signed delta.
#[utoipa::path(
    post,
    path = "/api/admin/products/{id}/stock",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = AdjustStockRequest,
    responses(
        (status = 200, description = "Stock adjusted"),
        (status = 403, description = "Admin only"),
        (status = 422, description = "Adjustment would drive stock negative"),
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn adjust_stock(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdjustStockRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ManageCatalog)?;
    state
        .services
        .stock
        .adjust_stock(id, &payload.size, payload.delta)
        .await?;
    let sizes = state.services.stock.get_sizes(id).await?;
    Ok(Json(ApiResponse::success(sizes)))
}

/// Revenue summary: totals exclude cancelled orders.
#[utoipa::path(
    get,
    path = "/api/admin/reports/revenue",
    responses((status = 200, description = "Revenue report"), (status = 403, description = "Admin only")),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn revenue_report(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<RevenueQuery>,
) -> ApiResult<RevenueReport> {
    authorize(&user, Action::ViewReports)?;
    let report = state.services.reports.revenue(query).await?;
    Ok(Json(ApiResponse::success(report)))
}

/// Stock health: low-stock sizes plus aggregate counts.
#[utoipa::path(
    get,
    path = "/api/admin/reports/stock",
    responses((status = 200, description = "Stock report"), (status = 403, description = "Admin only")),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn stock_report(State(state): State<AppState>, user: AuthUser) -> ApiResult<StockReport> {
    authorize(&user, Action::ViewReports)?;
    let report = state.services.reports.stock().await?;
    Ok(Json(ApiResponse::success(report)))
}
