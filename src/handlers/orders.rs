use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::auth::{authorize, Action, AuthUser};
use crate::errors::ServiceError;
use crate::services::orders::CreateOrderRequest;
use crate::{ApiResponse, AppState, ListQuery, PaginatedResponse};

/// Place an order from the caller's cart line items.
#[utoipa::path(
    post,
    path = "/api/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created"),
        (status = 400, description = "Validation failure"),
        (status = 403, description = "Administrators cannot place orders"),
        (status = 422, description = "Insufficient stock"),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::PlaceOrder)?;
    let order = state
        .services
        .orders
        .create_order(user.user_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

/// List the caller's own orders, newest first.
#[utoipa::path(
    get,
    path = "/api/orders",
    responses((status = 200, description = "Orders for the caller")),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ViewOwnRecords)?;
    let (items, total) = state
        .services
        .orders
        .list_orders_for_customer(user.user_id, query.page, query.limit)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, total, &query,
    ))))
}

/// Fetch one order with its items and payments. Admins can read any
/// order; customers only their own (a foreign id looks like 404).
#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order detail"),
        (status = 404, description = "Not found or not owned by the caller"),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ViewOwnRecords)?;
    let owner = if user.is_admin() {
        None
    } else {
        Some(user.user_id)
    };
    let order = state.services.orders.get_order(id, owner).await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Cancel the caller's own order while it is still PENDING or PROCESSING.
#[utoipa::path(
    post,
    path = "/api/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order cancelled"),
        (status = 400, description = "Order is past the point of cancellation"),
        (status = 404, description = "Not found or not owned by the caller"),
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::CancelOwnOrder)?;
    let order = state
        .services
        .orders
        .cancel_own_order(user.user_id, id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}
