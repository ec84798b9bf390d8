use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{authorize, Action, AuthUser};
use crate::entities::product;
use crate::errors::ServiceError;
use crate::services::customers::{AddressInput, ReviewInput};
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProductRef {
    pub product_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct SavedProduct {
    pub product: Option<product::Model>,
    pub saved_at: chrono::DateTime<chrono::Utc>,
}

// ---- Addresses ----

#[utoipa::path(
    get,
    path = "/api/account/addresses",
    responses((status = 200, description = "Caller's addresses")),
    security(("bearer_auth" = [])),
    tag = "account"
)]
pub async fn list_addresses(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ViewOwnRecords)?;
    let addresses = state.services.customers.list_addresses(user.user_id).await?;
    Ok(Json(ApiResponse::success(addresses)))
}

#[utoipa::path(
    post,
    path = "/api/account/addresses",
    request_body = AddressInput,
    responses((status = 201, description = "Address created")),
    security(("bearer_auth" = [])),
    tag = "account"
)]
pub async fn create_address(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddressInput>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ViewOwnRecords)?;
    let address = state
        .services
        .customers
        .create_address(user.user_id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(address))))
}

#[utoipa::path(
    put,
    path = "/api/account/addresses/{id}",
    params(("id" = Uuid, Path, description = "Address id")),
    request_body = AddressInput,
    responses((status = 200, description = "Address updated")),
    security(("bearer_auth" = [])),
    tag = "account"
)]
pub async fn update_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddressInput>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ViewOwnRecords)?;
    let address = state
        .services
        .customers
        .update_address(user.user_id, id, payload)
        .await?;
    Ok(Json(ApiResponse::success(address)))
}

#[utoipa::path(
    delete,
    path = "/api/account/addresses/{id}",
    params(("id" = Uuid, Path, description = "Address id")),
    responses((status = 200, description = "Address deleted")),
    security(("bearer_auth" = [])),
    tag = "account"
)]
pub async fn delete_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ViewOwnRecords)?;
    state
        .services
        .customers
        .delete_address(user.user_id, id)
        .await?;
    Ok(Json(ApiResponse::success(())))
}

/// Make this address the caller's default, unsetting any sibling default.
#[utoipa::path(
    post,
    path = "/api/account/addresses/{id}/default",
    params(("id" = Uuid, Path, description = "Address id")),
    responses((status = 200, description = "Default address updated")),
    security(("bearer_auth" = [])),
    tag = "account"
)]
pub async fn set_default_address(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ViewOwnRecords)?;
    let address = state
        .services
        .customers
        .set_default_address(user.user_id, id)
        .await?;
    Ok(Json(ApiResponse::success(address)))
}

// ---- Wishlist ----

#[utoipa::path(
    get,
    path = "/api/account/wishlist",
    responses((status = 200, description = "Caller's wishlist")),
    security(("bearer_auth" = [])),
    tag = "account"
)]
pub async fn list_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ViewOwnRecords)?;
    let items = state.services.customers.list_wishlist(user.user_id).await?;
    let saved: Vec<SavedProduct> = items
        .into_iter()
        .map(|(item, product)| SavedProduct {
            product,
            saved_at: item.created_at,
        })
        .collect();
    Ok(Json(ApiResponse::success(saved)))
}

/// Adding a product twice is a no-op.
#[utoipa::path(
    post,
    path = "/api/account/wishlist",
    request_body = ProductRef,
    responses((status = 200, description = "Product on wishlist")),
    security(("bearer_auth" = [])),
    tag = "account"
)]
pub async fn add_to_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<ProductRef>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ViewOwnRecords)?;
    let item = state
        .services
        .customers
        .add_to_wishlist(user.user_id, payload.product_id)
        .await?;
    Ok(Json(ApiResponse::success(item)))
}

#[utoipa::path(
    delete,
    path = "/api/account/wishlist/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product id")),
    responses((status = 200, description = "Product removed from wishlist")),
    security(("bearer_auth" = [])),
    tag = "account"
)]
pub async fn remove_from_wishlist(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ViewOwnRecords)?;
    state
        .services
        .customers
        .remove_from_wishlist(user.user_id, product_id)
        .await?;
    Ok(Json(ApiResponse::success(())))
}

// ---- Reviews ----

#[utoipa::path(
    get,
    path = "/api/products/{id}/reviews",
    params(("id" = Uuid, Path, description = "Product id")),
    responses((status = 200, description = "Reviews for the product")),
    tag = "catalog"
)]
pub async fn list_reviews(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let reviews = state.services.customers.list_reviews(id).await?;
    Ok(Json(ApiResponse::success(reviews)))
}

/// One review per product per customer.
#[utoipa::path(
    post,
    path = "/api/products/{id}/reviews",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = ReviewInput,
    responses(
        (status = 201, description = "Review created"),
        (status = 409, description = "Caller already reviewed this product"),
    ),
    security(("bearer_auth" = [])),
    tag = "catalog"
)]
pub async fn add_review(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReviewInput>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ViewOwnRecords)?;
    let review = state
        .services
        .customers
        .add_review(user.user_id, id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(review))))
}

// ---- Recently viewed ----

#[utoipa::path(
    get,
    path = "/api/account/recently-viewed",
    responses((status = 200, description = "Recently viewed products, newest first")),
    security(("bearer_auth" = [])),
    tag = "account"
)]
pub async fn list_recently_viewed(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ViewOwnRecords)?;
    let rows = state
        .services
        .customers
        .list_recently_viewed(user.user_id)
        .await?;
    let viewed: Vec<SavedProduct> = rows
        .into_iter()
        .map(|(row, product)| SavedProduct {
            product,
            saved_at: row.viewed_at,
        })
        .collect();
    Ok(Json(ApiResponse::success(viewed)))
}

#[utoipa::path(
    post,
    path = "/api/account/recently-viewed",
    request_body = ProductRef,
    responses((status = 200, description = "View recorded")),
    security(("bearer_auth" = [])),
    tag = "account"
)]
pub async fn record_view(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<ProductRef>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ViewOwnRecords)?;
    state
        .services
        .customers
        .record_view(user.user_id, payload.product_id)
        .await?;
    Ok(Json(ApiResponse::success(())))
}
