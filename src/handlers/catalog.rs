use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{authorize, Action, AuthUser};
use crate::errors::ServiceError;
use crate::services::catalog::{CategoryInput, ProductFilter, ProductInput, SizeInput};
use crate::{ApiResponse, AppState, ListQuery, PaginatedResponse};

#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    pub category_id: Option<Uuid>,
    pub search: Option<String>,
}

// ---- Public storefront ----

/// Category tree, roots first.
#[utoipa::path(
    get,
    path = "/api/categories",
    responses((status = 200, description = "Category tree")),
    tag = "catalog"
)]
pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServiceError> {
    let tree = state.services.catalog.category_tree().await?;
    Ok(Json(ApiResponse::success(tree)))
}

/// Browse active products, optionally filtered by category or name.
#[utoipa::path(
    get,
    path = "/api/products",
    responses((status = 200, description = "Products")),
    tag = "catalog"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(filter): Query<ProductQuery>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let (items, total) = state
        .services
        .catalog
        .list_products(
            ProductFilter {
                category_id: filter.category_id,
                search: filter.search,
                include_inactive: false,
            },
            query.page,
            query.limit,
        )
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, total, &query,
    ))))
}

/// Product detail with images, attributes and per-size stock.
#[utoipa::path(
    get,
    path = "/api/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product detail"),
        (status = 404, description = "Product not found"),
    ),
    tag = "catalog"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.catalog.get_product(id).await?;
    Ok(Json(ApiResponse::success(product)))
}

// ---- Admin catalog management ----

#[utoipa::path(
    post,
    path = "/api/admin/categories",
    request_body = CategoryInput,
    responses((status = 201, description = "Category created"), (status = 409, description = "Slug taken")),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn create_category(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CategoryInput>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ManageCatalog)?;
    let category = state.services.catalog.create_category(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(category))))
}

#[utoipa::path(
    put,
    path = "/api/admin/categories/{id}",
    params(("id" = Uuid, Path, description = "Category id")),
    request_body = CategoryInput,
    responses((status = 200, description = "Category updated")),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn update_category(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CategoryInput>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ManageCatalog)?;
    let category = state.services.catalog.update_category(id, payload).await?;
    Ok(Json(ApiResponse::success(category)))
}

/// Refused while the category still has child categories or products.
#[utoipa::path(
    delete,
    path = "/api/admin/categories/{id}",
    params(("id" = Uuid, Path, description = "Category id")),
    responses(
        (status = 200, description = "Category deleted"),
        (status = 409, description = "Category still has children or products"),
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn delete_category(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ManageCatalog)?;
    state.services.catalog.delete_category(id).await?;
    Ok(Json(ApiResponse::success(())))
}

/// Admin listing includes inactive products.
#[utoipa::path(
    get,
    path = "/api/admin/products",
    responses((status = 200, description = "Products including inactive")),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn list_all_products(
    State(state): State<AppState>,
    user: AuthUser,
    Query(filter): Query<ProductQuery>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ManageCatalog)?;
    let (items, total) = state
        .services
        .catalog
        .list_products(
            ProductFilter {
                category_id: filter.category_id,
                search: filter.search,
                include_inactive: true,
            },
            query.page,
            query.limit,
        )
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        items, total, &query,
    ))))
}

#[utoipa::path(
    post,
    path = "/api/admin/products",
    request_body = ProductInput,
    responses((status = 201, description = "Product created"), (status = 409, description = "Slug taken")),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn create_product(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<ProductInput>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ManageCatalog)?;
    let product = state.services.catalog.create_product(payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(product))))
}

#[utoipa::path(
    put,
    path = "/api/admin/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = ProductInput,
    responses((status = 200, description = "Product updated")),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn update_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProductInput>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ManageCatalog)?;
    let product = state.services.catalog.update_product(id, payload).await?;
    Ok(Json(ApiResponse::success(product)))
}

#[utoipa::path(
    delete,
    path = "/api/admin/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses((status = 200, description = "Product deleted")),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn delete_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ManageCatalog)?;
    state.services.catalog.delete_product(id).await?;
    Ok(Json(ApiResponse::success(())))
}

/// Replace the product's size/stock set wholesale.
#[utoipa::path(
    put,
    path = "/api/admin/products/{id}/sizes",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = Vec<SizeInput>,
    responses((status = 200, description = "Sizes replaced")),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn replace_sizes(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<Vec<SizeInput>>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::ManageCatalog)?;
    let sizes = state.services.catalog.replace_sizes(id, payload).await?;
    Ok(Json(ApiResponse::success(sizes)))
}
