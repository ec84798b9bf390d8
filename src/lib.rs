//! Storefront API Library
//!
//! Catalog, order lifecycle and payment reconciliation for the storefront
//! and its admin back-office.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod services;

use std::sync::Arc;

use axum::{
    routing::{delete, get, patch, post, put},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::{OpenApi, ToSchema};

use crate::auth::AuthVerifier;
use crate::db::DbPool;

pub use handlers::AppServices;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: AppServices,
}

// Common query parameters for list endpoints
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_page() -> u64 {
    1
}
fn default_limit() -> u64 {
    20
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, query: &ListQuery) -> Self {
        let limit = query.limit.max(1);
        Self {
            items,
            total,
            page: query.page,
            limit,
            total_pages: total.div_ceil(limit),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// All storefront and back-office routes, to be nested under `/api`.
pub fn api_routes() -> Router<AppState> {
    use handlers::{admin, catalog, customers, orders, payments};

    Router::new()
        // Public catalog
        .route("/categories", get(catalog::list_categories))
        .route("/products", get(catalog::list_products))
        .route("/products/{id}", get(catalog::get_product))
        .route(
            "/products/{id}/reviews",
            get(customers::list_reviews).post(customers::add_review),
        )
        // Orders
        .route(
            "/orders",
            post(orders::create_order).get(orders::list_my_orders),
        )
        .route("/orders/{id}", get(orders::get_order))
        .route("/orders/{id}/cancel", post(orders::cancel_order))
        // Payments
        .route("/payments/mpesa/initiate", post(payments::mpesa_initiate))
        .route("/payments/mpesa/callback", post(payments::mpesa_callback))
        .route("/payments/paypal/create", post(payments::paypal_create))
        .route("/payments/paypal/capture", post(payments::paypal_capture))
        .route("/payments/paypal/webhook", post(payments::paypal_webhook))
        // Account
        .route(
            "/account/addresses",
            get(customers::list_addresses).post(customers::create_address),
        )
        .route(
            "/account/addresses/{id}",
            put(customers::update_address).delete(customers::delete_address),
        )
        .route(
            "/account/addresses/{id}/default",
            post(customers::set_default_address),
        )
        .route(
            "/account/wishlist",
            get(customers::list_wishlist).post(customers::add_to_wishlist),
        )
        .route(
            "/account/wishlist/{product_id}",
            delete(customers::remove_from_wishlist),
        )
        .route(
            "/account/recently-viewed",
            get(customers::list_recently_viewed).post(customers::record_view),
        )
        // Admin
        .route("/admin/orders", get(admin::list_orders))
        .route("/admin/orders/{id}", patch(admin::update_order_status))
        .route("/admin/categories", post(catalog::create_category))
        .route(
            "/admin/categories/{id}",
            put(catalog::update_category).delete(catalog::delete_category),
        )
        .route(
            "/admin/products",
            get(catalog::list_all_products).post(catalog::create_product),
        )
        .route(
            "/admin/products/{id}",
            put(catalog::update_product).delete(catalog::delete_product),
        )
        .route("/admin/products/{id}/sizes", put(catalog::replace_sizes))
        .route("/admin/products/{id}/stock", post(admin::adjust_stock))
        .route("/admin/reports/revenue", get(admin::revenue_report))
        .route("/admin/reports/stock", get(admin::stock_report))
}

/// Assembles the full application router: API routes under `/api`, the
/// health probe, and the bearer-token verifier injected as an extension.
pub fn app_router(state: AppState, verifier: Arc<AuthVerifier>) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .route("/health", get(health))
        .layer(Extension(verifier))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        description = "Catalog, order lifecycle and payment reconciliation"
    ),
    paths(
        handlers::catalog::list_categories,
        handlers::catalog::list_products,
        handlers::catalog::get_product,
        handlers::catalog::create_category,
        handlers::catalog::update_category,
        handlers::catalog::delete_category,
        handlers::catalog::list_all_products,
        handlers::catalog::create_product,
        handlers::catalog::update_product,
        handlers::catalog::delete_product,
        handlers::catalog::replace_sizes,
        handlers::orders::create_order,
        handlers::orders::list_my_orders,
        handlers::orders::get_order,
        handlers::orders::cancel_order,
        handlers::payments::mpesa_initiate,
        handlers::payments::mpesa_callback,
        handlers::payments::paypal_create,
        handlers::payments::paypal_capture,
        handlers::payments::paypal_webhook,
        handlers::customers::list_addresses,
        handlers::customers::create_address,
        handlers::customers::update_address,
        handlers::customers::delete_address,
        handlers::customers::set_default_address,
        handlers::customers::list_wishlist,
        handlers::customers::add_to_wishlist,
        handlers::customers::remove_from_wishlist,
        handlers::customers::list_reviews,
        handlers::customers::add_review,
        handlers::customers::list_recently_viewed,
        handlers::customers::record_view,
        handlers::admin::list_orders,
        handlers::admin::update_order_status,
        handlers::admin::adjust_stock,
        handlers::admin::revenue_report,
        handlers::admin::stock_report,
    ),
    components(schemas(errors::ErrorResponse)),
    tags(
        (name = "catalog", description = "Public catalog browsing"),
        (name = "orders", description = "Order lifecycle"),
        (name = "payments", description = "Payment initiation and reconciliation"),
        (name = "account", description = "Customer-scoped records"),
        (name = "admin", description = "Back-office management"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod response_tests {
    use super::*;

    #[test]
    fn success_response_wraps_data() {
        let response = ApiResponse::success(42);
        assert!(response.success);
        assert_eq!(response.data, Some(42));
        assert!(response.message.is_none());
    }

    #[test]
    fn pagination_rounds_total_pages_up() {
        let query = ListQuery { page: 2, limit: 20 };
        let page = PaginatedResponse::new(vec![1, 2, 3], 41, &query);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.page, 2);
    }
}
