//! Catalog management, customer-scoped records and admin reporting.

mod common;

use axum::http::{Method, StatusCode};
use common::{assert_status, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn admin_builds_catalog_and_storefront_reads_it() {
    let app = TestApp::new().await;
    let admin = app.admin_token();

    let body = assert_status(
        app.request(
            Method::POST,
            "/api/admin/categories",
            Some(&admin),
            Some(json!({"name": "Shoes", "slug": "shoes"})),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    let category_id: Uuid = body["data"]["id"].as_str().unwrap().parse().unwrap();

    let body = assert_status(
        app.request(
            Method::POST,
            "/api/admin/products",
            Some(&admin),
            Some(json!({
                "name": "Trail Runner",
                "slug": "trail-runner",
                "description": "Lightweight trail shoe",
                "price": "5000",
                "category_id": category_id,
                "images": ["https://cdn.example.com/trail-1.jpg"],
                "details": [{"label": "Material", "value": "Mesh"}]
            })),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    let product_id: Uuid = body["data"]["id"].as_str().unwrap().parse().unwrap();

    assert_status(
        app.request(
            Method::PUT,
            &format!("/api/admin/products/{product_id}/sizes"),
            Some(&admin),
            Some(json!([{"size": "8", "stock": 4}, {"size": "9", "stock": 0}])),
        )
        .await,
        StatusCode::OK,
    )
    .await;

    // Public detail view carries images, details and sizes
    let body = assert_status(
        app.request(Method::GET, &format!("/api/products/{product_id}"), None, None)
            .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["data"]["images"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["details"][0]["label"], "Material");
    assert_eq!(body["data"]["sizes"].as_array().unwrap().len(), 2);

    // Category tree contains the new root
    let body = assert_status(
        app.request(Method::GET, "/api/categories", None, None).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["data"][0]["name"], "Shoes");

    // Slug collisions are conflicts
    assert_status(
        app.request(
            Method::POST,
            "/api/admin/categories",
            Some(&admin),
            Some(json!({"name": "Shoes Again", "slug": "shoes"})),
        )
        .await,
        StatusCode::CONFLICT,
    )
    .await;

    // Customers may not manage the catalog
    let customer = app.customer_token(Uuid::new_v4());
    assert_status(
        app.request(
            Method::POST,
            "/api/admin/products",
            Some(&customer),
            Some(json!({"name": "X", "slug": "x", "price": "1"})),
        )
        .await,
        StatusCode::FORBIDDEN,
    )
    .await;
}

#[tokio::test]
async fn inactive_products_are_hidden_from_the_storefront() {
    let app = TestApp::new().await;
    let admin = app.admin_token();

    assert_status(
        app.request(
            Method::POST,
            "/api/admin/products",
            Some(&admin),
            Some(json!({"name": "Retired Model", "slug": "retired", "price": "900", "is_active": false})),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;

    let body = assert_status(
        app.request(Method::GET, "/api/products", None, None).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["data"]["total"], 0);

    let body = assert_status(
        app.request(Method::GET, "/api/admin/products", Some(&admin), None)
            .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["data"]["total"], 1);
}

#[tokio::test]
async fn category_deletion_is_guarded_by_children_and_products() {
    let app = TestApp::new().await;
    let admin = app.admin_token();

    let body = assert_status(
        app.request(
            Method::POST,
            "/api/admin/categories",
            Some(&admin),
            Some(json!({"name": "Apparel", "slug": "apparel"})),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    let parent_id: Uuid = body["data"]["id"].as_str().unwrap().parse().unwrap();

    let body = assert_status(
        app.request(
            Method::POST,
            "/api/admin/categories",
            Some(&admin),
            Some(json!({"name": "Jackets", "slug": "jackets", "parent_id": parent_id})),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    let child_id: Uuid = body["data"]["id"].as_str().unwrap().parse().unwrap();

    // Parent blocked by its child
    assert_status(
        app.request(
            Method::DELETE,
            &format!("/api/admin/categories/{parent_id}"),
            Some(&admin),
            None,
        )
        .await,
        StatusCode::CONFLICT,
    )
    .await;

    // Child blocked by a product
    assert_status(
        app.request(
            Method::POST,
            "/api/admin/products",
            Some(&admin),
            Some(json!({"name": "Windbreaker", "slug": "windbreaker", "price": "4000", "category_id": child_id})),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    assert_status(
        app.request(
            Method::DELETE,
            &format!("/api/admin/categories/{child_id}"),
            Some(&admin),
            None,
        )
        .await,
        StatusCode::CONFLICT,
    )
    .await;
}

#[tokio::test]
async fn default_address_is_exclusive_per_user() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());

    let address = |name: &str, default: bool| {
        json!({
            "name": name,
            "phone": "254712345678",
            "line1": "1 Moi Avenue",
            "city": "Nairobi",
            "is_default": default,
        })
    };

    let body = assert_status(
        app.request(
            Method::POST,
            "/api/account/addresses",
            Some(&token),
            Some(address("Home", true)),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    let first_id: Uuid = body["data"]["id"].as_str().unwrap().parse().unwrap();

    let body = assert_status(
        app.request(
            Method::POST,
            "/api/account/addresses",
            Some(&token),
            Some(address("Office", false)),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    let second_id: Uuid = body["data"]["id"].as_str().unwrap().parse().unwrap();

    assert_status(
        app.request(
            Method::POST,
            &format!("/api/account/addresses/{second_id}/default"),
            Some(&token),
            None,
        )
        .await,
        StatusCode::OK,
    )
    .await;

    let body = assert_status(
        app.request(Method::GET, "/api/account/addresses", Some(&token), None)
            .await,
        StatusCode::OK,
    )
    .await;
    let defaults: Vec<Uuid> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|a| a["is_default"].as_bool().unwrap())
        .map(|a| a["id"].as_str().unwrap().parse().unwrap())
        .collect();
    assert_eq!(defaults, vec![second_id]);
    assert_ne!(defaults[0], first_id);
}

#[tokio::test]
async fn addresses_are_owner_scoped() {
    let app = TestApp::new().await;
    let owner = app.customer_token(Uuid::new_v4());
    let stranger = app.customer_token(Uuid::new_v4());

    let body = assert_status(
        app.request(
            Method::POST,
            "/api/account/addresses",
            Some(&owner),
            Some(json!({
                "name": "Home", "phone": "254712345678",
                "line1": "1 Moi Avenue", "city": "Nairobi"
            })),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;
    let address_id: Uuid = body["data"]["id"].as_str().unwrap().parse().unwrap();

    assert_status(
        app.request(
            Method::DELETE,
            &format!("/api/account/addresses/{address_id}"),
            Some(&stranger),
            None,
        )
        .await,
        StatusCode::NOT_FOUND,
    )
    .await;
}

#[tokio::test]
async fn wishlist_add_is_idempotent() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    let product = app.seed_product("Canvas Low", dec!(2500), &[("8", 3)]).await;

    for _ in 0..2 {
        assert_status(
            app.request(
                Method::POST,
                "/api/account/wishlist",
                Some(&token),
                Some(json!({"product_id": product.id})),
            )
            .await,
            StatusCode::OK,
        )
        .await;
    }

    let body = assert_status(
        app.request(Method::GET, "/api/account/wishlist", Some(&token), None)
            .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    assert_status(
        app.request(
            Method::DELETE,
            &format!("/api/account/wishlist/{}", product.id),
            Some(&token),
            None,
        )
        .await,
        StatusCode::OK,
    )
    .await;
    assert_status(
        app.request(
            Method::DELETE,
            &format!("/api/account/wishlist/{}", product.id),
            Some(&token),
            None,
        )
        .await,
        StatusCode::NOT_FOUND,
    )
    .await;
}

#[tokio::test]
async fn one_review_per_customer_per_product() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    let product = app.seed_product("Knit Sock", dec!(1500), &[("7", 9)]).await;
    let uri = format!("/api/products/{}/reviews", product.id);

    // Rating outside 1..=5 is rejected
    assert_status(
        app.request(Method::POST, &uri, Some(&token), Some(json!({"rating": 6})))
            .await,
        StatusCode::BAD_REQUEST,
    )
    .await;

    assert_status(
        app.request(
            Method::POST,
            &uri,
            Some(&token),
            Some(json!({"rating": 5, "comment": "Very comfortable"})),
        )
        .await,
        StatusCode::CREATED,
    )
    .await;

    assert_status(
        app.request(Method::POST, &uri, Some(&token), Some(json!({"rating": 4})))
            .await,
        StatusCode::CONFLICT,
    )
    .await;

    let body = assert_status(
        app.request(Method::GET, &uri, None, None).await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["rating"], 5);
}

#[tokio::test]
async fn recently_viewed_bumps_and_caps() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    let first = app.seed_product("View Target", dec!(1000), &[("8", 1)]).await;

    // 21 distinct products, the first viewed twice
    app.request(
        Method::POST,
        "/api/account/recently-viewed",
        Some(&token),
        Some(json!({"product_id": first.id})),
    )
    .await;
    for i in 0..20 {
        let p = app
            .seed_product(&format!("Filler {i}"), dec!(1000), &[("8", 1)])
            .await;
        app.request(
            Method::POST,
            "/api/account/recently-viewed",
            Some(&token),
            Some(json!({"product_id": p.id})),
        )
        .await;
    }
    // Re-view the first so it survives the cap
    app.request(
        Method::POST,
        "/api/account/recently-viewed",
        Some(&token),
        Some(json!({"product_id": first.id})),
    )
    .await;

    let body = assert_status(
        app.request(Method::GET, "/api/account/recently-viewed", Some(&token), None)
            .await,
        StatusCode::OK,
    )
    .await;
    let items = body["data"].as_array().unwrap();
    assert!(items.len() <= 20);
    assert_eq!(items[0]["product"]["name"], "View Target");
}

#[tokio::test]
async fn revenue_report_excludes_cancelled_orders() {
    let app = TestApp::new().await;
    let admin = app.admin_token();
    let token = app.customer_token(Uuid::new_v4());
    let product = app.seed_product("Report Shoe", dec!(5000), &[("9", 20)]).await;

    let mut order_ids = Vec::new();
    for _ in 0..2 {
        let body = assert_status(
            app.request(
                Method::POST,
                "/api/orders",
                Some(&token),
                Some(TestApp::order_payload(&product, "9", 1, "cod")),
            )
            .await,
            StatusCode::CREATED,
        )
        .await;
        order_ids.push(
            body["data"]["id"]
                .as_str()
                .unwrap()
                .parse::<Uuid>()
                .unwrap(),
        );
    }

    // Cancel one: its 5500 must drop out of revenue
    assert_status(
        app.request(
            Method::POST,
            &format!("/api/orders/{}/cancel", order_ids[1]),
            Some(&token),
            None,
        )
        .await,
        StatusCode::OK,
    )
    .await;

    let body = assert_status(
        app.request(Method::GET, "/api/admin/reports/revenue", Some(&admin), None)
            .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(body["data"]["revenue"], "5500");
    assert_eq!(body["data"]["order_count"], 1);

    // Reports are admin-only
    assert_status(
        app.request(Method::GET, "/api/admin/reports/revenue", Some(&token), None)
            .await,
        StatusCode::FORBIDDEN,
    )
    .await;
}

#[tokio::test]
async fn stock_report_flags_low_and_out_of_stock_sizes() {
    let app = TestApp::new().await;
    let admin = app.admin_token();
    app.seed_product("Plenty", dec!(3000), &[("8", 50)]).await;
    let low = app
        .seed_product("Scarce", dec!(3000), &[("8", 2), ("9", 0)])
        .await;

    let body = assert_status(
        app.request(Method::GET, "/api/admin/reports/stock", Some(&admin), None)
            .await,
        StatusCode::OK,
    )
    .await;

    let data = &body["data"];
    assert_eq!(data["threshold"], 5);
    assert_eq!(data["total_products"], 2);
    assert_eq!(data["out_of_stock_sizes"], 1);

    let rows = data["low_stock"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows
        .iter()
        .all(|r| r["product_id"] == json!(low.id) && r["product_name"] == "Scarce"));
}

#[tokio::test]
async fn admin_stock_adjustment_is_guarded_against_underflow() {
    let app = TestApp::new().await;
    let admin = app.admin_token();
    let product = app.seed_product("Adjustable", dec!(2000), &[("8", 3)]).await;
    let uri = format!("/api/admin/products/{}/stock", product.id);

    assert_status(
        app.request(
            Method::POST,
            &uri,
            Some(&admin),
            Some(json!({"size": "8", "delta": 5})),
        )
        .await,
        StatusCode::OK,
    )
    .await;
    assert_eq!(app.stock_of(product.id, "8").await, 8);

    assert_status(
        app.request(
            Method::POST,
            &uri,
            Some(&admin),
            Some(json!({"size": "8", "delta": -20})),
        )
        .await,
        StatusCode::UNPROCESSABLE_ENTITY,
    )
    .await;
    assert_eq!(app.stock_of(product.id, "8").await, 8);
}
