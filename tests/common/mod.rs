//! Shared integration-test harness: an in-memory SQLite application with
//! in-process payment gateway fakes and locally minted bearer tokens.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, Response, StatusCode};
use axum::Router;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use storefront_api::auth::{AuthVerifier, Claims};
use storefront_api::config::{AppConfig, MpesaSettings, PayPalSettings};
use storefront_api::db::{self, DbPool};
use storefront_api::entities::{order, payment, product, product_size};
use storefront_api::errors::ServiceError;
use storefront_api::events::EventSender;
use storefront_api::handlers::AppServices;
use storefront_api::services::payments::mpesa::{MpesaGateway, StkPushRequest, StkPushResponse};
use storefront_api::services::payments::paypal::{
    CreatedGatewayOrder, GatewayCaptureResult, PayPalGateway, WebhookSignature,
};
use storefront_api::{app_router, AppState};

pub const TEST_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
const ISSUER: &str = "storefront-auth";
const AUDIENCE: &str = "storefront-api";

/// Fake mobile-money gateway recording every push it receives.
#[derive(Default)]
pub struct FakeMpesaGateway {
    pub pushes: Mutex<Vec<StkPushRequest>>,
    counter: AtomicUsize,
}

#[async_trait]
impl MpesaGateway for FakeMpesaGateway {
    async fn stk_push(&self, request: &StkPushRequest) -> Result<StkPushResponse, ServiceError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.pushes.lock().unwrap().push(request.clone());
        Ok(StkPushResponse {
            merchant_request_id: format!("mr-{n}"),
            checkout_request_id: format!("ws_CO_test_{n}"),
            customer_message: "Success. Request accepted for processing".to_string(),
        })
    }
}

/// Fake PayPal gateway with controllable signature verdict and capture
/// outcome.
pub struct FakePayPalGateway {
    pub verify_ok: AtomicBool,
    pub capture_status: Mutex<String>,
    counter: AtomicUsize,
}

impl Default for FakePayPalGateway {
    fn default() -> Self {
        Self {
            verify_ok: AtomicBool::new(true),
            capture_status: Mutex::new("COMPLETED".to_string()),
            counter: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PayPalGateway for FakePayPalGateway {
    async fn create_order(
        &self,
        _amount_usd: Decimal,
        reference: &str,
    ) -> Result<CreatedGatewayOrder, ServiceError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(CreatedGatewayOrder {
            gateway_order_id: format!("PP-TEST-{n}-{reference}"),
            approval_url: Some("https://paypal.test/approve".to_string()),
        })
    }

    async fn capture_order(
        &self,
        gateway_order_id: &str,
    ) -> Result<GatewayCaptureResult, ServiceError> {
        Ok(GatewayCaptureResult {
            status: self.capture_status.lock().unwrap().clone(),
            payer_id: Some("PAYER-1".to_string()),
            capture_id: Some(format!("CAP-{gateway_order_id}")),
        })
    }

    async fn verify_webhook_signature(
        &self,
        _signature: &WebhookSignature,
        _event: &Value,
    ) -> Result<bool, ServiceError> {
        Ok(self.verify_ok.load(Ordering::SeqCst))
    }
}

pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub mpesa: Arc<FakeMpesaGateway>,
    pub paypal: Arc<FakePayPalGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".to_string(),
        jwt_secret: TEST_SECRET.to_string(),
        jwt_issuer: ISSUER.to_string(),
        jwt_audience: AUDIENCE.to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "test".to_string(),
        log_level: "warn".to_string(),
        log_json: false,
        auto_migrate: true,
        cors_allowed_origins: None,
        db_max_connections: 1,
        db_min_connections: 1,
        db_connect_timeout_secs: 5,
        shipping_fee: dec!(500),
        currency: "KES".to_string(),
        low_stock_threshold: 5,
        mpesa: MpesaSettings::default(),
        paypal: PayPalSettings::default(),
    }
}

impl TestApp {
    pub async fn new() -> Self {
        let cfg = test_config();

        // A single pooled connection keeps the in-memory database alive for
        // the whole test.
        let pool = Arc::new(
            db::establish_connection(&cfg)
                .await
                .expect("failed to create test database"),
        );
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (tx, rx) = mpsc::channel(256);
        let event_sender = EventSender::new(tx);
        let event_task = tokio::spawn(storefront_api::events::process_events(rx));

        let mpesa = Arc::new(FakeMpesaGateway::default());
        let paypal = Arc::new(FakePayPalGateway::default());

        let services = AppServices::new(
            pool.clone(),
            event_sender.clone(),
            &cfg,
            mpesa.clone(),
            paypal.clone(),
        );

        let state = AppState {
            db: pool,
            config: cfg.clone(),
            event_sender,
            services,
        };

        let verifier = Arc::new(AuthVerifier::new(
            &cfg.jwt_secret,
            &cfg.jwt_issuer,
            &cfg.jwt_audience,
        ));
        let router = app_router(state.clone(), verifier);

        Self {
            router,
            state,
            mpesa,
            paypal,
            _event_task: event_task,
        }
    }

    pub fn db(&self) -> &DbPool {
        &self.state.db
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    // ---- Tokens ----

    pub fn mint_token(&self, user_id: Uuid, roles: &[&str]) -> String {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            email: Some("user@example.com".to_string()),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::hours(1)).timestamp(),
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
        )
        .expect("token encoding")
    }

    pub fn customer_token(&self, user_id: Uuid) -> String {
        self.mint_token(user_id, &["customer"])
    }

    pub fn admin_token(&self) -> String {
        self.mint_token(Uuid::new_v4(), &["admin"])
    }

    // ---- Requests ----

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };
        self.router.clone().oneshot(request).await.expect("response")
    }

    // ---- Seed helpers ----

    /// Inserts a product with one or more (size, stock) rows.
    pub async fn seed_product(
        &self,
        name: &str,
        price: Decimal,
        sizes: &[(&str, i32)],
    ) -> product::Model {
        let saved = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            category_id: Set(None),
            name: Set(name.to_string()),
            slug: Set(name.to_lowercase().replace(' ', "-")),
            description: Set(None),
            price: Set(price),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(self.db())
        .await
        .expect("seed product");

        for (size, stock) in sizes {
            product_size::ActiveModel {
                product_id: Set(saved.id),
                size: Set(size.to_string()),
                stock: Set(*stock),
            }
            .insert(self.db())
            .await
            .expect("seed size");
        }
        saved
    }

    pub async fn stock_of(&self, product_id: Uuid, size: &str) -> i32 {
        product_size::Entity::find_by_id((product_id, size.to_string()))
            .one(self.db())
            .await
            .expect("stock query")
            .expect("size row")
            .stock
    }

    pub async fn order_status(&self, order_id: Uuid) -> String {
        order::Entity::find_by_id(order_id)
            .one(self.db())
            .await
            .expect("order query")
            .expect("order row")
            .status
    }

    pub async fn payment_by_correlation(&self, correlation_id: &str) -> Option<payment::Model> {
        use sea_orm::{ColumnTrait, QueryFilter};
        payment::Entity::find()
            .filter(payment::Column::CorrelationId.eq(correlation_id))
            .one(self.db())
            .await
            .expect("payment query")
    }

    pub async fn payments_for_order(&self, order_id: Uuid) -> Vec<payment::Model> {
        use sea_orm::{ColumnTrait, QueryFilter};
        payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .all(self.db())
            .await
            .expect("payments query")
    }

    /// Standard checkout payload for one product/size.
    pub fn order_payload(
        product: &product::Model,
        size: &str,
        quantity: i32,
        payment_method: &str,
    ) -> Value {
        json!({
            "items": [{
                "product_id": product.id,
                "product_name": product.name,
                "size": size,
                "quantity": quantity,
                "unit_price": product.price,
            }],
            "payment_method": payment_method,
            "phone_number": "254712345678",
            "ship_to": {
                "name": "Jordan Wanjiru",
                "phone": "254712345678",
                "line1": "123 Riverside Drive",
                "city": "Nairobi",
                "postal_code": "00100",
            }
        })
    }
}

pub async fn response_json(response: Response<Body>) -> Value {
    let bytes = http_body_util::BodyExt::collect(response.into_body())
        .await
        .expect("body bytes")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

pub async fn assert_status(response: Response<Body>, expected: StatusCode) -> Value {
    let status = response.status();
    let body = response_json(response).await;
    assert_eq!(status, expected, "unexpected status, body: {body}");
    body
}
