//! Payment reconciliation coverage: mobile-money STK callbacks, PayPal
//! create/capture, webhook signature checks and idempotent redelivery.

mod common;

use axum::http::{HeaderValue, Method, Request, StatusCode};
use common::{assert_status, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use tower::ServiceExt;
use uuid::Uuid;

async fn place_order(app: &TestApp, token: &str, payment_method: &str) -> (Uuid, Uuid, String) {
    let product = app
        .seed_product(
            &format!("Runner {}", Uuid::new_v4().simple()),
            dec!(5000),
            &[("9", 5)],
        )
        .await;
    let response = app
        .request(
            Method::POST,
            "/api/orders",
            Some(token),
            Some(TestApp::order_payload(&product, "9", 2, payment_method)),
        )
        .await;
    let body = assert_status(response, StatusCode::CREATED).await;
    let order_id: Uuid = body["data"]["id"].as_str().unwrap().parse().unwrap();
    (order_id, product.id, "9".to_string())
}

fn stk_callback(checkout_request_id: &str, result_code: i64) -> Value {
    let mut callback = json!({
        "MerchantRequestID": "mr-1",
        "CheckoutRequestID": checkout_request_id,
        "ResultCode": result_code,
        "ResultDesc": if result_code == 0 { "Success" } else { "Request cancelled by user" },
    });
    if result_code == 0 {
        callback["CallbackMetadata"] = json!({
            "Item": [
                {"Name": "Amount", "Value": 10500},
                {"Name": "MpesaReceiptNumber", "Value": "QK7EXAMPLE"},
                {"Name": "PhoneNumber", "Value": 254712345678u64}
            ]
        });
    }
    json!({ "Body": { "stkCallback": callback } })
}

async fn initiate_mpesa(app: &TestApp, token: &str, order_id: Uuid) -> String {
    let response = app
        .request(
            Method::POST,
            "/api/payments/mpesa/initiate",
            Some(token),
            Some(json!({"order_id": order_id})),
        )
        .await;
    let body = assert_status(response, StatusCode::OK).await;
    body["data"]["checkout_request_id"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn successful_stk_callback_completes_payment_and_starts_processing() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    let (order_id, _, _) = place_order(&app, &token, "mpesa").await;

    let checkout_id = initiate_mpesa(&app, &token, order_id).await;
    assert_eq!(app.mpesa.pushes.lock().unwrap().len(), 1);

    let response = app
        .request(
            Method::POST,
            "/api/payments/mpesa/callback",
            None,
            Some(stk_callback(&checkout_id, 0)),
        )
        .await;
    let body = assert_status(response, StatusCode::OK).await;
    assert_eq!(body["ResultCode"], 0);

    let payment = app.payment_by_correlation(&checkout_id).await.unwrap();
    assert_eq!(payment.status, "COMPLETED");
    assert_eq!(payment.receipt_number.as_deref(), Some("QK7EXAMPLE"));
    assert!(payment.raw_callback.is_some());
    assert_eq!(app.order_status(order_id).await, "PROCESSING");
}

#[tokio::test]
async fn failed_stk_callback_fails_payment_but_leaves_order_pending() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    let (order_id, _, _) = place_order(&app, &token, "mpesa").await;
    let checkout_id = initiate_mpesa(&app, &token, order_id).await;

    let response = app
        .request(
            Method::POST,
            "/api/payments/mpesa/callback",
            None,
            Some(stk_callback(&checkout_id, 1032)),
        )
        .await;
    assert_status(response, StatusCode::OK).await;

    let payment = app.payment_by_correlation(&checkout_id).await.unwrap();
    assert_eq!(payment.status, "FAILED");
    // The buyer keeps the order and may retry with another method
    assert_eq!(app.order_status(order_id).await, "PENDING");
}

#[tokio::test]
async fn unknown_checkout_request_id_is_rejected_without_mutation() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    let (order_id, _, _) = place_order(&app, &token, "mpesa").await;

    let response = app
        .request(
            Method::POST,
            "/api/payments/mpesa/callback",
            None,
            Some(stk_callback("ws_CO_nonexistent", 0)),
        )
        .await;
    assert_status(response, StatusCode::NOT_FOUND).await;

    assert_eq!(app.order_status(order_id).await, "PENDING");
    let payments = app.payments_for_order(order_id).await;
    assert_eq!(payments[0].status, "PENDING");
}

#[tokio::test]
async fn duplicate_stk_callback_is_absorbed() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    let (order_id, _, _) = place_order(&app, &token, "mpesa").await;
    let checkout_id = initiate_mpesa(&app, &token, order_id).await;

    for _ in 0..2 {
        let response = app
            .request(
                Method::POST,
                "/api/payments/mpesa/callback",
                None,
                Some(stk_callback(&checkout_id, 0)),
            )
            .await;
        assert_status(response, StatusCode::OK).await;
    }

    let payment = app.payment_by_correlation(&checkout_id).await.unwrap();
    assert_eq!(payment.status, "COMPLETED");
    assert_eq!(app.order_status(order_id).await, "PROCESSING");
}

#[tokio::test]
async fn paypal_create_and_capture_complete_the_payment() {
    let app = TestApp::new().await;
    let customer = Uuid::new_v4();
    let token = app.customer_token(customer);
    let (order_id, _, _) = place_order(&app, &token, "paypal").await;

    let response = app
        .request(
            Method::POST,
            "/api/payments/paypal/create",
            Some(&token),
            Some(json!({"order_id": order_id})),
        )
        .await;
    let body = assert_status(response, StatusCode::OK).await;
    let paypal_order_id = body["data"]["paypal_order_id"].as_str().unwrap().to_string();
    assert!(body["data"]["approval_url"].as_str().is_some());

    let payment = app.payment_by_correlation(&paypal_order_id).await.unwrap();
    assert_eq!(payment.status, "PENDING");
    assert_eq!(payment.amount, dec!(10500));

    let response = app
        .request(
            Method::POST,
            "/api/payments/paypal/capture",
            Some(&token),
            Some(json!({"paypal_order_id": paypal_order_id})),
        )
        .await;
    assert_status(response, StatusCode::OK).await;

    let payment = app.payment_by_correlation(&paypal_order_id).await.unwrap();
    assert_eq!(payment.status, "COMPLETED");
    assert_eq!(payment.payer_id.as_deref(), Some("PAYER-1"));
    assert!(payment.capture_id.is_some());
    assert_eq!(app.order_status(order_id).await, "PROCESSING");
}

#[tokio::test]
async fn strangers_cannot_create_paypal_orders_for_foreign_orders() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    let stranger = app.customer_token(Uuid::new_v4());
    let (order_id, _, _) = place_order(&app, &token, "paypal").await;

    let response = app
        .request(
            Method::POST,
            "/api/payments/paypal/create",
            Some(&stranger),
            Some(json!({"order_id": order_id})),
        )
        .await;
    assert_status(response, StatusCode::NOT_FOUND).await;
}

async fn send_webhook(app: &TestApp, event: Value) -> axum::response::Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/payments/paypal/webhook")
        .header("content-type", "application/json")
        .header("paypal-transmission-id", HeaderValue::from_static("t-1"))
        .header(
            "paypal-transmission-time",
            HeaderValue::from_static("2026-01-01T00:00:00Z"),
        )
        .header("paypal-transmission-sig", HeaderValue::from_static("sig"))
        .header(
            "paypal-cert-url",
            HeaderValue::from_static("https://api.paypal.test/cert"),
        )
        .header(
            "paypal-auth-algo",
            HeaderValue::from_static("SHA256withRSA"),
        )
        .body(axum::body::Body::from(event.to_string()))
        .expect("request");
    app.router().clone().oneshot(request).await.expect("response")
}

fn capture_event(event_id: &str, event_type: &str, paypal_order_id: &str) -> Value {
    json!({
        "id": event_id,
        "event_type": event_type,
        "resource": {
            "id": format!("CAP-{event_id}"),
            "supplementary_data": {"related_ids": {"order_id": paypal_order_id}}
        }
    })
}

async fn create_paypal_payment(app: &TestApp, token: &str, order_id: Uuid) -> String {
    let response = app
        .request(
            Method::POST,
            "/api/payments/paypal/create",
            Some(token),
            Some(json!({"order_id": order_id})),
        )
        .await;
    let body = assert_status(response, StatusCode::OK).await;
    body["data"]["paypal_order_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn webhook_with_invalid_signature_is_rejected_before_any_effect() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    let (order_id, _, _) = place_order(&app, &token, "paypal").await;
    let paypal_order_id = create_paypal_payment(&app, &token, order_id).await;

    app.paypal.verify_ok.store(false, Ordering::SeqCst);
    let response = send_webhook(
        &app,
        capture_event("WH-BAD", "PAYMENT.CAPTURE.COMPLETED", &paypal_order_id),
    )
    .await;
    assert_status(response, StatusCode::UNAUTHORIZED).await;

    let payment = app.payment_by_correlation(&paypal_order_id).await.unwrap();
    assert_eq!(payment.status, "PENDING");
    assert_eq!(app.order_status(order_id).await, "PENDING");
}

#[tokio::test]
async fn capture_denied_fails_payment_and_cancels_the_order() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    let (order_id, product_id, size) = place_order(&app, &token, "paypal").await;
    let paypal_order_id = create_paypal_payment(&app, &token, order_id).await;

    assert_eq!(app.stock_of(product_id, &size).await, 3);

    let response = send_webhook(
        &app,
        capture_event("WH-DENY", "PAYMENT.CAPTURE.DENIED", &paypal_order_id),
    )
    .await;
    assert_status(response, StatusCode::OK).await;

    let payment = app.payment_by_correlation(&paypal_order_id).await.unwrap();
    assert_eq!(payment.status, "FAILED");
    // Unlike a mobile-money failure, a denial cancels the order and
    // returns its stock
    assert_eq!(app.order_status(order_id).await, "CANCELLED");
    assert_eq!(app.stock_of(product_id, &size).await, 5);
}

#[tokio::test]
async fn capture_refunded_cancels_payment_but_not_the_order() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    let (order_id, _, _) = place_order(&app, &token, "paypal").await;
    let paypal_order_id = create_paypal_payment(&app, &token, order_id).await;

    // Capture first so the order reaches PROCESSING
    let response = app
        .request(
            Method::POST,
            "/api/payments/paypal/capture",
            Some(&token),
            Some(json!({"paypal_order_id": paypal_order_id})),
        )
        .await;
    assert_status(response, StatusCode::OK).await;

    let response = send_webhook(
        &app,
        capture_event("WH-REFUND", "PAYMENT.CAPTURE.REFUNDED", &paypal_order_id),
    )
    .await;
    assert_status(response, StatusCode::OK).await;

    let payment = app.payment_by_correlation(&paypal_order_id).await.unwrap();
    assert_eq!(payment.status, "CANCELLED");
    assert_eq!(app.order_status(order_id).await, "PROCESSING");
}

#[tokio::test]
async fn replayed_webhook_event_is_acknowledged_without_reapplying() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    let (order_id, product_id, size) = place_order(&app, &token, "paypal").await;
    let paypal_order_id = create_paypal_payment(&app, &token, order_id).await;

    let event = capture_event("WH-ONCE", "PAYMENT.CAPTURE.DENIED", &paypal_order_id);
    assert_status(send_webhook(&app, event.clone()).await, StatusCode::OK).await;
    assert_eq!(app.stock_of(product_id, &size).await, 5);

    // Redelivery of the same event id must not restore stock twice
    assert_status(send_webhook(&app, event).await, StatusCode::OK).await;
    assert_eq!(app.stock_of(product_id, &size).await, 5);
}

#[tokio::test]
async fn denied_webhook_arriving_before_the_payment_can_be_retried() {
    let app = TestApp::new().await;
    let token = app.customer_token(Uuid::new_v4());
    let (order_id, product_id, size) = place_order(&app, &token, "paypal").await;

    // The fake gateway mints ids deterministically, so the id the webhook
    // will carry is known before the payment row exists
    let response = app
        .request(
            Method::GET,
            &format!("/api/orders/{order_id}"),
            Some(&token),
            None,
        )
        .await;
    let body = assert_status(response, StatusCode::OK).await;
    let order_number = body["data"]["order_number"].as_str().unwrap().to_string();
    let paypal_order_id = format!("PP-TEST-0-{order_number}");

    // Delivered before the payment is created: rejected, and nothing recorded
    let event = capture_event("WH-EARLY", "PAYMENT.CAPTURE.DENIED", &paypal_order_id);
    assert_status(send_webhook(&app, event.clone()).await, StatusCode::NOT_FOUND).await;

    assert_eq!(
        create_paypal_payment(&app, &token, order_id).await,
        paypal_order_id
    );

    // The gateway's redelivery of the identical event must now apply
    assert_status(send_webhook(&app, event).await, StatusCode::OK).await;

    let payment = app.payment_by_correlation(&paypal_order_id).await.unwrap();
    assert_eq!(payment.status, "FAILED");
    assert_eq!(app.order_status(order_id).await, "CANCELLED");
    assert_eq!(app.stock_of(product_id, &size).await, 5);
}

#[tokio::test]
async fn webhook_for_unknown_payment_is_rejected() {
    let app = TestApp::new().await;

    let response = send_webhook(
        &app,
        capture_event("WH-GHOST", "PAYMENT.CAPTURE.COMPLETED", "PP-UNKNOWN"),
    )
    .await;
    assert_status(response, StatusCode::NOT_FOUND).await;
}
