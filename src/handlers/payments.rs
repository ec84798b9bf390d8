use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::auth::{authorize, Action, AuthUser};
use crate::errors::ServiceError;
use crate::services::payments::mpesa::{InitiatePaymentRequest, StkCallbackPayload};
use crate::services::payments::paypal::{
    CapturePayPalOrderRequest, CreatePayPalOrderRequest, PayPalWebhookEvent, WebhookSignature,
};
use crate::{ApiResponse, AppState};

/// Fire an STK push to the buyer's phone for their pending order.
#[utoipa::path(
    post,
    path = "/api/payments/mpesa/initiate",
    request_body = InitiatePaymentRequest,
    responses(
        (status = 200, description = "STK push sent"),
        (status = 404, description = "No pending mobile money payment for this order"),
        (status = 502, description = "Gateway unreachable"),
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn mpesa_initiate(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<InitiatePaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::PayOwnOrder)?;
    let response = state
        .services
        .mpesa
        .initiate(user.user_id, payload.order_id)
        .await?;
    Ok(Json(ApiResponse::success(response)))
}

/// Gateway-facing stkCallback receiver. Unauthenticated by design: the
/// gateway cannot carry our bearer tokens, so trust rests on the opaque
/// checkout-request-id correlation plus the idempotency ledger.
#[utoipa::path(
    post,
    path = "/api/payments/mpesa/callback",
    request_body = StkCallbackPayload,
    responses(
        (status = 200, description = "Callback accepted"),
        (status = 404, description = "Unknown checkout request id"),
    ),
    tag = "payments"
)]
pub async fn mpesa_callback(
    State(state): State<AppState>,
    Json(payload): Json<StkCallbackPayload>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.mpesa.handle_callback(payload).await?;
    // The gateway expects this acknowledgement shape; anything else
    // triggers redelivery.
    Ok(Json(json!({ "ResultCode": 0, "ResultDesc": "Accepted" })))
}

/// Create a PayPal order for the caller's storefront order.
#[utoipa::path(
    post,
    path = "/api/payments/paypal/create",
    request_body = CreatePayPalOrderRequest,
    responses(
        (status = 200, description = "Gateway order created, approval URL returned"),
        (status = 404, description = "Order not found or not owned by the caller"),
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn paypal_create(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreatePayPalOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::PayOwnOrder)?;
    let response = state
        .services
        .paypal
        .create_payment(user.user_id, payload.order_id)
        .await?;
    Ok(Json(ApiResponse::success(response)))
}

/// Capture an approved PayPal order.
#[utoipa::path(
    post,
    path = "/api/payments/paypal/capture",
    request_body = CapturePayPalOrderRequest,
    responses(
        (status = 200, description = "Payment captured"),
        (status = 402, description = "Capture declined by the gateway"),
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub async fn paypal_capture(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CapturePayPalOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    authorize(&user, Action::PayOwnOrder)?;
    let payment = state
        .services
        .paypal
        .capture_payment(user.user_id, &payload.paypal_order_id)
        .await?;
    Ok(Json(ApiResponse::success(payment)))
}

/// Gateway-facing webhook receiver. The transmission signature is verified
/// against PayPal before the payload is trusted.
#[utoipa::path(
    post,
    path = "/api/payments/paypal/webhook",
    request_body = PayPalWebhookEvent,
    responses(
        (status = 200, description = "Event applied or replay absorbed"),
        (status = 401, description = "Signature verification failed"),
        (status = 404, description = "Event matches no known payment"),
    ),
    tag = "payments"
)]
pub async fn paypal_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<PayPalWebhookEvent>,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = signature_from_headers(&headers)?;
    state.services.paypal.handle_webhook(signature, event).await?;
    Ok(Json(ApiResponse::success(())))
}

fn signature_from_headers(headers: &HeaderMap) -> Result<WebhookSignature, ServiceError> {
    let get = |name: &str| -> Result<String, ServiceError> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::Unauthorized(format!("Missing webhook header {name}"))
            })
    };

    Ok(WebhookSignature {
        transmission_id: get("paypal-transmission-id")?,
        transmission_time: get("paypal-transmission-time")?,
        transmission_sig: get("paypal-transmission-sig")?,
        cert_url: get("paypal-cert-url")?,
        auth_algo: get("paypal-auth-algo")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn signature_requires_every_transmission_header() {
        let mut headers = HeaderMap::new();
        headers.insert("paypal-transmission-id", HeaderValue::from_static("t-1"));
        headers.insert("paypal-transmission-time", HeaderValue::from_static("now"));
        headers.insert("paypal-transmission-sig", HeaderValue::from_static("sig"));
        headers.insert("paypal-cert-url", HeaderValue::from_static("https://c"));
        assert!(signature_from_headers(&headers).is_err());

        headers.insert("paypal-auth-algo", HeaderValue::from_static("SHA256withRSA"));
        let sig = signature_from_headers(&headers).unwrap();
        assert_eq!(sig.transmission_id, "t-1");
    }
}
