use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::MpesaSettings;
use crate::db::DbPool;
use crate::entities::{order, payment};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::payments::{mark_order_processing, record_webhook_event, PaymentStatus};

const PROVIDER: &str = "mpesa";

#[derive(Debug, Clone)]
pub struct StkPushRequest {
    pub phone_number: String,
    pub amount: Decimal,
    pub account_reference: String,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "CustomerMessage", default)]
    pub customer_message: String,
}

/// Mobile-money gateway boundary. Production uses [`DarajaClient`]; tests
/// substitute an in-process fake.
#[async_trait]
pub trait MpesaGateway: Send + Sync {
    async fn stk_push(&self, request: &StkPushRequest) -> Result<StkPushResponse, ServiceError>;
}

/// Safaricom Daraja REST client.
pub struct DarajaClient {
    http: reqwest::Client,
    settings: MpesaSettings,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl DarajaClient {
    pub fn new(settings: MpesaSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.settings.base_url
        );
        let resp = self
            .http
            .get(&url)
            .basic_auth(
                &self.settings.consumer_key,
                Some(&self.settings.consumer_secret),
            )
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("mpesa auth: {e}")))?;

        if !resp.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "mpesa auth returned {}",
                resp.status()
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("mpesa auth body: {e}")))?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl MpesaGateway for DarajaClient {
    async fn stk_push(&self, request: &StkPushRequest) -> Result<StkPushResponse, ServiceError> {
        let token = self.access_token().await?;
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = BASE64.encode(format!(
            "{}{}{}",
            self.settings.short_code, self.settings.passkey, timestamp
        ));

        let body = serde_json::json!({
            "BusinessShortCode": self.settings.short_code,
            "Password": password,
            "Timestamp": timestamp,
            "TransactionType": "CustomerPayBillOnline",
            "Amount": request.amount.round(),
            "PartyA": request.phone_number,
            "PartyB": self.settings.short_code,
            "PhoneNumber": request.phone_number,
            "CallBackURL": self.settings.callback_url,
            "AccountReference": request.account_reference,
            "TransactionDesc": request.description,
        });

        let resp = self
            .http
            .post(format!(
                "{}/mpesa/stkpush/v1/processrequest",
                self.settings.base_url
            ))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("mpesa stk push: {e}")))?;

        if !resp.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "mpesa stk push returned {}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("mpesa stk push body: {e}")))
    }
}

// ---- Callback payload (gateway -> us) ----

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StkCallbackPayload {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CallbackMetadata {
    #[serde(rename = "Item", default)]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

impl StkCallback {
    fn metadata_string(&self, name: &str) -> Option<String> {
        self.callback_metadata.as_ref()?.items.iter().find_map(|i| {
            if i.name != name {
                return None;
            }
            match i.value.as_ref()? {
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            }
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InitiatePaymentResponse {
    pub payment_id: Uuid,
    pub checkout_request_id: String,
    pub customer_message: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InitiatePaymentRequest {
    pub order_id: Uuid,
}

#[derive(Clone)]
pub struct MpesaPaymentService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    gateway: Arc<dyn MpesaGateway>,
}

impl MpesaPaymentService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, gateway: Arc<dyn MpesaGateway>) -> Self {
        Self {
            db,
            event_sender,
            gateway,
        }
    }

    /// Fires an STK push for the caller's order and stores the gateway's
    /// checkout-request-id so the asynchronous callback can be correlated.
    #[instrument(skip(self), fields(order_id = %order_id, customer_id = %customer_id))]
    pub async fn initiate(
        &self,
        customer_id: Uuid,
        order_id: Uuid,
    ) -> Result<InitiatePaymentResponse, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .filter(order::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let pending = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(payment::Column::Provider.eq(PROVIDER))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending.to_string()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Order {order_id} has no pending mobile money payment"
                ))
            })?;

        let phone = pending.phone_number.clone().ok_or_else(|| {
            ServiceError::ValidationError("Payment has no phone number on file".to_string())
        })?;

        let response = self
            .gateway
            .stk_push(&StkPushRequest {
                phone_number: phone,
                amount: pending.amount,
                account_reference: order.order_number.clone(),
                description: format!("Payment for order {}", order.order_number),
            })
            .await?;

        let payment_id = pending.id;
        let mut active: payment::ActiveModel = pending.into();
        active.correlation_id = Set(Some(response.checkout_request_id.clone()));
        active.update(&*self.db).await?;

        info!(
            payment_id = %payment_id,
            checkout_request_id = %response.checkout_request_id,
            "STK push initiated"
        );
        if let Err(e) = self
            .event_sender
            .send(Event::PaymentInitiated(payment_id))
            .await
        {
            warn!(error = %e, "Failed to emit payment initiated event");
        }

        Ok(InitiatePaymentResponse {
            payment_id,
            checkout_request_id: response.checkout_request_id,
            customer_message: response.customer_message,
        })
    }

    /// Applies an stkCallback result. Success completes the payment and
    /// moves the order to PROCESSING; failure marks the payment FAILED and
    /// leaves the order PENDING so the buyer can retry with another method.
    #[instrument(skip(self, payload))]
    pub async fn handle_callback(&self, payload: StkCallbackPayload) -> Result<(), ServiceError> {
        let callback = &payload.body.stk_callback;
        let checkout_request_id = callback.checkout_request_id.clone();

        let pending = payment::Entity::find()
            .filter(payment::Column::CorrelationId.eq(checkout_request_id.clone()))
            .filter(payment::Column::Provider.eq(PROVIDER))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No payment matches checkout request {checkout_request_id}"
                ))
            })?;

        let current = PaymentStatus::from_str(&pending.status).map_err(|_| {
            ServiceError::InternalError(format!("unknown payment status {}", pending.status))
        })?;

        let txn = self.db.begin().await?;

        if !record_webhook_event(&txn, PROVIDER, &checkout_request_id).await? {
            txn.commit().await?;
            return Ok(());
        }
        if current.is_terminal() {
            // Ledger was wiped or the payment settled through another path;
            // either way there is nothing left to apply.
            txn.commit().await?;
            return Ok(());
        }

        let payment_id = pending.id;
        let order_id = pending.order_id;
        let raw = serde_json::to_value(&payload)
            .map_err(|e| ServiceError::InternalError(format!("serialize callback: {e}")))?;

        if callback.result_code == 0 {
            let receipt = callback.metadata_string("MpesaReceiptNumber");
            let mut active: payment::ActiveModel = pending.into();
            active.status = Set(PaymentStatus::Completed.to_string());
            active.receipt_number = Set(receipt);
            active.raw_callback = Set(Some(raw));
            active.update(&txn).await?;

            mark_order_processing(&txn, order_id).await?;
            txn.commit().await?;

            info!(payment_id = %payment_id, order_id = %order_id, "Mobile money payment completed");
            if let Err(e) = self
                .event_sender
                .send(Event::PaymentCompleted(payment_id))
                .await
            {
                warn!(error = %e, "Failed to emit payment completed event");
            }
        } else {
            let mut active: payment::ActiveModel = pending.into();
            active.status = Set(PaymentStatus::Failed.to_string());
            active.raw_callback = Set(Some(raw));
            active.update(&txn).await?;
            txn.commit().await?;

            info!(
                payment_id = %payment_id,
                result_code = callback.result_code,
                result_desc = %callback.result_desc,
                "Mobile money payment failed"
            );
            if let Err(e) = self
                .event_sender
                .send(Event::PaymentFailed(payment_id))
                .await
            {
                warn!(error = %e, "Failed to emit payment failed event");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_metadata_lookup_handles_mixed_value_types() {
        let payload: StkCallbackPayload = serde_json::from_value(serde_json::json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "mr-1",
                    "CheckoutRequestID": "ws_CO_123",
                    "ResultCode": 0,
                    "ResultDesc": "Success",
                    "CallbackMetadata": {
                        "Item": [
                            {"Name": "Amount", "Value": 10500},
                            {"Name": "MpesaReceiptNumber", "Value": "QK12XYZ"},
                            {"Name": "Balance"}
                        ]
                    }
                }
            }
        }))
        .unwrap();

        let cb = &payload.body.stk_callback;
        assert_eq!(
            cb.metadata_string("MpesaReceiptNumber").as_deref(),
            Some("QK12XYZ")
        );
        assert_eq!(cb.metadata_string("Amount").as_deref(), Some("10500"));
        assert_eq!(cb.metadata_string("Balance"), None);
    }

    #[test]
    fn failure_callbacks_parse_without_metadata() {
        let payload: StkCallbackPayload = serde_json::from_value(serde_json::json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "mr-2",
                    "CheckoutRequestID": "ws_CO_456",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        }))
        .unwrap();

        assert_eq!(payload.body.stk_callback.result_code, 1032);
        assert!(payload.body.stk_callback.callback_metadata.is_none());
    }
}
