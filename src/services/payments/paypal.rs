use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::PayPalSettings;
use crate::db::DbPool;
use crate::entities::{order, payment};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::orders::{OrderService, OrderStatus};
use crate::services::payments::{mark_order_processing, record_webhook_event, PaymentStatus};

const PROVIDER: &str = "paypal";

#[derive(Debug, Clone)]
pub struct CreatedGatewayOrder {
    pub gateway_order_id: String,
    pub approval_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatewayCaptureResult {
    pub status: String,
    pub payer_id: Option<String>,
    pub capture_id: Option<String>,
}

/// Webhook transmission headers used for signature verification.
#[derive(Debug, Clone)]
pub struct WebhookSignature {
    pub transmission_id: String,
    pub transmission_time: String,
    pub transmission_sig: String,
    pub cert_url: String,
    pub auth_algo: String,
}

/// PayPal gateway boundary. Production uses [`PayPalClient`]; tests
/// substitute an in-process fake so webhook verification is controllable.
#[async_trait]
pub trait PayPalGateway: Send + Sync {
    async fn create_order(
        &self,
        amount_usd: Decimal,
        reference: &str,
    ) -> Result<CreatedGatewayOrder, ServiceError>;

    async fn capture_order(
        &self,
        gateway_order_id: &str,
    ) -> Result<GatewayCaptureResult, ServiceError>;

    async fn verify_webhook_signature(
        &self,
        signature: &WebhookSignature,
        event: &serde_json::Value,
    ) -> Result<bool, ServiceError>;
}

/// PayPal REST v2 client.
pub struct PayPalClient {
    http: reqwest::Client,
    settings: PayPalSettings,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GatewayOrderResponse {
    id: String,
    #[serde(default)]
    links: Vec<GatewayLink>,
}

#[derive(Debug, Deserialize)]
struct GatewayLink {
    href: String,
    rel: String,
}

impl PayPalClient {
    pub fn new(settings: PayPalSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    async fn access_token(&self) -> Result<String, ServiceError> {
        let resp = self
            .http
            .post(format!("{}/v1/oauth2/token", self.settings.base_url))
            .basic_auth(&self.settings.client_id, Some(&self.settings.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("paypal auth: {e}")))?;

        if !resp.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "paypal auth returned {}",
                resp.status()
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("paypal auth body: {e}")))?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl PayPalGateway for PayPalClient {
    async fn create_order(
        &self,
        amount_usd: Decimal,
        reference: &str,
    ) -> Result<CreatedGatewayOrder, ServiceError> {
        let token = self.access_token().await?;
        let body = serde_json::json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": reference,
                "amount": {
                    "currency_code": "USD",
                    "value": amount_usd.to_string(),
                }
            }]
        });

        let resp = self
            .http
            .post(format!("{}/v2/checkout/orders", self.settings.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("paypal create: {e}")))?;

        if !resp.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "paypal create returned {}",
                resp.status()
            )));
        }

        let created: GatewayOrderResponse = resp
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("paypal create body: {e}")))?;

        let approval_url = created
            .links
            .iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href.clone());

        Ok(CreatedGatewayOrder {
            gateway_order_id: created.id,
            approval_url,
        })
    }

    async fn capture_order(
        &self,
        gateway_order_id: &str,
    ) -> Result<GatewayCaptureResult, ServiceError> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .post(format!(
                "{}/v2/checkout/orders/{gateway_order_id}/capture",
                self.settings.base_url
            ))
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("paypal capture: {e}")))?;

        if !resp.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "paypal capture returned {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("paypal capture body: {e}")))?;

        let status = body
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or_default()
            .to_string();
        let payer_id = body
            .pointer("/payer/payer_id")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let capture_id = body
            .pointer("/purchase_units/0/payments/captures/0/id")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(GatewayCaptureResult {
            status,
            payer_id,
            capture_id,
        })
    }

    async fn verify_webhook_signature(
        &self,
        signature: &WebhookSignature,
        event: &serde_json::Value,
    ) -> Result<bool, ServiceError> {
        let token = self.access_token().await?;
        let body = serde_json::json!({
            "auth_algo": signature.auth_algo,
            "cert_url": signature.cert_url,
            "transmission_id": signature.transmission_id,
            "transmission_sig": signature.transmission_sig,
            "transmission_time": signature.transmission_time,
            "webhook_id": self.settings.webhook_id,
            "webhook_event": event,
        });

        let resp = self
            .http
            .post(format!(
                "{}/v1/notifications/verify-webhook-signature",
                self.settings.base_url
            ))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("paypal verify: {e}")))?;

        if !resp.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "paypal verify returned {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("paypal verify body: {e}")))?;

        Ok(body.get("verification_status").and_then(|v| v.as_str()) == Some("SUCCESS"))
    }
}

// ---- Webhook payload (gateway -> us) ----

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PayPalWebhookEvent {
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub resource: serde_json::Value,
}

impl PayPalWebhookEvent {
    /// The gateway order id the capture belongs to. Capture resources carry
    /// it under supplementary_data; order-level events carry it as the
    /// resource id itself.
    fn gateway_order_id(&self) -> Option<String> {
        self.resource
            .pointer("/supplementary_data/related_ids/order_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| {
                if self.event_type.starts_with("CHECKOUT.ORDER.") {
                    self.resource
                        .get("id")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                } else {
                    None
                }
            })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreatePayPalOrderRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreatePayPalOrderResponse {
    pub payment_id: Uuid,
    pub paypal_order_id: String,
    pub approval_url: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CapturePayPalOrderRequest {
    pub paypal_order_id: String,
}

#[derive(Clone)]
pub struct PayPalPaymentService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    gateway: Arc<dyn PayPalGateway>,
    orders: OrderService,
    exchange_rate: Decimal,
}

impl PayPalPaymentService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: EventSender,
        gateway: Arc<dyn PayPalGateway>,
        orders: OrderService,
        exchange_rate: Decimal,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            orders,
            exchange_rate,
        }
    }

    /// Creates a gateway order for the caller's storefront order and records
    /// a PENDING payment keyed by the PayPal order id.
    #[instrument(skip(self), fields(order_id = %order_id, customer_id = %customer_id))]
    pub async fn create_payment(
        &self,
        customer_id: Uuid,
        order_id: Uuid,
    ) -> Result<CreatePayPalOrderResponse, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .filter(order::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let status = OrderStatus::from_str(&order.status).map_err(|_| {
            ServiceError::InternalError(format!("unknown order status {}", order.status))
        })?;
        if status != OrderStatus::Pending {
            return Err(ServiceError::InvalidStatus(
                "Only pending orders can be paid".to_string(),
            ));
        }

        // Gateway orders are denominated in USD at a fixed configured rate.
        let amount_usd = (order.total / self.exchange_rate).round_dp(2);

        let created = self
            .gateway
            .create_order(amount_usd, &order.order_number)
            .await?;

        let saved = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            provider: Set(PROVIDER.to_string()),
            amount: Set(order.total),
            status: Set(PaymentStatus::Pending.to_string()),
            phone_number: Set(None),
            correlation_id: Set(Some(created.gateway_order_id.clone())),
            receipt_number: Set(None),
            payer_id: Set(None),
            capture_id: Set(None),
            raw_callback: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await?;

        info!(payment_id = %saved.id, paypal_order_id = %created.gateway_order_id, "PayPal order created");
        if let Err(e) = self
            .event_sender
            .send(Event::PaymentInitiated(saved.id))
            .await
        {
            warn!(error = %e, "Failed to emit payment initiated event");
        }

        Ok(CreatePayPalOrderResponse {
            payment_id: saved.id,
            paypal_order_id: created.gateway_order_id,
            approval_url: created.approval_url,
        })
    }

    /// Captures an approved gateway order on behalf of the buyer.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn capture_payment(
        &self,
        customer_id: Uuid,
        paypal_order_id: &str,
    ) -> Result<payment::Model, ServiceError> {
        let pending = self.find_payment(paypal_order_id).await?;

        // Ownership check through the storefront order.
        order::Entity::find_by_id(pending.order_id)
            .filter(order::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", pending.order_id))
            })?;

        let current = PaymentStatus::from_str(&pending.status).map_err(|_| {
            ServiceError::InternalError(format!("unknown payment status {}", pending.status))
        })?;
        if current.is_terminal() {
            return Err(ServiceError::InvalidStatus(format!(
                "Payment is already {current}"
            )));
        }

        let result = self.gateway.capture_order(paypal_order_id).await?;
        if result.status != "COMPLETED" {
            return Err(ServiceError::PaymentFailed(format!(
                "Capture returned status {}",
                result.status
            )));
        }

        let payment_id = pending.id;
        let order_id = pending.order_id;

        let txn = self.db.begin().await?;
        let mut active: payment::ActiveModel = pending.into();
        active.status = Set(PaymentStatus::Completed.to_string());
        active.payer_id = Set(result.payer_id);
        active.capture_id = Set(result.capture_id);
        let updated = active.update(&txn).await?;
        mark_order_processing(&txn, order_id).await?;
        txn.commit().await?;

        info!(payment_id = %payment_id, order_id = %order_id, "PayPal payment captured");
        if let Err(e) = self
            .event_sender
            .send(Event::PaymentCompleted(payment_id))
            .await
        {
            warn!(error = %e, "Failed to emit payment completed event");
        }

        Ok(updated)
    }

    /// Applies a gateway webhook. The signature is verified before the
    /// payload is trusted. The event id is recorded in the idempotency
    /// ledger inside the same transaction as the payment update, after the
    /// payment lookup, so a delivery that fails to resolve leaves no trace
    /// and the gateway's retry gets a clean run.
    #[instrument(skip(self, signature, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn handle_webhook(
        &self,
        signature: WebhookSignature,
        event: PayPalWebhookEvent,
    ) -> Result<(), ServiceError> {
        let raw = serde_json::to_value(&event)
            .map_err(|e| ServiceError::InternalError(format!("serialize webhook: {e}")))?;

        let verified = self
            .gateway
            .verify_webhook_signature(&signature, &raw)
            .await?;
        if !verified {
            return Err(ServiceError::Unauthorized(
                "Invalid webhook signature".to_string(),
            ));
        }

        let Some(gateway_order_id) = event.gateway_order_id() else {
            warn!(event_type = %event.event_type, "Webhook carries no gateway order id");
            return Err(ServiceError::BadRequest(
                "Webhook carries no gateway order id".to_string(),
            ));
        };

        let target = self.find_payment(&gateway_order_id).await.map_err(|e| {
            warn!(%gateway_order_id, "Webhook matches no known payment");
            e
        })?;

        match event.event_type.as_str() {
            "PAYMENT.CAPTURE.COMPLETED" => self.apply_capture_completed(target, &event, raw).await,
            "PAYMENT.CAPTURE.DENIED" => self.apply_capture_denied(target, &event.id, raw).await,
            "PAYMENT.CAPTURE.REFUNDED" => self.apply_capture_refunded(target, &event.id, raw).await,
            other => {
                info!(event_type = %other, "Ignoring unhandled webhook event type");
                Ok(())
            }
        }
    }

    async fn find_payment(&self, gateway_order_id: &str) -> Result<payment::Model, ServiceError> {
        payment::Entity::find()
            .filter(payment::Column::CorrelationId.eq(gateway_order_id))
            .filter(payment::Column::Provider.eq(PROVIDER))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No payment matches PayPal order {gateway_order_id}"
                ))
            })
    }

    async fn apply_capture_completed(
        &self,
        target: payment::Model,
        event: &PayPalWebhookEvent,
        raw: serde_json::Value,
    ) -> Result<(), ServiceError> {
        let current = PaymentStatus::from_str(&target.status).map_err(|_| {
            ServiceError::InternalError(format!("unknown payment status {}", target.status))
        })?;
        if current.is_terminal() {
            return Ok(());
        }

        let payment_id = target.id;
        let order_id = target.order_id;
        let capture_id = event
            .resource
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let txn = self.db.begin().await?;
        if !record_webhook_event(&txn, PROVIDER, &event.id).await? {
            txn.commit().await?;
            return Ok(());
        }
        let mut active: payment::ActiveModel = target.into();
        active.status = Set(PaymentStatus::Completed.to_string());
        active.capture_id = Set(capture_id);
        active.raw_callback = Set(Some(raw));
        active.update(&txn).await?;
        mark_order_processing(&txn, order_id).await?;
        txn.commit().await?;

        info!(payment_id = %payment_id, order_id = %order_id, "Capture completed via webhook");
        if let Err(e) = self
            .event_sender
            .send(Event::PaymentCompleted(payment_id))
            .await
        {
            warn!(error = %e, "Failed to emit payment completed event");
        }
        Ok(())
    }

    /// A denied capture fails the payment and cancels the order, returning
    /// its stock. This is stricter than the mobile-money failure path, where
    /// the buyer keeps the PENDING order to retry; a denial here means the
    /// buyer already left the approval flow.
    async fn apply_capture_denied(
        &self,
        target: payment::Model,
        event_id: &str,
        raw: serde_json::Value,
    ) -> Result<(), ServiceError> {
        let payment_id = target.id;
        let order_id = target.order_id;

        let txn = self.db.begin().await?;
        if !record_webhook_event(&txn, PROVIDER, event_id).await? {
            txn.commit().await?;
            return Ok(());
        }
        let mut active: payment::ActiveModel = target.into();
        active.status = Set(PaymentStatus::Failed.to_string());
        active.raw_callback = Set(Some(raw));
        active.update(&txn).await?;
        txn.commit().await?;

        if let Err(e) = self
            .event_sender
            .send(Event::PaymentFailed(payment_id))
            .await
        {
            warn!(error = %e, "Failed to emit payment failed event");
        }

        match self
            .orders
            .update_status(order_id, OrderStatus::Cancelled)
            .await
        {
            Ok(_) => Ok(()),
            // Already terminal; the denial has nothing left to undo.
            Err(ServiceError::InvalidStatus(msg)) => {
                info!(order_id = %order_id, %msg, "Order not cancellable after denial");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn apply_capture_refunded(
        &self,
        target: payment::Model,
        event_id: &str,
        raw: serde_json::Value,
    ) -> Result<(), ServiceError> {
        let payment_id = target.id;

        let txn = self.db.begin().await?;
        if !record_webhook_event(&txn, PROVIDER, event_id).await? {
            txn.commit().await?;
            return Ok(());
        }
        let mut active: payment::ActiveModel = target.into();
        active.status = Set(PaymentStatus::Cancelled.to_string());
        active.raw_callback = Set(Some(raw));
        active.update(&txn).await?;
        txn.commit().await?;

        info!(payment_id = %payment_id, "Capture refunded; payment cancelled, order untouched");
        if let Err(e) = self
            .event_sender
            .send(Event::PaymentCancelled(payment_id))
            .await
        {
            warn!(error = %e, "Failed to emit payment cancelled event");
        }
        Ok(())
    }
}
