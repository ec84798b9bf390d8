use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::{order, order_item, payment};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::inventory;
use crate::services::payments::PaymentStatus;

/// Order lifecycle states, persisted as SCREAMING_SNAKE strings.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Legal admin transitions. DELIVERED and CANCELLED orders are
    /// terminal; any other status may be set directly, except that
    /// cancellation is only reachable while the order has not left the
    /// warehouse.
    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        if self.is_terminal() || target == self {
            return false;
        }
        match target {
            OrderStatus::Cancelled => {
                matches!(self, OrderStatus::Pending | OrderStatus::Processing)
            }
            _ => true,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

pub const PAYMENT_METHODS: [&str; 3] = ["mpesa", "paypal", "cod"];

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderItemInput {
    pub product_id: Uuid,
    #[validate(length(min = 1, max = 255))]
    pub product_name: String,
    #[validate(length(min = 1, max = 32))]
    pub size: String,
    #[validate(range(min = 1))]
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ShippingInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 7, max = 20))]
    pub phone: String,
    #[validate(length(min = 1, max = 255))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    pub postal_code: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(
        length(min = 1, message = "order must contain at least one item"),
        nested
    )]
    pub items: Vec<OrderItemInput>,
    pub payment_method: String,
    /// Buyer phone charged when paying via mobile money.
    pub phone_number: Option<String>,
    #[validate(nested)]
    pub ship_to: ShippingInput,
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub payments: Vec<payment::Model>,
}

fn generate_order_number() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect();
    format!("ORD-{suffix}")
}

fn parse_status(raw: &str) -> Result<OrderStatus, ServiceError> {
    OrderStatus::from_str(raw)
        .map_err(|_| ServiceError::InternalError(format!("unknown order status {raw}")))
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: EventSender,
    shipping_fee: Decimal,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, event_sender: EventSender, shipping_fee: Decimal) -> Self {
        Self {
            db,
            event_sender,
            shipping_fee,
        }
    }

    /// Creates an order from cart line items. Inside one transaction: stock
    /// is reserved per item with a guarded decrement, the order and its item
    /// snapshots are inserted, and for mobile-money orders a PENDING payment
    /// row is created. Any stock shortfall aborts the whole checkout.
    #[instrument(skip(self, req), fields(customer_id = %customer_id))]
    pub async fn create_order(
        &self,
        customer_id: Uuid,
        req: CreateOrderRequest,
    ) -> Result<OrderDetail, ServiceError> {
        req.validate()?;

        if !PAYMENT_METHODS.contains(&req.payment_method.as_str()) {
            return Err(ServiceError::ValidationError(format!(
                "unsupported payment method: {}",
                req.payment_method
            )));
        }
        if req.payment_method == "mpesa" && req.phone_number.is_none() {
            return Err(ServiceError::ValidationError(
                "phone_number is required for mobile money payments".to_string(),
            ));
        }

        let subtotal: Decimal = req
            .items
            .iter()
            .map(|i| i.unit_price * Decimal::from(i.quantity))
            .sum();
        let total = subtotal + self.shipping_fee;

        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let txn = self.db.begin().await?;

        for item in &req.items {
            inventory::reserve_stock(&txn, item.product_id, &item.size, item.quantity).await?;
        }

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number()),
            customer_id: Set(customer_id),
            status: Set(OrderStatus::Pending.to_string()),
            subtotal: Set(subtotal),
            shipping_fee: Set(self.shipping_fee),
            total: Set(total),
            payment_method: Set(req.payment_method.clone()),
            ship_to_name: Set(req.ship_to.name.clone()),
            ship_to_phone: Set(req.ship_to.phone.clone()),
            ship_to_line1: Set(req.ship_to.line1.clone()),
            ship_to_line2: Set(req.ship_to.line2.clone()),
            ship_to_city: Set(req.ship_to.city.clone()),
            ship_to_postal_code: Set(req.ship_to.postal_code.clone()),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(req.items.len());
        for item in &req.items {
            let saved = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                product_name: Set(item.product_name.clone()),
                size: Set(item.size.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            items.push(saved);
        }

        let mut payments = Vec::new();
        if req.payment_method == "mpesa" {
            let saved = payment::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                provider: Set("mpesa".to_string()),
                amount: Set(total),
                status: Set(PaymentStatus::Pending.to_string()),
                phone_number: Set(req.phone_number.clone()),
                correlation_id: Set(None),
                receipt_number: Set(None),
                payer_id: Set(None),
                capture_id: Set(None),
                raw_callback: Set(None),
                created_at: Set(now),
                updated_at: Set(None),
            }
            .insert(&txn)
            .await?;
            payments.push(saved);
        }

        txn.commit().await?;

        info!(order_id = %order_id, order_number = %order_model.order_number, %total, "Order created");

        if let Err(e) = self.event_sender.send(Event::OrderCreated(order_id)).await {
            warn!(error = %e, "Failed to emit order created event");
        }

        Ok(OrderDetail {
            order: order_model,
            items,
            payments,
        })
    }

    /// Fetches one order with items and payments. When `customer_id` is
    /// given the lookup is owner-scoped, so a non-owner sees 404.
    pub async fn get_order(
        &self,
        order_id: Uuid,
        customer_id: Option<Uuid>,
    ) -> Result<OrderDetail, ServiceError> {
        let mut query = order::Entity::find_by_id(order_id);
        if let Some(owner) = customer_id {
            query = query.filter(order::Column::CustomerId.eq(owner));
        }
        let order = query
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;
        let payments = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        Ok(OrderDetail {
            order,
            items,
            payments,
        })
    }

    /// Lists a customer's own orders, newest first.
    pub async fn list_orders_for_customer(
        &self,
        customer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let paginator = order::Entity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Admin listing across all customers with an optional status filter.
    pub async fn list_orders(
        &self,
        status: Option<OrderStatus>,
        customer_id: Option<Uuid>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<order::Model>, u64), ServiceError> {
        let mut query = order::Entity::find().order_by_desc(order::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status.to_string()));
        }
        if let Some(customer) = customer_id {
            query = query.filter(order::Column::CustomerId.eq(customer));
        }
        let paginator = query.paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Owner-initiated cancellation. The lookup is scoped to the caller, so
    /// someone else's order id yields 404 rather than leaking its existence.
    #[instrument(skip(self), fields(order_id = %order_id, customer_id = %customer_id))]
    pub async fn cancel_own_order(
        &self,
        customer_id: Uuid,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .filter(order::Column::CustomerId.eq(customer_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let status = parse_status(&order.status)?;
        // Checked most-final-first so the caller gets the most specific
        // message for an order that has progressed past cancellation.
        match status {
            OrderStatus::Delivered => {
                return Err(ServiceError::InvalidStatus(
                    "Order has been delivered; contact support for returns".to_string(),
                ))
            }
            OrderStatus::Shipped => {
                return Err(ServiceError::InvalidStatus(
                    "Order has already shipped; contact support for returns".to_string(),
                ))
            }
            OrderStatus::Cancelled => {
                return Err(ServiceError::InvalidStatus(
                    "Order is already cancelled".to_string(),
                ))
            }
            OrderStatus::Pending | OrderStatus::Processing => {}
        }

        self.apply_cancellation(order).await
    }

    /// Admin status transition with the lifecycle rules enforced
    /// server-side. Moving to CANCELLED runs the same side effects as an
    /// owner cancellation.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        target: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let current = parse_status(&order.status)?;

        if current == OrderStatus::Cancelled {
            return Err(ServiceError::InvalidStatus(
                "Cancelled orders cannot be modified".to_string(),
            ));
        }
        if current == OrderStatus::Delivered {
            return Err(ServiceError::InvalidStatus(
                "Delivered orders cannot be modified".to_string(),
            ));
        }
        if !current.can_transition_to(target) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot move order from {current} to {target}"
            )));
        }

        if target == OrderStatus::Cancelled {
            return self.apply_cancellation(order).await;
        }

        let old_status = order.status.clone();
        let mut active: order::ActiveModel = order.into();
        active.status = Set(target.to_string());
        let updated = active.update(&*self.db).await?;

        if let Err(e) = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: updated.status.clone(),
            })
            .await
        {
            warn!(error = %e, "Failed to emit status change event");
        }

        Ok(updated)
    }

    /// Shared cancellation: mark the order CANCELLED and cancel any open
    /// payments inside a transaction, then restore stock best-effort.
    async fn apply_cancellation(&self, order: order::Model) -> Result<order::Model, ServiceError> {
        let order_id = order.id;
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        let txn = self.db.begin().await?;

        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled.to_string());
        let updated = active.update(&txn).await?;

        let open_payments = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(
                payment::Column::Status.is_in([
                    PaymentStatus::Pending.to_string(),
                    PaymentStatus::Completed.to_string(),
                ]),
            )
            .all(&txn)
            .await?;
        for p in open_payments {
            let payment_id = p.id;
            let mut active: payment::ActiveModel = p.into();
            active.status = Set(PaymentStatus::Cancelled.to_string());
            active.update(&txn).await?;
            if let Err(e) = self
                .event_sender
                .send(Event::PaymentCancelled(payment_id))
                .await
            {
                warn!(error = %e, "Failed to emit payment cancelled event");
            }
        }

        txn.commit().await?;

        // Restores happen after the status flip and tolerate partial
        // failure; a missing size row must not resurrect the order.
        inventory::restore_order_stock(&*self.db, &items).await;

        info!(order_id = %order_id, "Order cancelled");
        if let Err(e) = self.event_sender.send(Event::OrderCancelled(order_id)).await {
            warn!(error = %e, "Failed to emit order cancelled event");
        }

        Ok(updated)
    }
}
