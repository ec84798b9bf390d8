pub mod mpesa;
pub mod paypal;

use std::str::FromStr;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::{order, webhook_event};
use crate::errors::ServiceError;
use crate::services::orders::OrderStatus;

/// Payment states, persisted as SCREAMING_SNAKE strings.
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
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

/// Records a gateway event in the idempotency ledger. Returns `false` when
/// the event id was already recorded, meaning its side effects have been
/// applied and the delivery is a replay.
pub(crate) async fn record_webhook_event<C: ConnectionTrait>(
    conn: &C,
    provider: &str,
    event_id: &str,
) -> Result<bool, ServiceError> {
    let now = Utc::now();
    let result = webhook_event::ActiveModel {
        id: Set(Uuid::new_v4()),
        provider: Set(provider.to_string()),
        event_id: Set(event_id.to_string()),
        received_at: Set(now),
        processed_at: Set(Some(now)),
    }
    .insert(conn)
    .await;

    match result {
        Ok(_) => Ok(true),
        Err(e) => match e.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(_)) => {
                info!(provider, event_id, "Duplicate gateway event absorbed");
                Ok(false)
            }
            _ => Err(e.into()),
        },
    }
}

/// Moves an order from PENDING to PROCESSING after a successful payment.
/// Orders already past PENDING are left alone; a payment confirmation must
/// never rewind fulfilment progress.
pub(crate) async fn mark_order_processing<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<(), ServiceError> {
    let order = order::Entity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

    let status = OrderStatus::from_str(&order.status)
        .map_err(|_| ServiceError::InternalError(format!("unknown order status {}", order.status)))?;
    if status != OrderStatus::Pending {
        return Ok(());
    }

    let mut active: order::ActiveModel = order.into();
    active.status = Set(OrderStatus::Processing.to_string());
    active.update(conn).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_status_round_trips_screaming_snake() {
        assert_eq!(PaymentStatus::Completed.to_string(), "COMPLETED");
        assert_eq!(
            PaymentStatus::from_str("FAILED").unwrap(),
            PaymentStatus::Failed
        );
        assert!(PaymentStatus::Pending.is_terminal() == false);
        assert!(PaymentStatus::Cancelled.is_terminal());
    }
}
