pub mod admin;
pub mod catalog;
pub mod customers;
pub mod orders;
pub mod payments;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::catalog::CatalogService;
use crate::services::customers::CustomerService;
use crate::services::inventory::StockService;
use crate::services::orders::OrderService;
use crate::services::payments::mpesa::{MpesaGateway, MpesaPaymentService};
use crate::services::payments::paypal::{PayPalGateway, PayPalPaymentService};
use crate::services::reports::ReportsService;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub stock: Arc<StockService>,
    pub catalog: Arc<CatalogService>,
    pub customers: Arc<CustomerService>,
    pub reports: Arc<ReportsService>,
    pub mpesa: Arc<MpesaPaymentService>,
    pub paypal: Arc<PayPalPaymentService>,
}

impl AppServices {
    /// Wires every service against the shared pool and event channel. The
    /// payment gateways are injected so tests can substitute fakes.
    pub fn new(
        db: Arc<DbPool>,
        event_sender: EventSender,
        config: &AppConfig,
        mpesa_gateway: Arc<dyn MpesaGateway>,
        paypal_gateway: Arc<dyn PayPalGateway>,
    ) -> Self {
        let orders = OrderService::new(db.clone(), event_sender.clone(), config.shipping_fee);

        Self {
            stock: Arc::new(StockService::new(db.clone(), event_sender.clone())),
            catalog: Arc::new(CatalogService::new(db.clone())),
            customers: Arc::new(CustomerService::new(db.clone())),
            reports: Arc::new(ReportsService::new(db.clone(), config.low_stock_threshold)),
            mpesa: Arc::new(MpesaPaymentService::new(
                db.clone(),
                event_sender.clone(),
                mpesa_gateway,
            )),
            paypal: Arc::new(PayPalPaymentService::new(
                db,
                event_sender,
                paypal_gateway,
                orders.clone(),
                config.paypal.exchange_rate,
            )),
            orders: Arc::new(orders),
        }
    }
}
