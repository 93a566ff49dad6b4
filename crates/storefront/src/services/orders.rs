//! Order validation and creation.

use async_trait::async_trait;
use tracing::{info, instrument};
use vitrine_core::{CreateOrderRequest, Order, OrderId, ValidationErrors};

use crate::api::ApiClient;
use crate::error::Result;

const USER_ORDERS_PATH: &str = "/api/orders/user/orders";

/// Creates and reads the buyer's orders.
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Submit an order. The returned totals are the server's and are what
    /// payment charges.
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order>;

    async fn get_order(&self, id: OrderId) -> Result<Order>;

    async fn list_orders(&self) -> Result<Vec<Order>>;
}

/// Check an order before it is submitted.
///
/// # Errors
///
/// Returns every problem found: no items, no shipping option, no payment
/// method, a negative shipping cost or total.
pub fn validate_order(request: &CreateOrderRequest) -> std::result::Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    if request.items.is_empty() {
        errors.push("items", "order has no items");
    }
    if request.items.iter().any(|item| item.quantity == 0) {
        errors.push("items", "every item needs a quantity of at least 1");
    }
    if request.shipping.is_none() {
        errors.push("shipping", "select a shipping option");
    }
    if request.shipping_cost.is_negative() {
        errors.push("shipping_cost", "cannot be negative");
    }
    if request.payment_method.is_none() {
        errors.push("payment_method", "select a payment method");
    }
    if request.total.is_negative() {
        errors.push("total", "cannot be negative");
    }
    errors.into_result()
}

/// [`OrderService`] backed by the Vitrine API.
#[derive(Clone)]
pub struct HttpOrderService {
    api: ApiClient,
}

impl HttpOrderService {
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl OrderService for HttpOrderService {
    #[instrument(skip(self, request), fields(items = request.items.len(), total = %request.total))]
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order> {
        validate_order(request)?;
        let order: Order = self.api.post(USER_ORDERS_PATH, request).await?;
        info!(order_id = %order.id, order_number = %order.order_number, "order created");
        Ok(order)
    }

    #[instrument(skip(self))]
    async fn get_order(&self, id: OrderId) -> Result<Order> {
        Ok(self.api.get(&format!("{USER_ORDERS_PATH}/{id}")).await?)
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        Ok(self.api.get(USER_ORDERS_PATH).await?)
    }
}
