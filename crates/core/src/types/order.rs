//! Orders created at checkout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cart::CartItem;
use super::id::{AddressId, OrderId, ProductId};
use super::money::Money;
use super::shipping::SelectedShipping;
use super::status::{OrderStatus, PaymentMethod, PaymentStatus};

/// A line of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub name: String,
    pub price: Money,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

impl From<&CartItem> for OrderItem {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.id,
            name: item.name.clone(),
            price: item.price,
            quantity: item.quantity,
            size: item.size.clone(),
        }
    }
}

/// A persisted order.
///
/// The totals are assigned by the server; payment is always charged for
/// `total` as returned here, never a client-side recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub order_number: String,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    pub subtotal: Money,
    pub shipping_cost: Money,
    #[serde(default)]
    pub discount: Money,
    pub total: Money,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Payload for `POST /api/orders/user/orders`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItem>,
    pub address_id: AddressId,
    /// `None` is rejected by client-side validation; kept optional so the
    /// validation can report it instead of the type system hiding it.
    pub shipping: Option<SelectedShipping>,
    pub shipping_cost: Money,
    pub payment_method: Option<PaymentMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    pub subtotal: Money,
    pub discount: Money,
    pub total: Money,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_order_deserializes_server_payload() {
        let order: Order = serde_json::from_str(
            r#"{
                "id": 321,
                "order_number": "VT-000321",
                "status": "pending",
                "payment_status": "pending",
                "subtotal": "150.00",
                "shipping_cost": 0,
                "discount": 15,
                "total": 135.0,
                "items": [{"product_id": 7, "name": "Vestido Midi", "price": 150, "quantity": 1, "size": "M"}],
                "payment_method": "pix"
            }"#,
        )
        .unwrap();

        assert_eq!(order.id, OrderId::new(321));
        assert_eq!(order.total, Money::from_cents(13_500));
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.payment_method, Some(PaymentMethod::Pix));
    }

    #[test]
    fn test_order_item_from_cart_item() {
        let cart_item = CartItem {
            id: ProductId::new(3),
            name: "Blusa".to_string(),
            price: Money::from_cents(7990),
            quantity: 2,
            image: String::new(),
            size: Some("P".to_string()),
            dimensions: crate::types::cart::Dimensions::default(),
        };
        let item = OrderItem::from(&cart_item);
        assert_eq!(item.product_id, ProductId::new(3));
        assert_eq!(item.quantity, 2);
        assert_eq!(item.size.as_deref(), Some("P"));
    }
}
