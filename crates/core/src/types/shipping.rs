//! Carrier quotes, the buyer's shipping selection, and tracking data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{CarrierId, OrderId, ShippingServiceId};
use super::money::Money;
use super::status::ShipmentStatus;

/// The carrier company behind a quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Carrier {
    pub id: CarrierId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// One carrier service quote for a route and parcel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingQuote {
    pub id: ShippingServiceId,
    /// Service name ("PAC", "SEDEX", ".Package").
    pub name: String,
    pub company: Carrier,
    /// Estimated business days to deliver.
    pub delivery_time: u32,
    pub price: Money,
    /// Discount the carrier already applied to `price`.
    #[serde(default)]
    pub discount: Money,
    /// Carrier-side quote reference, when the carrier issues one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_id: Option<String>,
}

/// Result of a quote request.
///
/// `authorized == false` means the store's carrier account rejected the
/// request; it is not the same as an empty `quotes` list (no service covers
/// the route) and callers must treat the two differently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingQuotes {
    pub authorized: bool,
    pub quotes: Vec<ShippingQuote>,
}

impl ShippingQuotes {
    #[must_use]
    pub const fn unauthorized() -> Self {
        Self {
            authorized: false,
            quotes: Vec::new(),
        }
    }

    /// The cheapest quote, ties broken by delivery time.
    #[must_use]
    pub fn cheapest(&self) -> Option<&ShippingQuote> {
        self.quotes
            .iter()
            .min_by(|a, b| a.price.cmp(&b.price).then(a.delivery_time.cmp(&b.delivery_time)))
    }
}

/// The shipping option chosen for this checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedShipping {
    pub service_id: ShippingServiceId,
    pub service_name: String,
    pub company_id: CarrierId,
    pub company_name: String,
    pub delivery_time: u32,
    /// Price charged to the buyer (zero when free shipping applies).
    pub price: Money,
    /// Carrier price before the free-shipping rule, for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_price: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_id: Option<String>,
}

impl SelectedShipping {
    /// Select a quote as-is.
    #[must_use]
    pub fn from_quote(quote: &ShippingQuote) -> Self {
        Self {
            service_id: quote.id,
            service_name: quote.name.clone(),
            company_id: quote.company.id,
            company_name: quote.company.name.clone(),
            delivery_time: quote.delivery_time,
            price: quote.price,
            original_price: None,
            quote_id: quote.quote_id.clone(),
        }
    }

    /// Whether the buyer pays nothing for shipping.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.price.is_zero()
    }
}

/// A tracking event reported by the carrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub date: DateTime<Utc>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Tracking status of an order's shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingInfo {
    pub order_id: OrderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_code: Option<String>,
    pub status: ShipmentStatus,
    #[serde(default)]
    pub events: Vec<TrackingEvent>,
}
