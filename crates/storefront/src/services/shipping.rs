//! Shipping quotes, the free-shipping rule, carrier authorization and
//! shipment tracking.
//!
//! Quotes come from the store's carrier account through the backend. When
//! the account is not authorized (or the carrier is unreachable) checkout
//! falls back to a flat regional rate keyed on the destination's region.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rand::distr::Alphanumeric;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};
use url::Url;
use vitrine_core::{
    Carrier, CarrierId, CartItem, Cep, Money, OrderId, Region, SelectedShipping,
    ShippingQuote, ShippingQuotes, ShippingServiceId, TrackingInfo,
};

use crate::api::{ApiClient, ApiError, ApiRequest};
use crate::config::{MelhorEnvioConfig, StorefrontConfig};
use crate::error::Result;
use crate::poll::{PollHandle, spawn_poller};

const CALCULATE_PATH: &str = "/api/shipping/calculate";
const AUTH_STATUS_PATH: &str = "/api/shipping/melhorenvio/status";
const AUTH_CALLBACK_PATH: &str = "/api/shipping/melhorenvio/callback";
const TRACKING_PATH: &str = "/api/shipping/tracking";

/// Permissions requested from the carrier account.
const AUTHORIZATION_SCOPES: &str = "shipping-calculate shipping-tracking orders-read";

/// Length of the anti-forgery `state` parameter.
const STATE_LENGTH: usize = 32;

// =============================================================================
// Quote request
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct PostalCode {
    postal_code: Cep,
}

/// A parcel line in a quote request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteProduct {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub length: u32,
    /// Kilograms.
    pub weight: Decimal,
    pub insurance_value: Money,
    pub quantity: u32,
}

/// Quote request for a route and set of items.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteRequest {
    from: PostalCode,
    to: PostalCode,
    products: Vec<QuoteProduct>,
}

impl QuoteRequest {
    #[must_use]
    pub fn new(from: Cep, to: Cep, items: &[CartItem]) -> Self {
        let products = items
            .iter()
            .map(|item| QuoteProduct {
                id: item.id.to_string(),
                width: item.dimensions.width_cm,
                height: item.dimensions.height_cm,
                length: item.dimensions.length_cm,
                weight: Decimal::new(i64::from(item.dimensions.weight_g), 3),
                insurance_value: item.price,
                quantity: item.quantity,
            })
            .collect();
        Self {
            from: PostalCode { postal_code: from },
            to: PostalCode { postal_code: to },
            products,
        }
    }

    #[must_use]
    pub const fn destination(&self) -> &Cep {
        &self.to.postal_code
    }

    #[must_use]
    pub fn products(&self) -> &[QuoteProduct] {
        &self.products
    }
}

// =============================================================================
// ShippingService
// =============================================================================

/// Carrier quotes and tracking.
#[async_trait]
pub trait ShippingService: Send + Sync {
    /// Quote every service for the route.
    ///
    /// `Ok` with `authorized == false` when the store's carrier account is
    /// not authorized; `Ok` with no quotes when nothing serves the route.
    async fn quote(&self, request: &QuoteRequest) -> Result<ShippingQuotes>;

    /// Whether the store's carrier account is currently authorized.
    async fn authorization_status(&self) -> Result<bool>;

    /// Current tracking state of an order's shipment.
    async fn track(&self, order_id: OrderId) -> Result<TrackingInfo>;
}

/// Quote a destination typed by the buyer.
///
/// # Errors
///
/// Returns `StorefrontError::InvalidCep` without contacting the carrier when
/// the destination does not have eight digits.
pub async fn quote_destination(
    service: &dyn ShippingService,
    origin: &Cep,
    destination: &str,
    items: &[CartItem],
) -> Result<ShippingQuotes> {
    let destination = Cep::parse(destination)?;
    service
        .quote(&QuoteRequest::new(origin.clone(), destination, items))
        .await
}

/// Follow an order's shipment, yielding each tracking snapshot until it is
/// delivered or cancelled.
pub fn poll_tracking(
    service: Arc<dyn ShippingService>,
    order_id: OrderId,
    interval: Duration,
) -> PollHandle<TrackingInfo> {
    spawn_poller(
        "tracking",
        interval,
        move || {
            let service = Arc::clone(&service);
            async move { service.track(order_id).await }
        },
        |info: &TrackingInfo| info.status.is_terminal(),
    )
}

/// A carrier service as the backend relays it. Services the carrier cannot
/// offer for the route come back with an `error` and no price.
#[derive(Debug, Deserialize)]
struct RawQuote {
    id: ShippingServiceId,
    name: String,
    #[serde(default)]
    price: Option<Money>,
    #[serde(default)]
    custom_price: Option<Money>,
    #[serde(default)]
    discount: Option<Money>,
    #[serde(default)]
    delivery_time: Option<u32>,
    #[serde(default)]
    custom_delivery_time: Option<u32>,
    company: Carrier,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    quote_id: Option<String>,
}

impl RawQuote {
    fn into_quote(self) -> Option<ShippingQuote> {
        if let Some(error) = &self.error {
            debug!(service = %self.name, %error, "service unavailable for route");
            return None;
        }
        Some(ShippingQuote {
            id: self.id,
            name: self.name,
            company: self.company,
            delivery_time: self.custom_delivery_time.or(self.delivery_time)?,
            price: self.custom_price.or(self.price)?,
            discount: self.discount.unwrap_or(Money::ZERO),
            quote_id: self.quote_id,
        })
    }
}

/// Interpret a calculate response: a list of services, `{"quotes": [...]}`,
/// or `{"authorized": false}`.
fn parse_quotes(body: Value) -> std::result::Result<ShippingQuotes, ApiError> {
    if body.get("authorized").and_then(Value::as_bool) == Some(false) {
        return Ok(ShippingQuotes::unauthorized());
    }
    let list = match body {
        Value::Object(mut map) => map.remove("quotes").unwrap_or(Value::Array(Vec::new())),
        other => other,
    };
    let raw: Vec<RawQuote> = serde_json::from_value(list)?;
    Ok(ShippingQuotes {
        authorized: true,
        quotes: raw.into_iter().filter_map(RawQuote::into_quote).collect(),
    })
}

/// Whether an error means the carrier account is not authorized.
fn is_unauthorized(err: &ApiError) -> bool {
    match err {
        ApiError::Api { status: 401 | 403, .. } => true,
        ApiError::Api { message, .. } => {
            let message = message.to_lowercase();
            ["not authorized", "unauthorized", "não autorizado", "nao autorizado"]
                .iter()
                .any(|needle| message.contains(needle))
        }
        _ => false,
    }
}

/// [`ShippingService`] backed by the Vitrine API.
#[derive(Clone)]
pub struct HttpShippingService {
    api: ApiClient,
}

#[derive(Deserialize)]
struct AuthorizationStatus {
    authorized: bool,
}

impl HttpShippingService {
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Hand the authorization `code` from the carrier's redirect to the
    /// backend, after checking `state` matches the one issued.
    ///
    /// # Errors
    ///
    /// Returns `StorefrontError::Validation` on a state mismatch, or the API
    /// error if the backend rejects the code.
    #[instrument(skip_all)]
    pub async fn complete_authorization(
        &self,
        code: &str,
        returned_state: &str,
        expected_state: &str,
    ) -> Result<()> {
        if returned_state != expected_state {
            let mut errors = vitrine_core::ValidationErrors::default();
            errors.push("state", "does not match the authorization request");
            return Err(errors.into());
        }
        self.api
            .send_empty(ApiRequest::post(AUTH_CALLBACK_PATH).json(&serde_json::json!({ "code": code }))?)
            .await?;
        info!("carrier account authorized");
        Ok(())
    }
}

#[async_trait]
impl ShippingService for HttpShippingService {
    #[instrument(skip(self, request), fields(to = %request.destination(), products = request.products().len()))]
    async fn quote(&self, request: &QuoteRequest) -> Result<ShippingQuotes> {
        let http = ApiRequest::post(CALCULATE_PATH).public().json(request)?;
        match self.api.send::<Value>(http).await {
            Ok(body) => Ok(parse_quotes(body)?),
            Err(err) if is_unauthorized(&err) => {
                info!(error = %err, "carrier account not authorized");
                Ok(ShippingQuotes::unauthorized())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn authorization_status(&self) -> Result<bool> {
        let status: AuthorizationStatus = self
            .api
            .send(ApiRequest::get(AUTH_STATUS_PATH).public())
            .await?;
        Ok(status.authorized)
    }

    #[instrument(skip(self))]
    async fn track(&self, order_id: OrderId) -> Result<TrackingInfo> {
        Ok(self.api.get(&format!("{TRACKING_PATH}/{order_id}")).await?)
    }
}

// =============================================================================
// Free shipping and regional fallback
// =============================================================================

/// Flat rate for a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionalRate {
    pub price: Money,
    pub delivery_days: u32,
}

/// Checkout shipping rules: the free-shipping threshold and the regional
/// fallback table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippingRules {
    pub origin: Cep,
    pub free_shipping_threshold: Money,
}

impl ShippingRules {
    #[must_use]
    pub const fn new(origin: Cep, free_shipping_threshold: Money) -> Self {
        Self {
            origin,
            free_shipping_threshold,
        }
    }

    #[must_use]
    pub fn from_config(config: &StorefrontConfig) -> Self {
        Self::new(config.origin_cep.clone(), config.free_shipping_threshold)
    }

    /// Whether the subtotal earns free shipping.
    #[must_use]
    pub fn qualifies_for_free_shipping(&self, subtotal: Money) -> bool {
        subtotal >= self.free_shipping_threshold
    }

    /// How much more the buyer must add to earn free shipping.
    #[must_use]
    pub fn remaining_for_free_shipping(&self, subtotal: Money) -> Money {
        (self.free_shipping_threshold - subtotal).non_negative()
    }

    /// The selection as charged: free when the subtotal qualifies, keeping
    /// the carrier price for display.
    #[must_use]
    pub fn apply(&self, selected: &SelectedShipping, subtotal: Money) -> SelectedShipping {
        let mut effective = selected.clone();
        if self.qualifies_for_free_shipping(subtotal) && !selected.price.is_zero() {
            effective.original_price = Some(selected.price);
            effective.price = Money::ZERO;
        }
        effective
    }

    /// Flat rate for a region.
    #[must_use]
    pub const fn regional_rate(region: Region) -> RegionalRate {
        let (cents, delivery_days) = match region {
            Region::Sudeste => (1990, 5),
            Region::Sul => (2490, 7),
            Region::CentroOeste => (2990, 8),
            Region::Nordeste => (3490, 10),
            Region::Norte => (3990, 12),
        };
        RegionalRate {
            price: Money::from_cents(cents),
            delivery_days,
        }
    }

    /// The standard-delivery quote offered when carrier quotes are not
    /// available.
    #[must_use]
    pub fn fallback_quote(&self, destination: &Cep) -> ShippingQuote {
        let region = destination.region();
        let rate = Self::regional_rate(region);
        ShippingQuote {
            id: ShippingServiceId::new(0),
            name: format!("Entrega padrão ({region})"),
            company: Carrier {
                id: CarrierId::new(0),
                name: "Vitrine".to_string(),
                picture: None,
            },
            delivery_time: rate.delivery_days,
            price: rate.price,
            discount: Money::ZERO,
            quote_id: None,
        }
    }
}

// =============================================================================
// Carrier authorization
// =============================================================================

/// Builds the carrier's OAuth authorization link for the store account.
#[derive(Debug, Clone)]
pub struct CarrierAuthorization {
    config: MelhorEnvioConfig,
}

impl CarrierAuthorization {
    #[must_use]
    pub const fn new(config: MelhorEnvioConfig) -> Self {
        Self { config }
    }

    /// A fresh random `state` to bind the redirect to this request.
    #[must_use]
    pub fn generate_state() -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(STATE_LENGTH)
            .map(char::from)
            .collect()
    }

    /// Authorization URL carrying `state`.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::InvalidUrl` if the configured authorize URL is
    /// invalid.
    pub fn authorization_url(&self, state: &str) -> std::result::Result<Url, ApiError> {
        let mut url = Url::parse(&self.config.authorize_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", AUTHORIZATION_SCOPES)
            .append_pair("state", state);
        Ok(url)
    }

    /// Start an authorization: the URL to open and the state to check the
    /// redirect against.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::InvalidUrl` if the configured authorize URL is
    /// invalid.
    pub fn start(&self) -> std::result::Result<(Url, String), ApiError> {
        let state = Self::generate_state();
        Ok((self.authorization_url(&state)?, state))
    }
}
