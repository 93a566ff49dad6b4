//! Adapters for the backend and third-party services checkout depends on.
//!
//! # Services
//!
//! - `addresses` - Saved delivery addresses
//! - `card` - Card validation and tokenization
//! - `cep` - Postal code lookup (`ViaCEP`)
//! - `coupons` - Coupon validation
//! - `geolocation` - Postal code detection from position or IP
//! - `orders` - Order validation and creation
//! - `payments` - PIX, card and hosted-checkout payments
//! - `shipping` - Carrier quotes, authorization and tracking
//!
//! Backend adapters are traits with an `Http*` implementation, so checkout
//! can run against fakes.

pub mod addresses;
pub mod card;
pub mod cep;
pub mod coupons;
pub mod geolocation;
pub mod orders;
pub mod payments;
pub mod shipping;

pub use addresses::{AddressService, HttpAddressService};
pub use card::{CardBrand, CardDetails, CardToken, CardTokenizer, MercadoPagoTokenizer};
pub use cep::{CepAddress, CepLookupError, ViaCepClient};
pub use coupons::{CouponService, HttpCouponService};
pub use geolocation::{Coordinates, GeolocationError, PostalCodeLocator, PostalCodeProvider};
pub use orders::{HttpOrderService, OrderService};
pub use payments::{HttpPaymentService, PaymentService};
pub use shipping::{
    CarrierAuthorization, HttpShippingService, QuoteRequest, ShippingRules, ShippingService,
    poll_tracking, quote_destination,
};
