//! Core types for Vitrine.
//!
//! This module provides type-safe wrappers for the storefront domain and the
//! checkout data model.

pub mod address;
pub mod cart;
pub mod cep;
pub mod coupon;
pub mod id;
pub mod money;
pub mod order;
pub mod payment;
pub mod shipping;
pub mod status;
pub mod validation;

pub use address::{Address, AddressInput};
pub use cart::{Cart, CartItem, Dimensions};
pub use cep::{Cep, CepError, Region};
pub use coupon::{AppliedCoupon, CouponRef, CouponValidation};
pub use id::*;
pub use money::{Money, MoneyError};
pub use order::{CreateOrderRequest, Order, OrderItem};
pub use payment::{Payer, Payment, PaymentRequest, PixData, PreferenceRequest};
pub use shipping::{
    Carrier, SelectedShipping, ShippingQuote, ShippingQuotes, TrackingEvent, TrackingInfo,
};
pub use status::*;
pub use validation::{FieldError, ValidationErrors};
