//! Vitrine Storefront library.
//!
//! The client side of the Vitrine store: the cart, checkout orchestration
//! and the adapters for the backend API and the third-party services
//! checkout depends on (postal code lookup, geolocation, card tokenization,
//! shipping carrier).
//!
//! # Layout
//!
//! - [`state::AppState`] builds every client once from
//!   [`config::StorefrontConfig`] and hands out [`checkout::Checkout`]s.
//! - [`checkout`] drives a purchase from address to payment.
//! - [`services`] holds the adapters; backend ones are traits with an HTTP
//!   implementation.
//! - [`api`] is the authenticated HTTP client with token refresh.
//! - [`storage`] persists the cart and session between runs.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod cart;
pub mod checkout;
pub mod config;
pub mod error;
pub mod notify;
pub mod poll;
pub mod services;
pub mod state;
pub mod storage;
pub mod totals;
