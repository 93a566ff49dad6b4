//! Vitrine Core - Shared domain types.
//!
//! This crate provides the types shared by the storefront client library and
//! the command-line front end:
//! - `storefront` - Checkout orchestration and service adapters
//! - `cli` - Command-line driver for lookups, quotes and checkout
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no HTTP
//! clients, no timers. This keeps checkout math and validation testable
//! without a runtime.
//!
//! # Modules
//!
//! - [`types`] - Type-safe IDs, money, CEP, statuses and the checkout models

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
