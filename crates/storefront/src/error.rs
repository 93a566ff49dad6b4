//! Unified error handling with Sentry integration.
//!
//! Every storefront operation returns `Result<T, StorefrontError>`. Callers
//! show [`StorefrontError::user_message`] to the buyer and hand the error to
//! [`report`], which captures unexpected failures to Sentry.

use thiserror::Error;
use vitrine_core::{CepError, ValidationErrors};

use crate::api::ApiError;
use crate::checkout::CheckoutStep;
use crate::config::ConfigError;
use crate::services::cep::CepLookupError;
use crate::services::geolocation::GeolocationError;
use crate::storage::StorageError;

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum StorefrontError {
    /// Backend API call failed.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Client-side validation rejected the input.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// Postal code is malformed.
    #[error("Invalid CEP: {0}")]
    InvalidCep(#[from] CepError),

    /// Postal code lookup failed.
    #[error("CEP lookup failed: {0}")]
    CepLookup(#[from] CepLookupError),

    /// No geolocation provider produced a postal code.
    #[error("Geolocation failed: {0}")]
    Geolocation(#[from] GeolocationError),

    /// Local persistence failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Checkout needs at least one cart item.
    #[error("Cart is empty")]
    EmptyCart,

    /// A required checkout selection is missing.
    #[error("No {0} selected")]
    MissingSelection(&'static str),

    /// Payment requires an order to exist.
    #[error("No order has been created")]
    OrderRequired,

    /// The operation is not available at the current step.
    #[error("Cannot {action} at the {step} step")]
    InvalidStep {
        action: &'static str,
        step: CheckoutStep,
    },

    /// The backend rejected the coupon.
    #[error("Coupon rejected: {0}")]
    CouponRejected(String),

    /// The carrier offers no service for the destination.
    #[error("No shipping service available for this CEP")]
    NoShippingServices,

    /// The processor rejected the payment.
    #[error("Payment rejected: {}", .0.as_deref().unwrap_or("no detail"))]
    PaymentRejected(Option<String>),
}

impl StorefrontError {
    /// Message suitable for showing to the buyer.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Api(err) => api_user_message(err),
            Self::Validation(errors) => errors.to_string(),
            Self::InvalidCep(_) => "Enter a valid 8-digit CEP.".to_string(),
            Self::CepLookup(CepLookupError::NotFound(_)) => "CEP not found.".to_string(),
            Self::CepLookup(_) => "Could not look up this CEP right now.".to_string(),
            Self::Geolocation(_) => {
                "Could not detect your CEP. Please type it in.".to_string()
            }
            Self::Storage(_) | Self::Config(_) => "Something went wrong. Please try again.".to_string(),
            Self::EmptyCart => "Your cart is empty.".to_string(),
            Self::MissingSelection(what) => format!("Please select a {what}."),
            Self::OrderRequired => "Please confirm your order first.".to_string(),
            Self::InvalidStep { .. } => "This action is not available right now.".to_string(),
            Self::CouponRejected(message) => message.clone(),
            Self::NoShippingServices => {
                "No shipping service delivers to this CEP.".to_string()
            }
            Self::PaymentRejected(detail) => detail.as_deref().map_or_else(
                || "Payment was not approved. Please try again.".to_string(),
                |detail| format!("Payment was not approved ({detail}). Please try again."),
            ),
        }
    }

    /// Whether the error is unexpected and should be sent to Sentry.
    #[must_use]
    pub const fn is_reportable(&self) -> bool {
        match self {
            Self::Api(err) => match err {
                ApiError::Api { status, .. } => *status >= 500,
                ApiError::Parse(_) | ApiError::InvalidUrl(_) => true,
                ApiError::Http(_)
                | ApiError::NotFound(_)
                | ApiError::SessionExpired
                | ApiError::RateLimited(_) => false,
            },
            Self::Storage(_) | Self::Config(_) => true,
            _ => false,
        }
    }

    /// Whether the buyer has to sign in again.
    #[must_use]
    pub const fn is_session_expired(&self) -> bool {
        matches!(self, Self::Api(ApiError::SessionExpired))
    }
}

fn api_user_message(err: &ApiError) -> String {
    match err {
        ApiError::SessionExpired => "Your session has expired. Please sign in again.".to_string(),
        ApiError::RateLimited(_) => {
            "Too many requests. Please wait a moment and try again.".to_string()
        }
        ApiError::Http(_) => {
            "Could not reach the server. Check your connection and try again.".to_string()
        }
        ApiError::Api { status, message } if *status < 500 && !message.trim().is_empty() => {
            message.clone()
        }
        ApiError::NotFound(message) if !message.trim().is_empty() => message.clone(),
        _ => "Something went wrong. Please try again.".to_string(),
    }
}

/// Result type alias for `StorefrontError`.
pub type Result<T> = std::result::Result<T, StorefrontError>;

/// Log an error, capturing it to Sentry when it is unexpected.
pub fn report(err: &StorefrontError) {
    if err.is_reportable() {
        let event_id = sentry::capture_error(err);
        tracing::error!(
            error = %err,
            sentry_event_id = %event_id,
            "Storefront error"
        );
    } else {
        tracing::warn!(error = %err, "Storefront operation failed");
    }
}

/// Set the Sentry user context for the signed-in buyer.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for a checkout action.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("checkout", "Selected shipping", Some(&[("service", "PAC")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
