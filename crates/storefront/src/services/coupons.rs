//! Coupon validation against the backend.

use async_trait::async_trait;
use serde::Serialize;
use tracing::instrument;
use vitrine_core::{CartItem, CouponValidation, Money, ProductId};

use crate::api::{ApiClient, ApiError};
use crate::error::Result;

/// Validation endpoint.
const VALIDATE_PATH: &str = "/api/coupons/validate";

/// Validates coupon codes for a cart.
#[async_trait]
pub trait CouponService: Send + Sync {
    /// Ask the backend whether `code` applies to these items.
    ///
    /// A rejected coupon is `Ok` with `valid == false`; `Err` means the
    /// backend could not be asked.
    async fn validate(
        &self,
        code: &str,
        items: &[CartItem],
        subtotal: Money,
    ) -> Result<CouponValidation>;
}

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    code: &'a str,
    items: Vec<ValidateItem>,
    subtotal: Money,
}

#[derive(Debug, Serialize)]
struct ValidateItem {
    product_id: ProductId,
    quantity: u32,
    price: Money,
}

/// [`CouponService`] backed by the Vitrine API.
#[derive(Clone)]
pub struct HttpCouponService {
    api: ApiClient,
}

impl HttpCouponService {
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl CouponService for HttpCouponService {
    #[instrument(skip(self, items), fields(items = items.len()))]
    async fn validate(
        &self,
        code: &str,
        items: &[CartItem],
        subtotal: Money,
    ) -> Result<CouponValidation> {
        let body = ValidateRequest {
            code,
            items: items
                .iter()
                .map(|item| ValidateItem {
                    product_id: item.id,
                    quantity: item.quantity,
                    price: item.price,
                })
                .collect(),
            subtotal,
        };

        match self.api.post(VALIDATE_PATH, &body).await {
            Ok(validation) => Ok(validation),
            Err(err) => rejection(err).map_err(Into::into),
        }
    }
}

/// The backend answers an unknown or expired coupon with `400`/`404`/`422`
/// and a message; that is a rejection, not a failure.
fn rejection(err: ApiError) -> std::result::Result<CouponValidation, ApiError> {
    let message = match err {
        ApiError::Api {
            status: 400 | 422,
            message,
        }
        | ApiError::NotFound(message) => message,
        other => return Err(other),
    };
    Ok(CouponValidation {
        valid: false,
        coupon: None,
        discount_amount: None,
        message: Some(if message.trim().is_empty() {
            "Invalid coupon".to_string()
        } else {
            message
        }),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_is_rejection() {
        let validation = rejection(ApiError::Api {
            status: 422,
            message: "Cupom expirado".to_string(),
        })
        .unwrap();
        assert!(!validation.valid);
        assert_eq!(validation.message.as_deref(), Some("Cupom expirado"));
    }

    #[test]
    fn test_unknown_coupon_is_rejection() {
        let validation = rejection(ApiError::NotFound(String::new())).unwrap();
        assert_eq!(validation.message.as_deref(), Some("Invalid coupon"));
    }

    #[test]
    fn test_server_error_is_failure() {
        let err = rejection(ApiError::Api {
            status: 503,
            message: "unavailable".to_string(),
        })
        .unwrap_err();
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn test_request_payload_shape() {
        let body = ValidateRequest {
            code: "BEMVINDA10",
            items: vec![ValidateItem {
                product_id: ProductId::new(7),
                quantity: 2,
                price: Money::from_cents(7990),
            }],
            subtotal: Money::from_cents(15_980),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], "BEMVINDA10");
        assert_eq!(json["items"][0]["product_id"], 7);
        assert_eq!(json["subtotal"], 159.8);
    }
}
