//! Discount coupons.

use serde::{Deserialize, Serialize};

use super::id::CouponId;
use super::money::Money;

/// Identity of a coupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponRef {
    pub id: CouponId,
    pub code: String,
}

/// Backend answer to a coupon validation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouponValidation {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon: Option<CouponRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount_amount: Option<Money>,
    /// Human-readable outcome ("Cupom aplicado", "Cupom expirado").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A coupon accepted for the current checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedCoupon {
    pub valid: bool,
    pub coupon: CouponRef,
    pub discount_amount: Money,
    pub message: String,
}

impl CouponValidation {
    /// Convert an accepted validation into an [`AppliedCoupon`].
    ///
    /// Returns `None` if the coupon was rejected or the backend omitted the
    /// coupon identity.
    #[must_use]
    pub fn into_applied(self) -> Option<AppliedCoupon> {
        if !self.valid {
            return None;
        }
        let coupon = self.coupon?;
        Some(AppliedCoupon {
            valid: true,
            coupon,
            discount_amount: self.discount_amount.unwrap_or(Money::ZERO).non_negative(),
            message: self.message.unwrap_or_default(),
        })
    }
}

impl AppliedCoupon {
    /// Discount this coupon grants (zero unless valid).
    #[must_use]
    pub fn discount(&self) -> Money {
        if self.valid {
            self.discount_amount
        } else {
            Money::ZERO
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_response_becomes_applied() {
        let response: CouponValidation = serde_json::from_str(
            r#"{"valid": true, "coupon": {"id": 9, "code": "BEMVINDA10"},
                "discount_amount": 15.5, "message": "Cupom aplicado"}"#,
        )
        .unwrap();
        let applied = response.into_applied().unwrap();
        assert_eq!(applied.coupon.code, "BEMVINDA10");
        assert_eq!(applied.discount(), Money::from_cents(1550));
    }

    #[test]
    fn test_invalid_response_is_not_applied() {
        let response: CouponValidation =
            serde_json::from_str(r#"{"valid": false, "message": "Cupom expirado"}"#).unwrap();
        assert!(response.into_applied().is_none());
    }

    #[test]
    fn test_negative_discount_is_clamped() {
        let response = CouponValidation {
            valid: true,
            coupon: Some(CouponRef {
                id: CouponId::new(1),
                code: "X".to_string(),
            }),
            discount_amount: Some(Money::from_cents(-100)),
            message: None,
        };
        assert_eq!(response.into_applied().unwrap().discount(), Money::ZERO);
    }
}
