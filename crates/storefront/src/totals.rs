//! Checkout totals.
//!
//! Pure function of the cart lines, the selected shipping and the applied
//! coupon. Every component is rounded to cents before it is combined, and
//! the total never goes below zero.

use serde::Serialize;
use vitrine_core::{AppliedCoupon, CartItem, Money, SelectedShipping};

/// Order totals shown at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub subtotal: Money,
    pub shipping: Money,
    pub discount: Money,
    pub total: Money,
}

/// Compute totals.
///
/// - subtotal: sum of `price * quantity` over the lines
/// - shipping: the selected option's price, or zero
/// - discount: the coupon's discount when valid, or zero
/// - total: `subtotal + shipping - discount`, clamped at zero
#[must_use]
pub fn calculate_totals(
    items: &[CartItem],
    shipping: Option<&SelectedShipping>,
    coupon: Option<&AppliedCoupon>,
) -> Totals {
    let subtotal = items.iter().map(CartItem::line_total).sum::<Money>().round2();
    let shipping = shipping
        .map_or(Money::ZERO, |s| s.price)
        .non_negative()
        .round2();
    let discount = coupon
        .map_or(Money::ZERO, AppliedCoupon::discount)
        .non_negative()
        .round2();
    let total = (subtotal + shipping - discount).round2().non_negative();

    Totals {
        subtotal,
        shipping,
        discount,
        total,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use vitrine_core::{CarrierId, CouponId, CouponRef, Dimensions, ProductId, ShippingServiceId};

    fn item(cents: i64, quantity: u32) -> CartItem {
        CartItem {
            id: ProductId::new(cents),
            name: "Item".to_string(),
            price: Money::from_cents(cents),
            quantity,
            image: String::new(),
            size: None,
            dimensions: Dimensions::default(),
        }
    }

    fn shipping(cents: i64) -> SelectedShipping {
        SelectedShipping {
            service_id: ShippingServiceId::new(1),
            service_name: "PAC".to_string(),
            company_id: CarrierId::new(1),
            company_name: "Correios".to_string(),
            delivery_time: 5,
            price: Money::from_cents(cents),
            original_price: None,
            quote_id: None,
        }
    }

    fn coupon(cents: i64, valid: bool) -> AppliedCoupon {
        AppliedCoupon {
            valid,
            coupon: CouponRef {
                id: CouponId::new(1),
                code: "BEMVINDA".to_string(),
            },
            discount_amount: Money::from_cents(cents),
            message: String::new(),
        }
    }

    #[test]
    fn test_totals_with_shipping_and_coupon() {
        let items = [item(5000, 2), item(2500, 1)];
        let totals = calculate_totals(&items, Some(&shipping(1500)), Some(&coupon(1000, true)));
        assert_eq!(totals.subtotal, Money::from_cents(12_500));
        assert_eq!(totals.shipping, Money::from_cents(1500));
        assert_eq!(totals.discount, Money::from_cents(1000));
        assert_eq!(totals.total, Money::from_cents(13_000));
    }

    #[test]
    fn test_empty_cart_without_selections() {
        let totals = calculate_totals(&[], None, None);
        assert_eq!(totals.total, Money::ZERO);
    }

    #[test]
    fn test_invalid_coupon_grants_nothing() {
        let totals = calculate_totals(&[item(10_000, 1)], None, Some(&coupon(5000, false)));
        assert_eq!(totals.discount, Money::ZERO);
        assert_eq!(totals.total, Money::from_cents(10_000));
    }

    #[test]
    fn test_total_clamps_at_zero() {
        let totals = calculate_totals(&[item(3000, 1)], None, Some(&coupon(5000, true)));
        assert_eq!(totals.discount, Money::from_cents(5000));
        assert_eq!(totals.total, Money::ZERO);
    }

    #[test]
    fn test_fractional_prices_round_to_cents() {
        let mut line = item(0, 3);
        line.price = Money::parse("33.333").unwrap();
        let totals = calculate_totals(&[line], None, None);
        assert_eq!(totals.subtotal, Money::from_cents(10_000));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn prop_total_is_sum_of_parts(
            lines in prop::collection::vec((1_i64..50_000, 1_u32..6), 0..8),
            ship in 0_i64..10_000,
            discount_share in 0_u32..=100,
        ) {
            let items: Vec<CartItem> = lines.iter().map(|&(c, q)| item(c, q)).collect();
            let subtotal_cents: i64 = lines.iter().map(|&(c, q)| c * i64::from(q)).sum();
            let discount_cents = (subtotal_cents + ship) * i64::from(discount_share) / 100;

            let totals = calculate_totals(
                &items,
                Some(&shipping(ship)),
                Some(&coupon(discount_cents, true)),
            );

            prop_assert_eq!(totals.subtotal, Money::from_cents(subtotal_cents));
            prop_assert_eq!(
                totals.total,
                Money::from_cents(subtotal_cents + ship - discount_cents)
            );
            prop_assert!(!totals.total.is_negative());
        }

        #[test]
        fn prop_total_never_negative(
            cents in 0_i64..100_000,
            discount in 0_i64..1_000_000,
        ) {
            let totals = calculate_totals(&[item(cents, 1)], None, Some(&coupon(discount, true)));
            prop_assert!(!totals.total.is_negative());
        }
    }
}
