//! Shipping quotes for a destination CEP.

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use tracing::info;
use vitrine_core::{Payer, SelectedShipping, ShippingQuote};
use vitrine_storefront::cart::SharedCart;
use vitrine_storefront::notify::TracingNotifier;
use vitrine_storefront::state::AppState;

use super::cart;

/// Quote every carrier service for the cart, falling back to the regional
/// rate when the carrier cannot quote.
pub async fn quote(state: &AppState, cep: &str, cart_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let shared = match cart_file {
        Some(path) => SharedCart::new(cart::load_file(path).await?),
        None => state.cart().clone(),
    };
    // Estimates never reach payment, so the payer stays blank.
    let payer = Payer {
        email: String::new(),
        first_name: None,
        last_name: None,
        identification: None,
    };
    let mut checkout = state.checkout_with_cart(shared, payer, Arc::new(TracingNotifier));

    let quotes = checkout.estimate_shipping(cep).await?;
    let subtotal = checkout.cart().subtotal().await.round2();
    let rules = checkout.rules();

    if !quotes.authorized {
        info!("Carrier quotes unavailable; regional rate shown");
    }
    for quote in &quotes.quotes {
        let charged = rules.apply(&SelectedShipping::from_quote(quote), subtotal);
        let price = price_label(quote, &charged);
        info!(
            service_id = %quote.id,
            carrier = %quote.company.name,
            "{}: {price}, {} dia(s) úteis",
            quote.name,
            quote.delivery_time
        );
    }

    if !rules.qualifies_for_free_shipping(subtotal) {
        info!(
            "Add {} more for free shipping",
            rules.remaining_for_free_shipping(subtotal)
        );
    }
    Ok(())
}

fn price_label(quote: &ShippingQuote, charged: &SelectedShipping) -> String {
    if charged.is_free() {
        format!("grátis ({})", quote.price)
    } else {
        charged.price.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use vitrine_core::{Carrier, CarrierId, Cep, Money, ShippingServiceId};
    use vitrine_storefront::services::ShippingRules;

    fn pac() -> ShippingQuote {
        ShippingQuote {
            id: ShippingServiceId::new(2),
            name: "PAC".to_string(),
            company: Carrier {
                id: CarrierId::new(1),
                name: "Correios".to_string(),
                picture: None,
            },
            delivery_time: 6,
            price: Money::from_cents(2290),
            discount: Money::ZERO,
            quote_id: None,
        }
    }

    #[test]
    fn test_price_label_shows_currency_once() {
        let rules = ShippingRules::new(Cep::parse("01310100").unwrap(), Money::from_cents(12_000));
        let quote = pac();
        let selected = SelectedShipping::from_quote(&quote);

        let paid = rules.apply(&selected, Money::from_cents(5000));
        assert_eq!(price_label(&quote, &paid), "R$ 22,90");

        let free = rules.apply(&selected, Money::from_cents(15_000));
        assert_eq!(price_label(&quote, &free), "grátis (R$ 22,90)");
    }
}
