//! Place an order for the cart and pay for it.
//!
//! # Usage
//!
//! ```bash
//! # PIX: prints the copy-paste code and waits for the payment
//! vitrine checkout --email ana@example.com --method pix
//!
//! # Card, tokenized here with the processor's public key
//! vitrine checkout --email ana@example.com --address 3 --method card \
//!     --card-number "5555 5555 5555 4444" --card-holder "ANA SILVA" \
//!     --card-expiry 11/30 --card-cvv 123 --cpf 12345678909
//!
//! # Hosted checkout: prints the payment page URL
//! vitrine checkout --email ana@example.com --method hosted --coupon BEMVINDA10
//! ```
//!
//! # Environment Variables
//!
//! - `MERCADOPAGO_PUBLIC_KEY` - Required for `--method card` without `--card-token`

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};
use secrecy::SecretString;
use tokio::time::Instant;
use tracing::{info, warn};
use vitrine_core::{Address, AddressId, PaymentMethod, Payer, ShippingServiceId};
use vitrine_storefront::cart::SharedCart;
use vitrine_storefront::checkout::{Checkout, CheckoutStep, PaymentOutcome};
use vitrine_storefront::error::StorefrontError;
use vitrine_storefront::notify::TracingNotifier;
use vitrine_storefront::services::card::validate_and_tokenize;
use vitrine_storefront::services::{AddressService, CardDetails, CardToken};
use vitrine_storefront::state::AppState;

use super::{Reported, cart};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    /// PIX instant transfer
    Pix,
    /// Credit card charged directly
    Card,
    /// Credit card on the processor's hosted page
    Hosted,
}

#[derive(Debug, Args)]
pub struct CheckoutArgs {
    /// Buyer e-mail, sent to the payment processor
    #[arg(long)]
    email: String,

    #[arg(long)]
    first_name: Option<String>,

    #[arg(long)]
    last_name: Option<String>,

    /// Buyer CPF
    #[arg(long)]
    cpf: Option<String>,

    /// Saved address ID; the default address when omitted
    #[arg(long)]
    address: Option<i64>,

    #[arg(long, value_enum)]
    method: MethodArg,

    /// Cart file (YAML); the saved cart when omitted
    #[arg(long)]
    cart: Option<PathBuf>,

    #[arg(long)]
    coupon: Option<String>,

    /// Shipping service ID; the cheapest when omitted
    #[arg(long)]
    shipping: Option<i64>,

    /// Card token from the processor, instead of card fields
    #[arg(long, requires = "card_brand", conflicts_with = "card_number")]
    card_token: Option<String>,

    /// Card network of --card-token (visa, master, amex, elo, hipercard)
    #[arg(long)]
    card_brand: Option<String>,

    #[arg(long)]
    card_number: Option<String>,

    #[arg(long)]
    card_holder: Option<String>,

    /// Expiry as MM/YY or MM/YYYY
    #[arg(long)]
    card_expiry: Option<String>,

    #[arg(long)]
    card_cvv: Option<String>,

    /// Seconds to wait for the processor to settle the payment
    #[arg(long, default_value_t = 600)]
    wait: u64,
}

/// Run the whole checkout: address, shipping, coupon, payment, order and
/// payment follow-up.
pub async fn run(state: &AppState, args: CheckoutArgs) -> Result<(), Box<dyn Error>> {
    let payer = Payer {
        email: args.email.clone(),
        first_name: args.first_name.clone(),
        last_name: args.last_name.clone(),
        identification: args.cpf.as_deref().map(digits),
    };
    let shared = match &args.cart {
        Some(path) => SharedCart::new(cart::load_file(path).await?),
        None => state.cart().clone(),
    };
    let mut checkout = state.checkout_with_cart(shared, payer, Arc::new(TracingNotifier));

    // Address and shipping
    let address = pick_address(state, args.address).await?;
    info!(address_id = %address.id, "Delivering to {}", address.one_line());
    checkout.select_address(address).map_err(Reported)?;

    let quotes = checkout.quote_shipping().await.map_err(Reported)?;
    let quote = match args.shipping {
        Some(id) => quotes
            .quotes
            .iter()
            .find(|q| q.id == ShippingServiceId::new(id))
            .ok_or_else(|| format!("Shipping service {id} is not offered for this address"))?,
        None => quotes.cheapest().ok_or(StorefrontError::NoShippingServices)?,
    }
    .clone();
    let shipping = checkout.select_shipping(&quote).await.map_err(Reported)?;
    info!(
        "Shipping: {} ({}), {}, {} dia(s) úteis",
        shipping.service_name, shipping.company_name, shipping.price, shipping.delivery_time
    );

    if let Some(code) = &args.coupon {
        let coupon = checkout.apply_coupon(code).await.map_err(Reported)?;
        info!(code = %coupon.coupon.code, "Coupon applied: -{}", coupon.discount());
    }
    advance(&mut checkout).await?;

    // Payment method
    match args.method {
        MethodArg::Pix => checkout.select_payment_method(PaymentMethod::Pix).map_err(Reported)?,
        MethodArg::Hosted => checkout
            .select_payment_method(PaymentMethod::CreditCard)
            .map_err(Reported)?,
        MethodArg::Card => {
            let token = card_token(state, &args).await?;
            info!(brand = %token.payment_method_id, "Card ending in {}", token.last_four);
            checkout.set_card_token(token).map_err(Reported)?;
        }
    }
    advance(&mut checkout).await?;

    // Confirmation
    let totals = checkout.totals().await;
    info!(
        "Subtotal {} + frete {} - desconto {} = {}",
        totals.subtotal, totals.shipping, totals.discount, totals.total
    );
    let order = checkout.create_order().await.map_err(Reported)?;
    info!(order_id = %order.id, "Order {} created", order.order_number);

    let outcome = checkout.process_payment().await.map_err(Reported)?;
    if let Some(pix) = checkout.state().payment.as_ref().and_then(|p| p.pix.as_ref()) {
        info!(qr_code = %pix.qr_code, "Pay with PIX copia e cola");
        if let Some(url) = &pix.ticket_url {
            info!(%url, "PIX QR code page");
        }
    }

    let outcome = wait_for_settlement(&mut checkout, outcome, Duration::from_secs(args.wait)).await;
    match outcome {
        PaymentOutcome::Approved => {
            checkout.close_success_modal();
            info!("Order {} confirmed", order.order_number);
        }
        PaymentOutcome::Rejected(detail) => {
            return Err(Reported(StorefrontError::PaymentRejected(detail)).into());
        }
        PaymentOutcome::Redirect(url) => info!(%url, "Complete the payment on the hosted page"),
        PaymentOutcome::Pending => {
            info!("Payment for order {} still pending; check it later", order.order_number);
        }
    }
    Ok(())
}

async fn advance(checkout: &mut Checkout) -> Result<(), Box<dyn Error>> {
    let from = checkout.step();
    if checkout.go_to_next_step().await {
        Ok(())
    } else {
        let to = from.next().unwrap_or(CheckoutStep::Processing);
        Err(format!("Cannot continue from the {from} step to the {to} step").into())
    }
}

/// Poll until the payment settles or `wait` elapses.
async fn wait_for_settlement(
    checkout: &mut Checkout,
    mut outcome: PaymentOutcome,
    wait: Duration,
) -> PaymentOutcome {
    let deadline = Instant::now() + wait;
    while outcome == PaymentOutcome::Pending && checkout.is_polling() {
        match tokio::time::timeout_at(deadline, checkout.next_payment_update()).await {
            Ok(Some(next)) => outcome = next,
            Ok(None) => break,
            Err(_) => {
                warn!(waited_secs = wait.as_secs(), "Stopped waiting for the payment");
                break;
            }
        }
    }
    outcome
}

async fn pick_address(state: &AppState, id: Option<i64>) -> Result<Address, Box<dyn Error>> {
    let address = match id {
        Some(id) => state
            .addresses()
            .list()
            .await?
            .into_iter()
            .find(|a| a.id == AddressId::new(id))
            .ok_or_else(|| format!("Address {id} not found"))?,
        None => state
            .addresses()
            .default_address()
            .await?
            .ok_or("No saved address; add one or pass --address")?,
    };
    Ok(address)
}

async fn card_token(state: &AppState, args: &CheckoutArgs) -> Result<CardToken, Box<dyn Error>> {
    if let (Some(token), Some(brand)) = (&args.card_token, &args.card_brand) {
        return Ok(CardToken {
            token: token.clone(),
            payment_method_id: brand.to_lowercase(),
            last_four: String::new(),
        });
    }

    let (Some(number), Some(holder), Some(expiry), Some(cvv)) = (
        &args.card_number,
        &args.card_holder,
        &args.card_expiry,
        &args.card_cvv,
    ) else {
        return Err(
            "Card payments need --card-token, or --card-number, --card-holder, --card-expiry and --card-cvv"
                .into(),
        );
    };
    let tokenizer = state
        .tokenizer()
        .ok_or("Card tokenization is not configured (MERCADOPAGO_PUBLIC_KEY)")?;

    let (month, year) = parse_expiry(expiry)?;
    let card = CardDetails {
        number: SecretString::from(number.clone()),
        holder_name: holder.clone(),
        expiration_month: month,
        expiration_year: year,
        security_code: SecretString::from(cvv.clone()),
        identification: args.cpf.as_deref().map(digits),
    };
    let today = chrono::Local::now().date_naive();
    Ok(validate_and_tokenize(tokenizer, &card, today).await?)
}

/// Parse `MM/YY` or `MM/YYYY`.
fn parse_expiry(input: &str) -> Result<(u32, u32), String> {
    let invalid = || format!("Invalid card expiry {input:?}; use MM/YY");
    let (month, year) = input.trim().split_once('/').ok_or_else(invalid)?;
    let month = month.trim().parse().map_err(|_| invalid())?;
    let year = year.trim();
    if !matches!(year.len(), 2 | 4) {
        return Err(invalid());
    }
    let year = year.parse().map_err(|_| invalid())?;
    Ok((month, year))
}

fn digits(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_expiry() {
        assert_eq!(parse_expiry("11/30").unwrap(), (11, 30));
        assert_eq!(parse_expiry(" 03/2031 ").unwrap(), (3, 2031));
        assert!(parse_expiry("1130").is_err());
        assert!(parse_expiry("11/3").is_err());
        assert!(parse_expiry("ab/30").is_err());
    }

    #[test]
    fn test_digits_strips_cpf_punctuation() {
        assert_eq!(digits("123.456.789-09"), "12345678909");
    }
}
