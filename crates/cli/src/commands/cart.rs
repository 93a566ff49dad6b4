//! Saved cart commands.
//!
//! The cart lives in the local store and is shared with `quote` and
//! `checkout`. Cart files are YAML:
//!
//! ```yaml
//! items:
//!   - id: 12
//!     name: Vestido Midi
//!     price: 189.90
//!     quantity: 1
//!     size: M
//! ```

use std::error::Error;
use std::path::Path;

use serde::Deserialize;
use tracing::info;
use vitrine_core::{Cart, CartItem, Dimensions, Money, ProductId};
use vitrine_storefront::services::ShippingRules;
use vitrine_storefront::state::AppState;

#[derive(Deserialize)]
struct CartFile {
    items: Vec<CartItem>,
}

fn parse_cart(yaml: &str) -> Result<Cart, serde_yaml::Error> {
    let file: CartFile = serde_yaml::from_str(yaml)?;
    Ok(Cart::from_items(file.items))
}

/// Read a cart file.
pub async fn load_file(path: &Path) -> Result<Cart, Box<dyn Error>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("Cannot read {}: {e}", path.display()))?;
    Ok(parse_cart(&content)?)
}

pub async fn add(
    state: &AppState,
    id: i64,
    name: String,
    price: &str,
    quantity: u32,
    size: Option<String>,
) -> Result<(), Box<dyn Error>> {
    if quantity == 0 {
        return Err("Quantity must be at least 1".into());
    }
    let price = Money::parse(price)?;

    state
        .cart()
        .add_item(CartItem {
            id: ProductId::new(id),
            name,
            price,
            quantity,
            image: String::new(),
            size,
            dimensions: Dimensions::default(),
        })
        .await;
    show(state).await;
    Ok(())
}

pub async fn remove(state: &AppState, id: i64, size: Option<&str>) -> Result<(), Box<dyn Error>> {
    if !state.cart().remove_item(ProductId::new(id), size).await {
        return Err(format!("No cart line for product {id}").into());
    }
    show(state).await;
    Ok(())
}

/// Replace the saved cart with the lines of a cart file.
pub async fn import(state: &AppState, path: &Path) -> Result<(), Box<dyn Error>> {
    let cart = load_file(path).await?;
    state.cart().clear().await;
    for item in cart.items() {
        state.cart().add_item(item.clone()).await;
    }
    info!("Imported {} item(s) from {}", cart.item_count(), path.display());
    show(state).await;
    Ok(())
}

pub async fn show(state: &AppState) {
    let cart = state.cart().snapshot().await;
    log_cart(&cart, &ShippingRules::from_config(state.config()));
}

/// Log the cart lines, the subtotal and the free shipping progress.
pub fn log_cart(cart: &Cart, rules: &ShippingRules) {
    if cart.is_empty() {
        info!("Cart is empty");
        return;
    }

    for item in cart.items() {
        info!(
            product_id = %item.id,
            size = item.size.as_deref().unwrap_or("-"),
            "{} x{} @ {} = {}",
            item.name,
            item.quantity,
            item.price,
            item.line_total().round2()
        );
    }

    let subtotal = cart.subtotal();
    info!("Subtotal: {subtotal}");
    if rules.qualifies_for_free_shipping(subtotal) {
        info!("Free shipping unlocked");
    } else {
        info!(
            "Add {} more for free shipping",
            rules.remaining_for_free_shipping(subtotal)
        );
    }
}
