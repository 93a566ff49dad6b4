//! Shopping cart contents.
//!
//! The cart is plain data plus the mutations the storefront offers (add,
//! remove, change quantity, clear). Persistence lives in the storefront
//! crate.

use serde::{Deserialize, Serialize};

use super::id::ProductId;
use super::money::Money;

/// Parcel dimensions of one unit, used for carrier quotes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in centimetres.
    pub width_cm: u32,
    /// Height in centimetres.
    pub height_cm: u32,
    /// Length in centimetres.
    pub length_cm: u32,
    /// Weight in grams.
    pub weight_g: u32,
}

impl Dimensions {
    /// A folded garment in a mailer bag.
    pub const APPAREL: Self = Self {
        width_cm: 20,
        height_cm: 5,
        length_cm: 30,
        weight_g: 300,
    };
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::APPAREL
    }
}

/// A line in the cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: ProductId,
    pub name: String,
    /// Unit price.
    pub price: Money,
    pub quantity: u32,
    /// Product image URL.
    #[serde(default)]
    pub image: String,
    /// Garment size (e.g. "M", "42"); the same product in two sizes is two lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default)]
    pub dimensions: Dimensions,
}

impl CartItem {
    /// Price times quantity, unrounded.
    #[must_use]
    pub fn line_total(&self) -> Money {
        self.price * self.quantity
    }

    fn same_line(&self, id: ProductId, size: Option<&str>) -> bool {
        self.id == id && self.size.as_deref() == size
    }
}

/// The buyer's cart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    /// Create an empty cart.
    #[must_use]
    pub const fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Create a cart from existing lines, merging duplicates.
    #[must_use]
    pub fn from_items(items: impl IntoIterator<Item = CartItem>) -> Self {
        let mut cart = Self::new();
        for item in items {
            cart.add_item(item);
        }
        cart
    }

    #[must_use]
    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Σ price × quantity, unrounded.
    #[must_use]
    pub fn subtotal(&self) -> Money {
        self.items.iter().map(CartItem::line_total).sum()
    }

    /// Add an item. A line with the same product and size has its quantity
    /// increased instead. Zero-quantity items are ignored.
    pub fn add_item(&mut self, item: CartItem) {
        if item.quantity == 0 {
            return;
        }
        if let Some(existing) = self
            .items
            .iter_mut()
            .find(|line| line.same_line(item.id, item.size.as_deref()))
        {
            existing.quantity = existing.quantity.saturating_add(item.quantity);
            existing.price = item.price;
        } else {
            self.items.push(item);
        }
    }

    /// Remove a line. Returns `true` if something was removed.
    pub fn remove_item(&mut self, id: ProductId, size: Option<&str>) -> bool {
        let before = self.items.len();
        self.items.retain(|line| !line.same_line(id, size));
        self.items.len() != before
    }

    /// Set the quantity of a line; zero removes it. Returns `true` if the
    /// line exists.
    pub fn update_quantity(&mut self, id: ProductId, size: Option<&str>, quantity: u32) -> bool {
        if quantity == 0 {
            return self.remove_item(id, size);
        }
        match self.items.iter_mut().find(|line| line.same_line(id, size)) {
            Some(line) => {
                line.quantity = quantity;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
