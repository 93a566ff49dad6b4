//! The buyer's cart: an in-memory handle shared with checkout, persisted to
//! the local store between runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, instrument};
use vitrine_core::{Cart, CartItem, Money, ProductId};

use crate::storage::{LocalStore, StorageError};

/// Key the cart is stored under.
const CART_KEY: &str = "cart";

/// Stored carts expire after a week without changes.
pub const CART_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Shared, mutable cart.
///
/// Cloning shares the same cart; checkout clears it through its clone.
#[derive(Clone, Default)]
pub struct SharedCart {
    inner: Arc<RwLock<Cart>>,
}

impl SharedCart {
    #[must_use]
    pub fn new(cart: Cart) -> Self {
        Self {
            inner: Arc::new(RwLock::new(cart)),
        }
    }

    /// A copy of the current cart.
    pub async fn snapshot(&self) -> Cart {
        self.inner.read().await.clone()
    }

    pub async fn items(&self) -> Vec<CartItem> {
        self.inner.read().await.items().to_vec()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn subtotal(&self) -> Money {
        self.inner.read().await.subtotal()
    }

    pub async fn add_item(&self, item: CartItem) {
        self.inner.write().await.add_item(item);
    }

    pub async fn remove_item(&self, id: ProductId, size: Option<&str>) -> bool {
        self.inner.write().await.remove_item(id, size)
    }

    pub async fn update_quantity(&self, id: ProductId, size: Option<&str>, quantity: u32) -> bool {
        self.inner
            .write()
            .await
            .update_quantity(id, size, quantity)
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

/// Persists the cart in the local store.
#[derive(Debug, Clone)]
pub struct CartStore {
    store: LocalStore,
}

impl CartStore {
    #[must_use]
    pub const fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Load the stored cart, or an empty one.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Cart, StorageError> {
        let cart = self.store.get::<Cart>(CART_KEY).await?.unwrap_or_default();
        debug!(items = cart.items().len(), "cart loaded");
        Ok(cart)
    }

    /// Save the cart. An empty cart removes the stored entry.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be written.
    #[instrument(skip(self, cart), fields(items = cart.items().len()))]
    pub async fn save(&self, cart: &Cart) -> Result<(), StorageError> {
        if cart.is_empty() {
            return self.store.remove(CART_KEY).await;
        }
        self.store.set(CART_KEY, cart, Some(CART_TTL)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use vitrine_core::Dimensions;

    fn item(id: i64, cents: i64, quantity: u32) -> CartItem {
        CartItem {
            id: ProductId::new(id),
            name: format!("Produto {id}"),
            price: Money::from_cents(cents),
            quantity,
            image: String::new(),
            size: None,
            dimensions: Dimensions::default(),
        }
    }

    #[tokio::test]
    async fn test_clones_share_the_cart() {
        let cart = SharedCart::default();
        let checkout_view = cart.clone();
        cart.add_item(item(1, 5000, 2)).await;

        assert_eq!(checkout_view.subtotal().await, Money::from_cents(10_000));
        checkout_view.clear().await;
        assert!(cart.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_save_and_load() {
        let dir = std::env::temp_dir().join(format!("vitrine-cart-{}", uuid::Uuid::new_v4()));
        let store = CartStore::new(LocalStore::new(&dir, "storefront"));

        let cart = Cart::from_items([item(1, 7990, 1), item(2, 4990, 3)]);
        store.save(&cart).await.unwrap();
        assert_eq!(store.load().await.unwrap(), cart);

        store.save(&Cart::new()).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
