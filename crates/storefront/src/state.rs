//! Application state shared by every storefront operation.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::api::{ApiClient, AuthSession};
use crate::cart::{CartStore, SharedCart};
use crate::checkout::{Checkout, CheckoutServices, CheckoutSettings};
use crate::config::StorefrontConfig;
use crate::error::Result;
use crate::notify::Notifier;
use crate::services::{
    CarrierAuthorization, HttpAddressService, HttpCouponService, HttpOrderService,
    HttpPaymentService, HttpShippingService, MercadoPagoTokenizer, PostalCodeLocator,
    ViaCepClient,
};
use crate::storage::LocalStore;
use vitrine_core::Payer;

const CART_NAMESPACE: &str = "cart";
const AUTH_NAMESPACE: &str = "auth";
const SESSION_KEY: &str = "session";

/// Stored sessions are dropped after 30 days without use.
const SESSION_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Serialize, Deserialize)]
struct StoredSession {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl From<&AuthSession> for StoredSession {
    fn from(session: &AuthSession) -> Self {
        Self {
            access_token: session.access_token().expose_secret().to_string(),
            refresh_token: session
                .refresh_token()
                .map(|token| token.expose_secret().to_string()),
        }
    }
}

impl From<StoredSession> for AuthSession {
    fn from(stored: StoredSession) -> Self {
        Self::new(
            SecretString::from(stored.access_token),
            stored.refresh_token.map(SecretString::from),
        )
    }
}

/// Application state shared across the storefront.
///
/// This struct is cheaply cloneable via `Arc` and owns the HTTP clients,
/// the service adapters and the buyer's cart.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    api: ApiClient,
    cart: SharedCart,
    cart_store: CartStore,
    auth_store: LocalStore,
    addresses: HttpAddressService,
    coupons: Arc<HttpCouponService>,
    shipping: Arc<HttpShippingService>,
    orders: Arc<HttpOrderService>,
    payments: Arc<HttpPaymentService>,
    cep: ViaCepClient,
    locator: PostalCodeLocator,
    tokenizer: Option<MercadoPagoTokenizer>,
    carrier_authorization: Option<CarrierAuthorization>,
}

impl AppState {
    /// Build the state: HTTP clients, adapters, the stored cart and, unless
    /// tokens are configured, the stored session.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the local
    /// store cannot be read.
    #[instrument(skip_all, fields(api_url = %config.api_url))]
    pub async fn new(config: StorefrontConfig) -> Result<Self> {
        let store = LocalStore::new(&config.storage_dir, CART_NAMESPACE);
        let auth_store = store.with_namespace(AUTH_NAMESPACE);
        let cart_store = CartStore::new(store);

        let api = ApiClient::new(&config)?;
        if !api.is_authenticated().await {
            if let Some(stored) = auth_store.get::<StoredSession>(SESSION_KEY).await? {
                debug!("restored stored session");
                api.set_session(stored.into()).await;
            }
        }

        let cart = SharedCart::new(cart_store.load().await?);

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(crate::api::ApiError::from)?;
        let cep = ViaCepClient::new(http.clone(), &config.viacep_base_url);
        let locator = PostalCodeLocator::with_defaults(&http, config.mapsco_api_key.clone());
        let tokenizer = config
            .mercadopago
            .clone()
            .map(|mp| MercadoPagoTokenizer::new(http.clone(), mp));
        let carrier_authorization = config.melhorenvio.clone().map(CarrierAuthorization::new);

        info!(environment = config.environment.as_str(), "storefront state ready");

        Ok(Self {
            inner: Arc::new(AppStateInner {
                addresses: HttpAddressService::new(api.clone()),
                coupons: Arc::new(HttpCouponService::new(api.clone())),
                shipping: Arc::new(HttpShippingService::new(api.clone())),
                orders: Arc::new(HttpOrderService::new(api.clone())),
                payments: Arc::new(HttpPaymentService::new(api.clone())),
                config,
                api,
                cart,
                cart_store,
                auth_store,
                cep,
                locator,
                tokenizer,
                carrier_authorization,
            }),
        })
    }

    /// A checkout over the shared cart, talking to the backend adapters.
    #[must_use]
    pub fn checkout(&self, payer: Payer, notifier: Arc<dyn Notifier>) -> Checkout {
        self.checkout_with_cart(self.inner.cart.clone(), payer, notifier)
    }

    /// A checkout over another cart, such as one loaded from a file.
    #[must_use]
    pub fn checkout_with_cart(
        &self,
        cart: SharedCart,
        payer: Payer,
        notifier: Arc<dyn Notifier>,
    ) -> Checkout {
        let services = CheckoutServices {
            coupons: self.inner.coupons.clone(),
            shipping: self.inner.shipping.clone(),
            orders: self.inner.orders.clone(),
            payments: self.inner.payments.clone(),
            notifier,
        };
        Checkout::new(
            services,
            cart,
            CheckoutSettings::from_config(&self.inner.config),
            payer,
        )
    }

    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    #[must_use]
    pub fn cart(&self) -> &SharedCart {
        &self.inner.cart
    }

    #[must_use]
    pub fn addresses(&self) -> &HttpAddressService {
        &self.inner.addresses
    }

    #[must_use]
    pub fn shipping(&self) -> &HttpShippingService {
        &self.inner.shipping
    }

    #[must_use]
    pub fn orders(&self) -> &HttpOrderService {
        &self.inner.orders
    }

    #[must_use]
    pub fn cep(&self) -> &ViaCepClient {
        &self.inner.cep
    }

    #[must_use]
    pub fn locator(&self) -> &PostalCodeLocator {
        &self.inner.locator
    }

    /// Card tokenizer, when card payments are configured.
    #[must_use]
    pub fn tokenizer(&self) -> Option<&MercadoPagoTokenizer> {
        self.inner.tokenizer.as_ref()
    }

    /// Carrier authorization links, when the carrier app is configured.
    #[must_use]
    pub fn carrier_authorization(&self) -> Option<&CarrierAuthorization> {
        self.inner.carrier_authorization.as_ref()
    }

    /// Persist the cart and the session for the next run.
    ///
    /// # Errors
    ///
    /// Returns an error if the local store cannot be written.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        let cart = self.inner.cart.snapshot().await;
        self.inner.cart_store.save(&cart).await?;

        match self.inner.api.session().await {
            Some(session) => {
                self.inner
                    .auth_store
                    .set(SESSION_KEY, &StoredSession::from(&session), Some(SESSION_TTL))
                    .await?;
            }
            None => self.inner.auth_store.remove(SESSION_KEY).await?,
        }
        let purged = self.inner.auth_store.purge_expired().await?;
        debug!(purged, "storefront state saved");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use vitrine_core::{CartItem, Dimensions, Money, ProductId};

    fn config(dir: &std::path::Path) -> StorefrontConfig {
        let mut config = StorefrontConfig::for_api("http://127.0.0.1:9").unwrap();
        config.storage_dir = dir.to_path_buf();
        config
    }

    fn temp_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("vitrine-state-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_shutdown_persists_cart_and_session() {
        let dir = temp_dir();

        let state = AppState::new(config(&dir)).await.unwrap();
        assert!(state.cart().is_empty().await);
        state
            .cart()
            .add_item(CartItem {
                id: ProductId::new(8),
                name: "Camisa".to_string(),
                price: Money::from_cents(12_990),
                quantity: 1,
                image: String::new(),
                size: Some("G".to_string()),
                dimensions: Dimensions::default(),
            })
            .await;
        state
            .api()
            .set_session(AuthSession::new(SecretString::from("opaque-token"), None))
            .await;
        state.shutdown().await.unwrap();

        let restored = AppState::new(config(&dir)).await.unwrap();
        assert_eq!(restored.cart().items().await.len(), 1);
        let session = restored.api().session().await.unwrap();
        assert_eq!(session.access_token().expose_secret(), "opaque-token");

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_signed_out_session_is_removed() {
        let dir = temp_dir();
        let state = AppState::new(config(&dir)).await.unwrap();
        state
            .api()
            .set_session(AuthSession::new(SecretString::from("token"), None))
            .await;
        state.shutdown().await.unwrap();

        state.api().clear_session().await;
        state.shutdown().await.unwrap();

        let restored = AppState::new(config(&dir)).await.unwrap();
        assert!(!restored.api().is_authenticated().await);

        let _ = std::fs::remove_dir_all(dir);
    }
}
