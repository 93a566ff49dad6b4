//! Integration test support for Vitrine.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p vitrine-integration-tests
//! ```
//!
//! Two kinds of doubles live here:
//!
//! - In-memory service fakes ([`FakeShipping`], [`FakeCoupons`],
//!   [`FakeOrders`], [`FakePayments`]) wired into a [`Harness`] for checkout
//!   flow tests.
//! - [`StubServer`], an `axum` server on a loopback port for testing
//!   the real adapters and the API client end to end.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;
use vitrine_core::{
    Address, AddressId, Carrier, CarrierId, Cart, CartItem, Cep, CouponId, CouponRef,
    CouponValidation, CreateOrderRequest, Dimensions, Money, Order, OrderId, OrderStatus, Payer,
    Payment, PaymentId, PaymentMethod, PaymentRequest, PaymentStatus, PreferenceRequest,
    ProductId, ShippingQuote, ShippingQuotes, ShippingServiceId, TrackingInfo,
};
use vitrine_storefront::api::{ApiClient, ApiError, AuthSession};
use vitrine_storefront::cart::SharedCart;
use vitrine_storefront::checkout::{Checkout, CheckoutServices, CheckoutSettings, CheckoutStep};
use vitrine_storefront::error::Result;
use vitrine_storefront::notify::RecordingNotifier;
use vitrine_storefront::services::shipping::QuoteRequest;
use vitrine_storefront::services::{
    CouponService, OrderService, PaymentService, ShippingRules, ShippingService,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Fixtures
// =============================================================================

/// Store origin used by every harness: Avenida Paulista, São Paulo.
pub const ORIGIN_CEP: &str = "01310100";

/// Free shipping threshold used by every harness: R$ 120,00.
pub const FREE_SHIPPING_CENTS: i64 = 12_000;

#[must_use]
pub fn item(id: i64, cents: i64, quantity: u32) -> CartItem {
    CartItem {
        id: ProductId::new(id),
        name: format!("Produto {id}"),
        price: Money::from_cents(cents),
        quantity,
        image: String::new(),
        size: Some("M".to_string()),
        dimensions: Dimensions::default(),
    }
}

#[must_use]
pub fn address(zip_code: &str) -> Address {
    Address {
        id: AddressId::new(3),
        label: "Casa".to_string(),
        street: "Rua das Flores".to_string(),
        number: "42".to_string(),
        complement: None,
        neighborhood: "Centro".to_string(),
        city: "Cidade".to_string(),
        state: "SP".to_string(),
        zip_code: zip_code.to_string(),
        is_default: true,
    }
}

#[must_use]
pub fn quote(id: i64, name: &str, cents: i64, days: u32) -> ShippingQuote {
    ShippingQuote {
        id: ShippingServiceId::new(id),
        name: name.to_string(),
        company: Carrier {
            id: CarrierId::new(1),
            name: "Correios".to_string(),
            picture: None,
        },
        delivery_time: days,
        price: Money::from_cents(cents),
        discount: Money::ZERO,
        quote_id: None,
    }
}

#[must_use]
pub fn payment(id: i64, status: PaymentStatus) -> Payment {
    Payment {
        payment_id: Some(PaymentId::new(id)),
        status,
        status_detail: None,
        pix: None,
        init_point: None,
    }
}

#[must_use]
pub fn payer() -> Payer {
    Payer {
        email: "ana@example.com".to_string(),
        first_name: Some("Ana".to_string()),
        last_name: Some("Souza".to_string()),
        identification: None,
    }
}

#[must_use]
pub fn valid_coupon(code: &str, discount_cents: i64) -> CouponValidation {
    CouponValidation {
        valid: true,
        coupon: Some(CouponRef {
            id: CouponId::new(9),
            code: code.to_string(),
        }),
        discount_amount: Some(Money::from_cents(discount_cents)),
        message: Some("Cupom aplicado".to_string()),
    }
}

// =============================================================================
// Service fakes
// =============================================================================

/// What [`FakeShipping`] answers quote requests with.
#[derive(Debug, Clone)]
pub enum ShippingAnswer {
    Quotes(Vec<ShippingQuote>),
    /// The store's carrier account is not authorized.
    Unauthorized,
    /// The backend cannot reach the carrier.
    Down,
}

pub struct FakeShipping {
    answer: Mutex<ShippingAnswer>,
    destinations: Mutex<Vec<Cep>>,
}

impl FakeShipping {
    #[must_use]
    pub fn new(answer: ShippingAnswer) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(answer),
            destinations: Mutex::new(Vec::new()),
        })
    }

    pub fn answer_with(&self, answer: ShippingAnswer) {
        *lock(&self.answer) = answer;
    }

    /// Destinations quoted so far.
    #[must_use]
    pub fn destinations(&self) -> Vec<Cep> {
        lock(&self.destinations).clone()
    }
}

#[async_trait]
impl ShippingService for FakeShipping {
    async fn quote(&self, request: &QuoteRequest) -> Result<ShippingQuotes> {
        lock(&self.destinations).push(request.destination().clone());
        let answer = lock(&self.answer).clone();
        match answer {
            ShippingAnswer::Quotes(quotes) => Ok(ShippingQuotes {
                authorized: true,
                quotes,
            }),
            ShippingAnswer::Unauthorized => Ok(ShippingQuotes::unauthorized()),
            ShippingAnswer::Down => Err(ApiError::Api {
                status: 503,
                message: "carrier unavailable".to_string(),
            }
            .into()),
        }
    }

    async fn authorization_status(&self) -> Result<bool> {
        Ok(!matches!(*lock(&self.answer), ShippingAnswer::Unauthorized))
    }

    async fn track(&self, order_id: OrderId) -> Result<TrackingInfo> {
        Err(ApiError::NotFound(format!("no shipment for order {order_id}")).into())
    }
}

pub struct FakeCoupons {
    answer: Mutex<CouponValidation>,
    subtotals: Mutex<Vec<Money>>,
}

impl FakeCoupons {
    #[must_use]
    pub fn new(answer: CouponValidation) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(answer),
            subtotals: Mutex::new(Vec::new()),
        })
    }

    pub fn answer_with(&self, answer: CouponValidation) {
        *lock(&self.answer) = answer;
    }

    /// Subtotals each validation was asked for.
    #[must_use]
    pub fn subtotals(&self) -> Vec<Money> {
        lock(&self.subtotals).clone()
    }
}

#[async_trait]
impl CouponService for FakeCoupons {
    async fn validate(
        &self,
        _code: &str,
        _items: &[CartItem],
        subtotal: Money,
    ) -> Result<CouponValidation> {
        lock(&self.subtotals).push(subtotal);
        Ok(lock(&self.answer).clone())
    }
}

/// Records order requests and echoes their totals back as the server's.
#[derive(Default)]
pub struct FakeOrders {
    created: Mutex<Vec<CreateOrderRequest>>,
}

impl FakeOrders {
    #[must_use]
    pub fn created(&self) -> Vec<CreateOrderRequest> {
        lock(&self.created).clone()
    }
}

#[async_trait]
impl OrderService for FakeOrders {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order> {
        let mut created = lock(&self.created);
        created.push(request.clone());
        let n = created.len();
        Ok(Order {
            id: OrderId::new(i64::try_from(n).unwrap_or(i64::MAX)),
            order_number: format!("VT-{n:06}"),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            subtotal: request.subtotal,
            shipping_cost: request.shipping_cost,
            discount: request.discount,
            total: request.total,
            items: request.items.clone(),
            payment_method: request.payment_method,
            created_at: None,
        })
    }

    async fn get_order(&self, id: OrderId) -> Result<Order> {
        Err(ApiError::NotFound(format!("order {id}")).into())
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        Ok(Vec::new())
    }
}

/// Answers submissions with a fixed payment and status polls with a script.
///
/// The last scripted status repeats once the script runs out.
pub struct FakePayments {
    submitted: Mutex<Payment>,
    script: Mutex<VecDeque<Payment>>,
    submissions: Mutex<Vec<(PaymentRequest, Uuid)>>,
    polls: AtomicUsize,
}

impl FakePayments {
    #[must_use]
    pub fn new(submitted: Payment) -> Arc<Self> {
        Arc::new(Self {
            submitted: Mutex::new(submitted),
            script: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
        })
    }

    pub fn submit_with(&self, payment: Payment) {
        *lock(&self.submitted) = payment;
    }

    pub fn script(&self, statuses: impl IntoIterator<Item = Payment>) {
        *lock(&self.script) = statuses.into_iter().collect();
    }

    /// Every submission with its idempotency key.
    #[must_use]
    pub fn submissions(&self) -> Vec<(PaymentRequest, Uuid)> {
        lock(&self.submissions).clone()
    }

    #[must_use]
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentService for FakePayments {
    async fn process_payment(&self, request: &PaymentRequest, key: Uuid) -> Result<Payment> {
        lock(&self.submissions).push((request.clone(), key));
        Ok(lock(&self.submitted).clone())
    }

    async fn create_preference(&self, request: &PreferenceRequest) -> Result<Payment> {
        Ok(Payment {
            payment_id: None,
            status: PaymentStatus::Pending,
            status_detail: None,
            pix: None,
            init_point: Some(format!("https://pagamento.test/checkout/{}", request.order_id)),
        })
    }

    async fn payment_status(&self, _id: PaymentId) -> Result<Payment> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut script = lock(&self.script);
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        Ok(next.unwrap_or_else(|| lock(&self.submitted).clone()))
    }
}

// =============================================================================
// Checkout harness
// =============================================================================

/// A checkout wired to in-memory fakes, polling every few milliseconds.
pub struct Harness {
    pub checkout: Checkout,
    pub notifier: Arc<RecordingNotifier>,
    pub shipping: Arc<FakeShipping>,
    pub coupons: Arc<FakeCoupons>,
    pub orders: Arc<FakeOrders>,
    pub payments: Arc<FakePayments>,
}

impl Harness {
    /// A harness with one carrier quote (PAC, R$ 22,90), a coupon the
    /// backend rejects and payments that stay pending.
    #[must_use]
    pub fn new(items: Vec<CartItem>) -> Self {
        let notifier = Arc::new(RecordingNotifier::new());
        let shipping = FakeShipping::new(ShippingAnswer::Quotes(vec![quote(1, "PAC", 2290, 6)]));
        let coupons = FakeCoupons::new(CouponValidation {
            valid: false,
            coupon: None,
            discount_amount: None,
            message: Some("Cupom inválido".to_string()),
        });
        let orders = Arc::new(FakeOrders::default());
        let payments = FakePayments::new(payment(77, PaymentStatus::Pending));

        let services = CheckoutServices {
            coupons: coupons.clone(),
            shipping: shipping.clone(),
            orders: orders.clone(),
            payments: payments.clone(),
            notifier: notifier.clone(),
        };
        let origin = Cep::parse(ORIGIN_CEP).unwrap_or_else(|_| unreachable!("fixed CEP"));
        let settings = CheckoutSettings {
            rules: ShippingRules::new(origin, Money::from_cents(FREE_SHIPPING_CENTS)),
            poll_interval: Duration::from_millis(5),
            installments: 1,
        };
        let cart = SharedCart::new(Cart::from_items(items));

        Self {
            checkout: Checkout::new(services, cart, settings, payer()),
            notifier,
            shipping,
            coupons,
            orders,
            payments,
        }
    }

    /// Walk to the confirmation step: address, first quote, `method`.
    ///
    /// # Panics
    ///
    /// Panics if any step is refused.
    pub async fn to_confirmation(&mut self, zip_code: &str, method: PaymentMethod) {
        let checkout = &mut self.checkout;
        checkout.select_address(address(zip_code)).unwrap_or_else(|e| panic!("address: {e}"));
        let quotes = checkout
            .quote_shipping()
            .await
            .unwrap_or_else(|e| panic!("quote: {e}"));
        let first = quotes.quotes.first().cloned().unwrap_or_else(|| panic!("no quotes"));
        checkout
            .select_shipping(&first)
            .await
            .unwrap_or_else(|e| panic!("shipping: {e}"));
        assert!(checkout.go_to_next_step().await, "address step refused");
        checkout
            .select_payment_method(method)
            .unwrap_or_else(|e| panic!("method: {e}"));
        assert!(checkout.go_to_next_step().await, "payment step refused");
        assert_eq!(checkout.step(), CheckoutStep::Confirmation);
    }
}

// =============================================================================
// Stub HTTP server
// =============================================================================

/// A request as the stub server received it. Header names are lowercase.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    /// The body parsed as JSON, or `null`.
    #[must_use]
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct StubResponse {
    status: u16,
    body: String,
    delay: Duration,
}

impl StubResponse {
    #[must_use]
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn empty(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
            delay: Duration::ZERO,
        }
    }

    /// Answer only after `delay`.
    #[must_use]
    pub const fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

type Handler = dyn Fn(&RecordedRequest) -> StubResponse + Send + Sync;

#[derive(Clone)]
struct StubState {
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// Loopback HTTP server that records every request and answers from a
/// handler.
pub struct StubServer {
    base_url: Url,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: JoinHandle<()>,
}

impl StubServer {
    /// Bind a loopback port and start serving.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if no port can be bound.
    pub async fn start<F>(handler: F) -> std::io::Result<Self>
    where
        F: Fn(&RecordedRequest) -> StubResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let base_url = Url::parse(&format!("http://{addr}"))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let requests = Arc::new(Mutex::new(Vec::new()));

        let app = Router::new().fallback(answer).with_state(StubState {
            handler: Arc::new(handler),
            requests: Arc::clone(&requests),
        });
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            base_url,
            requests,
            task,
        })
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.base_url
    }

    /// An API client for this server.
    #[must_use]
    pub fn api_client(&self, session: Option<AuthSession>) -> ApiClient {
        ApiClient::with_client(reqwest::Client::new(), self.base_url.clone(), session)
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    /// Requests received for `path`.
    #[must_use]
    pub fn hits(&self, path: &str) -> usize {
        lock(&self.requests).iter().filter(|r| r.path == path).count()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn answer(
    State(stub): State<StubState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers: headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    lock(&stub.requests).push(request.clone());

    let response = (stub.handler)(&request);
    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if response.body.is_empty() {
        status.into_response()
    } else {
        (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            response.body,
        )
            .into_response()
    }
}
