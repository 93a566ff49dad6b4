//! Checkout orchestration.
//!
//! A [`Checkout`] walks the buyer through
//! `address → payment → confirmation → processing → {success | error}`.
//! It holds every selection (address, shipping option, payment method,
//! coupon), creates the order, submits the payment and follows it until the
//! processor settles.
//!
//! # Ownership
//!
//! `Checkout` is the only writer of its state and is driven through
//! `&mut self`. Backend calls go through the service traits in
//! [`crate::services`]; the cart is shared with the rest of the storefront
//! through [`SharedCart`]. Payment polling runs in a background task that
//! only sends status snapshots back; [`Checkout::next_payment_update`]
//! applies them. Dropping or resetting the checkout stops the poller.
//!
//! # Errors
//!
//! Failed actions return the error and also record its buyer-facing message
//! in [`CheckoutState::error`], notify it, and report it through
//! [`crate::error::report`]. A failure never moves the step, except a
//! rejected payment, which moves to [`CheckoutStep::Error`].

mod step;

pub use step::{CheckoutStep, StepChange};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use vitrine_core::{
    Address, AppliedCoupon, CartItem, Cep, CreateOrderRequest, Money, Order, OrderItem, Payer,
    Payment, PaymentId, PaymentMethod, PaymentRequest, PaymentStatus, PreferenceRequest,
    SelectedShipping, ShippingQuote, ShippingQuotes, ValidationErrors,
};

use crate::cart::SharedCart;
use crate::config::StorefrontConfig;
use crate::error::{Result, StorefrontError, add_breadcrumb, report};
use crate::notify::{Notice, Notifier};
use crate::poll::{PollHandle, spawn_poller};
use crate::services::card::CardToken;
use crate::services::orders::validate_order;
use crate::services::shipping::QuoteRequest;
use crate::services::{CouponService, OrderService, PaymentService, ShippingRules, ShippingService};
use crate::totals::{Totals, calculate_totals};

/// Backend adapters and the notice sink a checkout talks to.
#[derive(Clone)]
pub struct CheckoutServices {
    pub coupons: Arc<dyn CouponService>,
    pub shipping: Arc<dyn ShippingService>,
    pub orders: Arc<dyn OrderService>,
    pub payments: Arc<dyn PaymentService>,
    pub notifier: Arc<dyn Notifier>,
}

/// Store-level checkout settings.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub rules: ShippingRules,
    pub poll_interval: Duration,
    /// Card installments requested for direct card charges.
    pub installments: u32,
}

impl CheckoutSettings {
    #[must_use]
    pub fn from_config(config: &StorefrontConfig) -> Self {
        Self {
            rules: ShippingRules::from_config(config),
            poll_interval: config.payment_poll_interval,
            installments: 1,
        }
    }
}

/// What a payment submission or status update amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Approved,
    /// Rejected or otherwise settled without approval, with the processor
    /// detail when given.
    Rejected(Option<String>),
    /// Still with the processor; being polled.
    Pending,
    /// Hosted checkout: send the buyer to this URL.
    Redirect(String),
}

/// Everything the buyer has chosen so far.
#[derive(Debug, Clone, Default)]
pub struct CheckoutState {
    pub step: CheckoutStep,
    pub address: Option<Address>,
    /// Quotes for the selected address. `authorized == false` means the
    /// quotes are the regional fallback.
    pub shipping_quotes: Option<ShippingQuotes>,
    /// The option the buyer picked, at the carrier's price. See
    /// [`Checkout::effective_shipping`] for the price charged.
    pub selected_shipping: Option<SelectedShipping>,
    pub payment_method: Option<PaymentMethod>,
    pub card_token: Option<CardToken>,
    pub coupon: Option<AppliedCoupon>,
    pub order: Option<Order>,
    pub payment: Option<Payment>,
    /// Buyer-facing message of the last failure.
    pub error: Option<String>,
    /// Set once when the payment is approved; closing it moves to
    /// [`CheckoutStep::Success`].
    pub success_modal_open: bool,
}

/// A buyer's checkout session.
pub struct Checkout {
    services: CheckoutServices,
    cart: SharedCart,
    settings: CheckoutSettings,
    payer: Payer,
    state: CheckoutState,
    /// Subtotal the coupon was validated against.
    coupon_subtotal: Option<Money>,
    /// Idempotency key of the current payment attempt.
    attempt_key: Option<Uuid>,
    completed: bool,
    poller: Option<(PaymentId, PollHandle<Payment>)>,
}

impl Checkout {
    #[must_use]
    pub fn new(
        services: CheckoutServices,
        cart: SharedCart,
        settings: CheckoutSettings,
        payer: Payer,
    ) -> Self {
        debug!("checkout started");
        Self {
            services,
            cart,
            settings,
            payer,
            state: CheckoutState::default(),
            coupon_subtotal: None,
            attempt_key: None,
            completed: false,
            poller: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> &CheckoutState {
        &self.state
    }

    #[must_use]
    pub const fn step(&self) -> CheckoutStep {
        self.state.step
    }

    #[must_use]
    pub const fn rules(&self) -> &ShippingRules {
        &self.settings.rules
    }

    #[must_use]
    pub const fn cart(&self) -> &SharedCart {
        &self.cart
    }

    /// Whether a payment status poller is running.
    #[must_use]
    pub const fn is_polling(&self) -> bool {
        self.poller.is_some()
    }

    // =========================================================================
    // Address and shipping
    // =========================================================================

    /// Deliver to `address`. Quotes and the shipping selection are for the
    /// previous destination and are dropped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStep` once payment has started.
    pub fn select_address(&mut self, address: Address) -> Result<()> {
        let result = self.ensure_editable("change the address").map(|()| {
            add_breadcrumb("checkout", "Selected address", Some(&[("zip_code", &address.zip_code)]));
            self.state.address = Some(address);
            self.clear_shipping();
        });
        self.settle(result)
    }

    /// Unset the delivery address.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStep` once payment has started.
    pub fn clear_address(&mut self) -> Result<()> {
        let result = self.ensure_editable("change the address").map(|()| {
            self.state.address = None;
            self.clear_shipping();
        });
        self.settle(result)
    }

    fn clear_shipping(&mut self) {
        self.state.shipping_quotes = None;
        self.state.selected_shipping = None;
        self.discard_order("destination changed");
    }

    /// Quote shipping to the selected address and keep the quotes.
    ///
    /// When the carrier account is not authorized or the carrier cannot be
    /// reached, the regional fallback rate is offered instead.
    ///
    /// # Errors
    ///
    /// `MissingSelection` without an address, `InvalidCep` if its CEP is
    /// malformed, `EmptyCart`, or `NoShippingServices` when the carrier has
    /// nothing for the route.
    pub async fn quote_shipping(&mut self) -> Result<ShippingQuotes> {
        let result = self.try_quote_shipping().await;
        self.settle(result)
    }

    async fn try_quote_shipping(&mut self) -> Result<ShippingQuotes> {
        self.ensure_editable("quote shipping")?;
        let address = self
            .state
            .address
            .as_ref()
            .ok_or(StorefrontError::MissingSelection("address"))?;
        let destination = Cep::parse(&address.zip_code)?;
        let items = self.cart.items().await;

        let quotes = self.fetch_quotes(&destination, &items).await?;

        // Keep the buyer's pick if the same service is still offered.
        self.state.selected_shipping = self.state.selected_shipping.take().and_then(|selected| {
            quotes
                .quotes
                .iter()
                .find(|q| q.id == selected.service_id)
                .map(SelectedShipping::from_quote)
        });
        self.state.shipping_quotes = Some(quotes.clone());
        Ok(quotes)
    }

    /// Quote a CEP typed by the buyer without changing the checkout, as the
    /// cart's shipping calculator does.
    ///
    /// # Errors
    ///
    /// `InvalidCep` without a request when the input does not have eight
    /// digits; otherwise as [`Checkout::quote_shipping`].
    pub async fn estimate_shipping(&mut self, cep: &str) -> Result<ShippingQuotes> {
        let result = match Cep::parse(cep) {
            Ok(destination) => {
                let items = self.cart.items().await;
                self.fetch_quotes(&destination, &items).await
            }
            Err(err) => Err(err.into()),
        };
        self.settle(result)
    }

    async fn fetch_quotes(&self, destination: &Cep, items: &[CartItem]) -> Result<ShippingQuotes> {
        if items.is_empty() {
            return Err(StorefrontError::EmptyCart);
        }
        let request = QuoteRequest::new(self.settings.rules.origin.clone(), destination.clone(), items);

        match self.services.shipping.quote(&request).await {
            Ok(quotes) if quotes.authorized && quotes.quotes.is_empty() => {
                Err(StorefrontError::NoShippingServices)
            }
            Ok(quotes) if quotes.authorized => Ok(quotes),
            Ok(_) => {
                info!(to = %destination, "carrier not authorized, offering regional rate");
                self.services.notifier.notify(Notice::Info(
                    "Showing standard delivery rates for your region.".to_string(),
                ));
                Ok(self.fallback_quotes(destination))
            }
            Err(StorefrontError::Api(err)) => {
                warn!(to = %destination, error = %err, "carrier quote failed, offering regional rate");
                self.services.notifier.notify(Notice::Error(
                    "Could not reach the carrier. Showing standard delivery rates.".to_string(),
                ));
                Ok(self.fallback_quotes(destination))
            }
            Err(err) => Err(err),
        }
    }

    fn fallback_quotes(&self, destination: &Cep) -> ShippingQuotes {
        ShippingQuotes {
            authorized: false,
            quotes: vec![self.settings.rules.fallback_quote(destination)],
        }
    }

    /// Pick a shipping option. Returns it as charged for the current cart.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStep` once payment has started.
    pub async fn select_shipping(&mut self, quote: &ShippingQuote) -> Result<SelectedShipping> {
        if let Err(err) = self.ensure_editable("change shipping") {
            return self.settle(Err(err));
        }
        let selected = SelectedShipping::from_quote(quote);
        add_breadcrumb("checkout", "Selected shipping", Some(&[("service", &selected.service_name)]));
        self.state.selected_shipping = Some(selected.clone());
        self.discard_order("shipping changed");

        let subtotal = self.cart.subtotal().await.round2();
        Ok(self.settings.rules.apply(&selected, subtotal))
    }

    /// The selected option as charged: free when the current subtotal
    /// reaches the free-shipping threshold.
    pub async fn effective_shipping(&self) -> Option<SelectedShipping> {
        let selected = self.state.selected_shipping.as_ref()?;
        let subtotal = self.cart.subtotal().await.round2();
        Some(self.settings.rules.apply(selected, subtotal))
    }

    // =========================================================================
    // Payment method and coupon
    // =========================================================================

    /// # Errors
    ///
    /// Returns `InvalidStep` once payment has started.
    pub fn select_payment_method(&mut self, method: PaymentMethod) -> Result<()> {
        let result = self.ensure_editable("change the payment method").map(|()| {
            if method == PaymentMethod::Pix {
                self.state.card_token = None;
            }
            self.state.payment_method = Some(method);
        });
        self.settle(result)
    }

    /// Pay by card with a token from the card tokenizer. Without a token, a
    /// card payment goes through hosted checkout.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStep` once payment has started.
    pub fn set_card_token(&mut self, token: CardToken) -> Result<()> {
        let result = self.ensure_editable("change the card").map(|()| {
            self.state.payment_method = Some(PaymentMethod::CreditCard);
            self.state.card_token = Some(token);
        });
        self.settle(result)
    }

    /// Validate `code` against the cart and apply it.
    ///
    /// The coupon is validated against the subtotal at this moment and is
    /// not re-validated when the cart changes; see
    /// [`Checkout::coupon_may_be_stale`].
    ///
    /// # Errors
    ///
    /// `CouponRejected` with the backend's message when the coupon does not
    /// apply; the previous coupon, if any, is kept.
    #[instrument(skip(self))]
    pub async fn apply_coupon(&mut self, code: &str) -> Result<AppliedCoupon> {
        let result = self.try_apply_coupon(code).await;
        self.settle(result)
    }

    async fn try_apply_coupon(&mut self, code: &str) -> Result<AppliedCoupon> {
        self.ensure_editable("apply a coupon")?;
        let code = code.trim();
        if code.is_empty() {
            let mut errors = ValidationErrors::default();
            errors.push("coupon", "enter a coupon code");
            return Err(errors.into());
        }

        let items = self.cart.items().await;
        if items.is_empty() {
            return Err(StorefrontError::EmptyCart);
        }
        let subtotal = items.iter().map(CartItem::line_total).sum::<Money>().round2();

        let validation = self.services.coupons.validate(code, &items, subtotal).await?;
        let message = validation.message.clone();
        let Some(applied) = validation.into_applied() else {
            return Err(StorefrontError::CouponRejected(
                message.unwrap_or_else(|| "Invalid coupon".to_string()),
            ));
        };

        add_breadcrumb("checkout", "Applied coupon", Some(&[("code", code)]));
        self.state.coupon = Some(applied.clone());
        self.coupon_subtotal = Some(subtotal);
        self.discard_order("coupon applied");

        let notice = if applied.message.is_empty() {
            format!("Coupon {code} applied.")
        } else {
            applied.message.clone()
        };
        self.services.notifier.notify(Notice::Success(notice));
        Ok(applied)
    }

    /// Drop the applied coupon.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStep` once payment has started.
    pub fn remove_coupon(&mut self) -> Result<()> {
        let result = self.ensure_editable("remove the coupon").map(|()| {
            if self.state.coupon.take().is_some() {
                self.discard_order("coupon removed");
            }
            self.coupon_subtotal = None;
        });
        self.settle(result)
    }

    /// Whether the cart changed since the coupon was validated.
    pub async fn coupon_may_be_stale(&self) -> bool {
        match self.coupon_subtotal {
            Some(validated) => self.cart.subtotal().await.round2() != validated,
            None => false,
        }
    }

    /// Totals for the current cart and selections.
    pub async fn totals(&self) -> Totals {
        let items = self.cart.items().await;
        let subtotal = items.iter().map(CartItem::line_total).sum::<Money>().round2();
        let shipping = self
            .state
            .selected_shipping
            .as_ref()
            .map(|selected| self.settings.rules.apply(selected, subtotal));
        calculate_totals(&items, shipping.as_ref(), self.state.coupon.as_ref())
    }

    // =========================================================================
    // Steps
    // =========================================================================

    /// Advance one step if the current step's requirements are met.
    ///
    /// Returns `false` and changes nothing when they are not. Advancing from
    /// confirmation enters processing and submits the payment.
    pub async fn go_to_next_step(&mut self) -> bool {
        let from = self.state.step;
        let ready = match from {
            CheckoutStep::Address => {
                self.state.address.is_some() && !self.cart.is_empty().await
            }
            CheckoutStep::Payment => {
                self.state.address.is_some()
                    && self.state.payment_method.is_some()
                    && !self.cart.is_empty().await
            }
            CheckoutStep::Confirmation => self.state.order.is_some(),
            CheckoutStep::Processing | CheckoutStep::Success | CheckoutStep::Error => false,
        };
        let Some(to) = from.next().filter(|_| ready) else {
            debug!(step = %from, "next step not available");
            return false;
        };

        if to == CheckoutStep::Processing {
            if let Err(err) = self.process_payment().await {
                debug!(error = %err, "payment submission failed");
            }
        } else {
            self.set_step(to);
        }
        true
    }

    /// Go back one step. From the address step this is [`StepChange::Exit`]:
    /// the caller leaves checkout.
    ///
    /// An approved payment cannot be backed out of: the result is
    /// [`StepChange::Unchanged`].
    pub fn go_to_previous_step(&mut self) -> StepChange {
        let from = self.state.step;
        if self.completed || self.state.success_modal_open {
            debug!(step = %from, "payment approved, staying put");
            return StepChange::Unchanged;
        }
        let change = from.previous();
        if let StepChange::Moved(to) = change {
            match from {
                CheckoutStep::Processing => {
                    // The attempt key is kept while the order is: resubmitting
                    // resumes the same charge instead of creating another.
                    self.poller = None;
                    self.state.payment = None;
                }
                CheckoutStep::Error => self.clear_failed_payment(),
                _ => {}
            }
            self.state.error = None;
            self.set_step(to);
        }
        change
    }

    fn set_step(&mut self, to: CheckoutStep) {
        info!(from = %self.state.step, to = %to, "checkout step");
        add_breadcrumb("checkout", &format!("Step {to}"), None);
        self.state.step = to;
    }

    fn ensure_editable(&self, action: &'static str) -> Result<()> {
        if self.state.step.is_editable() {
            Ok(())
        } else {
            Err(StorefrontError::InvalidStep {
                action,
                step: self.state.step,
            })
        }
    }

    // =========================================================================
    // Order and payment
    // =========================================================================

    /// Create the order from the current selections. Calling it again
    /// returns the same order until a selection changes.
    ///
    /// # Errors
    ///
    /// `InvalidStep` outside the confirmation step, `MissingSelection` or
    /// `EmptyCart` when something is missing, or the backend error.
    pub async fn create_order(&mut self) -> Result<Order> {
        let result = self.try_create_order().await;
        self.settle(result)
    }

    async fn try_create_order(&mut self) -> Result<Order> {
        let step = self.state.step;
        if step != CheckoutStep::Confirmation {
            return Err(StorefrontError::InvalidStep {
                action: "create an order",
                step,
            });
        }
        if let Some(order) = &self.state.order {
            return Ok(order.clone());
        }

        let items = self.cart.items().await;
        if items.is_empty() {
            return Err(StorefrontError::EmptyCart);
        }
        let address_id = self
            .state
            .address
            .as_ref()
            .map(|address| address.id)
            .ok_or(StorefrontError::MissingSelection("address"))?;
        let payment_method = self
            .state
            .payment_method
            .ok_or(StorefrontError::MissingSelection("payment method"))?;
        let subtotal = items.iter().map(CartItem::line_total).sum::<Money>().round2();
        let shipping = self
            .state
            .selected_shipping
            .as_ref()
            .map(|selected| self.settings.rules.apply(selected, subtotal))
            .ok_or(StorefrontError::MissingSelection("shipping option"))?;

        let totals = calculate_totals(&items, Some(&shipping), self.state.coupon.as_ref());
        let request = CreateOrderRequest {
            items: items.iter().map(OrderItem::from).collect(),
            address_id,
            shipping: Some(shipping),
            shipping_cost: totals.shipping,
            payment_method: Some(payment_method),
            coupon_code: self.state.coupon.as_ref().map(|c| c.coupon.code.clone()),
            subtotal: totals.subtotal,
            discount: totals.discount,
            total: totals.total,
        };
        validate_order(&request)?;

        let order = self.services.orders.create_order(&request).await?;
        add_breadcrumb("checkout", "Order created", Some(&[("order_number", &order.order_number)]));
        self.state.order = Some(order.clone());
        Ok(order)
    }

    /// Forget an order that no longer matches the selections, as long as
    /// nothing has been charged for it. A new order gets a new attempt key.
    fn discard_order(&mut self, reason: &'static str) {
        if self.completed || self.state.payment.is_some() {
            return;
        }
        if let Some(order) = self.state.order.take() {
            info!(order_id = %order.id, reason, "order discarded, will be recreated");
            self.attempt_key = None;
        }
    }

    /// Enter processing and charge the order's total.
    ///
    /// PIX and tokenized cards are charged directly and polled while the
    /// processor works; a card without a token goes to hosted checkout.
    ///
    /// # Errors
    ///
    /// `OrderRequired` before [`Checkout::create_order`], `InvalidStep` when
    /// a payment is already under way, or the backend error. A rejected
    /// payment is not an error: it returns [`PaymentOutcome::Rejected`] and
    /// moves to the error step.
    pub async fn process_payment(&mut self) -> Result<PaymentOutcome> {
        let result = self.try_process_payment().await;
        self.settle(result)
    }

    async fn try_process_payment(&mut self) -> Result<PaymentOutcome> {
        let step = self.state.step;
        let resumable = step == CheckoutStep::Processing && self.state.payment.is_none();
        if step != CheckoutStep::Confirmation && !resumable {
            return Err(StorefrontError::InvalidStep {
                action: "process payment",
                step,
            });
        }
        let order = self.state.order.clone().ok_or(StorefrontError::OrderRequired)?;
        let method = self
            .state
            .payment_method
            .ok_or(StorefrontError::MissingSelection("payment method"))?;

        if step != CheckoutStep::Processing {
            self.set_step(CheckoutStep::Processing);
        }
        self.state.error = None;

        let token = match method {
            PaymentMethod::Pix => None,
            PaymentMethod::CreditCard => self.state.card_token.clone(),
        };
        let payment = if method == PaymentMethod::CreditCard && token.is_none() {
            let request = PreferenceRequest {
                order_id: order.id,
                transaction_amount: order.total,
                payer: self.payer.clone(),
            };
            self.services.payments.create_preference(&request).await?
        } else {
            let request = PaymentRequest {
                order_id: order.id,
                transaction_amount: order.total,
                payment_method: method,
                payment_method_id: token.as_ref().map(|t| t.payment_method_id.clone()),
                token: token.map(|t| t.token),
                installments: match method {
                    PaymentMethod::Pix => 1,
                    PaymentMethod::CreditCard => self.settings.installments,
                },
                payer: self.payer.clone(),
            };
            let key = *self.attempt_key.get_or_insert_with(Uuid::new_v4);
            self.services.payments.process_payment(&request, key).await?
        };

        Ok(self.handle_payment(payment).await)
    }

    /// Apply a status snapshot for the current payment.
    ///
    /// Returns `None` when the snapshot is for another payment or the
    /// checkout has moved on. An approval seen more than once completes the
    /// order only once.
    pub async fn apply_payment_update(&mut self, payment: Payment) -> Option<PaymentOutcome> {
        let current = self.state.payment.as_ref()?.payment_id;
        if self.state.step != CheckoutStep::Processing || current != payment.payment_id {
            debug!(payment_id = ?payment.payment_id, "ignoring stale payment update");
            return None;
        }
        Some(self.handle_payment(payment).await)
    }

    /// Wait for the next polled status and apply it. `None` when nothing is
    /// being polled.
    pub async fn next_payment_update(&mut self) -> Option<PaymentOutcome> {
        let (_, handle) = self.poller.as_mut()?;
        match handle.next().await {
            Some(payment) => self.apply_payment_update(payment).await,
            None => {
                self.poller = None;
                None
            }
        }
    }

    async fn handle_payment(&mut self, payment: Payment) -> PaymentOutcome {
        let outcome = match (&payment.init_point, payment.status) {
            (_, PaymentStatus::Approved) => PaymentOutcome::Approved,
            (Some(url), _) if payment.is_redirect() => PaymentOutcome::Redirect(url.clone()),
            (_, status) if status.is_terminal() => {
                PaymentOutcome::Rejected(payment.status_detail.clone())
            }
            _ => PaymentOutcome::Pending,
        };
        let poll_id = payment.payment_id.filter(|_| payment.needs_polling());
        self.state.payment = Some(payment);

        match &outcome {
            PaymentOutcome::Approved => {
                self.poller = None;
                self.complete().await;
            }
            PaymentOutcome::Rejected(detail) => {
                self.poller = None;
                self.set_step(CheckoutStep::Error);
                self.record(&StorefrontError::PaymentRejected(detail.clone()));
            }
            PaymentOutcome::Redirect(url) => {
                self.poller = None;
                self.services
                    .notifier
                    .notify(Notice::Redirect { url: url.clone() });
            }
            PaymentOutcome::Pending => {
                if let Some(id) = poll_id {
                    self.start_polling(id);
                }
            }
        }
        outcome
    }

    fn start_polling(&mut self, id: PaymentId) {
        if self.poller.as_ref().is_some_and(|(polling, _)| *polling == id) {
            return;
        }
        debug!(payment_id = %id, "polling payment status");
        let payments = Arc::clone(&self.services.payments);
        let handle = spawn_poller(
            "payment",
            self.settings.poll_interval,
            move || {
                let payments = Arc::clone(&payments);
                async move { payments.payment_status(id).await }
            },
            |payment: &Payment| payment.status.is_terminal(),
        );
        self.poller = Some((id, handle));
    }

    /// Approval: clear the cart and announce the order, once.
    async fn complete(&mut self) {
        if self.completed {
            debug!("approval already handled");
            return;
        }
        self.completed = true;
        self.cart.clear().await;
        self.state.success_modal_open = true;

        let order_number = self
            .state
            .order
            .as_ref()
            .map(|order| order.order_number.clone())
            .unwrap_or_default();
        info!(%order_number, "payment approved");
        add_breadcrumb("checkout", "Payment approved", Some(&[("order_number", &order_number)]));
        self.services
            .notifier
            .notify(Notice::OrderCompleted { order_number });
    }

    /// Leave the error step for the payment step to try again. The order is
    /// kept; the failed payment and its card token are dropped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStep` outside the error step.
    pub fn retry_payment(&mut self) -> Result<()> {
        let step = self.state.step;
        if step != CheckoutStep::Error {
            return self.settle(Err(StorefrontError::InvalidStep {
                action: "retry payment",
                step,
            }));
        }
        self.clear_failed_payment();
        self.state.error = None;
        self.set_step(CheckoutStep::Payment);
        Ok(())
    }

    fn clear_failed_payment(&mut self) {
        self.poller = None;
        self.state.payment = None;
        self.state.card_token = None;
        self.attempt_key = None;
    }

    /// Close the approval confirmation and finish on the success step.
    /// Returns `false` if it was not open.
    pub fn close_success_modal(&mut self) -> bool {
        if !self.state.success_modal_open {
            return false;
        }
        self.state.success_modal_open = false;
        self.set_step(CheckoutStep::Success);
        true
    }

    /// Start over: every selection is dropped and polling stops. The cart is
    /// left as it is.
    pub fn reset(&mut self) {
        debug!(step = %self.state.step, "checkout reset");
        self.poller = None;
        self.state = CheckoutState::default();
        self.coupon_subtotal = None;
        self.attempt_key = None;
        self.completed = false;
    }

    // =========================================================================
    // Errors
    // =========================================================================

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) if self.state.step != CheckoutStep::Error => self.state.error = None,
            Ok(_) => {}
            Err(err) => self.record(err),
        }
        result
    }

    fn record(&mut self, err: &StorefrontError) {
        let message = err.user_message();
        self.state.error = Some(message.clone());
        self.services.notifier.notify(Notice::Error(message));
        report(err);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use vitrine_core::{
        AddressId, Carrier, CarrierId, Cart, CouponId, CouponRef, CouponValidation, Dimensions,
        OrderId, OrderStatus, ProductId, ShippingServiceId, TrackingInfo,
    };

    use crate::notify::RecordingNotifier;

    struct Coupons(CouponValidation);

    #[async_trait]
    impl CouponService for Coupons {
        async fn validate(&self, _: &str, _: &[CartItem], _: Money) -> Result<CouponValidation> {
            Ok(self.0.clone())
        }
    }

    struct Shipping(ShippingQuotes);

    #[async_trait]
    impl ShippingService for Shipping {
        async fn quote(&self, _: &QuoteRequest) -> Result<ShippingQuotes> {
            Ok(self.0.clone())
        }

        async fn authorization_status(&self) -> Result<bool> {
            Ok(self.0.authorized)
        }

        async fn track(&self, _: OrderId) -> Result<TrackingInfo> {
            Err(StorefrontError::OrderRequired)
        }
    }

    #[derive(Default)]
    struct Orders {
        created: Mutex<Vec<CreateOrderRequest>>,
    }

    #[async_trait]
    impl OrderService for Orders {
        async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order> {
            let mut created = self.created.lock().unwrap();
            created.push(request.clone());
            Ok(Order {
                id: OrderId::new(i64::try_from(created.len()).unwrap()),
                order_number: format!("VT-{:06}", created.len()),
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

        async fn get_order(&self, _: OrderId) -> Result<Order> {
            Err(StorefrontError::OrderRequired)
        }

        async fn list_orders(&self) -> Result<Vec<Order>> {
            Ok(Vec::new())
        }
    }

    struct Payments(PaymentStatus);

    #[async_trait]
    impl PaymentService for Payments {
        async fn process_payment(&self, _: &PaymentRequest, _: Uuid) -> Result<Payment> {
            Ok(payment(self.0))
        }

        async fn create_preference(&self, _: &PreferenceRequest) -> Result<Payment> {
            Ok(Payment {
                payment_id: None,
                status: PaymentStatus::Pending,
                status_detail: None,
                pix: None,
                init_point: Some("https://mp.test/checkout".to_string()),
            })
        }

        async fn payment_status(&self, _: PaymentId) -> Result<Payment> {
            Ok(payment(self.0))
        }
    }

    fn payment(status: PaymentStatus) -> Payment {
        Payment {
            payment_id: Some(PaymentId::new(77)),
            status,
            status_detail: None,
            pix: None,
            init_point: None,
        }
    }

    fn quote(cents: i64) -> ShippingQuote {
        ShippingQuote {
            id: ShippingServiceId::new(1),
            name: "PAC".to_string(),
            company: Carrier {
                id: CarrierId::new(1),
                name: "Correios".to_string(),
                picture: None,
            },
            delivery_time: 6,
            price: Money::from_cents(cents),
            discount: Money::ZERO,
            quote_id: None,
        }
    }

    fn item(cents: i64) -> CartItem {
        CartItem {
            id: ProductId::new(1),
            name: "Vestido Midi".to_string(),
            price: Money::from_cents(cents),
            quantity: 1,
            image: String::new(),
            size: Some("M".to_string()),
            dimensions: Dimensions::default(),
        }
    }

    fn address() -> Address {
        Address {
            id: AddressId::new(3),
            label: "Casa".to_string(),
            street: "Avenida Paulista".to_string(),
            number: "1000".to_string(),
            complement: None,
            neighborhood: "Bela Vista".to_string(),
            city: "São Paulo".to_string(),
            state: "SP".to_string(),
            zip_code: "01310100".to_string(),
            is_default: true,
        }
    }

    fn valid_coupon(cents: i64) -> CouponValidation {
        CouponValidation {
            valid: true,
            coupon: Some(CouponRef {
                id: CouponId::new(5),
                code: "BEMVINDA".to_string(),
            }),
            discount_amount: Some(Money::from_cents(cents)),
            message: None,
        }
    }

    fn checkout(
        items: Vec<CartItem>,
        coupon: CouponValidation,
        status: PaymentStatus,
    ) -> (Checkout, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::new());
        let services = CheckoutServices {
            coupons: Arc::new(Coupons(coupon)),
            shipping: Arc::new(Shipping(ShippingQuotes {
                authorized: true,
                quotes: vec![quote(2290)],
            })),
            orders: Arc::new(Orders::default()),
            payments: Arc::new(Payments(status)),
            notifier: notifier.clone(),
        };
        let settings = CheckoutSettings {
            rules: ShippingRules::new(Cep::parse("01310100").unwrap(), Money::from_cents(12_000)),
            poll_interval: Duration::from_secs(10),
            installments: 1,
        };
        let payer = Payer {
            email: "ana@example.com".to_string(),
            first_name: Some("Ana".to_string()),
            last_name: None,
            identification: None,
        };
        let cart = SharedCart::new(Cart::from_items(items));
        (Checkout::new(services, cart, settings, payer), notifier)
    }

    async fn at_confirmation(checkout: &mut Checkout) {
        checkout.select_address(address()).unwrap();
        let quotes = checkout.quote_shipping().await.unwrap();
        checkout.select_shipping(&quotes.quotes[0]).await.unwrap();
        assert!(checkout.go_to_next_step().await);
        checkout.select_payment_method(PaymentMethod::Pix).unwrap();
        assert!(checkout.go_to_next_step().await);
        assert_eq!(checkout.step(), CheckoutStep::Confirmation);
    }

    #[tokio::test]
    async fn test_address_step_requires_address_and_items() {
        let (mut checkout, _) = checkout(vec![], valid_coupon(0), PaymentStatus::Approved);
        assert!(!checkout.go_to_next_step().await);

        checkout.select_address(address()).unwrap();
        assert!(!checkout.go_to_next_step().await, "empty cart");
        assert_eq!(checkout.step(), CheckoutStep::Address);

        checkout.cart().add_item(item(5000)).await;
        assert!(checkout.go_to_next_step().await);
        assert_eq!(checkout.step(), CheckoutStep::Payment);
    }

    #[tokio::test]
    async fn test_payment_step_requires_method() {
        let (mut checkout, _) = checkout(vec![item(5000)], valid_coupon(0), PaymentStatus::Approved);
        checkout.select_address(address()).unwrap();
        assert!(checkout.go_to_next_step().await);

        assert!(!checkout.go_to_next_step().await);
        assert_eq!(checkout.step(), CheckoutStep::Payment);

        checkout.select_payment_method(PaymentMethod::Pix).unwrap();
        assert!(checkout.go_to_next_step().await);
        assert_eq!(checkout.step(), CheckoutStep::Confirmation);
    }

    #[tokio::test]
    async fn test_back_from_address_exits() {
        let (mut checkout, _) = checkout(vec![item(5000)], valid_coupon(0), PaymentStatus::Approved);
        assert_eq!(checkout.go_to_previous_step(), StepChange::Exit);
        checkout.select_address(address()).unwrap();
        assert!(checkout.go_to_next_step().await);
        assert_eq!(
            checkout.go_to_previous_step(),
            StepChange::Moved(CheckoutStep::Address)
        );
    }

    #[tokio::test]
    async fn test_apply_then_remove_coupon_restores_total() {
        let (mut checkout, _) = checkout(vec![item(10_000)], valid_coupon(1500), PaymentStatus::Approved);
        let before = checkout.totals().await;

        let applied = checkout.apply_coupon(" BEMVINDA ").await.unwrap();
        assert_eq!(applied.discount(), Money::from_cents(1500));
        assert_eq!(checkout.totals().await.total, Money::from_cents(8500));

        checkout.remove_coupon().unwrap();
        let after = checkout.totals().await;
        assert_eq!(after.discount, Money::ZERO);
        assert_eq!(after.total, before.total);
    }

    #[tokio::test]
    async fn test_rejected_coupon_keeps_none() {
        let rejection = CouponValidation {
            valid: false,
            coupon: None,
            discount_amount: None,
            message: Some("Cupom expirado".to_string()),
        };
        let (mut checkout, notifier) = checkout(vec![item(10_000)], rejection, PaymentStatus::Approved);

        let err = checkout.apply_coupon("VERAO").await.unwrap_err();
        assert!(matches!(&err, StorefrontError::CouponRejected(m) if m == "Cupom expirado"));
        assert!(checkout.state().coupon.is_none());
        assert_eq!(checkout.state().error.as_deref(), Some("Cupom expirado"));
        assert_eq!(notifier.count(|n| matches!(n, Notice::Error(_))), 1);
    }

    #[tokio::test]
    async fn test_coupon_staleness_tracks_cart() {
        let (mut checkout, _) = checkout(vec![item(10_000)], valid_coupon(1000), PaymentStatus::Approved);
        checkout.apply_coupon("BEMVINDA").await.unwrap();
        assert!(!checkout.coupon_may_be_stale().await);
        checkout.cart().update_quantity(ProductId::new(1), Some("M"), 2).await;
        assert!(checkout.coupon_may_be_stale().await);
    }

    #[tokio::test]
    async fn test_free_shipping_applies_from_threshold() {
        let (mut checkout, _) = checkout(vec![item(15_000)], valid_coupon(0), PaymentStatus::Approved);
        checkout.select_address(address()).unwrap();
        let quotes = checkout.quote_shipping().await.unwrap();
        let effective = checkout.select_shipping(&quotes.quotes[0]).await.unwrap();

        assert!(effective.is_free());
        assert_eq!(effective.original_price, Some(Money::from_cents(2290)));
        let totals = checkout.totals().await;
        assert_eq!(totals.shipping, Money::ZERO);
        assert_eq!(totals.total, Money::from_cents(15_000));
    }

    #[tokio::test]
    async fn test_new_address_clears_shipping() {
        let (mut checkout, _) = checkout(vec![item(5000)], valid_coupon(0), PaymentStatus::Approved);
        checkout.select_address(address()).unwrap();
        let quotes = checkout.quote_shipping().await.unwrap();
        checkout.select_shipping(&quotes.quotes[0]).await.unwrap();

        checkout.select_address(address()).unwrap();
        assert!(checkout.state().shipping_quotes.is_none());
        assert!(checkout.state().selected_shipping.is_none());
    }

    #[tokio::test]
    async fn test_estimate_rejects_short_cep() {
        let (mut checkout, _) = checkout(vec![item(5000)], valid_coupon(0), PaymentStatus::Approved);
        let err = checkout.estimate_shipping("1234-56").await.unwrap_err();
        assert!(matches!(err, StorefrontError::InvalidCep(_)));
    }

    #[tokio::test]
    async fn test_create_order_outside_confirmation_is_invalid() {
        let (mut checkout, _) = checkout(vec![item(5000)], valid_coupon(0), PaymentStatus::Approved);
        let err = checkout.create_order().await.unwrap_err();
        assert!(matches!(
            err,
            StorefrontError::InvalidStep {
                step: CheckoutStep::Address,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_confirmation_requires_order() {
        let (mut checkout, _) = checkout(vec![item(5000)], valid_coupon(0), PaymentStatus::Approved);
        at_confirmation(&mut checkout).await;
        assert!(!checkout.go_to_next_step().await);

        let order = checkout.create_order().await.unwrap();
        assert_eq!(order.total, Money::from_cents(7290));
        let again = checkout.create_order().await.unwrap();
        assert_eq!(again.id, order.id);
    }

    #[tokio::test]
    async fn test_approval_completes_once() {
        let (mut checkout, notifier) = checkout(vec![item(5000)], valid_coupon(0), PaymentStatus::Approved);
        at_confirmation(&mut checkout).await;
        checkout.create_order().await.unwrap();

        assert!(checkout.go_to_next_step().await);
        assert_eq!(checkout.step(), CheckoutStep::Processing);
        assert!(checkout.state().success_modal_open);
        assert!(checkout.cart().is_empty().await);

        checkout.cart().add_item(item(3000)).await;
        let outcome = checkout
            .apply_payment_update(payment(PaymentStatus::Approved))
            .await;
        assert_eq!(outcome, Some(PaymentOutcome::Approved));
        assert!(!checkout.cart().is_empty().await, "cart cleared only once");
        assert_eq!(
            notifier.count(|n| matches!(n, Notice::OrderCompleted { .. })),
            1
        );

        assert!(checkout.close_success_modal());
        assert_eq!(checkout.step(), CheckoutStep::Success);
    }

    #[tokio::test]
    async fn test_no_way_back_after_approval() {
        let (mut checkout, notifier) = checkout(vec![item(5000)], valid_coupon(0), PaymentStatus::Approved);
        at_confirmation(&mut checkout).await;
        let order = checkout.create_order().await.unwrap();
        assert!(checkout.go_to_next_step().await);
        assert!(checkout.state().success_modal_open);

        assert_eq!(checkout.go_to_previous_step(), StepChange::Unchanged);
        assert_eq!(checkout.step(), CheckoutStep::Processing);
        assert!(checkout.state().payment.is_some());

        let err = checkout.select_address(address()).unwrap_err();
        assert!(matches!(err, StorefrontError::InvalidStep { .. }));
        assert_eq!(checkout.state().order.as_ref().map(|o| o.id), Some(order.id));
        assert!(!checkout.go_to_next_step().await);
        assert_eq!(
            notifier.count(|n| matches!(n, Notice::OrderCompleted { .. })),
            1
        );

        assert!(checkout.close_success_modal());
        assert_eq!(checkout.go_to_previous_step(), StepChange::Unchanged);
        assert_eq!(checkout.step(), CheckoutStep::Success);
    }

    #[tokio::test]
    async fn test_completed_order_is_never_discarded() {
        let (mut checkout, _) = checkout(vec![item(5000)], valid_coupon(0), PaymentStatus::Approved);
        at_confirmation(&mut checkout).await;
        let order = checkout.create_order().await.unwrap();
        assert!(checkout.go_to_next_step().await);

        checkout.state.payment = None;
        checkout.discard_order("destination changed");
        assert_eq!(checkout.state().order.as_ref().map(|o| o.id), Some(order.id));
    }

    #[tokio::test]
    async fn test_discarded_order_drops_attempt_key() {
        let (mut checkout, _) = checkout(vec![item(5000)], valid_coupon(0), PaymentStatus::Pending);
        at_confirmation(&mut checkout).await;
        checkout.create_order().await.unwrap();
        assert_eq!(checkout.process_payment().await.unwrap(), PaymentOutcome::Pending);
        assert!(checkout.attempt_key.is_some());

        checkout.go_to_previous_step();
        assert!(checkout.attempt_key.is_some(), "kept while the order stands");
        checkout.select_address(address()).unwrap();
        assert!(checkout.state().order.is_none());
        assert!(checkout.attempt_key.is_none());
    }

    #[tokio::test]
    async fn test_rejection_then_retry_keeps_order() {
        let (mut checkout, _) = checkout(vec![item(5000)], valid_coupon(0), PaymentStatus::Rejected);
        at_confirmation(&mut checkout).await;
        let order = checkout.create_order().await.unwrap();

        let outcome = checkout.process_payment().await.unwrap();
        assert_eq!(outcome, PaymentOutcome::Rejected(None));
        assert_eq!(checkout.step(), CheckoutStep::Error);
        assert!(checkout.state().error.is_some());

        checkout.retry_payment().unwrap();
        assert_eq!(checkout.step(), CheckoutStep::Payment);
        assert!(checkout.state().payment.is_none());
        assert_eq!(checkout.state().order.as_ref().map(|o| o.id), Some(order.id));
    }

    #[tokio::test]
    async fn test_card_without_token_redirects() {
        let (mut checkout, notifier) = checkout(vec![item(5000)], valid_coupon(0), PaymentStatus::Approved);
        at_confirmation(&mut checkout).await;
        checkout.state.step = CheckoutStep::Payment;
        checkout.select_payment_method(PaymentMethod::CreditCard).unwrap();
        checkout.state.step = CheckoutStep::Confirmation;
        checkout.create_order().await.unwrap();

        let outcome = checkout.process_payment().await.unwrap();
        assert_eq!(
            outcome,
            PaymentOutcome::Redirect("https://mp.test/checkout".to_string())
        );
        assert!(!checkout.is_polling());
        assert_eq!(notifier.count(|n| matches!(n, Notice::Redirect { .. })), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let (mut checkout, _) = checkout(vec![item(5000)], valid_coupon(0), PaymentStatus::Pending);
        at_confirmation(&mut checkout).await;
        checkout.create_order().await.unwrap();
        assert_eq!(checkout.process_payment().await.unwrap(), PaymentOutcome::Pending);
        assert!(checkout.is_polling());

        checkout.reset();
        assert!(!checkout.is_polling());
        assert_eq!(checkout.step(), CheckoutStep::Address);
        assert!(checkout.state().order.is_none());
    }
}
