//! Payments submitted to the payment processor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{OrderId, PaymentId};
use super::money::Money;
use super::status::{PaymentMethod, PaymentStatus};

/// PIX charge data returned for a PIX payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixData {
    /// Copy-paste ("copia e cola") code.
    pub qr_code: String,
    /// PNG QR code, base64-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A payment attempt for an order.
///
/// Direct charges carry a `payment_id` and are polled; hosted-checkout
/// preferences carry an `init_point` to redirect the buyer to instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<PaymentId>,
    #[serde(default)]
    pub status: PaymentStatus,
    /// Processor detail code ("cc_rejected_insufficient_amount", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pix: Option<PixData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_point: Option<String>,
}

impl Payment {
    /// Whether this payment should be polled for status changes: a direct
    /// charge the processor has not settled. Unrecognized statuses are
    /// polled too.
    #[must_use]
    pub const fn needs_polling(&self) -> bool {
        self.payment_id.is_some() && !self.status.is_terminal()
    }

    /// Whether the buyer must be redirected to a hosted checkout page.
    #[must_use]
    pub const fn is_redirect(&self) -> bool {
        self.payment_id.is_none() && self.init_point.is_some()
    }
}

/// Payer identity forwarded to the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payer {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// CPF, digits only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identification: Option<String>,
}

/// A direct charge request: PIX, or card with a token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentRequest {
    pub order_id: OrderId,
    /// Always the server-assigned `Order::total`.
    pub transaction_amount: Money,
    pub payment_method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Card brand id as the processor names it ("visa", "master").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_id: Option<String>,
    pub installments: u32,
    pub payer: Payer,
}

/// A hosted-checkout preference request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreferenceRequest {
    pub order_id: OrderId,
    pub transaction_amount: Money,
    pub payer: Payer,
}
