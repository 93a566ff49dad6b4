//! Payment submission and status.
//!
//! Direct charges (PIX, or card with a token) go through
//! `/api/payments/process` and carry an `X-Idempotency-Key`; resubmitting the
//! same attempt with the same key after a dropped connection cannot charge
//! twice. Hosted checkout creates a preference whose `init_point` the buyer
//! is sent to.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use vitrine_core::{Payment, PaymentId, PaymentRequest, PaymentStatus, PreferenceRequest};

use crate::api::{ApiClient, ApiError, ApiRequest};
use crate::error::Result;

const PROCESS_PATH: &str = "/api/payments/process";
const PREFERENCE_PATH: &str = "/api/payments/preference";
const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

/// Submits payments and reads their status.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Charge an order directly. Reuse `idempotency_key` when resubmitting
    /// the same attempt.
    async fn process_payment(&self, request: &PaymentRequest, idempotency_key: Uuid)
    -> Result<Payment>;

    /// Create a hosted-checkout preference. The result has no payment id and
    /// an `init_point` to redirect to.
    async fn create_preference(&self, request: &PreferenceRequest) -> Result<Payment>;

    /// Current status of a direct charge.
    async fn payment_status(&self, id: PaymentId) -> Result<Payment>;
}

#[derive(Debug, Deserialize)]
struct PreferenceResponse {
    #[serde(default)]
    init_point: Option<String>,
    #[serde(default)]
    sandbox_init_point: Option<String>,
}

impl PreferenceResponse {
    fn into_payment(self) -> std::result::Result<Payment, ApiError> {
        let init_point = self
            .init_point
            .or(self.sandbox_init_point)
            .ok_or_else(|| ApiError::Api {
                status: 502,
                message: "Preference has no checkout URL".to_string(),
            })?;
        Ok(Payment {
            payment_id: None,
            status: PaymentStatus::Pending,
            status_detail: None,
            pix: None,
            init_point: Some(init_point),
        })
    }
}

/// [`PaymentService`] backed by the Vitrine API.
#[derive(Clone)]
pub struct HttpPaymentService {
    api: ApiClient,
}

impl HttpPaymentService {
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl PaymentService for HttpPaymentService {
    #[instrument(
        skip(self, request),
        fields(order_id = %request.order_id, method = %request.payment_method, amount = %request.transaction_amount)
    )]
    async fn process_payment(
        &self,
        request: &PaymentRequest,
        idempotency_key: Uuid,
    ) -> Result<Payment> {
        let http = ApiRequest::post(PROCESS_PATH)
            .header(IDEMPOTENCY_HEADER, idempotency_key.to_string())
            .json(request)?;
        let payment: Payment = self.api.send(http).await?;

        if payment.status.is_failure() {
            warn!(status = %payment.status, detail = ?payment.status_detail, "payment not approved");
        } else {
            info!(payment_id = ?payment.payment_id, status = %payment.status, "payment submitted");
        }
        Ok(payment)
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_preference(&self, request: &PreferenceRequest) -> Result<Payment> {
        let response: PreferenceResponse = self.api.post(PREFERENCE_PATH, request).await?;
        Ok(response.into_payment()?)
    }

    async fn payment_status(&self, id: PaymentId) -> Result<Payment> {
        Ok(self.api.get(&format!("/api/payments/{id}/status")).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_prefers_production_url() {
        let response: PreferenceResponse = serde_json::from_str(
            r#"{"id": "123-abc", "init_point": "https://mp.test/live", "sandbox_init_point": "https://mp.test/sandbox"}"#,
        )
        .unwrap();
        let payment = response.into_payment().unwrap();
        assert!(payment.is_redirect());
        assert_eq!(payment.init_point.as_deref(), Some("https://mp.test/live"));
    }

    #[test]
    fn test_preference_falls_back_to_sandbox_url() {
        let response: PreferenceResponse =
            serde_json::from_str(r#"{"sandbox_init_point": "https://mp.test/sandbox"}"#).unwrap();
        let payment = response.into_payment().unwrap();
        assert_eq!(payment.init_point.as_deref(), Some("https://mp.test/sandbox"));
    }

    #[test]
    fn test_preference_without_url_is_an_error() {
        let response: PreferenceResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(response.into_payment().unwrap_err().status(), Some(502));
    }
}
