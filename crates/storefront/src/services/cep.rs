//! Postal code lookup via `ViaCEP`.
//!
//! Results are cached for 24 hours; addresses behind a CEP change rarely and
//! the checkout form looks the same CEP up repeatedly while the buyer types.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};
use vitrine_core::{AddressInput, Cep, CepError};

/// Errors from a CEP lookup.
#[derive(Debug, Error)]
pub enum CepLookupError {
    /// The input is not a valid CEP; no request was made.
    #[error(transparent)]
    Invalid(#[from] CepError),

    /// `ViaCEP` knows no address for this CEP.
    #[error("CEP not found: {0}")]
    NotFound(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// `ViaCEP` returned a non-success status.
    #[error("ViaCEP error: {0}")]
    Api(u16),
}

/// Address resolved from a CEP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CepAddress {
    pub cep: Cep,
    pub street: String,
    pub complement: String,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
}

impl CepAddress {
    /// Prefill an address form; number and label are left for the buyer.
    #[must_use]
    pub fn to_input(&self) -> AddressInput {
        AddressInput {
            street: self.street.clone(),
            complement: Some(self.complement.clone()).filter(|c| !c.is_empty()),
            neighborhood: self.neighborhood.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            zip_code: self.cep.as_str().to_string(),
            ..AddressInput::default()
        }
    }
}

/// `ViaCEP` response. Unknown CEPs answer `200` with `{"erro": true}` (or
/// `"true"` on newer deployments).
#[derive(Debug, Deserialize)]
struct ViaCepResponse {
    #[serde(default)]
    erro: Option<serde_json::Value>,
    #[serde(default)]
    logradouro: String,
    #[serde(default)]
    complemento: String,
    #[serde(default)]
    bairro: String,
    #[serde(default)]
    localidade: String,
    #[serde(default)]
    uf: String,
}

impl ViaCepResponse {
    fn is_error(&self) -> bool {
        match &self.erro {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Bool(flag)) => *flag,
            Some(serde_json::Value::String(flag)) => flag != "false",
            Some(_) => true,
        }
    }

    fn into_address(self, cep: Cep) -> CepAddress {
        CepAddress {
            cep,
            street: self.logradouro,
            complement: self.complemento,
            neighborhood: self.bairro,
            city: self.localidade,
            state: self.uf,
        }
    }
}

/// `ViaCEP` client with an in-memory cache.
#[derive(Clone)]
pub struct ViaCepClient {
    inner: Arc<ViaCepClientInner>,
}

struct ViaCepClientInner {
    client: reqwest::Client,
    base_url: String,
    cache: Cache<String, CepAddress>,
}

impl ViaCepClient {
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(24 * 60 * 60))
            .build();

        Self {
            inner: Arc::new(ViaCepClientInner {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
                cache,
            }),
        }
    }

    /// Look up the address for a CEP typed by the buyer.
    ///
    /// # Errors
    ///
    /// Returns `CepLookupError::Invalid` without a request when the input
    /// does not have eight digits, `NotFound` when `ViaCEP` has no address.
    #[instrument(skip(self))]
    pub async fn lookup(&self, input: &str) -> Result<CepAddress, CepLookupError> {
        let cep = Cep::parse(input)?;

        if let Some(cached) = self.inner.cache.get(cep.as_str()).await {
            debug!(cep = %cep, "CEP cache hit");
            return Ok(cached);
        }

        let url = format!("{}/{}/json/", self.inner.base_url, cep.as_str());
        let response = self.inner.client.get(&url).send().await?;
        let status = response.status();

        // ViaCEP answers a well-formed but unknown CEP with 400 on some paths.
        if status == reqwest::StatusCode::BAD_REQUEST {
            return Err(CepLookupError::NotFound(cep.formatted()));
        }
        if !status.is_success() {
            return Err(CepLookupError::Api(status.as_u16()));
        }

        let body: ViaCepResponse = response.json().await?;
        if body.is_error() {
            return Err(CepLookupError::NotFound(cep.formatted()));
        }

        let address = body.into_address(cep);
        self.inner
            .cache
            .insert(address.cep.as_str().to_string(), address.clone())
            .await;
        Ok(address)
    }
}
