//! Postal code detection from the buyer's position or IP address.
//!
//! Providers are tried in order; the first one to produce a valid CEP wins.
//! Providers that need coordinates are skipped when none are available.

use std::fmt;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;
use vitrine_core::Cep;

const BIGDATACLOUD_URL: &str = "https://api.bigdatacloud.net/data/reverse-geocode-client";
const MAPSCO_URL: &str = "https://geocode.maps.co/reverse";
const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/reverse";
const IPAPI_URL: &str = "https://ipapi.co/json/";

/// Nominatim's usage policy requires an identifying user agent.
const USER_AGENT: &str = concat!("vitrine-storefront/", env!("CARGO_PKG_VERSION"));

/// Latitude and longitude in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Why a single provider failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub provider: &'static str,
    pub reason: String,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.reason)
    }
}

/// Errors from postal code detection.
#[derive(Debug, Error)]
pub enum GeolocationError {
    /// The provider needs coordinates and none were given.
    #[error("Coordinates required")]
    NoCoordinates,

    /// The provider answered without a postal code.
    #[error("No postal code in response")]
    NoPostalCode,

    /// The provider returned something that is not a CEP.
    #[error("Invalid postal code: {0}")]
    InvalidPostalCode(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider returned a non-success status.
    #[error("Provider returned status {0}")]
    Api(u16),

    /// Request URL could not be built.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Every provider failed.
    #[error("No provider found a postal code ({})", format_failures(.0))]
    Exhausted(Vec<ProviderFailure>),
}

fn format_failures(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "no providers configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A source of postal codes.
#[async_trait]
pub trait PostalCodeProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether [`locate`](Self::locate) needs coordinates.
    fn needs_coordinates(&self) -> bool;

    async fn locate(&self, coordinates: Option<Coordinates>) -> Result<Cep, GeolocationError>;
}

/// Tries providers in order until one yields a CEP.
pub struct PostalCodeLocator {
    providers: Vec<Box<dyn PostalCodeProvider>>,
}

impl PostalCodeLocator {
    #[must_use]
    pub fn new(providers: Vec<Box<dyn PostalCodeProvider>>) -> Self {
        Self { providers }
    }

    /// The standard chain: `BigDataCloud`, maps.co (when a key is
    /// configured), Nominatim, then IP geolocation.
    #[must_use]
    pub fn with_defaults(client: &reqwest::Client, mapsco_api_key: Option<SecretString>) -> Self {
        let mut providers: Vec<Box<dyn PostalCodeProvider>> =
            vec![Box::new(BigDataCloud::new(client.clone()))];
        if let Some(api_key) = mapsco_api_key {
            providers.push(Box::new(MapsCo::new(client.clone(), api_key)));
        }
        providers.push(Box::new(Nominatim::new(client.clone())));
        providers.push(Box::new(IpApi::new(client.clone())));
        Self::new(providers)
    }

    /// Detect the buyer's CEP.
    ///
    /// # Errors
    ///
    /// Returns `GeolocationError::Exhausted` with each provider's failure
    /// when none produced a CEP.
    #[instrument(skip(self))]
    pub async fn locate(
        &self,
        coordinates: Option<Coordinates>,
    ) -> Result<(Cep, &'static str), GeolocationError> {
        let mut failures = Vec::new();

        for provider in &self.providers {
            if provider.needs_coordinates() && coordinates.is_none() {
                failures.push(ProviderFailure {
                    provider: provider.name(),
                    reason: GeolocationError::NoCoordinates.to_string(),
                });
                continue;
            }
            match provider.locate(coordinates).await {
                Ok(cep) => {
                    info!(provider = provider.name(), cep = %cep, "postal code located");
                    return Ok((cep, provider.name()));
                }
                Err(e) => {
                    debug!(provider = provider.name(), error = %e, "provider failed");
                    failures.push(ProviderFailure {
                        provider: provider.name(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(GeolocationError::Exhausted(failures))
    }
}

// =============================================================================
// Providers
// =============================================================================

/// GET `url` and parse JSON.
async fn fetch_json(request: reqwest::RequestBuilder) -> Result<Value, GeolocationError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(GeolocationError::Api(status.as_u16()));
    }
    Ok(response.json().await?)
}

/// Read a postal code at a JSON pointer and parse it as a CEP.
fn postal_code_at(body: &Value, pointer: &str) -> Result<Cep, GeolocationError> {
    let raw = body
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or(GeolocationError::NoPostalCode)?;
    Cep::parse(raw).map_err(|_| GeolocationError::InvalidPostalCode(raw.to_string()))
}

fn require(coordinates: Option<Coordinates>) -> Result<Coordinates, GeolocationError> {
    coordinates.ok_or(GeolocationError::NoCoordinates)
}

fn coordinate_url(base: &str, lat: &str, lon: &str, c: Coordinates) -> Result<Url, GeolocationError> {
    let mut url = Url::parse(base)?;
    url.query_pairs_mut()
        .append_pair(lat, &c.latitude.to_string())
        .append_pair(lon, &c.longitude.to_string());
    Ok(url)
}

/// `BigDataCloud` client-side reverse geocoding (no key).
pub struct BigDataCloud {
    client: reqwest::Client,
}

impl BigDataCloud {
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PostalCodeProvider for BigDataCloud {
    fn name(&self) -> &'static str {
        "bigdatacloud"
    }

    fn needs_coordinates(&self) -> bool {
        true
    }

    async fn locate(&self, coordinates: Option<Coordinates>) -> Result<Cep, GeolocationError> {
        let mut url = coordinate_url(BIGDATACLOUD_URL, "latitude", "longitude", require(coordinates)?)?;
        url.query_pairs_mut().append_pair("localityLanguage", "pt");
        let body = fetch_json(self.client.get(url)).await?;
        postal_code_at(&body, "/postcode")
    }
}

/// geocode.maps.co reverse geocoding.
pub struct MapsCo {
    client: reqwest::Client,
    api_key: SecretString,
}

impl MapsCo {
    #[must_use]
    pub const fn new(client: reqwest::Client, api_key: SecretString) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl PostalCodeProvider for MapsCo {
    fn name(&self) -> &'static str {
        "mapsco"
    }

    fn needs_coordinates(&self) -> bool {
        true
    }

    async fn locate(&self, coordinates: Option<Coordinates>) -> Result<Cep, GeolocationError> {
        let mut url = coordinate_url(MAPSCO_URL, "lat", "lon", require(coordinates)?)?;
        url.query_pairs_mut()
            .append_pair("api_key", self.api_key.expose_secret());
        let body = fetch_json(self.client.get(url)).await?;
        postal_code_at(&body, "/address/postcode")
    }
}

/// OpenStreetMap Nominatim reverse geocoding.
pub struct Nominatim {
    client: reqwest::Client,
}

impl Nominatim {
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PostalCodeProvider for Nominatim {
    fn name(&self) -> &'static str {
        "nominatim"
    }

    fn needs_coordinates(&self) -> bool {
        true
    }

    async fn locate(&self, coordinates: Option<Coordinates>) -> Result<Cep, GeolocationError> {
        let mut url = coordinate_url(NOMINATIM_URL, "lat", "lon", require(coordinates)?)?;
        url.query_pairs_mut()
            .append_pair("format", "json")
            .append_pair("addressdetails", "1");
        let request = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT);
        let body = fetch_json(request).await?;
        postal_code_at(&body, "/address/postcode")
    }
}

/// IP geolocation via ipapi.co. Coarse: usually resolves to the city's
/// generic CEP.
pub struct IpApi {
    client: reqwest::Client,
}

impl IpApi {
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PostalCodeProvider for IpApi {
    fn name(&self) -> &'static str {
        "ipapi"
    }

    fn needs_coordinates(&self) -> bool {
        false
    }

    async fn locate(&self, _coordinates: Option<Coordinates>) -> Result<Cep, GeolocationError> {
        let body = fetch_json(self.client.get(IPAPI_URL)).await?;
        postal_code_at(&body, "/postal")
    }
}
