//! The buyer's saved delivery addresses.
//!
//! Only one address can be the default; the backend unsets the previous one
//! when another is marked default.

use async_trait::async_trait;
use tracing::{info, instrument};
use vitrine_core::{Address, AddressId, AddressInput};

use crate::api::{ApiClient, ApiRequest};
use crate::error::Result;

const ADDRESSES_PATH: &str = "/api/addresses";

/// Address book operations.
#[async_trait]
pub trait AddressService: Send + Sync {
    async fn list(&self) -> Result<Vec<Address>>;

    /// Validate and save a new address.
    async fn create(&self, input: AddressInput) -> Result<Address>;

    /// Validate and replace an existing address.
    async fn update(&self, id: AddressId, input: AddressInput) -> Result<Address>;

    async fn delete(&self, id: AddressId) -> Result<()>;

    /// Make `id` the default address.
    async fn set_default(&self, id: AddressId) -> Result<Address>;
}

/// [`AddressService`] backed by the Vitrine API.
#[derive(Clone)]
pub struct HttpAddressService {
    api: ApiClient,
}

impl HttpAddressService {
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// The default address, or the first one when none is marked.
    ///
    /// # Errors
    ///
    /// Returns the API error if the list cannot be fetched.
    pub async fn default_address(&self) -> Result<Option<Address>> {
        let addresses = self.list().await?;
        Ok(pick_default(addresses))
    }
}

fn pick_default(addresses: Vec<Address>) -> Option<Address> {
    let position = addresses.iter().position(|a| a.is_default).unwrap_or(0);
    addresses.into_iter().nth(position)
}

#[async_trait]
impl AddressService for HttpAddressService {
    async fn list(&self) -> Result<Vec<Address>> {
        Ok(self.api.get(ADDRESSES_PATH).await?)
    }

    #[instrument(skip_all)]
    async fn create(&self, input: AddressInput) -> Result<Address> {
        input.validate()?;
        let address: Address = self.api.post(ADDRESSES_PATH, &input.normalized()).await?;
        info!(address_id = %address.id, "address created");
        Ok(address)
    }

    #[instrument(skip(self, input))]
    async fn update(&self, id: AddressId, input: AddressInput) -> Result<Address> {
        input.validate()?;
        Ok(self
            .api
            .put(&format!("{ADDRESSES_PATH}/{id}"), &input.normalized())
            .await?)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: AddressId) -> Result<()> {
        Ok(self.api.delete(&format!("{ADDRESSES_PATH}/{id}")).await?)
    }

    #[instrument(skip(self))]
    async fn set_default(&self, id: AddressId) -> Result<Address> {
        Ok(self
            .api
            .send(ApiRequest::put(format!("{ADDRESSES_PATH}/{id}/default")))
            .await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn address(id: i64, is_default: bool) -> Address {
        Address {
            id: AddressId::new(id),
            label: format!("Endereço {id}"),
            street: "Rua Augusta".to_string(),
            number: "1500".to_string(),
            complement: None,
            neighborhood: "Consolação".to_string(),
            city: "São Paulo".to_string(),
            state: "SP".to_string(),
            zip_code: "01304001".to_string(),
            is_default,
        }
    }

    #[test]
    fn test_pick_default_prefers_marked_address() {
        let picked = pick_default(vec![address(1, false), address(2, true)]).unwrap();
        assert_eq!(picked.id, AddressId::new(2));
    }

    #[test]
    fn test_pick_default_falls_back_to_first() {
        let picked = pick_default(vec![address(4, false), address(5, false)]).unwrap();
        assert_eq!(picked.id, AddressId::new(4));
        assert!(pick_default(Vec::new()).is_none());
    }

    #[tokio::test]
    async fn test_invalid_input_is_not_submitted() {
        let api = ApiClient::with_client(
            reqwest::Client::new(),
            url::Url::parse("http://127.0.0.1:9").unwrap(),
            None,
        );
        let input = AddressInput {
            zip_code: "123".to_string(),
            ..AddressInput::default()
        };
        let err = HttpAddressService::new(api).create(input).await.unwrap_err();
        let crate::error::StorefrontError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.for_field("zip_code").is_some());
        assert!(errors.for_field("street").is_some());
    }
}
