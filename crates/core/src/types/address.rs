//! Delivery addresses from the buyer's address book.

use serde::{Deserialize, Serialize};

use super::cep::Cep;
use super::id::AddressId;
use super::validation::ValidationErrors;

/// A saved delivery address.
///
/// The backend guarantees at most one `is_default` address per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: AddressId,
    /// Buyer-chosen label ("Casa", "Trabalho").
    pub label: String,
    pub street: String,
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complement: Option<String>,
    pub neighborhood: String,
    pub city: String,
    /// Two-letter state code (UF).
    pub state: String,
    pub zip_code: String,
    #[serde(default)]
    pub is_default: bool,
}

impl Address {
    /// The address CEP, if the stored value is valid.
    #[must_use]
    pub fn cep(&self) -> Option<Cep> {
        Cep::parse(&self.zip_code).ok()
    }

    /// One-line rendering for summaries.
    #[must_use]
    pub fn one_line(&self) -> String {
        let complement = self
            .complement
            .as_deref()
            .filter(|c| !c.is_empty())
            .map(|c| format!(", {c}"))
            .unwrap_or_default();
        format!(
            "{}, {}{} - {}, {}/{} - {}",
            self.street,
            self.number,
            complement,
            self.neighborhood,
            self.city,
            self.state,
            self.cep().map_or_else(|| self.zip_code.clone(), |c| c.formatted())
        )
    }
}

/// Address fields sent when creating or updating an address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInput {
    pub label: String,
    pub street: String,
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complement: Option<String>,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    #[serde(default)]
    pub is_default: bool,
}

impl AddressInput {
    /// Check required fields, the CEP and the UF code.
    ///
    /// # Errors
    ///
    /// Returns every failing field at once so a form can mark them all.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::default();

        for (field, value) in [
            ("label", &self.label),
            ("street", &self.street),
            ("number", &self.number),
            ("neighborhood", &self.neighborhood),
            ("city", &self.city),
        ] {
            if value.trim().is_empty() {
                errors.push(field, "is required");
            }
        }

        let state = self.state.trim();
        if state.len() != 2 || !state.chars().all(|c| c.is_ascii_alphabetic()) {
            errors.push("state", "must be a 2-letter code");
        }

        if let Err(e) = Cep::parse(&self.zip_code) {
            errors.push("zip_code", e.to_string());
        }

        errors.into_result()
    }

    /// Normalize before submission: trimmed fields, uppercase UF, bare CEP digits.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        for field in [
            &mut self.label,
            &mut self.street,
            &mut self.number,
            &mut self.neighborhood,
            &mut self.city,
        ] {
            *field = field.trim().to_string();
        }
        self.state = self.state.trim().to_ascii_uppercase();
        if let Ok(cep) = Cep::parse(&self.zip_code) {
            self.zip_code = cep.into();
        }
        self.complement = self
            .complement
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        self
    }
}

impl From<&Address> for AddressInput {
    fn from(address: &Address) -> Self {
        Self {
            label: address.label.clone(),
            street: address.street.clone(),
            number: address.number.clone(),
            complement: address.complement.clone(),
            neighborhood: address.neighborhood.clone(),
            city: address.city.clone(),
            state: address.state.clone(),
            zip_code: address.zip_code.clone(),
            is_default: address.is_default,
        }
    }
}
