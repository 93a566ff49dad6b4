//! Card validation and tokenization.
//!
//! Card numbers never reach the Vitrine backend: they are validated locally
//! and exchanged for a single-use token with the payment processor, and
//! only the token is sent with the payment.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use url::Url;
use vitrine_core::ValidationErrors;

use crate::api::{ApiError, extract_message};
use crate::config::MercadoPagoConfig;
use crate::error::Result;

/// Card networks accepted at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardBrand {
    Visa,
    Mastercard,
    Amex,
    Elo,
    Hipercard,
    Unknown,
}

impl CardBrand {
    /// Payment method id as the processor names it.
    #[must_use]
    pub const fn payment_method_id(self) -> Option<&'static str> {
        match self {
            Self::Visa => Some("visa"),
            Self::Mastercard => Some("master"),
            Self::Amex => Some("amex"),
            Self::Elo => Some("elo"),
            Self::Hipercard => Some("hipercard"),
            Self::Unknown => None,
        }
    }

    /// Digits in the security code.
    #[must_use]
    pub const fn cvv_length(self) -> usize {
        match self {
            Self::Amex => 4,
            _ => 3,
        }
    }
}

/// Elo BIN ranges (first six digits, inclusive).
const ELO_RANGES: &[(u32, u32)] = &[
    (401_178, 401_179),
    (431_274, 431_274),
    (438_935, 438_935),
    (451_416, 451_416),
    (457_393, 457_393),
    (457_631, 457_632),
    (504_175, 504_175),
    (506_699, 506_778),
    (509_000, 509_999),
    (627_780, 627_780),
    (636_297, 636_297),
    (636_368, 636_368),
    (650_031, 650_033),
    (650_035, 650_051),
    (650_405, 650_439),
    (650_485, 650_538),
    (650_541, 650_598),
    (650_700, 650_718),
    (650_720, 650_727),
    (650_901, 650_920),
    (651_652, 651_679),
    (655_000, 655_019),
    (655_021, 655_058),
];

/// Hipercard BINs.
const HIPERCARD_BINS: &[u32] = &[384_100, 384_140, 384_160, 606_282, 637_095, 637_568, 637_599, 637_609, 637_612];

fn digits(number: &str) -> String {
    number.chars().filter(char::is_ascii_digit).collect()
}

/// Identify the card network from the leading digits.
///
/// Elo and Hipercard BINs overlap Visa's and Discover's prefixes, so they
/// are matched first.
#[must_use]
pub fn detect_brand(number: &str) -> CardBrand {
    let digits = digits(number);
    let bin = digits.get(..6).and_then(|b| b.parse::<u32>().ok());

    if let Some(bin) = bin {
        if ELO_RANGES.iter().any(|&(lo, hi)| (lo..=hi).contains(&bin)) {
            return CardBrand::Elo;
        }
        if HIPERCARD_BINS.contains(&bin) {
            return CardBrand::Hipercard;
        }
    }

    let prefix = |n: usize| digits.get(..n).and_then(|p| p.parse::<u32>().ok());
    match (prefix(1), prefix(2), prefix(4)) {
        (_, Some(34 | 37), _) => CardBrand::Amex,
        (_, Some(51..=55), _) | (_, _, Some(2221..=2720)) => CardBrand::Mastercard,
        (Some(4), _, _) => CardBrand::Visa,
        _ => CardBrand::Unknown,
    }
}

/// Luhn checksum.
#[must_use]
pub fn luhn_valid(number: &str) -> bool {
    let digits = digits(number);
    if digits.len() < 2 {
        return false;
    }
    let sum: u32 = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let d = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Card data typed by the buyer.
///
/// Implements `Debug` manually to redact the number and security code.
#[derive(Clone)]
pub struct CardDetails {
    pub number: SecretString,
    pub holder_name: String,
    pub expiration_month: u32,
    pub expiration_year: u32,
    pub security_code: SecretString,
    /// Holder CPF, digits only.
    pub identification: Option<String>,
}

impl std::fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardDetails")
            .field("number", &"[REDACTED]")
            .field("holder_name", &self.holder_name)
            .field("expiration_month", &self.expiration_month)
            .field("expiration_year", &self.expiration_year)
            .field("security_code", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl CardDetails {
    /// Last four digits, for display.
    #[must_use]
    pub fn last_four(&self) -> String {
        let digits = digits(self.number.expose_secret());
        digits
            .get(digits.len().saturating_sub(4)..)
            .unwrap_or_default()
            .to_string()
    }

    /// Four-digit expiry year; two-digit input is read as 20xx.
    #[must_use]
    pub const fn full_year(&self) -> u32 {
        if self.expiration_year < 100 {
            2000 + self.expiration_year
        } else {
            self.expiration_year
        }
    }

    /// Validate number, holder, expiry and security code as of `today`.
    ///
    /// # Errors
    ///
    /// Returns every failing field at once.
    pub fn validate(&self, today: NaiveDate) -> std::result::Result<CardBrand, ValidationErrors> {
        let mut errors = ValidationErrors::default();
        let number = digits(self.number.expose_secret());
        let brand = detect_brand(&number);

        if !(13..=19).contains(&number.len()) || !luhn_valid(&number) {
            errors.push("number", "is not a valid card number");
        } else if brand == CardBrand::Unknown {
            errors.push("number", "card network is not accepted");
        }

        if self.holder_name.trim().is_empty() {
            errors.push("holder_name", "is required");
        }

        if !(1..=12).contains(&self.expiration_month) {
            errors.push("expiration_month", "must be between 1 and 12");
        } else {
            let expiry = (self.full_year(), self.expiration_month);
            let current = (u32::try_from(today.year()).unwrap_or(0), today.month());
            if expiry < current {
                errors.push("expiration", "card has expired");
            }
        }

        let cvv = self.security_code.expose_secret();
        if cvv.len() != brand.cvv_length() || !cvv.chars().all(|c| c.is_ascii_digit()) {
            errors.push(
                "security_code",
                format!("must be {} digits", brand.cvv_length()),
            );
        }

        errors.into_result().map(|()| brand)
    }
}

/// A single-use card token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardToken {
    pub token: String,
    pub payment_method_id: String,
    pub last_four: String,
}

/// Exchanges card data for a token.
#[async_trait]
pub trait CardTokenizer: Send + Sync {
    async fn tokenize(&self, card: &CardDetails, brand: CardBrand) -> Result<CardToken>;
}

/// Validate the card as of `today`, then tokenize it.
///
/// # Errors
///
/// Returns a validation error without contacting the processor when the
/// card is invalid.
pub async fn validate_and_tokenize(
    tokenizer: &dyn CardTokenizer,
    card: &CardDetails,
    today: NaiveDate,
) -> Result<CardToken> {
    let brand = card.validate(today)?;
    tokenizer.tokenize(card, brand).await
}

// =============================================================================
// Mercado Pago
// =============================================================================

#[derive(Serialize)]
struct TokenRequest<'a> {
    card_number: &'a str,
    security_code: &'a str,
    expiration_month: u32,
    expiration_year: u32,
    cardholder: Cardholder<'a>,
}

#[derive(Serialize)]
struct Cardholder<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    identification: Option<Identification<'a>>,
}

#[derive(Serialize)]
struct Identification<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    number: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    id: String,
    #[serde(default)]
    last_four_digits: Option<String>,
}

/// Card tokenization with Mercado Pago's public-key endpoint.
#[derive(Clone)]
pub struct MercadoPagoTokenizer {
    client: reqwest::Client,
    config: MercadoPagoConfig,
}

impl MercadoPagoTokenizer {
    #[must_use]
    pub const fn new(client: reqwest::Client, config: MercadoPagoConfig) -> Self {
        Self { client, config }
    }

    fn tokens_url(&self) -> std::result::Result<Url, ApiError> {
        let mut url = Url::parse(&format!(
            "{}/v1/card_tokens",
            self.config.api_url.trim_end_matches('/')
        ))?;
        url.query_pairs_mut()
            .append_pair("public_key", &self.config.public_key);
        Ok(url)
    }
}

#[async_trait]
impl CardTokenizer for MercadoPagoTokenizer {
    #[instrument(skip(self, card), fields(brand = ?brand))]
    async fn tokenize(&self, card: &CardDetails, brand: CardBrand) -> Result<CardToken> {
        let number = digits(card.number.expose_secret());
        let body = TokenRequest {
            card_number: &number,
            security_code: card.security_code.expose_secret(),
            expiration_month: card.expiration_month,
            expiration_year: card.full_year(),
            cardholder: Cardholder {
                name: card.holder_name.trim(),
                identification: card.identification.as_deref().map(|number| Identification {
                    kind: "CPF",
                    number,
                }),
            },
        };

        let response = self
            .client
            .post(self.tokens_url()?)
            .json(&body)
            .send()
            .await
            .map_err(ApiError::from)?;
        let status = response.status();
        let text = response.text().await.map_err(ApiError::from)?;

        if !status.is_success() {
            tracing::warn!(status = %status, "card tokenization rejected");
            return Err(ApiError::Api {
                status: status.as_u16(),
                message: extract_message(&text),
            }
            .into());
        }

        let token: TokenResponse = serde_json::from_str(&text).map_err(ApiError::from)?;
        Ok(CardToken {
            token: token.id,
            payment_method_id: brand.payment_method_id().unwrap_or("unknown").to_string(),
            last_four: token.last_four_digits.unwrap_or_else(|| card.last_four()),
        })
    }
}
