//! Brazilian postal code (CEP) type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`Cep`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CepError {
    /// No digits in the input.
    #[error("CEP cannot be empty")]
    Empty,
    /// Fewer than eight digits after sanitization.
    #[error("CEP must have 8 digits (got {0})")]
    WrongLength(usize),
}

/// Macro-region of Brazil, derived from the first CEP digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Sudeste,
    Sul,
    CentroOeste,
    Nordeste,
    Norte,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sudeste => write!(f, "Sudeste"),
            Self::Sul => write!(f, "Sul"),
            Self::CentroOeste => write!(f, "Centro-Oeste"),
            Self::Nordeste => write!(f, "Nordeste"),
            Self::Norte => write!(f, "Norte"),
        }
    }
}

/// An 8-digit CEP.
///
/// ## Sanitization
///
/// Input is reduced to its ASCII digits and truncated to eight, the same
/// behaviour as the masked CEP inputs. Anything shorter than eight digits
/// after that is rejected; it is never zero-padded, since a padded code
/// would point at a different delivery zone.
///
/// ## Examples
///
/// ```
/// use vitrine_core::Cep;
///
/// assert_eq!(Cep::parse("01310-100").unwrap().as_str(), "01310100");
/// assert_eq!(Cep::parse("01310-1009999").unwrap().as_str(), "01310100");
/// assert!(Cep::parse("0131-010").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cep(String);

impl Cep {
    /// Number of digits in a CEP.
    pub const LENGTH: usize = 8;

    /// Parse a `Cep` from user input.
    ///
    /// # Errors
    ///
    /// Returns an error if the input has no digits or fewer than eight.
    pub fn parse(s: &str) -> Result<Self, CepError> {
        let digits = sanitize(s);
        match digits.len() {
            0 => Err(CepError::Empty),
            Self::LENGTH => Ok(Self(digits)),
            n => Err(CepError::WrongLength(n)),
        }
    }

    /// Returns the CEP digits.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Formats as `NNNNN-NNN`.
    #[must_use]
    pub fn formatted(&self) -> String {
        let (head, tail) = self.0.split_at(5);
        format!("{head}-{tail}")
    }

    /// The macro-region this CEP belongs to.
    ///
    /// First digit 0-3 covers SP, RJ, ES and MG; 4-5 the north-east coast;
    /// 6 the north (and CE, PI, MA, grouped with it by carriers); 7 DF, GO,
    /// TO, MT, MS and RO; 8-9 PR, SC and RS.
    #[must_use]
    pub fn region(&self) -> Region {
        match self.0.as_bytes().first() {
            Some(b'4' | b'5') => Region::Nordeste,
            Some(b'6') => Region::Norte,
            Some(b'7') => Region::CentroOeste,
            Some(b'8' | b'9') => Region::Sul,
            _ => Region::Sudeste,
        }
    }
}

/// Keep only ASCII digits, at most eight of them.
#[must_use]
pub fn sanitize(s: &str) -> String {
    s.chars()
        .filter(char::is_ascii_digit)
        .take(Cep::LENGTH)
        .collect()
}

impl fmt::Display for Cep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formatted())
    }
}

impl std::str::FromStr for Cep {
    type Err = CepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Cep {
    type Error = CepError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Cep> for String {
    fn from(cep: Cep) -> Self {
        cep.0
    }
}

impl AsRef<str> for Cep {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_mask() {
        assert_eq!(Cep::parse("01310-100").unwrap().as_str(), "01310100");
        assert_eq!(Cep::parse(" 22.041-001 ").unwrap().as_str(), "22041001");
    }

    #[test]
    fn test_parse_truncates_extra_digits() {
        assert_eq!(Cep::parse("123456789").unwrap().as_str(), "12345678");
    }

    #[test]
    fn test_parse_rejects_short_input() {
        assert_eq!(Cep::parse("1234-567"), Err(CepError::WrongLength(7)));
        assert_eq!(Cep::parse("abc"), Err(CepError::Empty));
        assert_eq!(Cep::parse(""), Err(CepError::Empty));
    }

    #[test]
    fn test_formatted() {
        let cep = Cep::parse("01310100").unwrap();
        assert_eq!(cep.formatted(), "01310-100");
        assert_eq!(cep.to_string(), "01310-100");
    }

    #[test]
    fn test_region_by_first_digit() {
        assert_eq!(Cep::parse("13010-000").unwrap().region(), Region::Sudeste);
        assert_eq!(Cep::parse("20040-002").unwrap().region(), Region::Sudeste);
        assert_eq!(Cep::parse("40010-000").unwrap().region(), Region::Nordeste);
        assert_eq!(Cep::parse("69005-010").unwrap().region(), Region::Norte);
        assert_eq!(Cep::parse("70040-010").unwrap().region(), Region::CentroOeste);
        assert_eq!(Cep::parse("90010-000").unwrap().region(), Region::Sul);
    }

    #[test]
    fn test_serde_validates() {
        let cep: Cep = serde_json::from_str("\"01310-100\"").unwrap();
        assert_eq!(serde_json::to_string(&cep).unwrap(), "\"01310100\"");
        assert!(serde_json::from_str::<Cep>("\"123\"").is_err());
    }
}
