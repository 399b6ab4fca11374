use std::fmt;

use serde::{Deserialize, Serialize};

/// Short uppercase alphabetic currency code (e.g. `BTC`, `USDT`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl Into<String>) -> Result<Self, CurrencyError> {
        let code = code.into().to_ascii_uppercase();
        if code.is_empty() || code.len() > 12 {
            return Err(CurrencyError::InvalidLength(code));
        }
        if !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CurrencyError::NonAlphabetic(code));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = CurrencyError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

impl std::str::FromStr for Currency {
    type Err = CurrencyError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CurrencyError {
    #[error("currency code '{0}' must be 1-12 characters")]
    InvalidLength(String),
    #[error("currency code '{0}' must be alphabetic")]
    NonAlphabetic(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case() {
        let c = Currency::new("btc").unwrap();
        assert_eq!(c.as_str(), "BTC");
    }

    #[test]
    fn rejects_non_alphabetic() {
        assert!(Currency::new("BT3").is_err());
    }

    #[test]
    fn rejects_empty() {
        assert!(Currency::new("").is_err());
    }
}
