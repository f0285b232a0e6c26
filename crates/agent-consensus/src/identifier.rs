//! Validated instrument identifiers

use crate::error::{ConsensusError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Market an identifier belongs to, decided by its shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    /// 4-digit numeric codes
    Domestic,
    /// 1-5 letter alphabetic tickers
    Foreign,
}

/// A validated instrument code
///
/// Two shapes are accepted: exactly four ASCII digits (domestic market) or one
/// to five ASCII letters (foreign market, stored upper-cased). The value never
/// changes after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    code: String,
    market: Market,
}

impl Identifier {
    /// Validate a raw identifier string
    pub fn parse(raw: &str) -> Result<Self> {
        let code = raw.trim();

        if code.len() == 4 && code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(Self {
                code: code.to_string(),
                market: Market::Domestic,
            });
        }

        if (1..=5).contains(&code.len()) && code.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Ok(Self {
                code: code.to_ascii_uppercase(),
                market: Market::Foreign,
            });
        }

        Err(ConsensusError::InvalidIdentifier(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.code
    }

    pub fn market(&self) -> Market {
        self.market
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

impl FromStr for Identifier {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.code
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
