use serde::{Deserialize, Serialize};

use pacterp_core::{AggregateId, DomainError, DomainResult, ValueObject};

/// Currency identifier (tenant-scoped via directory lookups).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyId(pub AggregateId);

impl CurrencyId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CurrencyId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// ISO-style currency code: exactly three ASCII uppercase letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn new(code: impl Into<String>) -> DomainResult<Self> {
        let code = code.into();
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(DomainError::validation(format!(
                "currency code must be exactly 3 uppercase ASCII letters, got '{code}'"
            )));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl ValueObject for CurrencyCode {}

/// Display symbol: exactly one character (e.g. '$', '€').
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencySymbol(String);

impl CurrencySymbol {
    pub fn new(symbol: impl Into<String>) -> DomainResult<Self> {
        let symbol = symbol.into();
        if symbol.chars().count() != 1 {
            return Err(DomainError::validation(format!(
                "currency symbol must be exactly 1 character, got '{symbol}'"
            )));
        }
        Ok(Self(symbol))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for CurrencySymbol {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl ValueObject for CurrencySymbol {}

/// Canonical currency definition.
///
/// Immutable once any financial record references it: historical amounts are
/// protected by frozen rate snapshots, and the directory rejects in-place
/// edits of a referenced currency so a rename can never change what a stored
/// amount meant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub id: CurrencyId,
    pub name: String,
    pub code: CurrencyCode,
    pub symbol: CurrencySymbol,
}

impl Currency {
    pub fn new(
        id: CurrencyId,
        name: impl Into<String>,
        code: CurrencyCode,
        symbol: CurrencySymbol,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("currency name cannot be empty"));
        }
        Ok(Self {
            id,
            name,
            code,
            symbol,
        })
    }
}
