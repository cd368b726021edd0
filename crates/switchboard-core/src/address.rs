//! Structured endpoint locations and partial-match queries.
//!
//! An address is a category tag plus two integer coordinates: the containing
//! unit and a sub-unit within it (for paged hosts, typically a tab and a
//! frame). Addresses are queryable; identities are not derived from them.

use core::fmt;

use serde::{Deserialize, Serialize};

/// An opaque category tag ("content", "popup", "devtools", ...).
///
/// The hub's address classifier decides which tags exist; the core only
/// compares them. `Category::unknown()` is the fallback for endpoints whose
/// origin cannot be classified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// The fallback category for unclassifiable endpoints.
    pub fn unknown() -> Self {
        Self("unknown".to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.0 == "unknown"
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Category {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// A full endpoint address: category + unit + sub-unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub category: Category,
    pub unit: u64,
    pub sub_unit: u64,
}

impl Address {
    pub fn new(category: Category, unit: u64, sub_unit: u64) -> Self {
        Self {
            category,
            unit,
            sub_unit,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.category, self.unit, self.sub_unit)
    }
}

/// A partial address match. All present fields must match (AND-combined);
/// an empty query matches every address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_unit: Option<u64>,
}

impl AddressQuery {
    pub fn category(category: Category) -> Self {
        Self {
            category: Some(category),
            ..Self::default()
        }
    }

    pub fn unit(unit: u64) -> Self {
        Self {
            unit: Some(unit),
            ..Self::default()
        }
    }

    /// Exact or partial address query: omitting the sub-unit means
    /// "all sub-units under that unit".
    pub fn address(category: Category, unit: u64, sub_unit: Option<u64>) -> Self {
        Self {
            category: Some(category),
            unit: Some(unit),
            sub_unit,
        }
    }

    #[must_use]
    pub fn matches(&self, address: &Address) -> bool {
        if let Some(category) = &self.category
            && category != &address.category
        {
            return false;
        }
        if let Some(unit) = self.unit
            && unit != address.unit
        {
            return false;
        }
        if let Some(sub_unit) = self.sub_unit
            && sub_unit != address.sub_unit
        {
            return false;
        }
        true
    }
}
