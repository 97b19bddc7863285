//! Menu catalog and the price policy.
//!
//! Every amount the crate prints or sums goes through
//! [`PricePolicy::effective_unit_price`], so order keys, totals and receipts
//! can never disagree about what an item costs.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::currency::{format_with_symbol, Currency};
use crate::error::{PosError, PosResult};

pub const DEFAULT_ICON: &str = "☕️";

fn default_icon() -> String {
    DEFAULT_ICON.to_string()
}

/// Immutable catalog entry.
///
/// Field aliases accept the camelCase keys used by older menu exports
/// (`khmerName`, `priceKHR`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuItem {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "khmerName")]
    pub name_local: String,
    #[serde(default, alias = "englishName")]
    pub name_alt: String,
    /// Whole riel.
    #[serde(default, alias = "priceKHR")]
    pub price_minor: Option<i64>,
    /// Dollars.
    #[serde(default, alias = "priceUSD")]
    pub price_alt: Option<f64>,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default)]
    pub category: String,
}

impl MenuItem {
    pub fn new(name_local: impl Into<String>, price_minor: i64) -> Self {
        Self {
            id: String::new(),
            name_local: name_local.into(),
            name_alt: String::new(),
            price_minor: Some(price_minor),
            price_alt: None,
            icon: default_icon(),
            category: String::new(),
        }
    }

    pub fn with_alt_name(mut self, name_alt: impl Into<String>) -> Self {
        self.name_alt = name_alt.into();
        self
    }

    pub fn with_usd_price(mut self, price_alt: f64) -> Self {
        self.price_alt = Some(price_alt);
        self
    }

    /// `៛8,000` / `$2.00` labels for menu tiles. Missing prices show as zero.
    pub fn price_labels(&self) -> (String, String) {
        let khr = self.price_minor.unwrap_or(0) as f64;
        let usd = self.price_alt.unwrap_or(0.0);
        (
            format_with_symbol(khr, Currency::Khr),
            format_with_symbol(usd, Currency::Usd),
        )
    }
}

/// Resolves the single riel price used for keys, totals and receipts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePolicy {
    usd_to_khr: f64,
}

impl Default for PricePolicy {
    fn default() -> Self {
        Self { usd_to_khr: 4000.0 }
    }
}

impl PricePolicy {
    pub fn new(usd_to_khr: f64) -> Self {
        Self { usd_to_khr }
    }

    pub fn usd_to_khr(&self) -> f64 {
        self.usd_to_khr
    }

    /// Riel price when set and positive, else the dollar price converted at
    /// the configured rate, else 0.
    pub fn effective_unit_price(&self, item: &MenuItem) -> i64 {
        if let Some(khr) = item.price_minor.filter(|p| *p > 0) {
            return khr;
        }
        match item.price_alt {
            Some(usd) if usd.is_finite() && usd > 0.0 => {
                let converted = (usd * self.usd_to_khr).round();
                if converted.is_finite() {
                    // `as` saturates on overflow.
                    converted as i64
                } else {
                    0
                }
            }
            _ => 0,
        }
    }
}

/// Menu items in display order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    items: Vec<MenuItem>,
}

impl Catalog {
    pub fn new(items: Vec<MenuItem>) -> Self {
        Self { items }
    }

    /// Parse a JSON array of items.
    pub fn from_json(raw: &str) -> PosResult<Self> {
        let items: Vec<MenuItem> = serde_json::from_str(raw)?;
        debug!(count = items.len(), "Parsed menu catalog");
        Ok(Self::new(items))
    }

    pub fn load(path: &Path) -> PosResult<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| PosError::Config(format!("read menu {}: {e}", path.display())))?;
        let catalog = Self::from_json(&raw)?;
        info!(path = %path.display(), items = catalog.len(), "Loaded menu catalog");
        Ok(catalog)
    }

    pub fn items(&self) -> &[MenuItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Lookup by id, falling back to the local name.
    pub fn find(&self, key: &str) -> Option<&MenuItem> {
        self.items
            .iter()
            .find(|i| !i.id.is_empty() && i.id == key)
            .or_else(|| self.items.iter().find(|i| i.name_local == key))
    }

    pub fn in_category<'a>(
        &'a self,
        category: &'a str,
    ) -> impl Iterator<Item = &'a MenuItem> + 'a {
        self.items
            .iter()
            .filter(move |i| category == "ALL" || i.category == category)
    }
}
