//! Stock book with CSV / JSON import and export.
//!
//! Entries are keyed by `"{name_local}_{category}"`. Imports replace the whole
//! book and are all-or-nothing: every row is validated before anything is
//! swapped in.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PosError, PosResult};

pub const ALL_CATEGORIES: &str = "ALL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockFormat {
    Csv,
    Json,
}

impl StockFormat {
    pub fn extension(self) -> &'static str {
        match self {
            StockFormat::Csv => "csv",
            StockFormat::Json => "json",
        }
    }

    fn label(self) -> &'static str {
        match self {
            StockFormat::Csv => "CSV",
            StockFormat::Json => "JSON",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("csv") => Some(StockFormat::Csv),
            Some("json") => Some(StockFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockEntry {
    #[serde(alias = "khmerName")]
    pub name_local: String,
    #[serde(default, alias = "englishName")]
    pub name_alt: String,
    #[serde(default)]
    pub category: String,
    /// Whole riel.
    #[serde(default, alias = "price", alias = "priceKHR")]
    pub unit_price: i64,
    #[serde(alias = "quantity")]
    pub quantity_on_hand: u32,
    #[serde(alias = "lastUpdated", alias = "last_updated")]
    pub last_updated_at: DateTime<Utc>,
}

impl StockEntry {
    /// Names and category are trimmed. Use [`StockEntry::normalized`] or
    /// [`StockBook::upsert`] to reject an empty name.
    pub fn new(
        name_local: impl Into<String>,
        name_alt: impl Into<String>,
        category: impl Into<String>,
        unit_price: i64,
        quantity_on_hand: u32,
    ) -> Self {
        Self {
            name_local: name_local.into().trim().to_string(),
            name_alt: name_alt.into().trim().to_string(),
            category: category.into().trim().to_string(),
            unit_price,
            quantity_on_hand,
            last_updated_at: Utc::now(),
        }
    }

    /// The form the book stores and both importers produce: text fields
    /// trimmed, local name required.
    pub fn normalized(mut self) -> Result<Self, &'static str> {
        for field in [&mut self.name_local, &mut self.name_alt, &mut self.category] {
            *field = field.trim().to_string();
        }
        if self.name_local.is_empty() {
            return Err("name_local is empty");
        }
        Ok(self)
    }

    pub fn key(&self) -> String {
        stock_key(&self.name_local, &self.category)
    }
}

pub fn stock_key(name_local: &str, category: &str) -> String {
    format!("{name_local}_{category}")
}

/// `stock_2026-03-05.csv`
pub fn export_file_name(format: StockFormat, date: NaiveDate) -> String {
    format!("stock_{}.{}", date.format("%Y-%m-%d"), format.extension())
}

/// Flat CSV row. Header: `name_local,name_alt,category,unit_price,quantity,last_updated`.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    name_local: String,
    #[serde(default)]
    name_alt: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    unit_price: String,
    quantity: String,
    #[serde(default)]
    last_updated: String,
}

fn floor_quantity(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn import_error(format: StockFormat, row: usize, message: impl Into<String>) -> PosError {
    PosError::Import {
        format: format.label(),
        row,
        message: message.into(),
    }
}

impl CsvRow {
    fn into_entry(self, row: usize, now: DateTime<Utc>) -> PosResult<StockEntry> {
        let fmt = StockFormat::Csv;
        let quantity: i64 = self
            .quantity
            .trim()
            .parse()
            .map_err(|_| {
                import_error(fmt, row, format!("quantity '{}' is not a number", self.quantity))
            })?;
        let unit_price: i64 = if self.unit_price.trim().is_empty() {
            0
        } else {
            self.unit_price
                .trim()
                .parse()
                .map_err(|_| {
                    let msg = format!("unit_price '{}' is not a number", self.unit_price);
                    import_error(fmt, row, msg)
                })?
        };
        let last_updated_at = if self.last_updated.trim().is_empty() {
            now
        } else {
            DateTime::parse_from_rfc3339(self.last_updated.trim())
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| import_error(fmt, row, format!("last_updated: {e}")))?
        };
        StockEntry {
            name_local: self.name_local,
            name_alt: self.name_alt,
            category: self.category,
            unit_price,
            quantity_on_hand: floor_quantity(quantity),
            last_updated_at,
        }
        .normalized()
        .map_err(|msg| import_error(fmt, row, msg))
    }
}

/// Lenient JSON entry: quantity may be negative and is floored at zero.
#[derive(Debug, Deserialize)]
struct JsonEntry {
    #[serde(alias = "khmerName")]
    name_local: String,
    #[serde(default, alias = "englishName")]
    name_alt: String,
    #[serde(default)]
    category: String,
    #[serde(default, alias = "price", alias = "priceKHR")]
    unit_price: i64,
    #[serde(alias = "quantity")]
    quantity_on_hand: i64,
    #[serde(default, alias = "lastUpdated", alias = "last_updated")]
    last_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StockBook {
    entries: BTreeMap<String, StockEntry>,
}

impl StockBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&StockEntry> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &StockEntry)> {
        self.entries.iter()
    }

    /// Insert or replace by key. Returns the key. The entry is normalized
    /// first, so everything in the book survives an export/import cycle.
    pub fn upsert(&mut self, entry: StockEntry) -> PosResult<String> {
        let entry = entry
            .normalized()
            .map_err(|msg| PosError::InvalidStock(msg.to_string()))?;
        Ok(self.insert(entry))
    }

    fn insert(&mut self, entry: StockEntry) -> String {
        let key = entry.key();
        self.entries.insert(key.clone(), entry);
        key
    }

    pub fn remove(&mut self, key: &str) -> Option<StockEntry> {
        self.entries.remove(key)
    }

    /// Set the on-hand quantity, floored at zero, and stamp the entry.
    pub fn set_quantity(&mut self, key: &str, quantity: i64) -> Option<u32> {
        let entry = self.entries.get_mut(key)?;
        entry.quantity_on_hand = floor_quantity(quantity);
        entry.last_updated_at = Utc::now();
        debug!(key, quantity = entry.quantity_on_hand, "Stock quantity set");
        Some(entry.quantity_on_hand)
    }

    pub fn adjust_quantity(&mut self, key: &str, delta: i64) -> Option<u32> {
        let current = i64::from(self.entries.get(key)?.quantity_on_hand);
        self.set_quantity(key, current.saturating_add(delta))
    }

    /// `ALL` followed by the distinct categories in sorted order.
    pub fn categories(&self) -> Vec<String> {
        let mut out = vec![ALL_CATEGORIES.to_string()];
        let mut seen: Vec<&str> = self.entries.values().map(|e| e.category.as_str()).collect();
        seen.sort_unstable();
        seen.dedup();
        out.extend(seen.into_iter().map(String::from));
        out
    }

    pub fn filter<'a>(
        &'a self,
        category: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a StockEntry)> + 'a {
        self.entries
            .iter()
            .filter(move |(_, e)| category == ALL_CATEGORIES || e.category == category)
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    pub fn export(&self, format: StockFormat) -> PosResult<String> {
        match format {
            StockFormat::Csv => self.export_csv(),
            StockFormat::Json => self.export_json(),
        }
    }

    pub fn export_csv(&self) -> PosResult<String> {
        if self.is_empty() {
            return Err(PosError::Export("no stock to export".into()));
        }
        let mut writer = csv::Writer::from_writer(Vec::new());
        for entry in self.entries.values() {
            writer
                .serialize(CsvRow {
                    name_local: entry.name_local.clone(),
                    name_alt: entry.name_alt.clone(),
                    category: entry.category.clone(),
                    unit_price: entry.unit_price.to_string(),
                    quantity: entry.quantity_on_hand.to_string(),
                    last_updated: entry.last_updated_at.to_rfc3339(),
                })
                .map_err(|e| PosError::Export(format!("CSV write: {e}")))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| PosError::Export(format!("CSV flush: {e}")))?;
        String::from_utf8(bytes).map_err(|e| PosError::Export(format!("CSV encoding: {e}")))
    }

    /// Object keyed by stock key.
    pub fn export_json(&self) -> PosResult<String> {
        if self.is_empty() {
            return Err(PosError::Export("no stock to export".into()));
        }
        Ok(serde_json::to_string_pretty(&self.entries)?)
    }

    // -----------------------------------------------------------------------
    // Import
    // -----------------------------------------------------------------------

    /// Parse `raw` and replace the whole book. On error the book is unchanged.
    pub fn import(&mut self, format: StockFormat, raw: &str) -> PosResult<usize> {
        let parsed = match format {
            StockFormat::Csv => Self::parse_csv(raw)?,
            StockFormat::Json => Self::parse_json(raw)?,
        };
        let count = parsed.len();
        *self = parsed;
        info!(format = format.label(), entries = count, "Stock imported");
        Ok(count)
    }

    pub fn import_csv(&mut self, raw: &str) -> PosResult<usize> {
        self.import(StockFormat::Csv, raw)
    }

    pub fn import_json(&mut self, raw: &str) -> PosResult<usize> {
        self.import(StockFormat::Json, raw)
    }

    /// Rows are numbered from 1 after the header.
    pub fn parse_csv(raw: &str) -> PosResult<Self> {
        let now = Utc::now();
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(raw.as_bytes());
        let mut book = StockBook::new();
        for (idx, record) in reader.deserialize::<CsvRow>().enumerate() {
            let row = idx + 1;
            let record = record.map_err(|e| import_error(StockFormat::Csv, row, e.to_string()))?;
            book.insert(record.into_entry(row, now)?);
        }
        Ok(book)
    }

    /// Accepts an object keyed by stock key (the export shape) or a plain
    /// array of entries. Keys are recomputed from each entry. Rows are
    /// numbered from 1 in document order.
    pub fn parse_json(raw: &str) -> PosResult<Self> {
        let fmt = StockFormat::Json;
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| import_error(fmt, 0, e.to_string()))?;
        let items: Vec<serde_json::Value> = match value {
            serde_json::Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
            serde_json::Value::Array(items) => items,
            _ => return Err(import_error(fmt, 0, "expected an object or array")),
        };

        let now = Utc::now();
        let mut book = StockBook::new();
        for (idx, item) in items.into_iter().enumerate() {
            let row = idx + 1;
            let entry: JsonEntry =
                serde_json::from_value(item).map_err(|e| import_error(fmt, row, e.to_string()))?;
            let entry = StockEntry {
                name_local: entry.name_local,
                name_alt: entry.name_alt,
                category: entry.category,
                unit_price: entry.unit_price,
                quantity_on_hand: floor_quantity(entry.quantity_on_hand),
                last_updated_at: entry.last_updated_at.unwrap_or(now),
            }
            .normalized()
            .map_err(|msg| import_error(fmt, row, msg))?;
            book.insert(entry);
        }
        Ok(book)
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    /// Load a book from a `.csv` or `.json` file. A missing file is an empty
    /// book.
    pub fn load(path: &Path) -> PosResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Stock file missing, starting empty");
            return Ok(StockBook::new());
        }
        let format = StockFormat::from_path(path).unwrap_or(StockFormat::Json);
        let raw = fs::read_to_string(path)?;
        match format {
            StockFormat::Csv => Self::parse_csv(&raw),
            StockFormat::Json => Self::parse_json(&raw),
        }
    }

    pub fn save(&self, path: &Path) -> PosResult<()> {
        let format = StockFormat::from_path(path).unwrap_or(StockFormat::Json);
        let body = self.export(format)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, body)?;
        info!(path = %path.display(), entries = self.len(), "Stock saved");
        Ok(())
    }
}
