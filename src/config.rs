//! Application configuration.
//!
//! Values are resolved in this order (highest priority first):
//! 1. `KIOSK_POS_*` environment overrides
//! 2. JSON config file (`--config` flag or `KIOSK_POS_CONFIG`)
//! 3. Built-in defaults
//!
//! Every section is `#[serde(default)]`, so a config file only needs the keys
//! it changes.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::PricePolicy;
use crate::error::{PosError, PosResult};
use crate::escpos::{PaperWidth, TextEncoding};

pub const CONFIG_PATH_ENV: &str = "KIOSK_POS_CONFIG";
pub const USD_TO_KHR_ENV: &str = "KIOSK_POS_USD_TO_KHR";
pub const PAPER_MM_ENV: &str = "KIOSK_POS_PAPER_MM";

/// Common thermal printer GATT service.
pub const PRINTER_SERVICE_UUID: Uuid = Uuid::from_u128(0x000018f0_0000_1000_8000_00805f9b34fb);
/// Write characteristic under [`PRINTER_SERVICE_UUID`].
pub const PRINTER_WRITE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00002af1_0000_1000_8000_00805f9b34fb);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub shop: ShopProfile,
    pub pricing: PricingConfig,
    pub receipt: ReceiptConfig,
    pub bluetooth: BluetoothConfig,
    pub rawbt: RawBtConfig,
    pub paths: PathsConfig,
}

/// Shop identity printed in the receipt header and footer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShopProfile {
    pub name: String,
    pub address: String,
    pub phone: String,
    pub footer_lines: Vec<String>,
}

impl Default for ShopProfile {
    fn default() -> Self {
        Self {
            name: "ហាងលក់ទំនិញ".to_string(),
            address: "ផ្ទះលេខ 137 , ផ្លូវ 223, កំពង់ចាម".to_string(),
            phone: "016 438 555 / 061 91 4444".to_string(),
            footer_lines: vec![
                "សូមអរគុណ!".to_string(),
                "សូមអញ្ជើញមកម្តងទៀត!".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Riel per dollar, applied only when an item has no riel price.
    pub usd_to_khr: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self { usd_to_khr: 4000.0 }
    }
}

impl PricingConfig {
    pub fn policy(&self) -> PricePolicy {
        PricePolicy::new(self.usd_to_khr)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiptConfig {
    pub paper_mm: u32,
    pub text_encoding: TextEncoding,
    pub show_logo: bool,
    /// File path, `file://` URL, `http(s)://` URL or `data:image/...` URL.
    pub logo: Option<String>,
    pub show_qr: bool,
    /// Static payment QR image. When unset the QR is generated from the
    /// receipt payload.
    pub qr_image: Option<String>,
    /// TTF/OTF font with Khmer coverage for the raster renderer.
    pub font_path: Option<PathBuf>,
    pub html_scale: f32,
    pub html_auto_print: bool,
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            paper_mm: 58,
            text_encoding: TextEncoding::Utf8,
            show_logo: true,
            logo: None,
            show_qr: true,
            qr_image: None,
            font_path: None,
            html_scale: 1.0,
            html_auto_print: true,
        }
    }
}

impl ReceiptConfig {
    pub fn paper_width(&self) -> PaperWidth {
        PaperWidth::from_mm(self.paper_mm)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    pub name_prefixes: Vec<String>,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub chunk_size: usize,
    pub chunk_delay_ms: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            name_prefixes: ["Sawoo", "LK-P34", "BlueTooth Printer", "MTP"]
                .into_iter()
                .map(String::from)
                .collect(),
            service_uuid: PRINTER_SERVICE_UUID,
            characteristic_uuid: PRINTER_WRITE_CHARACTERISTIC_UUID,
            chunk_size: 512,
            chunk_delay_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RawBtConfig {
    pub scheme: String,
}

impl Default for RawBtConfig {
    fn default() -> Self {
        Self {
            scheme: "rawbt".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub receipts_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            receipts_dir: PathBuf::from("receipts"),
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Load config from `path`, or from `KIOSK_POS_CONFIG` when `path` is
    /// `None`. With neither set, defaults are used. Env overrides are applied
    /// last and the result is validated.
    pub fn load(path: Option<&Path>) -> PosResult<Self> {
        let resolved = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match resolved {
            Some(path) => {
                let raw = fs::read_to_string(&path).map_err(|e| {
                    PosError::Config(format!("read {}: {e}", path.display()))
                })?;
                let parsed: AppConfig = serde_json::from_str(&raw).map_err(|e| {
                    PosError::Config(format!("parse {}: {e}", path.display()))
                })?;
                info!(path = %path.display(), "Loaded configuration file");
                parsed
            }
            None => {
                debug!("No configuration file given, using defaults");
                AppConfig::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(raw) = env::var(USD_TO_KHR_ENV) {
            match raw.trim().parse::<f64>() {
                Ok(rate) => self.pricing.usd_to_khr = rate,
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid {USD_TO_KHR_ENV}"),
            }
        }
        if let Ok(raw) = env::var(PAPER_MM_ENV) {
            match raw.trim().parse::<u32>() {
                Ok(mm) => self.receipt.paper_mm = mm,
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid {PAPER_MM_ENV}"),
            }
        }
    }

    pub fn validate(&self) -> PosResult<()> {
        let rate = self.pricing.usd_to_khr;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(PosError::Config(format!(
                "pricing.usd_to_khr must be a positive number, got {rate}"
            )));
        }
        if self.bluetooth.chunk_size == 0 {
            return Err(PosError::Config(
                "bluetooth.chunk_size must be greater than zero".into(),
            ));
        }
        if !self.receipt.html_scale.is_finite() || self.receipt.html_scale <= 0.0 {
            return Err(PosError::Config("receipt.html_scale must be positive".into()));
        }
        if self.rawbt.scheme.trim().is_empty() {
            return Err(PosError::Config("rawbt.scheme cannot be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn scratch_dir() -> PathBuf {
        let dir = env::temp_dir().join(format!("kiosk_pos_config_{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    #[test]
    #[serial]
    fn defaults_without_file() {
        env::remove_var(CONFIG_PATH_ENV);
        env::remove_var(USD_TO_KHR_ENV);
        env::remove_var(PAPER_MM_ENV);
        let cfg = AppConfig::load(None).expect("defaults load");
        assert_eq!(cfg.receipt.paper_mm, 58);
        assert_eq!(cfg.bluetooth.chunk_size, 512);
        assert_eq!(cfg.bluetooth.chunk_delay_ms, 100);
        assert_eq!(
            cfg.bluetooth.service_uuid.to_string(),
            "000018f0-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            cfg.bluetooth.characteristic_uuid.to_string(),
            "00002af1-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(cfg.rawbt.scheme, "rawbt");
    }

    #[test]
    #[serial]
    fn partial_file_keeps_other_defaults() {
        env::remove_var(USD_TO_KHR_ENV);
        env::remove_var(PAPER_MM_ENV);
        let dir = scratch_dir();
        let path = dir.join("config.json");
        fs::write(
            &path,
            r#"{ "shop": { "name": "Kampot Coffee" }, "receipt": { "paper_mm": 80 } }"#,
        )
        .expect("write config");

        let cfg = AppConfig::load(Some(&path)).expect("load file");
        assert_eq!(cfg.shop.name, "Kampot Coffee");
        assert_eq!(cfg.shop.phone, ShopProfile::default().phone);
        assert_eq!(cfg.receipt.paper_width(), PaperWidth::Mm80);
        assert_eq!(cfg.pricing.usd_to_khr, 4000.0);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    #[serial]
    fn env_overrides_win_over_file() {
        let dir = scratch_dir();
        let path = dir.join("config.json");
        fs::write(&path, r#"{ "pricing": { "usd_to_khr": 4100 } }"#).expect("write config");

        env::set_var(USD_TO_KHR_ENV, "4050");
        env::set_var(PAPER_MM_ENV, "80");
        let cfg = AppConfig::load(Some(&path)).expect("load with overrides");
        env::remove_var(USD_TO_KHR_ENV);
        env::remove_var(PAPER_MM_ENV);

        assert_eq!(cfg.pricing.usd_to_khr, 4050.0);
        assert_eq!(cfg.receipt.paper_mm, 80);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    #[serial]
    fn missing_explicit_file_is_an_error() {
        let missing = env::temp_dir().join(format!("kiosk_pos_missing_{}.json", Uuid::new_v4()));
        let err = AppConfig::load(Some(&missing)).unwrap_err();
        assert!(matches!(err, PosError::Config(_)));
    }

    #[test]
    fn rejects_non_positive_rate() {
        let mut cfg = AppConfig::default();
        cfg.pricing.usd_to_khr = 0.0;
        assert!(cfg.validate().is_err());
        cfg.pricing.usd_to_khr = f64::NAN;
        assert!(cfg.validate().is_err());
    }
}
