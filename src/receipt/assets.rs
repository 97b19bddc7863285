//! Logo, QR image and font loading for the renderers.
//!
//! A source is a `data:image/...;base64,` URL, an `http(s)://` URL, a
//! `file://` URL or a plain path. Nothing here fails the render: a source that
//! cannot be read or decoded is logged, recorded as a [`RenderWarning`] and
//! left as [`AssetSlot::Missing`] so the renderers keep a blank space for it.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use image::{DynamicImage, ImageFormat};
use rusttype::Font;
use tracing::{debug, warn};

use super::RenderWarning;
use crate::config::ReceiptConfig;
use crate::error::{PosError, PosResult};

const HTTP_TIMEOUT: Duration = Duration::from_secs(8);

/// A decoded image plus the bytes it came from, for re-embedding as a data URL.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub image: DynamicImage,
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

impl LoadedImage {
    pub fn from_bytes(bytes: Vec<u8>) -> PosResult<Self> {
        let format = image::guess_format(&bytes)
            .map_err(|e| PosError::Asset(format!("unknown image format: {e}")))?;
        let image = image::load_from_memory_with_format(&bytes, format)
            .map_err(|e| PosError::Asset(format!("decode: {e}")))?;
        if image.width() == 0 || image.height() == 0 {
            return Err(PosError::Asset("image has invalid dimensions".into()));
        }
        let mime = match format {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
            ImageFormat::WebP => "image/webp",
            _ => "image/png",
        };
        Ok(Self { image, bytes, mime })
    }

    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

#[derive(Debug, Clone, Default)]
pub enum AssetSlot {
    #[default]
    NotConfigured,
    Loaded(LoadedImage),
    /// Configured but unreadable. Renderers leave a blank placeholder.
    Missing,
}

impl AssetSlot {
    pub fn is_missing(&self) -> bool {
        matches!(self, AssetSlot::Missing)
    }
}

/// Everything the renderers may draw besides text.
#[derive(Default)]
pub struct ReceiptAssets {
    pub logo: AssetSlot,
    /// Static payment QR. When not configured the renderers generate one
    /// from the receipt payload.
    pub qr_image: AssetSlot,
    /// TTF/OTF font for the raster renderer.
    pub font: Option<Font<'static>>,
    /// Asset problems found while loading.
    pub warnings: Vec<RenderWarning>,
}

impl ReceiptAssets {
    /// Resolve every asset named in `cfg`.
    pub async fn load(cfg: &ReceiptConfig) -> Self {
        let mut assets = ReceiptAssets::default();

        if cfg.show_logo {
            if let Some(source) = non_empty(cfg.logo.as_deref()) {
                assets.logo = assets.load_slot("logo", source).await;
            }
        }
        if cfg.show_qr {
            if let Some(source) = non_empty(cfg.qr_image.as_deref()) {
                assets.qr_image = assets.load_slot("qr", source).await;
            }
        }
        if let Some(path) = cfg.font_path.as_deref() {
            assets.font = assets.load_font(path).await;
        }
        assets
    }

    async fn load_slot(&mut self, kind: &'static str, source: &str) -> AssetSlot {
        let result = match read_source_bytes(source).await {
            Ok(bytes) => LoadedImage::from_bytes(bytes),
            Err(e) => Err(e),
        };
        match result {
            Ok(image) => {
                debug!(
                    asset = kind,
                    width = image.image.width(),
                    height = image.image.height(),
                    "Receipt asset loaded"
                );
                AssetSlot::Loaded(image)
            }
            Err(e) => {
                warn!(asset = kind, error = %e, "Receipt asset not loaded, leaving blank");
                self.warnings.push(RenderWarning::new(
                    format!("{kind}_unavailable"),
                    format!("{kind} image could not be loaded: {e}"),
                ));
                AssetSlot::Missing
            }
        }
    }

    async fn load_font(&mut self, path: &Path) -> Option<Font<'static>> {
        let loaded = match tokio::fs::read(path).await {
            Ok(bytes) => Font::try_from_vec(bytes)
                .ok_or_else(|| PosError::Asset("not a TrueType/OpenType font".into())),
            Err(e) => Err(PosError::Asset(format!("read {}: {e}", path.display()))),
        };
        match loaded {
            Ok(font) => {
                debug!(path = %path.display(), "Receipt font loaded");
                Some(font)
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Receipt font not loaded, using bitmap font"
                );
                self.warnings.push(RenderWarning::new(
                    "font_unavailable",
                    format!("font could not be loaded, using built-in bitmap font: {e}"),
                ));
                None
            }
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub(crate) fn parse_data_url_image(source: &str) -> Option<Vec<u8>> {
    let trimmed = source.trim();
    if !trimmed.starts_with("data:image/") {
        return None;
    }
    let (_, payload) = trimmed.split_once(',')?;
    base64::engine::general_purpose::STANDARD.decode(payload).ok()
}

/// Read raw bytes from any supported source form.
pub async fn read_source_bytes(source: &str) -> PosResult<Vec<u8>> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(PosError::Asset("source is empty".into()));
    }

    if trimmed.starts_with("data:") {
        return parse_data_url_image(trimmed)
            .ok_or_else(|| PosError::Asset("malformed image data URL".into()));
    }

    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| PosError::Asset(format!("HTTP client: {e}")))?;
        let response = client
            .get(trimmed)
            .send()
            .await
            .map_err(|e| PosError::Asset(format!("fetch failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PosError::Asset(format!(
                "fetch failed with HTTP {}",
                response.status()
            )));
        }
        return response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|e| PosError::Asset(format!("fetch bytes failed: {e}")));
    }

    let path_value = match trimmed.strip_prefix("file://") {
        Some(raw) => {
            let bytes = raw.as_bytes();
            if cfg!(windows) && bytes.len() >= 3 && bytes[0] == b'/' && bytes[2] == b':' {
                raw[1..].to_string()
            } else {
                raw.to_string()
            }
        }
        None => trimmed.to_string(),
    };

    tokio::fs::read(&path_value)
        .await
        .map_err(|e| PosError::Asset(format!("file read failed ({path_value}): {e}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn png_bytes(width: u32, height: u32, luma: u8) -> Vec<u8> {
        let mut encoded = Vec::new();
        let img = DynamicImage::ImageLuma8(image::GrayImage::from_pixel(
            width,
            height,
            image::Luma([luma]),
        ));
        img.write_to(&mut std::io::Cursor::new(&mut encoded), ImageFormat::Png)
            .expect("encode png");
        encoded
    }

    pub(crate) fn png_data_url(width: u32, height: u32) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png_bytes(width, height, 0))
        )
    }

    #[test]
    fn parse_data_url_png() {
        let bytes = parse_data_url_image(&png_data_url(2, 2)).expect("data url should decode");
        let loaded = LoadedImage::from_bytes(bytes).expect("decode");
        assert_eq!(loaded.mime, "image/png");
        assert_eq!(loaded.image.width(), 2);
        assert!(loaded.data_url().starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn loads_logo_from_file_url() {
        let dir = std::env::temp_dir().join(format!("kiosk_pos_assets_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create dir");
        let path = dir.join("logo.png");
        std::fs::write(&path, png_bytes(10, 4, 0)).expect("write logo");

        let cfg = ReceiptConfig {
            logo: Some(format!("file://{}", path.display())),
            ..ReceiptConfig::default()
        };
        let assets = ReceiptAssets::load(&cfg).await;
        assert!(assets.warnings.is_empty());
        let AssetSlot::Loaded(logo) = &assets.logo else {
            panic!("logo not loaded");
        };
        assert_eq!(logo.image.width(), 10);
        assert!(matches!(assets.qr_image, AssetSlot::NotConfigured));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn missing_assets_become_warnings() {
        let missing =
            std::env::temp_dir().join(format!("kiosk_pos_nope_{}.png", uuid::Uuid::new_v4()));
        let cfg = ReceiptConfig {
            logo: Some(missing.display().to_string()),
            qr_image: Some("data:image/png;base64,!!!".to_string()),
            font_path: Some(missing.clone()),
            ..ReceiptConfig::default()
        };
        let assets = ReceiptAssets::load(&cfg).await;
        assert!(assets.logo.is_missing());
        assert!(assets.qr_image.is_missing());
        assert!(assets.font.is_none());
        let codes: Vec<_> = assets.warnings.iter().map(|w| w.code.as_str()).collect();
        assert_eq!(codes, ["logo_unavailable", "qr_unavailable", "font_unavailable"]);
    }

    #[tokio::test]
    async fn disabled_logo_is_not_loaded() {
        let cfg = ReceiptConfig {
            show_logo: false,
            logo: Some("/does/not/exist.png".to_string()),
            ..ReceiptConfig::default()
        };
        let assets = ReceiptAssets::load(&cfg).await;
        assert!(matches!(assets.logo, AssetSlot::NotConfigured));
        assert!(assets.warnings.is_empty());
    }
}
