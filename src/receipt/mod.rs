//! Receipt pipeline: one [`ReceiptDocument`] feeds three renderers.
//!
//! ```text
//! Order + totals ──► ReceiptDocument ──► Renderer::Text   ──► ESC/POS bytes | plain text
//!                                    ├─► Renderer::Raster ──► PNG
//!                                    └─► Renderer::Dom    ──► HTML fragment + page
//! ```

pub mod assets;
pub mod document;
pub mod html;
pub mod raster;
pub mod text;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ReceiptConfig;
use crate::error::PosResult;
use crate::escpos::{PaperWidth, TextEncoding};

pub use assets::{AssetSlot, LoadedImage, ReceiptAssets};
pub use document::{qr_payload, ReceiptDocument, ReceiptHeader, ReceiptLine};
pub use html::HtmlReceipt;

/// Non-fatal problem found while rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderWarning {
    pub code: String,
    pub message: String,
}

impl RenderWarning {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextFormat {
    /// Printer command stream.
    EscPos,
    /// Same layout with no control bytes.
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextOptions {
    pub paper: PaperWidth,
    pub encoding: TextEncoding,
    pub format: TextFormat,
    /// Print the receipt QR with the printer's `GS ( k` encoder. Ignored
    /// for plain text.
    #[serde(default)]
    pub show_qr: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RasterOptions {
    pub paper: PaperWidth,
    pub show_logo: bool,
    pub show_qr: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomOptions {
    pub paper: PaperWidth,
    pub scale: f32,
    pub auto_print: bool,
    pub show_logo: bool,
    pub show_qr: bool,
}

/// Rendering strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Renderer {
    Text(TextOptions),
    Raster(RasterOptions),
    Dom(DomOptions),
}

impl Renderer {
    pub fn escpos(cfg: &ReceiptConfig) -> Self {
        Renderer::Text(TextOptions {
            paper: cfg.paper_width(),
            encoding: cfg.text_encoding,
            format: TextFormat::EscPos,
            show_qr: cfg.show_qr,
        })
    }

    pub fn plain_text(cfg: &ReceiptConfig) -> Self {
        Renderer::Text(TextOptions {
            paper: cfg.paper_width(),
            encoding: cfg.text_encoding,
            format: TextFormat::Plain,
            show_qr: false,
        })
    }

    pub fn raster(cfg: &ReceiptConfig) -> Self {
        Renderer::Raster(RasterOptions {
            paper: cfg.paper_width(),
            show_logo: cfg.show_logo,
            show_qr: cfg.show_qr,
        })
    }

    pub fn dom(cfg: &ReceiptConfig) -> Self {
        Renderer::Dom(DomOptions {
            paper: cfg.paper_width(),
            scale: cfg.html_scale,
            auto_print: cfg.html_auto_print,
            show_logo: cfg.show_logo,
            show_qr: cfg.show_qr,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderedArtifact {
    EscPos(Vec<u8>),
    PlainText(String),
    Png(Vec<u8>),
    Html(HtmlReceipt),
}

impl RenderedArtifact {
    pub fn kind(&self) -> &'static str {
        match self {
            RenderedArtifact::EscPos(_) => "escpos",
            RenderedArtifact::PlainText(_) => "text",
            RenderedArtifact::Png(_) => "png",
            RenderedArtifact::Html(_) => "html",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub artifact: RenderedArtifact,
    pub warnings: Vec<RenderWarning>,
}

/// Render `doc` with the chosen strategy. Asset warnings gathered while
/// loading are carried into the output.
pub fn render(
    doc: &ReceiptDocument,
    renderer: &Renderer,
    assets: &ReceiptAssets,
) -> PosResult<RenderOutput> {
    let mut warnings = assets.warnings.clone();
    let artifact = match renderer {
        Renderer::Text(opts) => match opts.format {
            TextFormat::EscPos => RenderedArtifact::EscPos(text::render_escpos(doc, opts)),
            TextFormat::Plain => RenderedArtifact::PlainText(text::render_plain_text(doc, opts)),
        },
        Renderer::Raster(opts) => {
            let receipt = raster::render(doc, opts, assets, &mut warnings);
            RenderedArtifact::Png(raster::encode_png(&receipt)?)
        }
        Renderer::Dom(opts) => {
            RenderedArtifact::Html(html::render(doc, opts, assets, &mut warnings))
        }
    };
    debug!(
        invoice_id = doc.header.invoice_id,
        artifact = artifact.kind(),
        warnings = warnings.len(),
        "Receipt rendered"
    );
    Ok(RenderOutput { artifact, warnings })
}

#[cfg(test)]
mod tests {
    use super::document::tests::sample_document;
    use super::*;

    #[test]
    fn every_renderer_shows_every_line() {
        let doc = sample_document();
        let cfg = ReceiptConfig::default();
        let assets = ReceiptAssets::default();

        let escpos = render(&doc, &Renderer::escpos(&cfg), &assets).expect("escpos");
        let RenderedArtifact::EscPos(bytes) = escpos.artifact else {
            panic!("expected escpos bytes");
        };
        let as_text = String::from_utf8_lossy(&bytes);

        let plain = render(&doc, &Renderer::plain_text(&cfg), &assets).expect("plain");
        let RenderedArtifact::PlainText(plain) = plain.artifact else {
            panic!("expected plain text");
        };

        let dom = render(&doc, &Renderer::dom(&cfg), &assets).expect("dom");
        let RenderedArtifact::Html(html) = dom.artifact else {
            panic!("expected html");
        };

        for line in &doc.lines {
            for out in [as_text.as_ref(), plain.as_str(), html.fragment.as_str()] {
                assert!(out.contains(&line.name_local), "{}", line.name_local);
                assert!(out.contains(&format!("x{}", line.quantity)));
                assert!(out.contains(&line.total_label()));
            }
        }

        let png = render(&doc, &Renderer::raster(&cfg), &assets).expect("raster");
        assert_eq!(png.artifact.kind(), "png");
    }

    #[test]
    fn asset_warnings_are_carried_into_output() {
        let doc = sample_document();
        let assets = ReceiptAssets {
            logo: AssetSlot::Missing,
            warnings: vec![RenderWarning::new("logo_unavailable", "gone")],
            ..ReceiptAssets::default()
        };
        let out = render(&doc, &Renderer::escpos(&ReceiptConfig::default()), &assets)
            .expect("render");
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].code, "logo_unavailable");
    }
}
