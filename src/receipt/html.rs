//! HTML receipts for the native print dialog.
//!
//! [`HtmlReceipt::fragment`] is the receipt markup on its own, for embedding
//! in a host page. [`HtmlReceipt::document`] wraps it in a standalone page
//! with print styles sized to the paper roll.

use base64::Engine;
use tracing::warn;

use super::assets::{AssetSlot, ReceiptAssets};
use super::document::ReceiptDocument;
use super::raster::encode_png;
use super::{DomOptions, RenderWarning};
use crate::error::{PosError, PosResult};

#[derive(Debug, Clone, PartialEq)]
pub struct HtmlReceipt {
    pub fragment: String,
    pub document: String,
}

fn esc(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn qr_data_url(payload: &str) -> PosResult<String> {
    let code = qrcode::QrCode::new(payload.as_bytes())
        .map_err(|e| PosError::Render(format!("QR encode: {e}")))?;
    let image = code
        .render::<image::Luma<u8>>()
        .quiet_zone(true)
        .min_dimensions(180, 180)
        .build();
    let png = encode_png(&image)?;
    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    ))
}

fn image_tag(slot: &AssetSlot, class: &str, alt: &str) -> Option<String> {
    match slot {
        AssetSlot::NotConfigured => None,
        AssetSlot::Loaded(image) => Some(format!(
            "<img class=\"{class}\" src=\"{}\" alt=\"{alt}\"/>",
            image.data_url()
        )),
        AssetSlot::Missing => Some(format!("<div class=\"{class} blank\"></div>")),
    }
}

fn line(label: &str, value: &str) -> String {
    format!(
        "<div class=\"line\"><span>{}</span><span>{}</span></div>",
        esc(label),
        esc(value)
    )
}

fn render_fragment(
    doc: &ReceiptDocument,
    opts: &DomOptions,
    assets: &ReceiptAssets,
    warnings: &mut Vec<RenderWarning>,
) -> String {
    let mut body = String::from("<div class=\"receipt\">");

    if opts.show_logo {
        if let Some(tag) = image_tag(&assets.logo, "logo", "logo") {
            body.push_str(&format!("<div class=\"center\">{tag}</div>"));
        }
    }

    body.push_str(&format!(
        "<div class=\"center shop\">{}</div>",
        esc(&doc.header.shop_name)
    ));
    if !doc.header.address.trim().is_empty() {
        body.push_str(&format!(
            "<div class=\"center\">{}</div>",
            esc(doc.header.address.trim())
        ));
    }
    if !doc.header.phone.trim().is_empty() {
        body.push_str(&format!("<div class=\"center\">{}</div>", esc(&doc.phone_label())));
    }
    body.push_str(&format!(
        "<div class=\"center\">{}</div><div class=\"center\">{}</div>",
        esc(&doc.header.timestamp),
        esc(&doc.invoice_label())
    ));

    body.push_str("<div class=\"section\">");
    for item in &doc.lines {
        body.push_str(&format!(
            "<div class=\"item\">{}</div>",
            esc(&item.name_local)
        ));
        body.push_str(&line(&item.quantity_label(), &item.total_label()));
    }
    body.push_str("</div>");

    body.push_str(&format!(
        "<div class=\"section center total\">{}</div>",
        esc(&doc.total_label())
    ));

    if opts.show_qr {
        let tag = match &assets.qr_image {
            AssetSlot::NotConfigured => match qr_data_url(&doc.qr_payload) {
                Ok(url) => Some(format!("<img class=\"qr\" src=\"{url}\" alt=\"QR\"/>")),
                Err(e) => {
                    warn!(error = %e, "QR code not generated, leaving blank");
                    warnings.push(RenderWarning::new("qr_unavailable", e.to_string()));
                    Some("<div class=\"qr blank\"></div>".to_string())
                }
            },
            slot => image_tag(slot, "qr", "QR"),
        };
        if let Some(tag) = tag {
            body.push_str(&format!("<div class=\"section center\">{tag}</div>"));
        }
    }

    if !doc.footer.is_empty() {
        body.push_str("<div class=\"center footer\">");
        for footer in &doc.footer {
            body.push_str(&format!("<div>{}</div>", esc(footer)));
        }
        body.push_str("</div>");
    }
    body.push_str("</div>");
    body
}

fn html_shell(title: &str, body: &str, opts: &DomOptions) -> String {
    let mm = opts.paper.mm();
    let scale = opts.scale;
    let auto_print = if opts.auto_print {
        "window.addEventListener('load', function () { window.print(); });"
    } else {
        ""
    };
    format!(
        r#"<!DOCTYPE html>
<html lang="km">
<head>
<meta charset="UTF-8"/>
<meta name="viewport" content="width=device-width, initial-scale=1.0"/>
<title>{title}</title>
<style>
body {{ font-family: "Noto Sans Khmer", "Khmer OS", ui-monospace, monospace; margin: 0; padding: 8px; background: #fff; color: #000; }}
.receipt {{ width: {mm}mm; font-size: 11px; transform: scale({scale}); transform-origin: top left; }}
.line {{ display: flex; justify-content: space-between; gap: 8px; }}
.item {{ margin-top: 4px; }}
.section {{ margin-top: 6px; border-top: 1px dashed #000; padding-top: 6px; }}
.center {{ text-align: center; }}
.shop {{ font-size: 15px; font-weight: bold; }}
.total {{ font-size: 14px; font-weight: bold; }}
.logo {{ width: 50px; height: 50px; object-fit: contain; }}
.qr {{ width: 90px; height: 90px; }}
.blank {{ display: inline-block; }}
.footer {{ margin-top: 8px; }}
@media print {{
  @page {{ size: {mm}mm auto; margin: 0; }}
  body {{ padding: 0; width: {mm}mm; }}
}}
</style>
</head>
<body>{body}
<script>
window.addEventListener('afterprint', function () {{
  document.querySelectorAll('.receipt').forEach(function (el) {{ el.style.transform = 'none'; }});
}});
{auto_print}
</script>
</body>
</html>"#,
        title = esc(title),
    )
}

pub fn render(
    doc: &ReceiptDocument,
    opts: &DomOptions,
    assets: &ReceiptAssets,
    warnings: &mut Vec<RenderWarning>,
) -> HtmlReceipt {
    let fragment = render_fragment(doc, opts, assets, warnings);
    let title = format!("{} #{}", doc.header.shop_name, doc.header.invoice_id);
    let document = html_shell(&title, &fragment, opts);
    HtmlReceipt { fragment, document }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escpos::PaperWidth;
    use crate::receipt::document::tests::sample_document;

    fn opts(paper: PaperWidth, auto_print: bool) -> DomOptions {
        DomOptions {
            paper,
            scale: 1.25,
            auto_print,
            show_logo: true,
            show_qr: true,
        }
    }

    #[test]
    fn document_has_print_styles_for_paper_width() {
        let mut warnings = Vec::new();
        let out = render(
            &sample_document(),
            &opts(PaperWidth::Mm80, true),
            &ReceiptAssets::default(),
            &mut warnings,
        );
        assert!(out.document.contains("@media print"));
        assert!(out.document.contains("size: 80mm auto"));
        assert!(out.document.contains("scale(1.25)"));
        assert!(out.document.contains("afterprint"));
        assert!(out.document.contains("window.print()"));
        assert!(out.document.contains(&out.fragment));
        assert!(warnings.is_empty());
    }

    #[test]
    fn auto_print_can_be_disabled() {
        let mut warnings = Vec::new();
        let out = render(
            &sample_document(),
            &opts(PaperWidth::Mm58, false),
            &ReceiptAssets::default(),
            &mut warnings,
        );
        assert!(!out.document.contains("window.print()"));
        assert!(out.document.contains("size: 58mm auto"));
    }

    #[test]
    fn generated_qr_is_embedded() {
        let mut warnings = Vec::new();
        let out = render(
            &sample_document(),
            &opts(PaperWidth::Mm58, false),
            &ReceiptAssets::default(),
            &mut warnings,
        );
        assert!(out.fragment.contains("class=\"qr\" src=\"data:image/png;base64,"));
    }

    #[test]
    fn missing_logo_leaves_blank_placeholder() {
        let assets = ReceiptAssets {
            logo: AssetSlot::Missing,
            ..ReceiptAssets::default()
        };
        let mut warnings = Vec::new();
        let out = render(
            &sample_document(),
            &opts(PaperWidth::Mm58, false),
            &assets,
            &mut warnings,
        );
        assert!(out.fragment.contains("<div class=\"logo blank\"></div>"));
    }

    #[test]
    fn escapes_markup_in_names() {
        let mut doc = sample_document();
        doc.header.shop_name = "<Tea & Co>".to_string();
        let mut warnings = Vec::new();
        let out = render(
            &doc,
            &opts(PaperWidth::Mm58, false),
            &ReceiptAssets::default(),
            &mut warnings,
        );
        assert!(out.fragment.contains("&lt;Tea &amp; Co&gt;"));
        assert!(!out.fragment.contains("<Tea"));
    }
}
