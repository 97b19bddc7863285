//! Bitmap receipts.
//!
//! The receipt is first laid out into [`Block`]s whose heights are known, so
//! the canvas can be allocated at its final size before anything is drawn.
//! Text uses the configured TrueType font when one was loaded, otherwise the
//! embedded 8×8 bitmap font scaled to the print-head density.

use std::io::Cursor;

use font8x8::{UnicodeFonts, BASIC_FONTS, BLOCK_FONTS, BOX_FONTS, LATIN_FONTS};
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageFormat, Luma};
use qrcode::QrCode;
use rusttype::{point, Font, Scale};
use tracing::{debug, warn};

use super::assets::{AssetSlot, ReceiptAssets};
use super::document::ReceiptDocument;
use super::{RasterOptions, RenderWarning};
use crate::error::{PosError, PosResult};
use crate::escpos::{display_width, EscPosBuilder};

const WHITE: Luma<u8> = Luma([255]);
/// Pixels darker than this print as a dot.
const INK_THRESHOLD: u8 = 160;
/// Rows per `GS v 0` band.
const RASTER_BAND_ROWS: u32 = 256;

// ៛ is not in font8x8. Rows are drawn MSB = leftmost.
const RIEL_GLYPH: [u8; 8] = [
    0b0011_1000,
    0b0100_0100,
    0b0000_0100,
    0b0011_1000,
    0b0100_0000,
    0b0100_0000,
    0b0011_1110,
    0b0000_0000,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Center,
}

#[derive(Debug, Clone, Copy)]
struct TextStyle {
    size: u32,
    bold: bool,
}

const NORMAL: TextStyle = TextStyle {
    size: 1,
    bold: false,
};
const TITLE: TextStyle = TextStyle {
    size: 2,
    bold: true,
};

enum Glyphs<'a> {
    Bitmap,
    Font(&'a Font<'static>),
}

enum Block {
    Text {
        lines: Vec<String>,
        style: TextStyle,
        align: Align,
        indent: u32,
    },
    Pair {
        left: String,
        right: String,
        indent: u32,
    },
    Rule,
    /// `None` keeps the space blank.
    Image {
        image: Option<GrayImage>,
        width: u32,
        height: u32,
    },
    Gap(u32),
}

struct Layout<'a> {
    glyphs: Glyphs<'a>,
    width: u32,
    padding: u32,
    /// Dots per bitmap-font pixel.
    scale: u32,
    missing_glyphs: bool,
}

impl<'a> Layout<'a> {
    fn new(width: u32, assets: &'a ReceiptAssets) -> Self {
        let scale = (width / 192).max(1);
        Layout {
            glyphs: match assets.font.as_ref() {
                Some(font) => Glyphs::Font(font),
                None => Glyphs::Bitmap,
            },
            width,
            padding: 6 * scale,
            scale,
            missing_glyphs: false,
        }
    }

    fn em(&self, style: TextStyle) -> u32 {
        match self.glyphs {
            Glyphs::Bitmap => 8 * self.scale * style.size,
            Glyphs::Font(_) => 12 * self.scale * style.size,
        }
    }

    fn line_height(&self, style: TextStyle) -> u32 {
        let em = self.em(style);
        em + em / 4
    }

    fn inner_width(&self) -> u32 {
        self.width.saturating_sub(self.padding * 2)
    }

    fn text_width(&self, text: &str, style: TextStyle) -> u32 {
        match self.glyphs {
            Glyphs::Bitmap => display_width(text) as u32 * self.em(style),
            Glyphs::Font(font) => {
                let scale = Scale::uniform(self.em(style) as f32);
                font.layout(text, scale, point(0.0, 0.0))
                    .last()
                    .map(|g| g.position().x + g.unpositioned().h_metrics().advance_width)
                    .unwrap_or(0.0)
                    .ceil() as u32
            }
        }
    }

    /// Greedy word wrap by pixel width, splitting overlong words by char.
    fn wrap(&self, text: &str, style: TextStyle, max_px: u32) -> Vec<String> {
        let mut out = Vec::new();
        let mut line = String::new();
        for token in text.split_whitespace() {
            let candidate = if line.is_empty() {
                token.to_string()
            } else {
                format!("{line} {token}")
            };
            if self.text_width(&candidate, style) <= max_px {
                line = candidate;
                continue;
            }
            if !line.is_empty() {
                out.push(std::mem::take(&mut line));
            }
            if self.text_width(token, style) <= max_px {
                line.push_str(token);
                continue;
            }
            for ch in token.chars() {
                let mut next = line.clone();
                next.push(ch);
                if !line.is_empty()
                    && display_width(&ch.to_string()) > 0
                    && self.text_width(&next, style) > max_px
                {
                    out.push(std::mem::take(&mut line));
                }
                line.push(ch);
            }
        }
        if !line.is_empty() {
            out.push(line);
        }
        if out.is_empty() {
            out.push(String::new());
        }
        out
    }

    fn block_height(&self, block: &Block) -> u32 {
        match block {
            Block::Text { lines, style, .. } => lines.len() as u32 * self.line_height(*style),
            Block::Pair { .. } => self.line_height(NORMAL),
            Block::Rule => self.scale * 6,
            Block::Image { height, .. } => *height + self.scale * 4,
            Block::Gap(h) => *h,
        }
    }

    fn text_block(&self, text: &str, style: TextStyle, align: Align, indent: u32) -> Block {
        Block::Text {
            lines: self.wrap(text, style, self.inner_width().saturating_sub(indent)),
            style,
            align,
            indent,
        }
    }

    /// A label/value pair, or a wrapped label with the value on its own line
    /// when both do not fit.
    fn pair_blocks(&self, left: &str, right: &str, indent: u32) -> Vec<Block> {
        let gap = self.em(NORMAL);
        let right_px = self.text_width(right, NORMAL);
        let available = self.inner_width().saturating_sub(indent);
        if self.text_width(left, NORMAL) + gap + right_px <= available {
            return vec![Block::Pair {
                left: left.to_string(),
                right: right.to_string(),
                indent,
            }];
        }
        let label_px = available.saturating_sub(right_px + gap).max(self.em(NORMAL) * 8);
        let mut lines = self.wrap(left, NORMAL, label_px);
        let last = lines.pop().unwrap_or_default();
        let mut blocks = Vec::new();
        if !lines.is_empty() {
            blocks.push(Block::Text {
                lines,
                style: NORMAL,
                align: Align::Left,
                indent,
            });
        }
        blocks.push(Block::Pair {
            left: last,
            right: right.to_string(),
            indent,
        });
        blocks
    }
}

fn fit_image(source: &GrayImage, max_w: u32, max_h: u32) -> GrayImage {
    let (w, h) = source.dimensions();
    let ratio = (max_w as f32 / w as f32).min(max_h as f32 / h as f32);
    let target_w = ((w as f32 * ratio).round() as u32).clamp(1, max_w.max(1));
    let target_h = ((h as f32 * ratio).round() as u32).clamp(1, max_h.max(1));
    if (target_w, target_h) == (w, h) {
        source.clone()
    } else {
        imageops::resize(source, target_w, target_h, FilterType::Triangle)
    }
}

fn image_block(slot: &AssetSlot, box_w: u32, box_h: u32) -> Option<Block> {
    match slot {
        AssetSlot::NotConfigured => None,
        AssetSlot::Missing => Some(Block::Image {
            image: None,
            width: box_w,
            height: box_h,
        }),
        AssetSlot::Loaded(loaded) => {
            let fitted = fit_image(&loaded.image.to_luma8(), box_w, box_h);
            let (width, height) = fitted.dimensions();
            Some(Block::Image {
                image: Some(fitted),
                width,
                height,
            })
        }
    }
}

fn generated_qr(payload: &str, size: u32) -> PosResult<GrayImage> {
    let code = QrCode::new(payload.as_bytes())
        .map_err(|e| PosError::Render(format!("QR encode: {e}")))?;
    let rendered = code
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .max_dimensions(size, size)
        .build();
    Ok(fit_image(&rendered, size, size))
}

fn layout_blocks(
    doc: &ReceiptDocument,
    opts: &RasterOptions,
    assets: &ReceiptAssets,
    layout: &Layout<'_>,
    warnings: &mut Vec<RenderWarning>,
) -> Vec<Block> {
    let s = layout.scale;
    let mut blocks = Vec::new();
    blocks.push(Block::Gap(layout.padding));

    if opts.show_logo {
        if let Some(block) = image_block(&assets.logo, 50 * s, 50 * s) {
            blocks.push(block);
        }
    }

    blocks.push(layout.text_block(&doc.header.shop_name, TITLE, Align::Center, 0));
    if !doc.header.address.trim().is_empty() {
        blocks.push(layout.text_block(doc.header.address.trim(), NORMAL, Align::Center, 0));
    }
    if !doc.header.phone.trim().is_empty() {
        blocks.push(layout.text_block(&doc.phone_label(), NORMAL, Align::Center, 0));
    }
    blocks.push(layout.text_block(&doc.header.timestamp, NORMAL, Align::Center, 0));
    blocks.push(layout.text_block(&doc.invoice_label(), NORMAL, Align::Center, 0));
    blocks.push(Block::Rule);

    for line in &doc.lines {
        blocks.push(layout.text_block(&line.name_local, NORMAL, Align::Left, 0));
        blocks.extend(layout.pair_blocks(&line.quantity_label(), &line.total_label(), 2 * s));
        blocks.push(Block::Gap(s));
    }

    blocks.push(Block::Rule);
    blocks.push(layout.text_block(&doc.total_label(), TITLE, Align::Center, 0));
    blocks.push(Block::Rule);

    if opts.show_qr {
        let qr_size = 45 * s;
        let block = match &assets.qr_image {
            AssetSlot::NotConfigured => match generated_qr(&doc.qr_payload, qr_size) {
                Ok(qr) => {
                    let (width, height) = qr.dimensions();
                    Block::Image {
                        image: Some(qr),
                        width,
                        height,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "QR code not generated, leaving blank");
                    warnings.push(RenderWarning::new("qr_unavailable", e.to_string()));
                    Block::Image {
                        image: None,
                        width: qr_size,
                        height: qr_size,
                    }
                }
            },
            slot => image_block(slot, qr_size, qr_size).unwrap_or(Block::Gap(0)),
        };
        blocks.push(block);
    }

    for footer in &doc.footer {
        blocks.push(layout.text_block(footer, NORMAL, Align::Center, 0));
    }
    blocks.push(Block::Gap(layout.padding));
    blocks
}

fn darken(img: &mut GrayImage, x: i64, y: i64, ink: u8) {
    if x < 0 || y < 0 || x >= img.width() as i64 || y >= img.height() as i64 {
        return;
    }
    let pixel = img.get_pixel_mut(x as u32, y as u32);
    pixel.0[0] = pixel.0[0].min(255 - ink);
}

fn fill_rect(img: &mut GrayImage, x: i64, y: i64, w: u32, h: u32) {
    for dy in 0..h as i64 {
        for dx in 0..w as i64 {
            darken(img, x + dx, y + dy, 255);
        }
    }
}

fn bitmap_glyph(ch: char) -> Option<[u8; 8]> {
    if ch == '\u{17DB}' {
        return Some(RIEL_GLYPH.map(u8::reverse_bits));
    }
    BASIC_FONTS
        .get(ch)
        .or_else(|| LATIN_FONTS.get(ch))
        .or_else(|| BOX_FONTS.get(ch))
        .or_else(|| BLOCK_FONTS.get(ch))
}

impl<'a> Layout<'a> {
    fn draw_text(&mut self, img: &mut GrayImage, x: u32, y: u32, text: &str, style: TextStyle) {
        let em = self.em(style);
        match self.glyphs {
            Glyphs::Bitmap => {
                let px = self.scale * style.size;
                let mut cursor = x as i64;
                for ch in text.chars() {
                    if display_width(&ch.to_string()) == 0 {
                        continue;
                    }
                    let glyph = match bitmap_glyph(ch) {
                        Some(glyph) => glyph,
                        None => {
                            self.missing_glyphs = true;
                            BASIC_FONTS.get('?').unwrap_or([0; 8])
                        }
                    };
                    for (row, bits) in glyph.iter().enumerate() {
                        for col in 0..8u32 {
                            if bits & (1 << col) == 0 {
                                continue;
                            }
                            let gx = cursor + (col * px) as i64;
                            let gy = y as i64 + (row as u32 * px) as i64;
                            fill_rect(img, gx, gy, px, px);
                            if style.bold {
                                fill_rect(img, gx + 1, gy, px, px);
                            }
                        }
                    }
                    cursor += em as i64;
                }
            }
            Glyphs::Font(font) => {
                let scale = Scale::uniform(em as f32);
                let ascent = font.v_metrics(scale).ascent;
                let passes: &[f32] = if style.bold { &[0.0, 1.0] } else { &[0.0] };
                for offset in passes {
                    let origin = point(x as f32 + offset, y as f32 + ascent);
                    for glyph in font.layout(text, scale, origin) {
                        let Some(bb) = glyph.pixel_bounding_box() else {
                            continue;
                        };
                        glyph.draw(|gx, gy, coverage| {
                            let ink = (coverage.clamp(0.0, 1.0) * 255.0) as u8;
                            darken(
                                img,
                                bb.min.x as i64 + gx as i64,
                                bb.min.y as i64 + gy as i64,
                                ink,
                            );
                        });
                    }
                }
            }
        }
    }

    fn draw(&mut self, img: &mut GrayImage, blocks: &[Block]) {
        let mut y = 0u32;
        for block in blocks {
            match block {
                Block::Text {
                    lines,
                    style,
                    align,
                    indent,
                } => {
                    let lh = self.line_height(*style);
                    for line in lines {
                        let x = match align {
                            Align::Left => self.padding + indent,
                            Align::Center => {
                                let w = self.text_width(line, *style);
                                self.width.saturating_sub(w) / 2
                            }
                        };
                        self.draw_text(img, x, y, line, *style);
                        y += lh;
                    }
                }
                Block::Pair {
                    left,
                    right,
                    indent,
                } => {
                    self.draw_text(img, self.padding + indent, y, left, NORMAL);
                    let right_x = self
                        .width
                        .saturating_sub(self.padding + self.text_width(right, NORMAL));
                    self.draw_text(img, right_x, y, right, NORMAL);
                    y += self.line_height(NORMAL);
                }
                Block::Rule => {
                    let mid = y + self.scale * 3;
                    fill_rect(
                        img,
                        self.padding as i64,
                        mid as i64,
                        self.inner_width(),
                        self.scale.max(1) / 2 + 1,
                    );
                    y += self.block_height(block);
                }
                Block::Image { image, width, .. } => {
                    if let Some(image) = image {
                        let x = self.width.saturating_sub(*width) / 2;
                        imageops::overlay(img, image, x as i64, (y + self.scale * 2) as i64);
                    }
                    y += self.block_height(block);
                }
                Block::Gap(h) => y += h,
            }
        }
    }
}

/// Lay out and draw `doc`. Asset gaps keep their blank space.
pub fn render(
    doc: &ReceiptDocument,
    opts: &RasterOptions,
    assets: &ReceiptAssets,
    warnings: &mut Vec<RenderWarning>,
) -> GrayImage {
    let width = opts.paper.dots();
    let mut layout = Layout::new(width, assets);

    let blocks = layout_blocks(doc, opts, assets, &layout, warnings);
    let height: u32 = blocks.iter().map(|b| layout.block_height(b)).sum::<u32>().max(1);

    let mut canvas = GrayImage::from_pixel(width, height, WHITE);
    layout.draw(&mut canvas, &blocks);

    if layout.missing_glyphs {
        warn!("Bitmap font lacks glyphs for some receipt text; configure receipt.font_path");
        warnings.push(RenderWarning::new(
            "glyph_fallback",
            "Some characters are not in the built-in font and were printed as '?'",
        ));
    }
    debug!(width, height, blocks = blocks.len(), "Raster receipt laid out");
    canvas
}

/// Lossless PNG.
pub fn encode_png(img: &GrayImage) -> PosResult<Vec<u8>> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| PosError::Render(format!("PNG encode: {e}")))?;
    Ok(buf)
}

/// Pack rows into 1-bit, MSB-first bytes. Returns bytes per row and data.
fn pack_rows(img: &GrayImage, rows: std::ops::Range<u32>) -> (u32, Vec<u8>) {
    let width = img.width();
    let width_bytes = width.div_ceil(8);
    let mut packed = Vec::with_capacity((width_bytes * (rows.end - rows.start)) as usize);
    for y in rows {
        for xb in 0..width_bytes {
            let mut byte = 0u8;
            for bit in 0..8u32 {
                let x = xb * 8 + bit;
                if x >= width {
                    continue;
                }
                if img.get_pixel(x, y).0[0] < INK_THRESHOLD {
                    byte |= 0x80 >> bit;
                }
            }
            packed.push(byte);
        }
    }
    (width_bytes, packed)
}

/// Wrap the bitmap in `GS v 0` bands for printers that take raster data
/// over Bluetooth, followed by a feed and cut.
pub fn to_escpos_raster(img: &GrayImage) -> Vec<u8> {
    let mut builder = EscPosBuilder::new();
    builder.init().center();
    let mut top = 0;
    while top < img.height() {
        let bottom = (top + RASTER_BAND_ROWS).min(img.height());
        let (width_bytes, packed) = pack_rows(img, top..bottom);
        builder.raster_image(width_bytes as u16, (bottom - top) as u16, &packed);
        top = bottom;
    }
    builder.left().feed(3).cut();
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escpos::PaperWidth;
    use crate::receipt::assets::tests::png_bytes;
    use crate::receipt::assets::LoadedImage;
    use crate::receipt::document::tests::sample_document;
    use crate::receipt::document::ReceiptLine;

    fn opts(paper: PaperWidth) -> RasterOptions {
        RasterOptions {
            paper,
            show_logo: true,
            show_qr: true,
        }
    }

    fn dark_pixels(img: &GrayImage) -> usize {
        img.pixels().filter(|p| p.0[0] < INK_THRESHOLD).count()
    }

    #[test]
    fn canvas_matches_paper_width() {
        let doc = sample_document();
        let mut warnings = Vec::new();
        for paper in [PaperWidth::Mm58, PaperWidth::Mm80] {
            let img = render(&doc, &opts(paper), &ReceiptAssets::default(), &mut warnings);
            assert_eq!(img.width(), paper.dots());
            assert!(img.height() > 200);
            assert!(dark_pixels(&img) > 0);
        }
    }

    fn block_strings(blocks: &[Block]) -> Vec<String> {
        let mut out = Vec::new();
        for block in blocks {
            match block {
                Block::Text { lines, .. } => out.extend(lines.iter().cloned()),
                Block::Pair { left, right, .. } => {
                    out.push(left.clone());
                    out.push(right.clone());
                }
                _ => {}
            }
        }
        out
    }

    #[test]
    fn layout_carries_every_order_line() {
        let doc = sample_document();
        let assets = ReceiptAssets::default();
        let opts = opts(PaperWidth::Mm58);
        let layout = Layout::new(opts.paper.dots(), &assets);
        let mut warnings = Vec::new();
        let strings = block_strings(&layout_blocks(&doc, &opts, &assets, &layout, &mut warnings));
        for line in &doc.lines {
            for expected in [line.name_local.clone(), line.quantity_label(), line.total_label()] {
                assert!(strings.contains(&expected), "{expected} not laid out");
            }
        }
    }

    #[test]
    fn each_extra_line_adds_one_line_block() {
        let doc = sample_document();
        let mut longer = doc.clone();
        longer.lines.push(ReceiptLine {
            name_local: "Water".to_string(),
            name_alt: String::new(),
            quantity: 1,
            unit_price: 500,
            line_total: 500,
        });
        longer.total += 500;

        let assets = ReceiptAssets::default();
        let opts = RasterOptions {
            show_qr: false,
            ..opts(PaperWidth::Mm58)
        };
        let mut warnings = Vec::new();
        let short = render(&doc, &opts, &assets, &mut warnings);
        let long = render(&longer, &opts, &assets, &mut warnings);

        let layout = Layout::new(opts.paper.dots(), &assets);
        let water = &longer.lines[2];
        let mut added = vec![layout.text_block(&water.name_local, NORMAL, Align::Left, 0)];
        added.extend(layout.pair_blocks(
            &water.quantity_label(),
            &water.total_label(),
            2 * layout.scale,
        ));
        added.push(Block::Gap(layout.scale));
        let expected: u32 = added.iter().map(|b| layout.block_height(b)).sum();

        assert_eq!(added.len(), 3);
        assert_eq!(long.height() - short.height(), expected);
    }

    #[test]
    fn bitmap_font_warns_about_khmer() {
        let doc = sample_document();
        let mut warnings = Vec::new();
        render(&doc, &opts(PaperWidth::Mm58), &ReceiptAssets::default(), &mut warnings);
        assert!(warnings.iter().any(|w| w.code == "glyph_fallback"));
    }

    #[test]
    fn missing_logo_keeps_its_space() {
        let doc = sample_document();
        let logo = LoadedImage::from_bytes(png_bytes(50, 50, 0)).expect("logo");
        let with_logo = ReceiptAssets {
            logo: AssetSlot::Loaded(logo),
            ..ReceiptAssets::default()
        };
        let missing = ReceiptAssets {
            logo: AssetSlot::Missing,
            ..ReceiptAssets::default()
        };
        let mut warnings = Vec::new();
        let a = render(&doc, &opts(PaperWidth::Mm58), &with_logo, &mut warnings);
        let b = render(&doc, &opts(PaperWidth::Mm58), &missing, &mut warnings);
        let c = render(&doc, &opts(PaperWidth::Mm58), &ReceiptAssets::default(), &mut warnings);
        assert_eq!(a.height(), b.height());
        assert!(b.height() > c.height());
        assert!(dark_pixels(&a) > dark_pixels(&b));
    }

    #[test]
    fn png_export_round_trips_dimensions() {
        let doc = sample_document();
        let mut warnings = Vec::new();
        let img = render(&doc, &opts(PaperWidth::Mm58), &ReceiptAssets::default(), &mut warnings);
        let png = encode_png(&img).expect("encode");
        assert_eq!(&png[1..4], b"PNG");
        let decoded = image::load_from_memory(&png).expect("decode").to_luma8();
        assert_eq!(decoded.dimensions(), img.dimensions());
        assert_eq!(decoded.as_raw(), img.as_raw());
    }

    #[test]
    fn escpos_raster_bands_cover_the_image() {
        let img = GrayImage::from_pixel(16, 300, Luma([0]));
        let bytes = to_escpos_raster(&img);
        let header = [0x1D, 0x76, 0x30, 0x00];
        let bands: Vec<usize> = bytes
            .windows(4)
            .enumerate()
            .filter(|(_, w)| *w == header)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(bands.len(), 2);
        let first = bands[0];
        assert_eq!(&bytes[first + 4..first + 8], &[2, 0, 0, 1]);
        assert_eq!(bytes[first + 8], 0xFF);
        let second = bands[1];
        assert_eq!(&bytes[second + 4..second + 8], &[2, 0, 44, 0]);
    }

    #[test]
    fn qr_can_be_switched_off() {
        let doc = sample_document();
        let mut warnings = Vec::new();
        let with_qr = render(
            &doc,
            &opts(PaperWidth::Mm58),
            &ReceiptAssets::default(),
            &mut warnings,
        );
        let without = render(
            &doc,
            &RasterOptions {
                show_qr: false,
                ..opts(PaperWidth::Mm58)
            },
            &ReceiptAssets::default(),
            &mut warnings,
        );
        assert!(with_qr.height() > without.height());
    }
}
