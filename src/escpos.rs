//! Minimal ESC/POS binary command builder for thermal receipt printers.
//!
//! Generates raw byte sequences that can be written to a Bluetooth printer's
//! GATT characteristic. Supports text formatting, alignment, raster images,
//! native QR codes and paper cutting. Text is sent as UTF-8 (printers with a
//! Khmer-capable firmware) or folded to ASCII.

use serde::{Deserialize, Serialize};

// ESC/POS command bytes
const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;
const LF: u8 = 0x0A;

/// Trailing partial-cut sequence emitted by [`EscPosBuilder::cut`].
pub const PARTIAL_CUT: [u8; 4] = [GS, 0x56, 0x41, 0x10];

/// Paper width of the receipt roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperWidth {
    Mm58,
    Mm80,
}

impl PaperWidth {
    /// Characters per line in the printer's font A.
    pub fn chars(self) -> usize {
        match self {
            PaperWidth::Mm58 => 32,
            PaperWidth::Mm80 => 48,
        }
    }

    /// Printable dots per line at 203 dpi.
    pub fn dots(self) -> u32 {
        match self {
            PaperWidth::Mm58 => 384,
            PaperWidth::Mm80 => 576,
        }
    }

    pub fn mm(self) -> u32 {
        match self {
            PaperWidth::Mm58 => 58,
            PaperWidth::Mm80 => 80,
        }
    }

    pub fn from_mm(mm: u32) -> Self {
        if mm <= 58 {
            PaperWidth::Mm58
        } else {
            PaperWidth::Mm80
        }
    }
}

/// How text bytes are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// Pass UTF-8 through unchanged.
    #[default]
    Utf8,
    /// Replace anything outside 7-bit ASCII with `?`.
    Ascii,
}

/// Column width of `text` on a fixed-pitch printer. Khmer dependent vowels
/// and signs stack on their base consonant and take no column of their own.
pub fn display_width(text: &str) -> usize {
    text.chars().filter(|c| !is_zero_width(*c)).count()
}

fn is_zero_width(ch: char) -> bool {
    matches!(ch as u32,
        0x0300..=0x036F
        | 0x17B4..=0x17D3
        | 0x17DD
        | 0x200B..=0x200D
        | 0xFE0F)
}

/// Builder for generating ESC/POS binary command buffers.
///
/// ```rust,ignore
/// let mut b = EscPosBuilder::new();
/// b.init()
///     .center()
///     .bold(true).text("RECEIPT\n").bold(false)
///     .left()
///     .line_pair("Coffee x2", "8,000")
///     .feed(3)
///     .cut();
/// let data = b.build();
/// ```
pub struct EscPosBuilder {
    buffer: Vec<u8>,
    paper: PaperWidth,
    encoding: TextEncoding,
}

impl Default for EscPosBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EscPosBuilder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(512),
            paper: PaperWidth::Mm58,
            encoding: TextEncoding::Utf8,
        }
    }

    pub fn with_paper(mut self, paper: PaperWidth) -> Self {
        self.paper = paper;
        self
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    // -----------------------------------------------------------------------
    // Initialization
    // -----------------------------------------------------------------------

    /// ESC @: Initialize printer, reset to defaults.
    pub fn init(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x40]);
        self
    }

    // -----------------------------------------------------------------------
    // Text formatting
    // -----------------------------------------------------------------------

    /// ESC E n: Bold on/off.
    pub fn bold(&mut self, on: bool) -> &mut Self {
        self.buffer
            .extend_from_slice(&[ESC, 0x45, if on { 1 } else { 0 }]);
        self
    }

    /// GS ! n: Set text size (width × height multiplier, 1–8 each).
    pub fn text_size(&mut self, width: u8, height: u8) -> &mut Self {
        let w = width.clamp(1, 8) - 1;
        let h = height.clamp(1, 8) - 1;
        self.buffer.extend_from_slice(&[GS, 0x21, (w << 4) | h]);
        self
    }

    /// Reset text size to 1×1.
    pub fn normal_size(&mut self) -> &mut Self {
        self.text_size(1, 1)
    }

    /// Double width and height (2×2).
    pub fn double_size(&mut self) -> &mut Self {
        self.text_size(2, 2)
    }

    // -----------------------------------------------------------------------
    // Alignment
    // -----------------------------------------------------------------------

    /// ESC a 0: Left-align.
    pub fn left(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, 0]);
        self
    }

    /// ESC a 1: Centre-align.
    pub fn center(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, 1]);
        self
    }

    /// ESC a 2: Right-align.
    pub fn right(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x61, 2]);
        self
    }

    // -----------------------------------------------------------------------
    // Text output
    // -----------------------------------------------------------------------

    /// Append text in the builder's [`TextEncoding`].
    pub fn text(&mut self, s: &str) -> &mut Self {
        match self.encoding {
            TextEncoding::Utf8 => self.buffer.extend_from_slice(s.as_bytes()),
            TextEncoding::Ascii => {
                for ch in s.chars() {
                    let code = ch as u32;
                    if code < 0x80 {
                        self.buffer.push(code as u8);
                    } else if !is_zero_width(ch) {
                        self.buffer.push(b'?');
                    }
                }
            }
        }
        self
    }

    /// Append a line-feed.
    pub fn lf(&mut self) -> &mut Self {
        self.buffer.push(LF);
        self
    }

    /// Print a horizontal separator using dashes, matching paper width.
    pub fn separator(&mut self) -> &mut Self {
        let width = self.paper.chars();
        self.buffer.extend(std::iter::repeat(b'-').take(width));
        self.buffer.push(LF);
        self
    }

    /// Print a line with left-aligned label and right-aligned value. At least
    /// one space always separates the two.
    pub fn line_pair(&mut self, label: &str, value: &str) -> &mut Self {
        let width = self.paper.chars();
        let gap = width
            .saturating_sub(display_width(label) + display_width(value))
            .max(1);
        self.text(label);
        self.buffer.extend(std::iter::repeat(b' ').take(gap));
        self.text(value);
        self.lf()
    }

    // -----------------------------------------------------------------------
    // Graphics
    // -----------------------------------------------------------------------

    /// GS v 0: Print a packed 1-bit raster image (MSB = leftmost dot).
    pub fn raster_image(&mut self, width_bytes: u16, height: u16, packed: &[u8]) -> &mut Self {
        let [xl, xh] = width_bytes.to_le_bytes();
        let [yl, yh] = height.to_le_bytes();
        self.buffer
            .extend_from_slice(&[GS, 0x76, 0x30, 0x00, xl, xh, yl, yh]);
        self.buffer.extend_from_slice(packed);
        self
    }

    /// GS ( k: Store and print a model 2 QR code with the printer's own
    /// encoder.
    pub fn qr(&mut self, data: &str) -> &mut Self {
        let bytes = data.as_bytes();
        // Module size 6, error correction level M.
        self.buffer
            .extend_from_slice(&[GS, 0x28, 0x6B, 4, 0, 0x31, 0x41, 0x32, 0x00]);
        self.buffer
            .extend_from_slice(&[GS, 0x28, 0x6B, 3, 0, 0x31, 0x43, 0x06]);
        self.buffer
            .extend_from_slice(&[GS, 0x28, 0x6B, 3, 0, 0x31, 0x45, 0x31]);
        let store_len = (bytes.len() + 3).min(u16::MAX as usize) as u16;
        let [pl, ph] = store_len.to_le_bytes();
        self.buffer
            .extend_from_slice(&[GS, 0x28, 0x6B, pl, ph, 0x31, 0x50, 0x30]);
        self.buffer
            .extend_from_slice(&bytes[..(store_len as usize - 3)]);
        self.buffer
            .extend_from_slice(&[GS, 0x28, 0x6B, 3, 0, 0x31, 0x51, 0x30]);
        self
    }

    // -----------------------------------------------------------------------
    // Feed / cut
    // -----------------------------------------------------------------------

    /// ESC d n: Feed n lines.
    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.buffer.extend_from_slice(&[ESC, 0x64, lines]);
        self
    }

    /// GS V A 16: Partial cut with 16-dot feed.
    pub fn cut(&mut self) -> &mut Self {
        self.buffer.extend_from_slice(&PARTIAL_CUT);
        self
    }

    // -----------------------------------------------------------------------
    // Build
    // -----------------------------------------------------------------------

    /// Consume the builder and return the binary ESC/POS payload.
    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
