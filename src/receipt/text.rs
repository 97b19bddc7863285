//! Fixed-pitch text receipts: ESC/POS for the Bluetooth printer and plain
//! text for the RawBT text channel.

use crate::escpos::{display_width, EscPosBuilder, TextEncoding};

use super::document::ReceiptDocument;
use super::TextOptions;

/// Break `text` into lines no wider than `width` columns. Words longer than a
/// line (Khmer is written without spaces) are split by character.
pub(crate) fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(8);
    let mut out = Vec::new();
    let mut line = String::new();
    for token in text.split_whitespace() {
        let token_width = display_width(token);
        if !line.is_empty() && display_width(&line) + 1 + token_width <= width {
            line.push(' ');
            line.push_str(token);
            continue;
        }
        if !line.is_empty() {
            out.push(std::mem::take(&mut line));
        }
        if token_width <= width {
            line.push_str(token);
            continue;
        }
        for ch in token.chars() {
            if display_width(&line) >= width && display_width(&ch.to_string()) > 0 {
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

fn emit_wrapped(builder: &mut EscPosBuilder, text: &str, width: usize) {
    for line in wrap(text, width) {
        builder.text(&line).lf();
    }
}

fn emit_pair(builder: &mut EscPosBuilder, label: &str, value: &str, width: usize) {
    let label_len = display_width(label);
    let value_len = display_width(value);
    if label_len + value_len < width {
        builder.line_pair(label, value);
        return;
    }
    for line in wrap(label, width.saturating_sub(value_len + 1).max(8)) {
        builder.text(&line).lf();
    }
    builder.right().text(value).lf().left();
}

pub fn render_escpos(doc: &ReceiptDocument, opts: &TextOptions) -> Vec<u8> {
    let width = opts.paper.chars();
    let mut builder = EscPosBuilder::new()
        .with_paper(opts.paper)
        .with_encoding(opts.encoding);
    builder.init();

    builder
        .center()
        .bold(true)
        .double_size()
        .text(&doc.header.shop_name)
        .lf()
        .normal_size()
        .bold(false);
    if !doc.header.address.trim().is_empty() {
        emit_wrapped(&mut builder, doc.header.address.trim(), width);
    }
    if !doc.header.phone.trim().is_empty() {
        emit_wrapped(&mut builder, &doc.phone_label(), width);
    }
    builder.text(&doc.header.timestamp).lf();
    builder.text(&doc.invoice_label()).lf();
    builder.left().separator();

    for line in &doc.lines {
        emit_wrapped(&mut builder, &line.name_local, width);
        emit_pair(&mut builder, &line.quantity_label(), &line.total_label(), width);
    }

    builder.separator();
    builder
        .center()
        .bold(true)
        .double_size()
        .text(&doc.total_label())
        .lf()
        .normal_size()
        .bold(false)
        .left()
        .separator();

    if opts.show_qr && !doc.qr_payload.is_empty() {
        builder.center().qr(&doc.qr_payload).lf().left();
    }

    if !doc.footer.is_empty() {
        builder.lf().center();
        for footer in &doc.footer {
            emit_wrapped(&mut builder, footer, width);
        }
        builder.left();
    }
    builder.feed(3).cut();
    builder.build()
}

fn fold(text: &str, encoding: TextEncoding) -> String {
    match encoding {
        TextEncoding::Utf8 => text.to_string(),
        TextEncoding::Ascii => text
            .chars()
            .filter(|c| c.is_ascii() || display_width(&c.to_string()) > 0)
            .map(|c| if c.is_ascii() { c } else { '?' })
            .collect(),
    }
}

fn pair_lines(label: &str, value: &str, width: usize) -> Vec<String> {
    let used = display_width(label) + display_width(value);
    if used < width {
        return vec![format!("{label}{}{value}", " ".repeat(width - used))];
    }
    let mut lines = wrap(label, width.saturating_sub(display_width(value) + 1).max(8));
    let pad = width.saturating_sub(display_width(value));
    lines.push(format!("{}{value}", " ".repeat(pad)));
    lines
}

/// Plain UTF-8 (or ASCII-folded) text with the ESC/POS layout and no
/// control bytes.
pub fn render_plain_text(doc: &ReceiptDocument, opts: &TextOptions) -> String {
    let width = opts.paper.chars();
    let rule = "-".repeat(width);
    let mut lines: Vec<String> = Vec::new();

    lines.push(doc.header.shop_name.clone());
    if !doc.header.address.trim().is_empty() {
        lines.extend(wrap(doc.header.address.trim(), width));
    }
    if !doc.header.phone.trim().is_empty() {
        lines.extend(wrap(&doc.phone_label(), width));
    }
    lines.push(doc.header.timestamp.clone());
    lines.push(doc.invoice_label());
    lines.push(rule.clone());

    for line in &doc.lines {
        lines.extend(wrap(&line.name_local, width));
        lines.extend(pair_lines(&line.quantity_label(), &line.total_label(), width));
    }

    lines.push(rule.clone());
    lines.push(doc.total_label());
    lines.push(rule);

    if !doc.footer.is_empty() {
        lines.push(String::new());
        for footer in &doc.footer {
            lines.extend(wrap(footer, width));
        }
    }

    let mut out = lines.join("\n");
    out.push_str("\n\n\n");
    fold(&out, opts.encoding)
}
