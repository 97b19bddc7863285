//! Receipt content, independent of how it is drawn.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::catalog::PricePolicy;
use crate::config::ShopProfile;
use crate::currency::{format_riel, KHR_SYMBOL};
use crate::order::{Order, OrderTotals};

pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptHeader {
    pub shop_name: String,
    pub address: String,
    pub phone: String,
    pub timestamp: String,
    pub invoice_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub name_local: String,
    pub name_alt: String,
    pub quantity: u32,
    pub unit_price: i64,
    pub line_total: i64,
}

impl ReceiptLine {
    /// `Coffee x2`, or just `x2` when there is no alternate name.
    pub fn quantity_label(&self) -> String {
        if self.name_alt.trim().is_empty() {
            format!("x{}", self.quantity)
        } else {
            format!("{} x{}", self.name_alt.trim(), self.quantity)
        }
    }

    pub fn total_label(&self) -> String {
        riel_label(self.line_total)
    }
}

/// Read-only snapshot handed to the renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptDocument {
    pub header: ReceiptHeader,
    pub lines: Vec<ReceiptLine>,
    pub subtotal: i64,
    pub total: i64,
    pub footer: Vec<String>,
    pub qr_payload: String,
}

/// `៛8,000`
pub fn riel_label(amount: i64) -> String {
    format!("{KHR_SYMBOL}{}", format_riel(amount))
}

impl ReceiptDocument {
    /// Snapshot `order` for printing. Lines stepped down to zero are left out.
    pub fn build(
        shop: &ShopProfile,
        order: &Order,
        totals: &OrderTotals,
        policy: &PricePolicy,
        now: DateTime<Local>,
    ) -> Self {
        let lines = order
            .lines()
            .iter()
            .filter(|line| line.quantity > 0)
            .map(|line| ReceiptLine {
                name_local: line.item.name_local.clone(),
                name_alt: line.item.name_alt.clone(),
                quantity: line.quantity,
                unit_price: policy.effective_unit_price(&line.item),
                line_total: line.line_total(policy),
            })
            .collect();

        Self {
            header: ReceiptHeader {
                shop_name: shop.name.clone(),
                address: shop.address.clone(),
                phone: shop.phone.clone(),
                timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
                invoice_id: order.id,
            },
            lines,
            subtotal: totals.subtotal,
            total: totals.total,
            footer: shop.footer_lines.clone(),
            qr_payload: qr_payload(order.id, totals.total, &shop.name),
        }
    }

    pub fn total_label(&self) -> String {
        format!("Total: {}", riel_label(self.total))
    }

    pub fn phone_label(&self) -> String {
        format!("Tel: {}", self.header.phone)
    }

    pub fn invoice_label(&self) -> String {
        format!("Invoice: {}", self.header.invoice_id)
    }
}

/// `ORDER_ID:{id};TOTAL:{total};SHOP:{shop}`. Delimiters inside the shop
/// name are not escaped.
pub fn qr_payload(order_id: u64, total: i64, shop_name: &str) -> String {
    format!("ORDER_ID:{order_id};TOTAL:{total};SHOP:{shop_name}")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::MenuItem;
    use crate::order::aggregate;
    use chrono::TimeZone;

    pub(crate) fn sample_document() -> ReceiptDocument {
        let policy = PricePolicy::default();
        let mut order = Order::new(17);
        let coffee = MenuItem::new("កាហ្វេ", 4000).with_alt_name("Coffee");
        let tea = MenuItem::new("តែ", 2500).with_alt_name("Tea");
        order.add_item(&coffee, &policy);
        order.add_item(&coffee, &policy);
        order.add_item(&tea, &policy);
        let totals = aggregate(order.lines(), &policy);
        let now = Local
            .with_ymd_and_hms(2026, 3, 5, 14, 7, 9)
            .single()
            .expect("valid local time");
        ReceiptDocument::build(&ShopProfile::default(), &order, &totals, &policy, now)
    }

    #[test]
    fn builds_header_lines_and_totals() {
        let doc = sample_document();
        assert_eq!(doc.header.invoice_id, 17);
        assert_eq!(doc.header.timestamp, "05/03/2026 14:07:09");
        assert_eq!(doc.lines.len(), 2);
        assert_eq!(doc.lines[0].line_total, 8000);
        assert_eq!(doc.lines[0].quantity_label(), "Coffee x2");
        assert_eq!(doc.lines[0].total_label(), "\u{17DB}8,000");
        assert_eq!(doc.total, 10_500);
        assert_eq!(doc.footer.len(), 2);
    }

    #[test]
    fn qr_payload_is_not_escaped() {
        assert_eq!(
            qr_payload(5, 8000, "A;B:C"),
            "ORDER_ID:5;TOTAL:8000;SHOP:A;B:C"
        );
        let doc = sample_document();
        assert!(doc.qr_payload.starts_with("ORDER_ID:17;TOTAL:10500;SHOP:"));
    }

    #[test]
    fn zero_quantity_lines_are_skipped() {
        let policy = PricePolicy::default();
        let mut order = Order::new(1);
        let tea = MenuItem::new("តែ", 2500);
        order.add_item(&tea, &policy);
        order.lines[0].quantity = 0;
        let totals = aggregate(order.lines(), &policy);
        let doc = ReceiptDocument::build(
            &ShopProfile::default(),
            &order,
            &totals,
            &policy,
            Local::now(),
        );
        assert!(doc.lines.is_empty());
        assert_eq!(doc.total, 0);
    }
}
