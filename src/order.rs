//! The current order (cart) and its aggregation.
//!
//! ## Invariants
//! - Lines are unique by [`LineKey`]: adding an item whose local name and
//!   effective price match an existing line bumps that line's quantity
//! - Line order is insertion order
//! - Totals are recomputed from lines on demand, never cached

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{MenuItem, PricePolicy};
use crate::error::{PosError, PosResult};

/// Identity of an order line: local name plus effective unit price.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineKey {
    pub name_local: String,
    pub unit_price: i64,
}

impl LineKey {
    pub fn for_item(item: &MenuItem, policy: &PricePolicy) -> Self {
        Self {
            name_local: item.name_local.clone(),
            unit_price: policy.effective_unit_price(item),
        }
    }
}

/// What happens when a stepper takes a line's quantity to zero or below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecrementPolicy {
    /// Drop the line.
    #[default]
    RemoveAtZero,
    /// Keep the line with quantity 0.
    ClampAtZero,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub item: MenuItem,
    pub quantity: u32,
}

impl OrderLine {
    pub fn key(&self, policy: &PricePolicy) -> LineKey {
        LineKey::for_item(&self.item, policy)
    }

    pub fn line_total(&self, policy: &PricePolicy) -> i64 {
        policy
            .effective_unit_price(&self.item)
            .saturating_mul(i64::from(self.quantity))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    #[serde(default)]
    pub lines: Vec<OrderLine>,
}

impl Order {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            lines: Vec::new(),
        }
    }

    /// Read an order snapshot from JSON. Lines that collide on their key are
    /// merged so the file cannot break the uniqueness invariant.
    pub fn load(path: &Path, policy: &PricePolicy) -> PosResult<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| PosError::Config(format!("read order {}: {e}", path.display())))?;
        let parsed: Order = serde_json::from_str(&raw)?;
        let mut order = Order::new(parsed.id);
        for line in parsed.lines {
            order.add_quantity(line.item, line.quantity, policy);
        }
        Ok(order)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    fn position(&self, key: &LineKey, policy: &PricePolicy) -> Option<usize> {
        self.lines.iter().position(|l| &l.key(policy) == key)
    }

    /// Add one unit of `item`, merging into an existing line when the key
    /// matches. Returns the line's new quantity.
    pub fn add_item(&mut self, item: &MenuItem, policy: &PricePolicy) -> u32 {
        self.add_quantity(item.clone(), 1, policy)
    }

    fn add_quantity(&mut self, item: MenuItem, quantity: u32, policy: &PricePolicy) -> u32 {
        let key = LineKey::for_item(&item, policy);
        match self.position(&key, policy) {
            Some(idx) => {
                let line = &mut self.lines[idx];
                line.quantity = line.quantity.saturating_add(quantity);
                debug!(
                    order_id = self.id,
                    item = %key.name_local,
                    qty = line.quantity,
                    "Merged into order line"
                );
                line.quantity
            }
            None => {
                debug!(
                    order_id = self.id,
                    item = %key.name_local,
                    qty = quantity,
                    "New order line"
                );
                self.lines.push(OrderLine { item, quantity });
                quantity
            }
        }
    }

    /// Step a line's quantity by `delta`. Returns the new quantity, or `None`
    /// when the line is unknown or was removed.
    pub fn adjust_quantity(
        &mut self,
        key: &LineKey,
        delta: i64,
        decrement: DecrementPolicy,
        policy: &PricePolicy,
    ) -> Option<u32> {
        let idx = self.position(key, policy)?;
        let current = i64::from(self.lines[idx].quantity);
        let next = current.saturating_add(delta);
        if next <= 0 {
            return match decrement {
                DecrementPolicy::RemoveAtZero => {
                    self.lines.remove(idx);
                    None
                }
                DecrementPolicy::ClampAtZero => {
                    self.lines[idx].quantity = 0;
                    Some(0)
                }
            };
        }
        let clamped = u32::try_from(next).unwrap_or(u32::MAX);
        self.lines[idx].quantity = clamped;
        Some(clamped)
    }

    /// Set an absolute quantity. Zero follows `decrement`.
    pub fn set_quantity(
        &mut self,
        key: &LineKey,
        quantity: u32,
        decrement: DecrementPolicy,
        policy: &PricePolicy,
    ) -> Option<u32> {
        let idx = self.position(key, policy)?;
        let current = i64::from(self.lines[idx].quantity);
        self.adjust_quantity(key, i64::from(quantity) - current, decrement, policy)
    }

    pub fn remove(&mut self, key: &LineKey, policy: &PricePolicy) -> bool {
        match self.position(key, policy) {
            Some(idx) => {
                self.lines.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Riel totals for an order. There is no tax, so `total == subtotal`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: i64,
    pub total: i64,
    pub item_count: u64,
}

/// Sum `quantity × effective unit price` over `lines`. Saturates instead of
/// overflowing; missing prices count as zero.
pub fn aggregate(lines: &[OrderLine], policy: &PricePolicy) -> OrderTotals {
    let (subtotal, item_count) = lines.iter().fold((0i64, 0u64), |(sum, count), line| {
        (
            sum.saturating_add(line.line_total(policy)),
            count.saturating_add(u64::from(line.quantity)),
        )
    });
    OrderTotals {
        subtotal,
        total: subtotal,
        item_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coffee() -> MenuItem {
        MenuItem::new("កាហ្វេ", 4000).with_alt_name("Coffee")
    }

    fn tea() -> MenuItem {
        MenuItem::new("តែ", 2500).with_alt_name("Tea")
    }

    #[test]
    fn two_coffees_total_eight_thousand() {
        let policy = PricePolicy::default();
        let mut order = Order::new(1);
        order.add_item(&coffee(), &policy);
        order.add_item(&coffee(), &policy);

        assert_eq!(order.lines().len(), 1);
        let totals = aggregate(order.lines(), &policy);
        assert_eq!(totals.subtotal, 8000);
        assert_eq!(totals.total, 8000);
        assert_eq!(totals.item_count, 2);
        assert_eq!(crate::currency::format_riel(totals.total), "8,000");
    }

    #[test]
    fn same_name_different_price_stays_separate() {
        let policy = PricePolicy::default();
        let mut order = Order::new(1);
        order.add_item(&coffee(), &policy);
        order.add_item(&MenuItem::new("កាហ្វេ", 5000), &policy);
        assert_eq!(order.lines().len(), 2);
    }

    #[test]
    fn aggregate_ignores_line_order() {
        let policy = PricePolicy::default();
        let mut a = Order::new(1);
        a.add_item(&coffee(), &policy);
        a.add_item(&tea(), &policy);
        a.add_item(&tea(), &policy);

        let mut b = Order::new(2);
        b.add_item(&tea(), &policy);
        b.add_item(&coffee(), &policy);
        b.add_item(&tea(), &policy);

        assert_eq!(aggregate(a.lines(), &policy), aggregate(b.lines(), &policy));
        assert_eq!(aggregate(a.lines(), &policy).total, 9000);
    }

    #[test]
    fn empty_and_unpriced_lines_total_zero() {
        let policy = PricePolicy::default();
        assert_eq!(aggregate(&[], &policy), OrderTotals::default());

        let mut free = MenuItem::new("Water", 0);
        free.price_minor = None;
        let lines = vec![OrderLine {
            item: free,
            quantity: 3,
        }];
        let totals = aggregate(&lines, &policy);
        assert_eq!(totals.total, 0);
        assert_eq!(totals.item_count, 3);
    }

    #[test]
    fn aggregate_saturates() {
        let policy = PricePolicy::default();
        let lines = vec![
            OrderLine {
                item: MenuItem::new("Gold", i64::MAX),
                quantity: 2,
            },
            OrderLine {
                item: coffee(),
                quantity: 1,
            },
        ];
        assert_eq!(aggregate(&lines, &policy).total, i64::MAX);
    }

    #[test]
    fn decrement_removes_line_at_zero() {
        let policy = PricePolicy::default();
        let mut order = Order::new(1);
        order.add_item(&coffee(), &policy);
        let key = LineKey::for_item(&coffee(), &policy);

        assert_eq!(
            order.adjust_quantity(&key, -1, DecrementPolicy::RemoveAtZero, &policy),
            None
        );
        assert!(order.is_empty());
    }

    #[test]
    fn decrement_clamps_line_at_zero() {
        let policy = PricePolicy::default();
        let mut order = Order::new(1);
        order.add_item(&coffee(), &policy);
        let key = LineKey::for_item(&coffee(), &policy);

        assert_eq!(
            order.adjust_quantity(&key, -5, DecrementPolicy::ClampAtZero, &policy),
            Some(0)
        );
        assert_eq!(order.lines().len(), 1);
        assert_eq!(aggregate(order.lines(), &policy).total, 0);

        assert_eq!(
            order.adjust_quantity(&key, 2, DecrementPolicy::ClampAtZero, &policy),
            Some(2)
        );
    }

    #[test]
    fn set_quantity_and_remove() {
        let policy = PricePolicy::default();
        let mut order = Order::new(7);
        order.add_item(&tea(), &policy);
        let key = LineKey::for_item(&tea(), &policy);

        assert_eq!(
            order.set_quantity(&key, 4, DecrementPolicy::RemoveAtZero, &policy),
            Some(4)
        );
        assert_eq!(aggregate(order.lines(), &policy).total, 10_000);
        assert!(order.remove(&key, &policy));
        assert!(!order.remove(&key, &policy));
    }

    #[test]
    fn unknown_key_is_ignored() {
        let policy = PricePolicy::default();
        let mut order = Order::new(1);
        let key = LineKey::for_item(&tea(), &policy);
        assert_eq!(
            order.adjust_quantity(&key, 1, DecrementPolicy::RemoveAtZero, &policy),
            None
        );
    }

    #[test]
    fn load_merges_duplicate_lines() {
        let policy = PricePolicy::default();
        let dir = std::env::temp_dir().join(format!("kiosk_pos_order_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).expect("create dir");
        let path = dir.join("order.json");
        fs::write(
            &path,
            r#"{"id": 42, "lines": [
                {"item": {"name_local": "តែ", "price_minor": 2500}, "quantity": 1},
                {"item": {"name_local": "តែ", "price_minor": 2500}, "quantity": 2}
            ]}"#,
        )
        .expect("write order");

        let order = Order::load(&path, &policy).expect("load order");
        assert_eq!(order.id, 42);
        assert_eq!(order.lines().len(), 1);
        assert_eq!(order.lines()[0].quantity, 3);
        let _ = fs::remove_dir_all(dir);
    }
}
