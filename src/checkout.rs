//! Checkout flow: build the order, print the receipt, then start a new order.
//!
//! ```text
//! add_item / adjust_quantity ──► complete()
//!                                  ├─ render + dispatch ok ──────────► Printed
//!                                  ├─ recoverable print error
//!                                  │     ├─ confirm(err) == true ────► CompletedWithoutPrint
//!                                  │     └─ confirm(err) == false ───► Aborted (order kept)
//!                                  └─ other error ───────────────────► Err (order kept)
//! ```

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::catalog::{MenuItem, PricePolicy};
use crate::config::ShopProfile;
use crate::error::{PosError, PosResult};
use crate::order::{aggregate, DecrementPolicy, LineKey, Order, OrderTotals};
use crate::print::{PrintDispatcher, PrintOutcome, PrintRoute};
use crate::receipt::{render, ReceiptAssets, ReceiptDocument, RenderWarning, Renderer};

#[derive(Debug)]
pub enum CheckoutOutcome {
    Printed {
        invoice_id: u64,
        print: PrintOutcome,
        warnings: Vec<RenderWarning>,
    },
    /// Paid, but the cashier chose to go on without a receipt.
    CompletedWithoutPrint { invoice_id: u64, reason: String },
    /// Cashier cancelled after a print failure. The order is untouched.
    Aborted,
}

pub struct Checkout {
    shop: ShopProfile,
    policy: PricePolicy,
    decrement: DecrementPolicy,
    order: Order,
}

impl Checkout {
    pub fn new(
        shop: ShopProfile,
        policy: PricePolicy,
        decrement: DecrementPolicy,
        first_invoice: u64,
    ) -> Self {
        Self {
            shop,
            policy,
            decrement,
            order: Order::new(first_invoice),
        }
    }

    /// Pick up an order that was built elsewhere (e.g. a saved snapshot).
    /// Its id becomes the current invoice number.
    pub fn resume(
        shop: ShopProfile,
        policy: PricePolicy,
        decrement: DecrementPolicy,
        order: Order,
    ) -> Self {
        Self {
            shop,
            policy,
            decrement,
            order,
        }
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn invoice_id(&self) -> u64 {
        self.order.id
    }

    pub fn policy(&self) -> &PricePolicy {
        &self.policy
    }

    pub fn add_item(&mut self, item: &MenuItem) -> u32 {
        self.order.add_item(item, &self.policy)
    }

    pub fn adjust_quantity(&mut self, key: &LineKey, delta: i64) -> Option<u32> {
        self.order
            .adjust_quantity(key, delta, self.decrement, &self.policy)
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }

    pub fn totals(&self) -> OrderTotals {
        aggregate(self.order.lines(), &self.policy)
    }

    pub fn receipt(&self, now: DateTime<Local>) -> PosResult<ReceiptDocument> {
        if self.order.lines().iter().all(|l| l.quantity == 0) {
            return Err(PosError::EmptyOrder);
        }
        Ok(ReceiptDocument::build(
            &self.shop,
            &self.order,
            &self.totals(),
            &self.policy,
            now,
        ))
    }

    /// Close the order and move to the next invoice number.
    fn finish(&mut self) -> u64 {
        let done = self.order.id;
        self.order = Order::new(done.saturating_add(1));
        done
    }

    /// Print the receipt and close the order. `confirm` is asked whether to
    /// complete anyway when printing fails in a way the cashier can live with.
    pub async fn complete<F>(
        &mut self,
        dispatcher: &PrintDispatcher,
        route: PrintRoute,
        renderer: &Renderer,
        assets: &ReceiptAssets,
        confirm: F,
    ) -> PosResult<CheckoutOutcome>
    where
        F: FnOnce(&PosError) -> bool,
    {
        let doc = self.receipt(Local::now())?;
        let rendered = render(&doc, renderer, assets)?;

        match dispatcher.dispatch(route, &rendered.artifact, &doc).await {
            Ok(print) => {
                let invoice_id = self.finish();
                info!(invoice_id, total = doc.total, "Checkout completed");
                Ok(CheckoutOutcome::Printed {
                    invoice_id,
                    print,
                    warnings: rendered.warnings,
                })
            }
            Err(err) if err.is_recoverable() => {
                if confirm(&err) {
                    let invoice_id = self.finish();
                    warn!(invoice_id, error = %err, "Checkout completed without receipt");
                    Ok(CheckoutOutcome::CompletedWithoutPrint {
                        invoice_id,
                        reason: err.to_string(),
                    })
                } else {
                    info!(invoice_id = self.order.id, "Checkout aborted after print failure");
                    Ok(CheckoutOutcome::Aborted)
                }
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BluetoothConfig, RawBtConfig, ReceiptConfig};
    use crate::print::{DeviceFilter, GattLink, UrlLauncher};

    struct Link {
        fail: bool,
    }

    impl GattLink for Link {
        fn connect(&mut self, _filter: &DeviceFilter) -> Result<String, String> {
            if self.fail {
                Err("printer out of range".to_string())
            } else {
                Ok("Sawoo-58".to_string())
            }
        }

        fn write(&mut self, _chunk: &[u8]) -> Result<(), String> {
            Ok(())
        }

        fn disconnect(&mut self) -> Result<(), String> {
            Ok(())
        }
    }

    struct Launcher;

    impl UrlLauncher for Launcher {
        fn open(&self, _url: &str) -> Result<(), String> {
            Ok(())
        }
    }

    fn dispatcher(fail: bool) -> PrintDispatcher {
        PrintDispatcher::new(
            BluetoothConfig {
                chunk_delay_ms: 0,
                ..BluetoothConfig::default()
            },
            RawBtConfig::default(),
            std::env::temp_dir(),
            Box::new(Link { fail }),
            Box::new(Launcher),
        )
    }

    fn checkout_with_coffee() -> Checkout {
        let mut checkout = Checkout::new(
            ShopProfile::default(),
            PricePolicy::default(),
            DecrementPolicy::RemoveAtZero,
            100,
        );
        checkout.add_item(&MenuItem::new("កាហ្វេ", 4000).with_alt_name("Coffee"));
        checkout.add_item(&MenuItem::new("កាហ្វេ", 4000).with_alt_name("Coffee"));
        checkout
    }

    #[tokio::test]
    async fn printed_checkout_clears_and_advances_invoice() {
        let mut checkout = checkout_with_coffee();
        assert_eq!(checkout.totals().total, 8000);
        let renderer = Renderer::escpos(&ReceiptConfig::default());

        let outcome = checkout
            .complete(
                &dispatcher(false),
                PrintRoute::Bluetooth,
                &renderer,
                &ReceiptAssets::default(),
                |_| panic!("no confirmation needed"),
            )
            .await
            .expect("checkout");

        assert!(matches!(outcome, CheckoutOutcome::Printed { invoice_id: 100, .. }));
        assert!(checkout.order().is_empty());
        assert_eq!(checkout.invoice_id(), 101);
    }

    #[tokio::test]
    async fn cashier_can_continue_without_receipt() {
        let mut checkout = checkout_with_coffee();
        let renderer = Renderer::escpos(&ReceiptConfig::default());
        let outcome = checkout
            .complete(
                &dispatcher(true),
                PrintRoute::Bluetooth,
                &renderer,
                &ReceiptAssets::default(),
                |err| err.is_recoverable(),
            )
            .await
            .expect("checkout");

        match outcome {
            CheckoutOutcome::CompletedWithoutPrint { invoice_id, reason } => {
                assert_eq!(invoice_id, 100);
                assert!(reason.contains("printer out of range"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(checkout.order().is_empty());
    }

    #[tokio::test]
    async fn declining_keeps_the_order() {
        let mut checkout = checkout_with_coffee();
        let renderer = Renderer::escpos(&ReceiptConfig::default());
        let outcome = checkout
            .complete(
                &dispatcher(true),
                PrintRoute::Bluetooth,
                &renderer,
                &ReceiptAssets::default(),
                |_| false,
            )
            .await
            .expect("checkout");

        assert!(matches!(outcome, CheckoutOutcome::Aborted));
        assert_eq!(checkout.order().lines().len(), 1);
        assert_eq!(checkout.invoice_id(), 100);
    }

    #[tokio::test]
    async fn empty_order_cannot_be_checked_out() {
        let mut checkout = Checkout::new(
            ShopProfile::default(),
            PricePolicy::default(),
            DecrementPolicy::RemoveAtZero,
            1,
        );
        let err = checkout
            .complete(
                &dispatcher(false),
                PrintRoute::Bluetooth,
                &Renderer::escpos(&ReceiptConfig::default()),
                &ReceiptAssets::default(),
                |_| true,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PosError::EmptyOrder));
    }

    #[tokio::test]
    async fn unsupported_route_is_an_error_not_a_prompt() {
        let mut checkout = checkout_with_coffee();
        let err = checkout
            .complete(
                &dispatcher(false),
                PrintRoute::RawBtImage,
                &Renderer::escpos(&ReceiptConfig::default()),
                &ReceiptAssets::default(),
                |_| panic!("should not prompt"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PosError::UnsupportedRoute { .. }));
        assert!(!checkout.order().is_empty());
    }

    #[test]
    fn resumed_order_keeps_its_invoice_number() {
        let mut order = Order::new(42);
        order.add_item(&MenuItem::new("តែ", 2500), &PricePolicy::default());
        let checkout = Checkout::resume(
            ShopProfile::default(),
            PricePolicy::default(),
            DecrementPolicy::RemoveAtZero,
            order,
        );
        assert_eq!(checkout.invoice_id(), 42);
        assert_eq!(checkout.totals().total, 2500);
        let doc = checkout.receipt(Local::now()).expect("receipt");
        assert_eq!(doc.header.invoice_id, 42);
    }

    #[test]
    fn stepper_uses_configured_decrement_policy() {
        let mut checkout = Checkout::new(
            ShopProfile::default(),
            PricePolicy::default(),
            DecrementPolicy::ClampAtZero,
            1,
        );
        let tea = MenuItem::new("តែ", 2500);
        checkout.add_item(&tea);
        let key = LineKey::for_item(&tea, checkout.policy());
        assert_eq!(checkout.adjust_quantity(&key, -1), Some(0));
        assert!(matches!(
            checkout.receipt(Local::now()),
            Err(PosError::EmptyOrder)
        ));
        checkout.clear();
        assert!(checkout.order().is_empty());
    }
}
