//! Kiosk POS core.
//!
//! Order building, receipt rendering (ESC/POS, raster PNG, HTML), print
//! dispatch (Bluetooth GATT, RawBT URLs, native print dialog) and stock
//! import/export for a small riel-priced shop. The `kiosk-pos` binary is a
//! thin CLI over these modules.

pub mod catalog;
pub mod checkout;
pub mod config;
pub mod currency;
pub mod error;
pub mod escpos;
pub mod logging;
pub mod order;
pub mod print;
pub mod receipt;
pub mod stock;

pub use catalog::{Catalog, MenuItem, PricePolicy};
pub use checkout::{Checkout, CheckoutOutcome};
pub use config::AppConfig;
pub use error::{PosError, PosResult};
pub use order::{aggregate, DecrementPolicy, LineKey, Order, OrderLine, OrderTotals};
pub use print::{PrintDispatcher, PrintOutcome, PrintRoute};
pub use receipt::{
    render, ReceiptAssets, ReceiptDocument, RenderOutput, RenderedArtifact, Renderer,
};
pub use stock::{StockBook, StockEntry, StockFormat};

/// Returns version, build timestamp, git SHA, and platform info.
pub fn about_info() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_about_info_has_required_fields() {
        let info = about_info();
        for key in ["version", "buildTimestamp", "gitSha", "platform", "arch"] {
            assert!(info.get(key).is_some(), "missing {key}");
        }
    }
}
