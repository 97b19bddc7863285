//! Error type shared by the library.
//!
//! Formatting never fails and asset problems are reported as render
//! warnings, so the variants here only cover configuration, stock file I/O,
//! rendering failures that leave nothing to print, and print channels.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PosError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{format} import failed at row {row}: {message}")]
    Import {
        format: &'static str,
        row: usize,
        message: String,
    },

    #[error("Invalid stock entry: {0}")]
    InvalidStock(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("Asset unavailable: {0}")]
    Asset(String),

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Bluetooth printer error: {0}")]
    Bluetooth(String),

    #[error("Could not hand receipt to print app: {0}")]
    Launcher(String),

    #[error("A print job is already in progress")]
    PrintInProgress,

    #[error("Order is empty")]
    EmptyOrder,

    #[error("Receipt artifact {artifact} cannot be sent to {route}")]
    UnsupportedRoute {
        artifact: &'static str,
        route: &'static str,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PosError {
    /// Bluetooth failures let the cashier finish the sale without a receipt.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PosError::Bluetooth(_))
    }
}

impl From<PosError> for String {
    fn from(err: PosError) -> String {
        err.to_string()
    }
}

pub type PosResult<T> = Result<T, PosError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_bluetooth_errors_are_recoverable() {
        assert!(PosError::Bluetooth("device rejected".into()).is_recoverable());
        assert!(!PosError::Launcher("no handler".into()).is_recoverable());
        assert!(!PosError::PrintInProgress.is_recoverable());
        assert!(!PosError::EmptyOrder.is_recoverable());
    }

    #[test]
    fn import_error_names_format_and_row() {
        let err = PosError::Import {
            format: "CSV",
            row: 3,
            message: "quantity is not a number".into(),
        };
        assert_eq!(
            err.to_string(),
            "CSV import failed at row 3: quantity is not a number"
        );
    }
}
