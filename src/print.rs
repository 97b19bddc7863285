//! Print dispatch.
//!
//! Routes a rendered receipt to one of the print channels:
//! - **Bluetooth**: ESC/POS bytes over a GATT write characteristic, paced in
//!   chunks no larger than the link MTU
//! - **RawBT**: `rawbt:` URLs handed to the Android RawBT print service
//! - **Native dialog**: an HTML page written to the receipts directory and
//!   opened in the system browser, which calls `window.print()` itself
//!
//! Hardware and the OS URL handler sit behind [`GattLink`] and
//! [`UrlLauncher`] so hosts can plug in their own stacks.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::Engine;
use chrono::Local;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{BluetoothConfig, RawBtConfig, ReceiptConfig};
use crate::error::{PosError, PosResult};
use crate::receipt::{raster, ReceiptDocument, RenderedArtifact, Renderer};

/// Characters `encodeURIComponent` leaves alone.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn encode_uri_component(input: &str) -> String {
    utf8_percent_encode(input, URI_COMPONENT).to_string()
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintRoute {
    Bluetooth,
    RawBtText,
    RawBtImage,
    RawBtPrint,
    NativeDialog,
}

impl PrintRoute {
    pub fn as_str(self) -> &'static str {
        match self {
            PrintRoute::Bluetooth => "bluetooth",
            PrintRoute::RawBtText => "rawbt_text",
            PrintRoute::RawBtImage => "rawbt_image",
            PrintRoute::RawBtPrint => "rawbt_print",
            PrintRoute::NativeDialog => "native_dialog",
        }
    }
}

impl PrintRoute {
    /// The renderer whose artifact this route accepts.
    pub fn renderer(self, cfg: &ReceiptConfig) -> Renderer {
        match self {
            PrintRoute::Bluetooth => Renderer::escpos(cfg),
            PrintRoute::RawBtText | PrintRoute::RawBtPrint => Renderer::plain_text(cfg),
            PrintRoute::RawBtImage => Renderer::raster(cfg),
            PrintRoute::NativeDialog => Renderer::dom(cfg),
        }
    }
}

impl fmt::Display for PrintRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintOutcome {
    /// Bytes written to a Bluetooth printer.
    Sent {
        device: String,
        bytes: usize,
        chunks: usize,
    },
    /// URL handed to the launcher. Delivery is not confirmed.
    Launched { url_len: usize },
    /// Print page written and opened.
    Opened { path: PathBuf },
}

// ---------------------------------------------------------------------------
// Channel traits
// ---------------------------------------------------------------------------

/// Which printer to connect to.
#[derive(Debug, Clone)]
pub struct DeviceFilter {
    pub name_prefixes: Vec<String>,
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl DeviceFilter {
    pub fn from_config(cfg: &BluetoothConfig) -> Self {
        Self {
            name_prefixes: cfg.name_prefixes.clone(),
            service: cfg.service_uuid,
            characteristic: cfg.characteristic_uuid,
        }
    }

    /// An empty prefix list accepts any device.
    pub fn matches(&self, device_name: &str) -> bool {
        self.name_prefixes.is_empty()
            || self
                .name_prefixes
                .iter()
                .any(|prefix| device_name.starts_with(prefix.as_str()))
    }
}

/// Byte pipe to a Bluetooth printer's write characteristic.
pub trait GattLink: Send {
    /// Select a device matching `filter` and open its characteristic.
    /// Returns the device name.
    fn connect(&mut self, filter: &DeviceFilter) -> Result<String, String>;

    /// Whether `connect` returns the advertised device name. Links that only
    /// know a port or address return `false` and skip the prefix check.
    fn reports_name(&self) -> bool {
        true
    }

    /// Largest payload a single write accepts.
    fn mtu(&self) -> usize {
        usize::MAX
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), String>;

    fn disconnect(&mut self) -> Result<(), String>;
}

/// Opens URLs with whatever the OS has registered for the scheme.
pub trait UrlLauncher: Send + Sync {
    fn open(&self, url: &str) -> Result<(), String>;
}

/// Default launcher: the system browser / scheme handler.
pub struct SystemLauncher;

impl UrlLauncher for SystemLauncher {
    fn open(&self, url: &str) -> Result<(), String> {
        webbrowser::open(url).map_err(|e| format!("Failed to open URL: {e}"))
    }
}

/// Printer exposed by the OS as a serial port (e.g. `/dev/rfcomm0` bound
/// with `rfcomm bind`, or a Bluetooth COM port on Windows). The OS owns the
/// RFCOMM session, so the link only knows the device name when one is set
/// with [`SerialDeviceLink::with_device_name`].
pub struct SerialDeviceLink {
    port_name: String,
    baud_rate: u32,
    timeout_ms: u64,
    device_name: Option<String>,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialDeviceLink {
    pub const DEFAULT_BAUD_RATE: u32 = 9600;
    const TIMEOUT_MS: u64 = 2000;

    pub fn new(port_name: &str, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            timeout_ms: Self::TIMEOUT_MS,
            device_name: None,
            port: None,
        }
    }

    /// Name the paired printer advertises, checked against the prefix filter.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }
}

impl GattLink for SerialDeviceLink {
    fn connect(&mut self, filter: &DeviceFilter) -> Result<String, String> {
        info!(
            port = %self.port_name,
            baud = self.baud_rate,
            service = %filter.service,
            "Opening printer serial port"
        );
        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(Duration::from_millis(self.timeout_ms))
            .open()
            .map_err(|e| format!("Failed to open {}: {e}", self.port_name))?;
        self.port = Some(port);
        Ok(self
            .device_name
            .clone()
            .unwrap_or_else(|| self.port_name.clone()))
    }

    fn reports_name(&self) -> bool {
        self.device_name.is_some()
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), String> {
        let port = self.port.as_mut().ok_or("Serial port not connected")?;
        port.write_all(chunk)
            .map_err(|e| format!("Serial write error: {e}"))?;
        port.flush().map_err(|e| format!("Serial flush error: {e}"))
    }

    fn disconnect(&mut self) -> Result<(), String> {
        self.port = None;
        debug!(port = %self.port_name, "Printer serial port closed");
        Ok(())
    }
}

/// Placeholder for hosts without any Bluetooth stack.
pub struct NoBluetooth;

impl GattLink for NoBluetooth {
    fn connect(&mut self, _filter: &DeviceFilter) -> Result<String, String> {
        Err("No Bluetooth printer link is configured on this host".to_string())
    }

    fn write(&mut self, _chunk: &[u8]) -> Result<(), String> {
        Err("Not connected".to_string())
    }

    fn disconnect(&mut self) -> Result<(), String> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

struct PrintGuard<'a>(&'a AtomicBool);

impl Drop for PrintGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PrintDispatcher {
    bluetooth: BluetoothConfig,
    rawbt: RawBtConfig,
    receipts_dir: PathBuf,
    link: Mutex<Box<dyn GattLink>>,
    launcher: Box<dyn UrlLauncher>,
    in_progress: AtomicBool,
}

impl PrintDispatcher {
    pub fn new(
        bluetooth: BluetoothConfig,
        rawbt: RawBtConfig,
        receipts_dir: impl Into<PathBuf>,
        link: Box<dyn GattLink>,
        launcher: Box<dyn UrlLauncher>,
    ) -> Self {
        Self {
            bluetooth,
            rawbt,
            receipts_dir: receipts_dir.into(),
            link: Mutex::new(link),
            launcher,
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    fn begin(&self) -> PosResult<PrintGuard<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PosError::PrintInProgress)?;
        Ok(PrintGuard(&self.in_progress))
    }

    /// Send `artifact` down `route`. Only one print runs at a time; a second
    /// call while one is in flight fails with [`PosError::PrintInProgress`].
    pub async fn dispatch(
        &self,
        route: PrintRoute,
        artifact: &RenderedArtifact,
        doc: &ReceiptDocument,
    ) -> PosResult<PrintOutcome> {
        let _guard = self.begin()?;
        info!(
            route = %route,
            artifact = artifact.kind(),
            invoice_id = doc.header.invoice_id,
            "Dispatching receipt"
        );

        let outcome = match (route, artifact) {
            (PrintRoute::Bluetooth, RenderedArtifact::EscPos(bytes)) => {
                self.send_bluetooth(bytes).await
            }
            (PrintRoute::Bluetooth, RenderedArtifact::Png(png)) => {
                let image = image::load_from_memory(png)
                    .map_err(|e| PosError::Render(format!("PNG decode: {e}")))?
                    .to_luma8();
                self.send_bluetooth(&raster::to_escpos_raster(&image)).await
            }
            (PrintRoute::RawBtText, RenderedArtifact::PlainText(text)) => {
                self.launch(&self.rawbt_text_url(text))
            }
            (PrintRoute::RawBtImage, RenderedArtifact::Png(png)) => {
                self.launch(&self.rawbt_image_url(png))
            }
            (PrintRoute::RawBtPrint, RenderedArtifact::PlainText(text)) => {
                self.launch(&self.rawbt_print_url(text, &doc.qr_payload))
            }
            (PrintRoute::NativeDialog, RenderedArtifact::Html(html)) => {
                self.open_print_page(&html.document, doc.header.invoice_id)
                    .await
            }
            (route, artifact) => Err(PosError::UnsupportedRoute {
                artifact: artifact.kind(),
                route: route.as_str(),
            }),
        };

        match &outcome {
            Ok(done) => debug!(route = %route, outcome = ?done, "Print dispatched"),
            Err(e) => warn!(route = %route, error = %e, "Print dispatch failed"),
        }
        outcome
    }

    async fn send_bluetooth(&self, bytes: &[u8]) -> PosResult<PrintOutcome> {
        let filter = DeviceFilter::from_config(&self.bluetooth);
        let mut link = self.link.lock().await;
        let device = link.connect(&filter).map_err(PosError::Bluetooth)?;
        if link.reports_name() && !filter.matches(&device) {
            if let Err(e) = link.disconnect() {
                warn!(device = %device, error = %e, "Bluetooth disconnect failed");
            }
            return Err(PosError::Bluetooth(format!(
                "device {device} does not match printer prefixes"
            )));
        }

        let result = self.write_chunks(link.as_mut(), bytes).await;
        if let Err(e) = link.disconnect() {
            warn!(device = %device, error = %e, "Bluetooth disconnect failed");
        }
        let chunks = result?;
        info!(device = %device, bytes = bytes.len(), chunks, "Receipt sent over Bluetooth");
        Ok(PrintOutcome::Sent {
            device,
            bytes: bytes.len(),
            chunks,
        })
    }

    async fn write_chunks(&self, link: &mut dyn GattLink, bytes: &[u8]) -> PosResult<usize> {
        let size = self.bluetooth.chunk_size.min(link.mtu()).max(1);
        let delay = Duration::from_millis(self.bluetooth.chunk_delay_ms);
        let total = bytes.len().div_ceil(size);
        for (index, chunk) in bytes.chunks(size).enumerate() {
            link.write(chunk)
                .map_err(|e| PosError::Bluetooth(format!("chunk {}/{total}: {e}", index + 1)))?;
            if index + 1 < total && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(total)
    }

    pub fn rawbt_text_url(&self, text: &str) -> String {
        format!("{}:{}", self.rawbt.scheme, encode_uri_component(text))
    }

    pub fn rawbt_image_url(&self, png: &[u8]) -> String {
        format!(
            "{}:data:image/png;base64,{}",
            self.rawbt.scheme,
            base64::engine::general_purpose::STANDARD.encode(png)
        )
    }

    pub fn rawbt_print_url(&self, text: &str, qr_payload: &str) -> String {
        format!(
            "{}://print?text={}&qr={}",
            self.rawbt.scheme,
            encode_uri_component(text),
            encode_uri_component(qr_payload)
        )
    }

    fn launch(&self, url: &str) -> PosResult<PrintOutcome> {
        self.launcher.open(url).map_err(PosError::Launcher)?;
        Ok(PrintOutcome::Launched { url_len: url.len() })
    }

    async fn open_print_page(&self, html: &str, invoice_id: u64) -> PosResult<PrintOutcome> {
        let path = write_print_html_file(&self.receipts_dir, invoice_id, html).await?;
        let target = path.display().to_string();
        self.launcher.open(&target).map_err(PosError::Launcher)?;
        info!(path = %target, "Print page opened");
        Ok(PrintOutcome::Opened { path })
    }
}

async fn write_print_html_file(dir: &Path, invoice_id: u64, html: &str) -> PosResult<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let file_path = dir.join(format!("receipt_{invoice_id}_{timestamp}.html"));
    tokio::fs::write(&file_path, html).await?;
    Ok(file_path)
}
