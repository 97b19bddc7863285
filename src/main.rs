use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use kiosk_pos_lib::checkout::{Checkout, CheckoutOutcome};
use kiosk_pos_lib::config::AppConfig;
use kiosk_pos_lib::print::{
    GattLink, NoBluetooth, PrintDispatcher, PrintRoute, SerialDeviceLink, SystemLauncher,
};
use kiosk_pos_lib::receipt::{render, ReceiptAssets, RenderedArtifact, Renderer};
use kiosk_pos_lib::stock::{export_file_name, StockBook, StockFormat, ALL_CATEGORIES};
use kiosk_pos_lib::{about_info, logging, DecrementPolicy, Order};

#[derive(Parser, Debug)]
#[command(name = "kiosk-pos", version, about = "Kiosk POS receipts, printing and stock")]
struct Cli {
    /// JSON config file. Falls back to KIOSK_POS_CONFIG, then built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render an order snapshot to a file.
    Receipt {
        /// Order JSON (`{"id": 17, "lines": [{"item": {...}, "quantity": 2}]}`).
        #[arg(long)]
        order: PathBuf,
        #[arg(long, value_enum, default_value_t = ReceiptFormat::Text)]
        format: ReceiptFormat,
        /// Output path. Text goes to stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Render an order and send it to a printer, completing the checkout.
    Print {
        #[arg(long)]
        order: PathBuf,
        #[arg(long, value_enum, default_value_t = RouteArg::NativeDialog)]
        route: RouteArg,
        #[command(flatten)]
        port: PrinterPort,
        /// Complete the sale without a receipt if printing fails.
        #[arg(long)]
        yes: bool,
    },
    /// Stock book maintenance.
    Stock {
        /// Stock book file (.json or .csv).
        #[arg(long, default_value = "stock.json")]
        book: PathBuf,
        #[command(subcommand)]
        action: StockAction,
    },
    /// Version and build information.
    About,
}

/// Serial port bound to a paired Bluetooth printer.
#[derive(clap::Args, Debug)]
struct PrinterPort {
    /// Port name (e.g. /dev/rfcomm0 or COM5).
    #[arg(long, env = "KIOSK_POS_PRINTER_DEVICE")]
    device: Option<String>,
    #[arg(long, default_value_t = SerialDeviceLink::DEFAULT_BAUD_RATE)]
    baud: u32,
    /// Advertised printer name, checked against the configured prefixes.
    #[arg(long)]
    device_name: Option<String>,
}

impl PrinterPort {
    fn link(self) -> Box<dyn GattLink> {
        let Some(device) = self.device else {
            return Box::new(NoBluetooth);
        };
        let link = SerialDeviceLink::new(&device, self.baud);
        match self.device_name {
            Some(name) => Box::new(link.with_device_name(name)),
            None => Box::new(link),
        }
    }
}

#[derive(Subcommand, Debug)]
enum StockAction {
    /// List entries, optionally for one category.
    List {
        #[arg(long, default_value = ALL_CATEGORIES)]
        category: String,
    },
    /// Change the quantity of one entry by a signed amount.
    Adjust {
        /// Stock key (`{name}_{category}`).
        key: String,
        #[arg(allow_hyphen_values = true)]
        delta: i64,
    },
    /// Write the book to `stock_YYYY-MM-DD.{csv,json}` in a directory.
    Export {
        #[arg(long, value_enum, default_value_t = FormatArg::Csv)]
        format: FormatArg,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Replace the book with the contents of a CSV or JSON file.
    Import { file: PathBuf },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ReceiptFormat {
    Text,
    Escpos,
    Png,
    Html,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RouteArg {
    Bluetooth,
    RawbtText,
    RawbtImage,
    RawbtPrint,
    NativeDialog,
}

impl From<RouteArg> for PrintRoute {
    fn from(value: RouteArg) -> Self {
        match value {
            RouteArg::Bluetooth => PrintRoute::Bluetooth,
            RouteArg::RawbtText => PrintRoute::RawBtText,
            RouteArg::RawbtImage => PrintRoute::RawBtImage,
            RouteArg::RawbtPrint => PrintRoute::RawBtPrint,
            RouteArg::NativeDialog => PrintRoute::NativeDialog,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Csv,
    Json,
}

impl From<FormatArg> for StockFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Csv => StockFormat::Csv,
            FormatArg::Json => StockFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let log_dir = logging::init_logging(config.paths.log_dir.as_deref());
    info!(
        version = env!("CARGO_PKG_VERSION"),
        log_dir = %log_dir.display(),
        "Starting Kiosk POS"
    );

    match cli.command {
        Command::Receipt { order, format, out } => {
            receipt(&config, &order, format, out.as_deref()).await
        }
        Command::Print {
            order,
            route,
            port,
            yes,
        } => print(&config, &order, route.into(), port.link(), yes).await,
        Command::Stock { book, action } => stock(&book, action),
        Command::About => {
            println!("{}", serde_json::to_string_pretty(&about_info())?);
            Ok(())
        }
    }
}

async fn receipt(
    config: &AppConfig,
    order_path: &Path,
    format: ReceiptFormat,
    out: Option<&Path>,
) -> Result<()> {
    let policy = config.pricing.policy();
    let order = Order::load(order_path, &policy)?;
    let checkout =
        Checkout::resume(config.shop.clone(), policy, DecrementPolicy::default(), order);
    let doc = checkout.receipt(Local::now())?;

    let renderer = match format {
        ReceiptFormat::Text => Renderer::plain_text(&config.receipt),
        ReceiptFormat::Escpos => Renderer::escpos(&config.receipt),
        ReceiptFormat::Png => Renderer::raster(&config.receipt),
        ReceiptFormat::Html => Renderer::dom(&config.receipt),
    };
    let assets = ReceiptAssets::load(&config.receipt).await;
    let output = render(&doc, &renderer, &assets)?;
    for w in &output.warnings {
        warn!(code = %w.code, "{}", w.message);
    }

    let bytes: Vec<u8> = match output.artifact {
        RenderedArtifact::EscPos(bytes) | RenderedArtifact::Png(bytes) => bytes,
        RenderedArtifact::PlainText(text) => text.into_bytes(),
        RenderedArtifact::Html(html) => html.document.into_bytes(),
    };
    match out {
        Some(path) => {
            std::fs::write(path, &bytes)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("{}", path.display());
        }
        None => {
            if !matches!(format, ReceiptFormat::Text | ReceiptFormat::Html) {
                bail!("binary receipt formats need --out");
            }
            std::io::stdout().write_all(&bytes)?;
        }
    }
    Ok(())
}

async fn print(
    config: &AppConfig,
    order_path: &Path,
    route: PrintRoute,
    link: Box<dyn GattLink>,
    yes: bool,
) -> Result<()> {
    let policy = config.pricing.policy();
    let order = Order::load(order_path, &policy)?;
    let mut checkout =
        Checkout::resume(config.shop.clone(), policy, DecrementPolicy::default(), order);

    let dispatcher = PrintDispatcher::new(
        config.bluetooth.clone(),
        config.rawbt.clone(),
        config.paths.receipts_dir.clone(),
        link,
        Box::new(SystemLauncher),
    );
    let renderer = route.renderer(&config.receipt);
    let assets = ReceiptAssets::load(&config.receipt).await;

    let outcome = checkout
        .complete(&dispatcher, route, &renderer, &assets, |err| {
            yes || confirm(&format!("Printing failed: {err}. Complete the sale without a receipt?"))
        })
        .await?;

    match outcome {
        CheckoutOutcome::Printed {
            invoice_id,
            print,
            warnings,
        } => {
            for w in &warnings {
                warn!(code = %w.code, "{}", w.message);
            }
            println!("Invoice {invoice_id} printed: {print:?}");
        }
        CheckoutOutcome::CompletedWithoutPrint { invoice_id, reason } => {
            println!("Invoice {invoice_id} completed without receipt ({reason})");
        }
        CheckoutOutcome::Aborted => bail!("checkout aborted, order kept"),
    }
    Ok(())
}

fn confirm(question: &str) -> bool {
    eprint!("{question} [y/N] ");
    let _ = std::io::stderr().flush();
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn stock(book_path: &Path, action: StockAction) -> Result<()> {
    let mut book = StockBook::load(book_path)
        .with_context(|| format!("loading {}", book_path.display()))?;

    match action {
        StockAction::List { category } => {
            println!("Categories: {}", book.categories().join(", "));
            for (key, entry) in book.filter(&category) {
                println!(
                    "{key}\t{}\t{}\t{}",
                    entry.name_alt,
                    entry.quantity_on_hand,
                    entry.last_updated_at.to_rfc3339()
                );
            }
        }
        StockAction::Adjust { key, delta } => {
            let Some(quantity) = book.adjust_quantity(&key, delta) else {
                bail!("no stock entry '{key}'");
            };
            book.save(book_path)?;
            println!("{key}: {quantity}");
        }
        StockAction::Export { format, dir } => {
            let format = StockFormat::from(format);
            let body = book.export(format)?;
            std::fs::create_dir_all(&dir)?;
            let path = dir.join(export_file_name(format, Utc::now().date_naive()));
            std::fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
            println!("{}", path.display());
        }
        StockAction::Import { file } => {
            let format = StockFormat::from_path(&file)
                .with_context(|| format!("{} is neither .csv nor .json", file.display()))?;
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let count = book.import(format, &raw)?;
            book.save(book_path)?;
            println!("Imported {count} entries into {}", book_path.display());
        }
    }
    Ok(())
}
