//! Process command - run one invoice file through the full pipeline.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use pricebook_core::{
    HttpOcrClient, HttpVisionClient, InvoiceLineItem, InvoicePipeline, InvoiceStore,
    PricebookConfig, PricebookError, ProfileStore, RecognitionError, Stores, VendorProfile,
    VendorStore, VisionClient,
};

/// Arguments for the process command.
#[derive(Args)]
pub struct ProcessArgs {
    /// Input file (PDF or image)
    #[arg(required = true)]
    input: PathBuf,

    /// Vendor name for this invoice
    #[arg(long, default_value = "Unnamed Vendor")]
    vendor: String,

    /// Vendor default markup multiplier (e.g. 1.4)
    #[arg(long)]
    vendor_markup: Option<Decimal>,

    /// Vendor learning profile file, loaded before and saved after the run
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Post the invoice after reconciling (stock received, status frozen)
    #[arg(long)]
    post: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Export reconciled lines to a CSV file
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// Aligned text table
    Table,
    /// JSON output
    Json,
}

pub async fn run(args: ProcessArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();

    let config = if let Some(path) = config_path {
        PricebookConfig::from_file(Path::new(path))?
    } else {
        PricebookConfig::default()
    };

    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }
    let document = fs::read(&args.input)?;
    info!("Processing file: {}", args.input.display());

    let stores = Stores::in_memory();
    let vendor = stores
        .vendors
        .create_vendor(&args.vendor, args.vendor_markup)?;

    // Seed the vendor's learning profile from disk when one was given.
    if let Some(path) = &args.profile {
        if path.exists() {
            let mut profile: VendorProfile = serde_json::from_str(&fs::read_to_string(path)?)?;
            profile.vendor_id = vendor.id;
            profile.version = 0;
            stores.profiles.upsert_profile(&profile)?;
            debug!("Loaded vendor profile from {}", path.display());
        }
    }

    let vision: Option<Arc<dyn VisionClient>> = match &config.recognition.vision_api_key {
        Some(key) => Some(Arc::new(HttpVisionClient::new(
            config.recognition.vision_base_url.clone(),
            config.recognition.vision_model.clone(),
            key.clone(),
        ))),
        None => {
            info!("No vision credential configured; OCR tier only");
            None
        }
    };
    let ocr = Arc::new(HttpOcrClient::new(config.recognition.ocr_base_url.clone()));

    let pipeline = InvoicePipeline::new(stores.clone(), vision, ocr, config);

    let invoice_id = pipeline.submit_invoice(vendor.id, document)?;
    let summary = match pipeline.run_extraction(invoice_id).await {
        Ok(summary) => summary,
        Err(PricebookError::Recognition(RecognitionError::Empty)) => {
            println!("No line items could be extracted; the invoice needs manual entry.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    info!(
        items = summary.item_count,
        confidence = summary.confidence,
        "extraction complete"
    );

    let lines = pipeline.reconcile(invoice_id)?;

    if args.post {
        pipeline.post_invoice(invoice_id)?;
        info!("invoice posted");
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&lines)?),
        OutputFormat::Table => print_table(&summary.vendor_name, &lines),
    }

    if let Some(path) = &args.csv {
        write_csv(path, &lines)?;
        println!("CSV written to {}", path.display());
    }

    // Persist whatever the run learned.
    if let Some(path) = &args.profile {
        if let Some(profile) = stores.profiles.find_profile(vendor.id)? {
            fs::write(path, serde_json::to_string_pretty(&profile)?)?;
            debug!("Saved vendor profile to {}", path.display());
        }
    }

    let invoice = stores
        .invoices
        .find_invoice(invoice_id)?
        .expect("invoice just processed");
    if invoice.needs_review {
        warn!("invoice flagged for review");
    }

    debug!("Total processing time: {:?}", start.elapsed());
    Ok(())
}

fn print_table(vendor_name: &str, lines: &[InvoiceLineItem]) {
    println!("Vendor: {vendor_name}");
    println!(
        "{:<36} {:>6} {:>6} {:>10} {:>10} {:>5}",
        "Item", "Qty", "Pack", "Unit cost", "Eff. cost", "Conf"
    );
    for line in lines {
        println!(
            "{:<36} {:>6} {:>6} {:>10} {:>10} {:>4.0}%",
            truncate(&line.name, 36),
            line.quantity,
            line.pack_size,
            line.unit_cost,
            line.effective_unit_cost,
            line.confidence * 100.0
        );
    }
    println!("{} line(s)", lines.len());
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{cut}…")
    }
}

/// Flat record for CSV export; every row carries every column.
#[derive(serde::Serialize)]
struct CsvLine<'a> {
    name: &'a str,
    quantity: Decimal,
    pack_size: Decimal,
    unit_cost: Decimal,
    effective_unit_cost: Decimal,
    category: &'static str,
    gst_applicable: bool,
    confidence: f32,
    catalog_item_id: Option<i64>,
    notes: &'a str,
}

fn write_csv(path: &Path, lines: &[InvoiceLineItem]) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for line in lines {
        writer.serialize(CsvLine {
            name: &line.name,
            quantity: line.quantity,
            pack_size: line.pack_size,
            unit_cost: line.unit_cost,
            effective_unit_cost: line.effective_unit_cost,
            category: line.category.name(),
            gst_applicable: line.gst_applicable,
            confidence: line.confidence,
            catalog_item_id: line.catalog_item_id,
            notes: line.notes.as_deref().unwrap_or(""),
        })?;
    }
    writer.flush()?;
    Ok(())
}
