//! End-to-end pipeline tests with stub recognizer clients.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

use pricebook_core::error::RecognitionError;
use pricebook_core::raster::PageFrame;
use pricebook_core::recognize::{OcrClient, OcrPage, VisionClient, VisionInvoice, VisionItem};
use pricebook_core::{
    CatalogStore, InvoicePipeline, InvoiceStatus, InvoiceStore, PricebookConfig, PricebookError,
    ProfileStore, Provenance, Stores, VendorStore,
};

struct FailingVision;

#[async_trait]
impl VisionClient for FailingVision {
    async fn extract(
        &self,
        _pages: &[PageFrame],
        _instructions: &str,
    ) -> Result<VisionInvoice, RecognitionError> {
        Err(RecognitionError::Transport {
            tier: "vision",
            reason: "connection refused".to_string(),
        })
    }
}

struct StubVision {
    invoice: VisionInvoice,
}

#[async_trait]
impl VisionClient for StubVision {
    async fn extract(
        &self,
        _pages: &[PageFrame],
        _instructions: &str,
    ) -> Result<VisionInvoice, RecognitionError> {
        Ok(self.invoice.clone())
    }
}

struct StubOcr {
    text: String,
}

#[async_trait]
impl OcrClient for StubOcr {
    async fn recognize(&self, _image: &[u8]) -> Result<OcrPage, RecognitionError> {
        Ok(OcrPage {
            text: self.text.clone(),
            confidence: 0.8,
        })
    }
}

/// A tiny valid PNG so the rasterizer takes the image-passthrough path.
fn png_document() -> Vec<u8> {
    let img = image::DynamicImage::ImageRgba8(image::ImageBuffer::from_pixel(
        8,
        8,
        image::Rgba([255u8, 255, 255, 255]),
    ));
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn ocr_pipeline(stores: &Stores, text: &str) -> InvoicePipeline {
    InvoicePipeline::new(
        stores.clone(),
        Some(Arc::new(FailingVision)),
        Arc::new(StubOcr {
            text: text.to_string(),
        }),
        PricebookConfig::default(),
    )
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

const THREE_LINES: &str = "Invoice No: INV-9001\n\
                           Date: 16/02/2026\n\
                           1  SOURDOUGH LOAF  5.00  5.00\n\
                           2  BUTTER 250G  4.50  9.00\n\
                           3  FREE RANGE EGGS DOZEN  6.00  18.00\n\
                           Subtotal 32.00\n\
                           TOTAL 35.20\n";

#[tokio::test]
async fn vision_failure_falls_back_to_ocr_with_ocr_provenance() {
    let stores = Stores::in_memory();
    let vendor = stores.vendors.create_vendor("Bakehouse", None).unwrap();
    let pipeline = ocr_pipeline(&stores, THREE_LINES);

    let invoice_id = pipeline.submit_invoice(vendor.id, png_document()).unwrap();
    let summary = pipeline.run_extraction(invoice_id).await.unwrap();

    assert_eq!(summary.item_count, 3);
    assert_eq!(summary.vendor_name, "Bakehouse");
    assert!((summary.confidence - 0.8).abs() < 1e-6);

    let lines = stores.invoices.line_items(invoice_id).unwrap();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|l| l.provenance == Provenance::Ocr));

    let invoice = stores.invoices.find_invoice(invoice_id).unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Extracted);
    assert_eq!(invoice.invoice_number.as_deref(), Some("INV-9001"));
    assert_eq!(invoice.subtotal_ex_gst, Some(dec("32.00")));
}

#[tokio::test]
async fn both_tiers_empty_is_recognition_empty_and_stays_extracted() {
    let stores = Stores::in_memory();
    let vendor = stores.vendors.create_vendor("Bakehouse", None).unwrap();
    let pipeline = ocr_pipeline(&stores, "smudged beyond recognition");

    let invoice_id = pipeline.submit_invoice(vendor.id, png_document()).unwrap();
    let result = pipeline.run_extraction(invoice_id).await;

    assert!(matches!(
        result,
        Err(PricebookError::Recognition(RecognitionError::Empty))
    ));

    // A legitimate outcome, not a crash: the invoice is committed as
    // extracted with zero items and flagged for manual entry, and it is
    // never reconciled automatically.
    let invoice = stores.invoices.find_invoice(invoice_id).unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Extracted);
    assert!(invoice.needs_review);
    assert_eq!(stores.invoices.line_items(invoice_id).unwrap().len(), 0);
}

#[tokio::test]
async fn vision_success_carries_vision_provenance_and_pack_sizes() {
    let stores = Stores::in_memory();
    let vendor = stores.vendors.create_vendor("Bakehouse", None).unwrap();

    let vision = StubVision {
        invoice: VisionInvoice {
            invoice_number: Some("INV-7".to_string()),
            invoice_date: Some("01/03/2026".to_string()),
            items: vec![VisionItem {
                description: "BOK-CCGF-001 Cheesecake Gluten Free".to_string(),
                quantity: Some(dec("2")),
                pack_size: Some(dec("5")),
                unit_cost: Some(dec("45.00")),
                category: Some("Bakery".to_string()),
                gst_applicable: None,
                confidence: Some(0.93),
            }],
            ..Default::default()
        },
    };
    let pipeline = InvoicePipeline::new(
        stores.clone(),
        Some(Arc::new(vision)),
        Arc::new(StubOcr {
            text: String::new(),
        }),
        PricebookConfig::default(),
    );

    let invoice_id = pipeline.submit_invoice(vendor.id, png_document()).unwrap();
    let summary = pipeline.run_extraction(invoice_id).await.unwrap();
    assert_eq!(summary.item_count, 1);

    let lines = stores.invoices.line_items(invoice_id).unwrap();
    assert_eq!(lines[0].provenance, Provenance::Vision);
    // Item code stripped, pack size honored in the effective cost.
    assert_eq!(lines[0].name, "Cheesecake Gluten Free");
    assert_eq!(lines[0].pack_size, dec("5"));
    assert_eq!(lines[0].effective_unit_cost, dec("9"));
}

#[tokio::test]
async fn reconcile_creates_items_prices_them_and_is_idempotent() {
    let stores = Stores::in_memory();
    let vendor = stores.vendors.create_vendor("Bakehouse", None).unwrap();
    let pipeline = ocr_pipeline(&stores, THREE_LINES);

    let invoice_id = pipeline.submit_invoice(vendor.id, png_document()).unwrap();
    pipeline.run_extraction(invoice_id).await.unwrap();

    let first = pipeline.reconcile(invoice_id).unwrap();
    assert!(first.iter().all(|l| l.catalog_item_id.is_some()));

    let items = stores.catalog.items_for_vendor(vendor.id).unwrap();
    assert_eq!(items.len(), 3);

    // Default markup 1.65, GST 10%: 5.00 -> 8.25 ex, 9.08 inc.
    let loaf = stores
        .catalog
        .find_by_name(vendor.id, "SOURDOUGH LOAF")
        .unwrap()
        .unwrap();
    assert_eq!(loaf.cost_ex_gst, dec("5.00"));
    assert_eq!(loaf.sell_ex_gst, dec("8.25"));
    assert_eq!(loaf.sell_inc_gst, dec("9.08"));

    // Re-running against an unchanged catalog keeps identical links and
    // writes no price history.
    let second = pipeline.reconcile(invoice_id).unwrap();
    let first_links: Vec<_> = first.iter().map(|l| (l.name.clone(), l.catalog_item_id)).collect();
    let second_links: Vec<_> = second.iter().map(|l| (l.name.clone(), l.catalog_item_id)).collect();
    assert_eq!(first_links, second_links);
    assert_eq!(stores.catalog.items_for_vendor(vendor.id).unwrap().len(), 3);
    assert_eq!(stores.catalog.price_history(loaf.id).unwrap().len(), 0);
}

#[tokio::test]
async fn price_history_snapshots_previous_values_across_cost_changes() {
    let stores = Stores::in_memory();
    let vendor = stores.vendors.create_vendor("Bakehouse", None).unwrap();

    let costs = ["5.00", "6.00", "7.50"];
    for cost in costs {
        let text = format!(
            "1  SOURDOUGH LOAF  {cost}  {cost}\n\
             1  BUTTER 250G  4.50  4.50\n"
        );
        let pipeline = ocr_pipeline(&stores, &text);
        let invoice_id = pipeline.submit_invoice(vendor.id, png_document()).unwrap();
        pipeline.run_extraction(invoice_id).await.unwrap();
        pipeline.reconcile(invoice_id).unwrap();
    }

    let loaf = stores
        .catalog
        .find_by_name(vendor.id, "SOURDOUGH LOAF")
        .unwrap()
        .unwrap();
    assert_eq!(loaf.cost_ex_gst, dec("7.50"));

    // Two cost changes, two snapshots, each recording the superseded
    // values in order.
    let history = stores.catalog.price_history(loaf.id).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].cost_ex_gst, dec("5.00"));
    assert_eq!(history[0].sell_ex_gst, dec("8.25"));
    assert_eq!(history[1].cost_ex_gst, dec("6.00"));
    assert_eq!(history[1].sell_ex_gst, dec("9.90"));

    // Butter never changed cost after creation: no history.
    let butter = stores
        .catalog
        .find_by_name(vendor.id, "BUTTER 250G")
        .unwrap()
        .unwrap();
    assert_eq!(stores.catalog.price_history(butter.id).unwrap().len(), 0);
}

#[tokio::test]
async fn identical_names_under_different_vendors_never_collapse() {
    let stores = Stores::in_memory();
    let bakehouse = stores.vendors.create_vendor("Bakehouse", None).unwrap();
    let millers = stores.vendors.create_vendor("Millers", None).unwrap();

    let text = "1  SOURDOUGH LOAF  5.00  5.00\n1  BUTTER 250G  4.50  4.50\n";
    for vendor_id in [bakehouse.id, millers.id] {
        let pipeline = ocr_pipeline(&stores, text);
        let invoice_id = pipeline.submit_invoice(vendor_id, png_document()).unwrap();
        pipeline.run_extraction(invoice_id).await.unwrap();
        pipeline.reconcile(invoice_id).unwrap();
    }

    // One row per vendor, never shared.
    let a = stores.catalog.items_for_vendor(bakehouse.id).unwrap();
    let b = stores.catalog.items_for_vendor(millers.id).unwrap();
    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 2);
    let a_loaf = a.iter().find(|i| i.name == "SOURDOUGH LOAF").unwrap();
    let b_loaf = b.iter().find(|i| i.name == "SOURDOUGH LOAF").unwrap();
    assert_ne!(a_loaf.id, b_loaf.id);
}

#[tokio::test]
async fn gst_exempt_lines_price_equal_ex_and_inc() {
    let stores = Stores::in_memory();
    let vendor = stores.vendors.create_vendor("Bakehouse", None).unwrap();
    let pipeline = ocr_pipeline(&stores, "6  PLAIN FLOUR 1KG  2.00  12.00 GST FREE\n");

    let invoice_id = pipeline.submit_invoice(vendor.id, png_document()).unwrap();
    pipeline.run_extraction(invoice_id).await.unwrap();
    pipeline.reconcile(invoice_id).unwrap();

    let flour = stores
        .catalog
        .find_by_name(vendor.id, "PLAIN FLOUR 1KG")
        .unwrap()
        .unwrap();
    assert!(!flour.gst_applicable);
    assert_eq!(flour.sell_ex_gst, flour.sell_inc_gst);
}

#[tokio::test]
async fn post_invoice_receives_stock_and_freezes_status() {
    let stores = Stores::in_memory();
    let vendor = stores.vendors.create_vendor("Bakehouse", None).unwrap();
    let pipeline = ocr_pipeline(&stores, "2  FLOUR 2 x 5kg  30.00  60.00\n");

    let invoice_id = pipeline.submit_invoice(vendor.id, png_document()).unwrap();
    pipeline.run_extraction(invoice_id).await.unwrap();
    pipeline.reconcile(invoice_id).unwrap();
    pipeline.post_invoice(invoice_id).unwrap();

    let invoice = stores.invoices.find_invoice(invoice_id).unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Posted);

    // 2 lines of pack 5 received: 10 units on hand, costed per unit.
    let flour = stores.catalog.items_for_vendor(vendor.id).unwrap();
    assert_eq!(flour[0].stock_on_hand, dec("10"));
    assert_eq!(flour[0].cost_ex_gst, dec("6"));

    // Posting twice is rejected.
    assert!(pipeline.post_invoice(invoice_id).is_err());
}

#[tokio::test]
async fn corrections_bias_later_extractions_and_log_is_bounded() {
    let stores = Stores::in_memory();
    let vendor = stores.vendors.create_vendor("Bakehouse", None).unwrap();
    let pipeline = ocr_pipeline(&stores, "1  CATERING TRAY LAMINGTONS  24.00  24.00\n");

    // Teach the profile that this vendor's catering trays hold a dozen.
    pipeline
        .record_correction(vendor.id, "quantity", "catering tray", "12", Some(0.9))
        .unwrap();

    let invoice_id = pipeline.submit_invoice(vendor.id, png_document()).unwrap();
    pipeline.run_extraction(invoice_id).await.unwrap();

    let lines = stores.invoices.line_items(invoice_id).unwrap();
    assert_eq!(lines[0].pack_size, dec("12"));
    assert_eq!(lines[0].effective_unit_cost, dec("2"));

    // Bounded log: after 120 corrections only the 100 most recent remain.
    for i in 0..119 {
        pipeline
            .record_correction(
                vendor.id,
                "itemDescription",
                &format!("raw {i}"),
                &format!("fixed {i}"),
                None,
            )
            .unwrap();
    }
    let profile = stores.profiles.find_profile(vendor.id).unwrap().unwrap();
    assert_eq!(profile.corrections.len(), 100);
    assert_eq!(profile.corrections[99].original, "raw 118");
}

#[tokio::test]
async fn unsupported_upload_fails_without_state_change() {
    let stores = Stores::in_memory();
    let vendor = stores.vendors.create_vendor("Bakehouse", None).unwrap();
    let pipeline = ocr_pipeline(&stores, THREE_LINES);

    let invoice_id = pipeline
        .submit_invoice(vendor.id, b"not a document at all".to_vec())
        .unwrap();
    let result = pipeline.run_extraction(invoice_id).await;
    assert!(matches!(result, Err(PricebookError::Raster(_))));

    // Still ingested, still re-attemptable.
    let invoice = stores.invoices.find_invoice(invoice_id).unwrap().unwrap();
    assert_eq!(invoice.status, InvoiceStatus::Ingested);
}
