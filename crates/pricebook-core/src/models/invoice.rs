//! Invoice and line-item models.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::catalog::Category;

/// Lifecycle status of an uploaded invoice.
///
/// Transitions are strictly forward: `Ingested → Extracted → Reconciled →
/// Posted`. Extraction failure leaves the invoice at its current status so
/// the run can be re-attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Document uploaded, nothing extracted yet.
    Ingested,
    /// Line items extracted (possibly zero, flagged for review).
    Extracted,
    /// Line items matched against the catalog and priced.
    Reconciled,
    /// Catalog changes are final.
    Posted,
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvoiceStatus::Ingested => "ingested",
            InvoiceStatus::Extracted => "extracted",
            InvoiceStatus::Reconciled => "reconciled",
            InvoiceStatus::Posted => "posted",
        };
        f.write_str(s)
    }
}

/// Which recognition tier produced a line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// Vision tier; confidence is self-reported by the extraction result.
    #[serde(rename = "vision")]
    Vision,
    /// OCR tier, structured row parser; confidence is the OCR engine's
    /// per-page mean character confidence.
    #[serde(rename = "ocr")]
    Ocr,
    /// OCR tier, loose fallback row pattern. The structured parser did not
    /// understand the row; confidence is damped accordingly.
    #[serde(rename = "ocr-fallback-text")]
    OcrFallbackText,
}

/// One uploaded vendor invoice document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    /// Repository identifier.
    pub id: i64,

    /// Owning vendor.
    pub vendor_id: i64,

    /// Raw uploaded bytes (PDF or image). Not serialized.
    #[serde(skip)]
    pub document: Vec<u8>,

    /// Invoice number as printed on the document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<String>,

    /// Invoice date as printed on the document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_date: Option<NaiveDate>,

    /// Document subtotal ex-GST, when extracted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtotal_ex_gst: Option<Decimal>,

    /// Document GST total, when extracted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gst_total: Option<Decimal>,

    /// Document grand total, when extracted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_total: Option<Decimal>,

    /// Lifecycle status.
    pub status: InvoiceStatus,

    /// Set when extraction or reconciliation produced something an
    /// operator should look at (zero items, totals mismatch, SKU clash).
    pub needs_review: bool,

    /// Optimistic-concurrency counter, bumped on every store update.
    pub version: u64,
}

impl Invoice {
    /// Create a freshly ingested invoice.
    pub fn new(id: i64, vendor_id: i64, document: Vec<u8>) -> Self {
        Self {
            id,
            vendor_id,
            document,
            invoice_number: None,
            invoice_date: None,
            subtotal_ex_gst: None,
            gst_total: None,
            document_total: None,
            status: InvoiceStatus::Ingested,
            needs_review: false,
            version: 0,
        }
    }
}

/// A line item produced by one extraction run. Transient: exists only
/// inside the pipeline and becomes an [`InvoiceLineItem`] once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedLineItem {
    /// Cleaned item name (codes stripped).
    pub name: String,

    /// Raw text of the source row, kept for learning and review.
    pub raw_text: String,

    /// Invoiced quantity.
    pub quantity: Decimal,

    /// Units per invoiced line (1 when the line is a single unit).
    pub pack_size: Decimal,

    /// Cost ex-GST for one invoiced line.
    pub unit_cost: Decimal,

    /// Per-unit cost: `unit_cost / pack_size` when pack_size > 1.
    /// Downstream pricing consumes this, never the raw unit cost.
    pub effective_unit_cost: Decimal,

    /// Business category guess.
    pub category: Category,

    /// Whether GST applies to this line. Defaults to true unless the
    /// source explicitly marks an exemption.
    pub gst_applicable: bool,

    /// Extraction confidence, 0.0 - 1.0. Semantics differ by tier; see
    /// [`Provenance`].
    pub confidence: f32,

    /// Which tier produced this item.
    pub provenance: Provenance,
}

/// A persisted invoice line, tied to one invoice and optionally resolved
/// to a catalog item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLineItem {
    /// Repository identifier.
    pub id: i64,

    /// Owning invoice.
    pub invoice_id: i64,

    /// Resolved catalog item, null until matched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_item_id: Option<i64>,

    /// Item name.
    pub name: String,

    /// Invoiced quantity.
    pub quantity: Decimal,

    /// Units per invoiced line.
    pub pack_size: Decimal,

    /// Cost ex-GST for one invoiced line.
    pub unit_cost: Decimal,

    /// Per-unit cost consumed by pricing.
    pub effective_unit_cost: Decimal,

    /// Business category.
    pub category: Category,

    /// Whether GST applies.
    pub gst_applicable: bool,

    /// Extraction confidence.
    pub confidence: f32,

    /// Which tier produced this item.
    pub provenance: Provenance,

    /// Operator-set markup for this line, overriding every default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markup_override: Option<Decimal>,

    /// Free-text operator notes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl InvoiceLineItem {
    /// Persist an extracted item against an invoice.
    pub fn from_extracted(id: i64, invoice_id: i64, item: &ExtractedLineItem) -> Self {
        Self {
            id,
            invoice_id,
            catalog_item_id: None,
            name: item.name.clone(),
            quantity: item.quantity,
            pack_size: item.pack_size,
            unit_cost: item.unit_cost,
            effective_unit_cost: item.effective_unit_cost,
            category: item.category,
            gst_applicable: item.gst_applicable,
            confidence: item.confidence,
            provenance: item.provenance,
            markup_override: None,
            notes: None,
        }
    }
}

/// Result object handed to the review UI after an extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSummary {
    /// Invoice the run belongs to.
    pub invoice_id: i64,

    /// Number of line items extracted.
    pub item_count: usize,

    /// Display name of the invoice's vendor.
    pub vendor_name: String,

    /// Overall confidence: mean of per-item confidences, 0 when empty.
    pub confidence: f32,
}
