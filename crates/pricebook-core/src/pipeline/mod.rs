//! End-to-end invoice pipeline: submit, extract, reconcile, post.
//!
//! Each invoice is processed by a single logical pipeline invocation.
//! Shared mutable state (catalog items, vendor profiles) is written
//! through optimistic-concurrency retries so concurrent invoices cannot
//! lose updates. A failure on one line never aborts the others; a failure
//! mid-run never corrupts already-committed state.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::CatalogMatcher;
use crate::error::{CatalogError, LearningError, RecognitionError, Result, StoreError};
use crate::learning::LearningService;
use crate::models::catalog::{CatalogItem, CatalogMatch};
use crate::models::config::PricebookConfig;
use crate::models::invoice::{ExtractionSummary, Invoice, InvoiceLineItem, InvoiceStatus};
use crate::models::vendor::Vendor;
use crate::normalize::Normalizer;
use crate::pricing::{compute_sell_price, resolve_markup};
use crate::raster::Rasterizer;
use crate::recognize::{OcrClient, RecognitionChain, VisionClient};
use crate::store::{CatalogStore, InMemoryStore, InvoiceStore, ProfileStore, VendorStore};

/// Attempts at winning a compare-and-swap before giving up.
const CAS_ATTEMPTS: usize = 3;

/// Lines may disagree with the printed subtotal by at most one cent
/// before the invoice is flagged for review.
const TOTALS_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// The repository handles a pipeline runs against.
#[derive(Clone)]
pub struct Stores {
    pub invoices: Arc<dyn InvoiceStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub vendors: Arc<dyn VendorStore>,
    pub profiles: Arc<dyn ProfileStore>,
}

impl Stores {
    /// All four stores backed by one shared in-memory repository.
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            invoices: store.clone(),
            catalog: store.clone(),
            vendors: store.clone(),
            profiles: store,
        }
    }
}

/// The invoice extraction and reconciliation pipeline.
pub struct InvoicePipeline {
    invoices: Arc<dyn InvoiceStore>,
    catalog: Arc<dyn CatalogStore>,
    vendors: Arc<dyn VendorStore>,
    learning: LearningService,
    rasterizer: Rasterizer,
    chain: RecognitionChain,
    normalizer: Normalizer,
    matcher: CatalogMatcher,
    config: PricebookConfig,
}

impl InvoicePipeline {
    /// Assemble a pipeline over injected stores and recognizer clients.
    /// Passing `None` for the vision client disables the vision tier.
    pub fn new(
        stores: Stores,
        vision: Option<Arc<dyn VisionClient>>,
        ocr: Arc<dyn OcrClient>,
        config: PricebookConfig,
    ) -> Self {
        let chain = RecognitionChain::new(
            vision,
            ocr,
            Duration::from_secs(config.recognition.vision_timeout_secs),
            Duration::from_secs(config.recognition.ocr_timeout_secs),
        );

        Self {
            learning: LearningService::new(stores.profiles.clone(), config.learning.clone()),
            rasterizer: Rasterizer::new(config.raster.clone()),
            normalizer: Normalizer::new(config.learning.hint_confidence_threshold),
            matcher: CatalogMatcher::new(config.matching.min_shared_words),
            invoices: stores.invoices,
            catalog: stores.catalog,
            vendors: stores.vendors,
            chain,
            config,
        }
    }

    /// Ingest an uploaded document for a vendor.
    pub fn submit_invoice(&self, vendor_id: i64, document: Vec<u8>) -> Result<i64> {
        let vendor = self.require_vendor(vendor_id)?;
        let invoice = self.invoices.create_invoice(vendor_id, document)?;
        info!(invoice_id = invoice.id, vendor = %vendor.name, "invoice ingested");
        Ok(invoice.id)
    }

    /// Run the rasterizer, recognition chain, and normalizer over an
    /// ingested invoice.
    ///
    /// On [`RecognitionError::Empty`] the invoice is committed as
    /// `extracted` with zero items and flagged for review, then the error
    /// is surfaced so callers can route it to manual entry. Any other
    /// failure leaves the invoice untouched and re-attemptable.
    pub async fn run_extraction(&self, invoice_id: i64) -> Result<ExtractionSummary> {
        let invoice = self.require_invoice(invoice_id)?;
        match invoice.status {
            InvoiceStatus::Ingested | InvoiceStatus::Extracted => {}
            status => {
                return Err(StoreError::InvalidStatus {
                    id: invoice_id,
                    status: status.to_string(),
                    expected: "ingested or extracted".to_string(),
                }
                .into());
            }
        }
        let vendor = self.require_vendor(invoice.vendor_id)?;

        let frames = self.rasterizer.rasterize(&invoice.document)?;

        let recognition = match self.chain.run(&frames).await {
            Ok(recognition) => recognition,
            Err(RecognitionError::Empty) => {
                self.invoices.replace_line_items(invoice_id, &[])?;
                self.update_invoice_with(invoice_id, |inv| {
                    inv.status = InvoiceStatus::Extracted;
                    inv.needs_review = true;
                })?;
                info!(invoice_id, "no items extracted, flagged for manual entry");
                return Err(RecognitionError::Empty.into());
            }
            Err(e) => return Err(e.into()),
        };

        let profile = self.learning.profile(invoice.vendor_id);
        let items = self.normalizer.normalize(&recognition.items, profile.as_ref());

        let confidence = if items.is_empty() {
            0.0
        } else {
            items.iter().map(|i| i.confidence).sum::<f32>() / items.len() as f32
        };

        self.invoices.replace_line_items(invoice_id, &items)?;
        let header = recognition.header;
        self.update_invoice_with(invoice_id, |inv| {
            inv.invoice_number = header.invoice_number.clone().or(inv.invoice_number.take());
            inv.invoice_date = header.invoice_date.or(inv.invoice_date);
            inv.subtotal_ex_gst = header.subtotal_ex_gst.or(inv.subtotal_ex_gst);
            inv.gst_total = header.gst_total.or(inv.gst_total);
            inv.document_total = header.total.or(inv.document_total);
            inv.status = InvoiceStatus::Extracted;
            inv.needs_review = false;
        })?;

        info!(
            invoice_id,
            items = items.len(),
            confidence,
            vendor = %vendor.name,
            "extraction complete"
        );
        Ok(ExtractionSummary {
            invoice_id,
            item_count: items.len(),
            vendor_name: vendor.name,
            confidence,
        })
    }

    /// Match extracted lines against the catalog and apply pricing.
    ///
    /// Idempotent for an unchanged catalog: re-running produces identical
    /// line-to-item links and writes no new price history.
    pub fn reconcile(&self, invoice_id: i64) -> Result<Vec<InvoiceLineItem>> {
        let invoice = self.require_invoice(invoice_id)?;
        match invoice.status {
            InvoiceStatus::Extracted | InvoiceStatus::Reconciled => {}
            status => {
                return Err(StoreError::InvalidStatus {
                    id: invoice_id,
                    status: status.to_string(),
                    expected: "extracted or reconciled".to_string(),
                }
                .into());
            }
        }
        let vendor = self.require_vendor(invoice.vendor_id)?;
        let profile = self.learning.profile(invoice.vendor_id);
        let mut candidates = self.catalog.items_for_vendor(invoice.vendor_id)?;
        let lines = self.invoices.line_items(invoice_id)?;

        let mut needs_review = false;
        let mut reconciled = Vec::with_capacity(lines.len());

        for mut line in lines {
            match self.matcher.match_item(&line.name, &candidates, profile.as_ref()) {
                CatalogMatch::Matched { item_id } => {
                    match self.apply_cost_to_item(item_id, &line, invoice_id) {
                        Ok(()) => line.catalog_item_id = Some(item_id),
                        Err(e) => {
                            warn!(line = %line.name, error = %e, "catalog update failed");
                            needs_review = true;
                            line.notes = Some(format!("catalog update failed: {e}"));
                        }
                    }
                }
                CatalogMatch::Unmatched => {
                    match self.create_item_from_line(&vendor, &line) {
                        Ok(created) => {
                            debug!(line = %line.name, item_id = created.id, "new catalog item");
                            line.catalog_item_id = Some(created.id);
                            candidates.push(created);
                        }
                        Err(e) => {
                            // A duplicate SKU fails this line only.
                            warn!(line = %line.name, error = %e, "catalog creation failed");
                            needs_review = true;
                            line.notes = Some(format!("catalog creation failed: {e}"));
                        }
                    }
                }
            }
            self.invoices.update_line_item(&line)?;
            reconciled.push(line);
        }

        // Cross-check the printed subtotal against what the lines add up
        // to; disagreement beyond a cent goes to review.
        if let Some(subtotal) = invoice.subtotal_ex_gst {
            let line_sum: Decimal = reconciled
                .iter()
                .map(|line| line.quantity * line.unit_cost)
                .sum();
            if (line_sum - subtotal).abs() > TOTALS_TOLERANCE {
                warn!(%line_sum, %subtotal, "line totals disagree with document subtotal");
                needs_review = true;
            }
        }

        self.update_invoice_with(invoice_id, |inv| {
            inv.status = InvoiceStatus::Reconciled;
            if needs_review {
                inv.needs_review = true;
            }
        })?;

        info!(invoice_id, lines = reconciled.len(), "reconciliation complete");
        Ok(reconciled)
    }

    /// Finalize a reconciled invoice: receive stock and freeze status.
    pub fn post_invoice(&self, invoice_id: i64) -> Result<()> {
        let invoice = self.require_invoice(invoice_id)?;
        if invoice.status != InvoiceStatus::Reconciled {
            return Err(StoreError::InvalidStatus {
                id: invoice_id,
                status: invoice.status.to_string(),
                expected: "reconciled".to_string(),
            }
            .into());
        }

        for line in self.invoices.line_items(invoice_id)? {
            let Some(item_id) = line.catalog_item_id else {
                continue;
            };
            let received = line.quantity * line.pack_size;
            self.update_item_with(item_id, |item| {
                item.stock_on_hand += received;
            })?;
        }

        self.update_invoice_with(invoice_id, |inv| {
            inv.status = InvoiceStatus::Posted;
        })?;
        info!(invoice_id, "invoice posted");
        Ok(())
    }

    /// Record a human correction into the vendor's learning profile.
    ///
    /// Learning is best-effort: the returned `Result` may be ignored, and
    /// failures are already logged here.
    pub fn record_correction(
        &self,
        vendor_id: i64,
        field: &str,
        original: &str,
        corrected: &str,
        confidence: Option<f32>,
    ) -> std::result::Result<(), LearningError> {
        let result =
            self.learning
                .record_correction(vendor_id, field, original, corrected, confidence);
        if let Err(e) = &result {
            warn!(vendor_id, error = %e, "learning write failed");
        }
        result
    }

    fn require_invoice(&self, id: i64) -> Result<Invoice> {
        self.invoices
            .find_invoice(id)?
            .ok_or_else(|| StoreError::NotFound { entity: "invoice", id }.into())
    }

    fn require_vendor(&self, id: i64) -> Result<Vendor> {
        self.vendors
            .find_vendor(id)?
            .ok_or_else(|| StoreError::NotFound { entity: "vendor", id }.into())
    }

    fn update_invoice_with<F>(&self, id: i64, mutate: F) -> Result<Invoice>
    where
        F: Fn(&mut Invoice),
    {
        for _ in 0..CAS_ATTEMPTS {
            let mut invoice = self.require_invoice(id)?;
            mutate(&mut invoice);
            match self.invoices.update_invoice(&invoice) {
                Ok(updated) => return Ok(updated),
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::VersionConflict { entity: "invoice", id }.into())
    }

    fn update_item_with<F>(&self, id: i64, mutate: F) -> Result<CatalogItem>
    where
        F: Fn(&mut CatalogItem),
    {
        for _ in 0..CAS_ATTEMPTS {
            let mut item = self
                .catalog
                .find_item(id)?
                .ok_or(CatalogError::NotFound(id))?;
            mutate(&mut item);
            match self.catalog.update_item(&item) {
                Ok(updated) => return Ok(updated),
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(StoreError::VersionConflict { entity: "catalog item", id }.into())
    }

    /// Push an accepted line cost into a matched catalog item. Writes a
    /// price-history snapshot of the superseded values when, and only
    /// when, the cost actually changed.
    fn apply_cost_to_item(
        &self,
        item_id: i64,
        line: &InvoiceLineItem,
        invoice_id: i64,
    ) -> Result<()> {
        let cost = line.effective_unit_cost;
        let gst_rate = self.config.pricing.gst_rate;

        for _ in 0..CAS_ATTEMPTS {
            let item = self
                .catalog
                .find_item(item_id)?
                .ok_or(CatalogError::NotFound(item_id))?;

            let markup = line.markup_override.unwrap_or(item.markup);
            let unchanged = item.cost_ex_gst == cost
                && item.markup == markup
                && item.gst_applicable == line.gst_applicable;
            if unchanged {
                return Ok(());
            }

            let price = compute_sell_price(cost, markup, gst_rate, line.gst_applicable);
            let record_history = item.cost_ex_gst != cost;

            let mut updated = item;
            updated.cost_ex_gst = cost;
            updated.markup = markup;
            updated.sell_ex_gst = price.sell_ex_gst;
            updated.sell_inc_gst = price.sell_inc_gst;
            updated.gst_applicable = line.gst_applicable;

            let result = if record_history {
                self.catalog.update_item_with_history(&updated, Some(invoice_id))
            } else {
                self.catalog.update_item(&updated)
            };
            match result {
                Ok(_) => return Ok(()),
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::VersionConflict {
            entity: "catalog item",
            id: item_id,
        }
        .into())
    }

    /// Create a catalog item for a line that matched nothing.
    fn create_item_from_line(
        &self,
        vendor: &Vendor,
        line: &InvoiceLineItem,
    ) -> Result<CatalogItem> {
        let markup = resolve_markup(
            line.markup_override,
            vendor.default_markup,
            line.category,
            &self.config.pricing,
        );
        let price = compute_sell_price(
            line.effective_unit_cost,
            markup,
            self.config.pricing.gst_rate,
            line.gst_applicable,
        );

        let item = CatalogItem {
            id: 0,
            vendor_id: vendor.id,
            name: line.name.clone(),
            category: line.category,
            subcategory: None,
            cost_ex_gst: line.effective_unit_cost,
            markup,
            sell_ex_gst: price.sell_ex_gst,
            sell_inc_gst: price.sell_inc_gst,
            gst_applicable: line.gst_applicable,
            sku: None,
            stock_on_hand: Decimal::ZERO,
            version: 0,
        };

        match self.catalog.create_item(item) {
            Ok(created) => Ok(created),
            Err(StoreError::DuplicateKey { key, .. }) => {
                Err(CatalogError::DuplicateSku(key).into())
            }
            Err(e) => Err(e.into()),
        }
    }
}
