//! Repository boundary.
//!
//! The pipeline only ever talks to these traits; it must not assume a
//! storage engine. Implementations guarantee: per-call atomicity,
//! optimistic concurrency via entity `version` counters (updates with a
//! stale version fail with [`StoreError::VersionConflict`]), and an atomic
//! catalog-update + price-history-write pair.

mod memory;

pub use memory::InMemoryStore;

use rust_decimal::Decimal;

use crate::error::StoreError;
use crate::models::catalog::{CatalogItem, PriceHistoryEntry};
use crate::models::invoice::{ExtractedLineItem, Invoice, InvoiceLineItem};
use crate::models::vendor::{Vendor, VendorProfile};

/// Invoice and invoice-line persistence.
pub trait InvoiceStore: Send + Sync {
    /// Create a freshly ingested invoice and assign its id.
    fn create_invoice(&self, vendor_id: i64, document: Vec<u8>) -> Result<Invoice, StoreError>;

    /// Find an invoice by id.
    fn find_invoice(&self, id: i64) -> Result<Option<Invoice>, StoreError>;

    /// Update an invoice. Compare-and-swap on `version`; the stored copy
    /// with the bumped version is returned.
    fn update_invoice(&self, invoice: &Invoice) -> Result<Invoice, StoreError>;

    /// Replace the persisted line items of an invoice with a fresh
    /// extraction run's output.
    fn replace_line_items(
        &self,
        invoice_id: i64,
        items: &[ExtractedLineItem],
    ) -> Result<Vec<InvoiceLineItem>, StoreError>;

    /// Persisted line items of an invoice, in insertion order.
    fn line_items(&self, invoice_id: i64) -> Result<Vec<InvoiceLineItem>, StoreError>;

    /// Update a single persisted line item.
    fn update_line_item(&self, item: &InvoiceLineItem) -> Result<(), StoreError>;
}

/// Catalog persistence, including the price-history pair.
pub trait CatalogStore: Send + Sync {
    /// Create a catalog item and assign its id. Fails with
    /// [`StoreError::DuplicateKey`] when the SKU is already taken.
    fn create_item(&self, item: CatalogItem) -> Result<CatalogItem, StoreError>;

    /// Find a catalog item by id.
    fn find_item(&self, id: i64) -> Result<Option<CatalogItem>, StoreError>;

    /// All catalog items belonging to a vendor.
    fn items_for_vendor(&self, vendor_id: i64) -> Result<Vec<CatalogItem>, StoreError>;

    /// Exact case-insensitive name lookup, scoped to a vendor.
    fn find_by_name(&self, vendor_id: i64, name: &str) -> Result<Option<CatalogItem>, StoreError>;

    /// Update a catalog item. Compare-and-swap on `version`.
    fn update_item(&self, item: &CatalogItem) -> Result<CatalogItem, StoreError>;

    /// Update a catalog item and, in the same transaction, write a
    /// price-history entry snapshotting the values being superseded.
    fn update_item_with_history(
        &self,
        item: &CatalogItem,
        invoice_id: Option<i64>,
    ) -> Result<CatalogItem, StoreError>;

    /// Price history for an item, oldest first.
    fn price_history(&self, catalog_item_id: i64) -> Result<Vec<PriceHistoryEntry>, StoreError>;
}

/// Vendor persistence.
pub trait VendorStore: Send + Sync {
    /// Create a vendor and assign its id.
    fn create_vendor(
        &self,
        name: &str,
        default_markup: Option<Decimal>,
    ) -> Result<Vendor, StoreError>;

    /// Find a vendor by id.
    fn find_vendor(&self, id: i64) -> Result<Option<Vendor>, StoreError>;
}

/// Vendor learning-profile persistence.
pub trait ProfileStore: Send + Sync {
    /// Find a vendor's profile.
    fn find_profile(&self, vendor_id: i64) -> Result<Option<VendorProfile>, StoreError>;

    /// Insert or update a profile. Compare-and-swap on `version` for
    /// existing profiles.
    fn upsert_profile(&self, profile: &VendorProfile) -> Result<VendorProfile, StoreError>;
}
