//! Data models for invoices, the product catalog, and vendor learning.

pub mod catalog;
pub mod config;
pub mod invoice;
pub mod vendor;

pub use catalog::{CatalogItem, CatalogMatch, Category, PriceHistoryEntry};
pub use config::PricebookConfig;
pub use invoice::{
    ExtractedLineItem, ExtractionSummary, Invoice, InvoiceLineItem, InvoiceStatus, Provenance,
};
pub use vendor::{
    CategoryMapping, CorrectionField, CorrectionRecord, NameCorrection, PackSizePattern,
    PricePattern, Vendor, VendorProfile,
};
