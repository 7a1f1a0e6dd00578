//! Core library for vendor invoice ingestion.
//!
//! This crate provides:
//! - Document rasterization (PDF and raster-image uploads into page frames)
//! - A two-tier recognition chain (vision extraction with OCR fallback)
//! - Line-item normalization, catalog matching, and sell pricing
//! - Per-vendor learning profiles fed by human corrections

pub mod error;
pub mod models;
pub mod raster;
pub mod recognize;
pub mod normalize;
pub mod catalog;
pub mod pricing;
pub mod learning;
pub mod store;
pub mod pipeline;

pub use error::{PricebookError, RecognitionError, Result};
pub use models::{
    CatalogItem, CatalogMatch, Category, ExtractedLineItem, ExtractionSummary, Invoice,
    InvoiceLineItem, InvoiceStatus, PricebookConfig, PriceHistoryEntry, Provenance, Vendor,
    VendorProfile,
};
pub use catalog::CatalogMatcher;
pub use learning::{LearningService, ParsingHints};
pub use normalize::Normalizer;
pub use pipeline::{InvoicePipeline, Stores};
pub use pricing::{compute_sell_price, resolve_markup, PricePoint};
pub use raster::{PageFrame, Rasterizer};
pub use recognize::{
    HttpOcrClient, HttpVisionClient, OcrClient, RecognitionChain, VisionClient,
};
pub use store::{CatalogStore, InMemoryStore, InvoiceStore, ProfileStore, VendorStore};
