//! Error types for the pricebook-core library.

use thiserror::Error;

/// Main error type for the pricebook library.
#[derive(Error, Debug)]
pub enum PricebookError {
    /// Document rasterization error.
    #[error("raster error: {0}")]
    Raster(#[from] RasterError),

    /// Recognition chain error.
    #[error("recognition error: {0}")]
    Recognition(#[from] RecognitionError),

    /// Catalog reconciliation error.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Repository error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Image processing error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors related to converting an uploaded document into page images.
#[derive(Error, Debug)]
pub enum RasterError {
    /// The input is neither a recognizable image nor a parseable PDF.
    /// Fatal for the upload; never retried.
    #[error("unsupported document format")]
    UnsupportedFormat,

    /// Failed to parse the PDF structure.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// The PDF is encrypted and could not be opened.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF has no pages")]
    NoPages,

    /// Failed to decode or re-encode a page frame.
    #[error("failed to render page {page}: {reason}")]
    PageRender { page: u32, reason: String },
}

/// Errors from the two-tier recognition chain.
#[derive(Error, Debug)]
pub enum RecognitionError {
    /// Both tiers produced zero line items. This is a legitimate
    /// processing outcome that requires manual entry, not a system fault.
    #[error("no line items extracted from document")]
    Empty,

    /// Network, HTTP, or timeout failure on an external recognizer call.
    /// Causes fallthrough to the next tier; terminal only when no tier
    /// remains.
    #[error("recognizer transport failure ({tier}): {reason}")]
    Transport { tier: &'static str, reason: String },

    /// The recognizer responded but its payload could not be decoded.
    #[error("malformed recognizer response ({tier}): {reason}")]
    Malformed { tier: &'static str, reason: String },
}

/// Errors from catalog writes during reconciliation.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// SKU or barcode already exists on another catalog item. Fails the
    /// single line's catalog creation, not the whole invoice.
    #[error("duplicate SKU/barcode: {0}")]
    DuplicateSku(String),

    /// Referenced catalog item no longer exists.
    #[error("catalog item {0} not found")]
    NotFound(i64),
}

/// Errors from the repository boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Entity not found by id.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Optimistic concurrency check failed; the caller should re-read
    /// and retry.
    #[error("version conflict on {entity} {id}")]
    VersionConflict { entity: &'static str, id: i64 },

    /// Unique-key violation on a write.
    #[error("duplicate {entity} key: {key}")]
    DuplicateKey { entity: &'static str, key: String },

    /// Operation is invalid for the entity's current lifecycle state.
    #[error("invoice {id} is {status}, expected {expected}")]
    InvalidStatus {
        id: i64,
        status: String,
        expected: String,
    },

    /// Backend failure surfaced by a store implementation.
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Errors from vendor-profile learning writes. Always recovered locally:
/// callers log these and continue, never propagate.
#[derive(Error, Debug)]
pub enum LearningError {
    /// The profile store rejected the write.
    #[error("profile write failed for vendor {vendor_id}: {reason}")]
    WriteFailed { vendor_id: i64, reason: String },

    /// The correction payload did not name a learnable field.
    #[error("unknown correction field: {0}")]
    UnknownField(String),
}

/// Result type for the pricebook library.
pub type Result<T> = std::result::Result<T, PricebookError>;
