//! Two-tier recognition chain: vision first, OCR-plus-rules fallback.
//!
//! This is a fallback state machine, not parallel racing. A vision
//! failure of any kind (transport, parse, timeout, empty item list) is a
//! permanent demotion to the OCR tier for this invoice. Terminal failure
//! occurs only when both tiers produce zero line items, and surfaces as
//! [`RecognitionError::Empty`] — a legitimate needs-manual-entry outcome.

pub mod ocr;
pub mod parser;
pub mod vision;

pub use ocr::{HttpOcrClient, OcrClient, OcrPage};
pub use vision::{HttpVisionClient, VisionClient, VisionInvoice, VisionItem, VISION_INSTRUCTIONS};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::RecognitionError;
use crate::models::invoice::Provenance;
use crate::raster::PageFrame;

/// Marker inserted between page texts in the concatenated OCR output.
pub const PAGE_BREAK: &str = "\n--- PAGE BREAK ---\n";

/// Confidence damping for rows only the loose fallback pattern parsed.
const FALLBACK_DAMPING: f32 = 0.85;

/// Confidence assigned to pages read from an embedded text layer instead
/// of OCR.
const TEXT_LAYER_CONFIDENCE: f32 = 0.99;

/// Chain progress. Terminal states are `VisionSucceeded`, `OcrSucceeded`,
/// and `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    NotStarted,
    VisionAttempted,
    VisionSucceeded,
    OcrAttempted,
    OcrSucceeded,
    Failed,
}

/// Document-level header fields recognized alongside the line items.
#[derive(Debug, Clone, Default)]
pub struct DocumentHeader {
    pub invoice_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub subtotal_ex_gst: Option<Decimal>,
    pub gst_total: Option<Decimal>,
    pub total: Option<Decimal>,
}

/// One recognized line item before normalization.
#[derive(Debug, Clone)]
pub struct RawItem {
    /// Description as the recognizer saw it, item codes included.
    pub description: String,
    /// Invoiced quantity, when the recognizer reported one.
    pub quantity: Option<Decimal>,
    /// Pack size, when the recognizer reported one.
    pub pack_size: Option<Decimal>,
    /// Line cost ex-GST, when the recognizer reported one.
    pub unit_cost: Option<Decimal>,
    /// Recognizer's category guess, unvalidated.
    pub category_guess: Option<String>,
    /// `Some(false)` when the source marked the line GST-free.
    pub gst_applicable: Option<bool>,
    /// Tier-specific confidence; see [`Provenance`].
    pub confidence: f32,
    /// Which tier produced this item.
    pub provenance: Provenance,
}

/// Result of a successful chain run.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub header: DocumentHeader,
    pub items: Vec<RawItem>,
    /// Concatenated OCR text with page-break markers. `None` for the
    /// vision tier.
    pub raw_text: Option<String>,
    /// Terminal state the chain reached.
    pub state: ChainState,
}

/// The fallback chain over the two recognizer seams.
pub struct RecognitionChain {
    vision: Option<Arc<dyn VisionClient>>,
    ocr: Arc<dyn OcrClient>,
    vision_timeout: Duration,
    ocr_timeout: Duration,
}

impl RecognitionChain {
    /// Build a chain. Passing `None` for the vision client disables the
    /// vision tier entirely (no credential configured).
    pub fn new(
        vision: Option<Arc<dyn VisionClient>>,
        ocr: Arc<dyn OcrClient>,
        vision_timeout: Duration,
        ocr_timeout: Duration,
    ) -> Self {
        Self {
            vision,
            ocr,
            vision_timeout,
            ocr_timeout,
        }
    }

    /// Run the chain over rasterized page frames.
    pub async fn run(&self, frames: &[PageFrame]) -> Result<Recognition, RecognitionError> {
        let mut state = ChainState::NotStarted;
        debug!(?state, pages = frames.len(), "recognition chain starting");

        if let Some(vision) = &self.vision {
            state = ChainState::VisionAttempted;
            debug!(?state, "submitting pages to vision tier");
            match timeout(
                self.vision_timeout,
                vision.extract(frames, VISION_INSTRUCTIONS),
            )
            .await
            {
                Ok(Ok(invoice)) if !invoice.items.is_empty() => {
                    info!(items = invoice.items.len(), "vision tier succeeded");
                    return Ok(from_vision(invoice));
                }
                Ok(Ok(_)) => {
                    warn!("vision tier returned zero items, demoting to OCR");
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "vision tier failed, demoting to OCR");
                }
                Err(_) => {
                    warn!(
                        timeout_secs = self.vision_timeout.as_secs(),
                        "vision tier timed out, demoting to OCR"
                    );
                }
            }
        } else {
            debug!("vision tier not configured, going straight to OCR");
        }

        state = ChainState::OcrAttempted;
        debug!(?state, "running OCR tier");
        let result = self.run_ocr_tier(frames).await;
        if result.is_err() {
            state = ChainState::Failed;
        }
        debug!(?state, "recognition chain finished");
        result
    }

    async fn run_ocr_tier(&self, frames: &[PageFrame]) -> Result<Recognition, RecognitionError> {
        let mut page_texts = Vec::with_capacity(frames.len());
        let mut confidences = Vec::new();

        for frame in frames {
            // Born-digital pages carry their own text layer; OCR would
            // only degrade it.
            if let Some(text) = &frame.text_layer {
                debug!(page = frame.page, "using embedded text layer");
                page_texts.push(text.clone());
                confidences.push(TEXT_LAYER_CONFIDENCE);
                continue;
            }

            match timeout(self.ocr_timeout, self.ocr.recognize(&frame.data)).await {
                Ok(Ok(page)) => {
                    confidences.push(page.confidence);
                    page_texts.push(page.text);
                }
                Ok(Err(e)) => {
                    warn!(page = frame.page, error = %e, "OCR page failed");
                    page_texts.push(String::new());
                }
                Err(_) => {
                    warn!(page = frame.page, "OCR page timed out");
                    page_texts.push(String::new());
                }
            }
        }

        let combined = page_texts.join(PAGE_BREAK);
        let mean_confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f32>() / confidences.len() as f32
        };

        let parsed = parser::parse_document(&combined);
        if parsed.items.is_empty() {
            return Err(RecognitionError::Empty);
        }

        let items = parsed
            .items
            .iter()
            .map(|row| RawItem {
                description: row.description.clone(),
                quantity: Some(row.quantity),
                pack_size: None,
                unit_cost: Some(row.unit_cost),
                category_guess: None,
                gst_applicable: if row.gst_exempt { Some(false) } else { None },
                confidence: if row.loose {
                    mean_confidence * FALLBACK_DAMPING
                } else {
                    mean_confidence
                },
                provenance: if row.loose {
                    Provenance::OcrFallbackText
                } else {
                    Provenance::Ocr
                },
            })
            .collect();

        info!(
            items = parsed.items.len(),
            mean_confidence, "OCR tier succeeded"
        );
        Ok(Recognition {
            header: DocumentHeader {
                invoice_number: parsed.invoice_number,
                invoice_date: parsed.invoice_date,
                subtotal_ex_gst: parsed.subtotal_ex_gst,
                gst_total: parsed.gst_total,
                total: parsed.total,
            },
            items,
            raw_text: Some(combined),
            state: ChainState::OcrSucceeded,
        })
    }
}

fn from_vision(invoice: VisionInvoice) -> Recognition {
    let items = invoice
        .items
        .iter()
        .map(|item| RawItem {
            description: item.description.clone(),
            quantity: item.quantity,
            pack_size: item.pack_size,
            unit_cost: item.unit_cost,
            category_guess: item.category.clone(),
            gst_applicable: item.gst_applicable,
            // Self-reported confidence, used as-is.
            confidence: item.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            provenance: Provenance::Vision,
        })
        .collect();

    Recognition {
        header: DocumentHeader {
            invoice_number: invoice.invoice_number,
            invoice_date: invoice.invoice_date.as_deref().and_then(parser::parse_date),
            subtotal_ex_gst: invoice.subtotal_ex_gst,
            gst_total: invoice.gst_total,
            total: invoice.total,
        },
        items,
        raw_text: None,
        state: ChainState::VisionSucceeded,
    }
}
