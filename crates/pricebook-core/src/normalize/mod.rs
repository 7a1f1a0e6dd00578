//! Extraction normalizer: tier-specific output into canonical line items.
//!
//! Every rule here applies regardless of which tier produced the item.

use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use tracing::debug;

use crate::learning::ParsingHints;
use crate::models::catalog::Category;
use crate::models::invoice::{ExtractedLineItem, Provenance};
use crate::models::vendor::VendorProfile;
use crate::recognize::RawItem;

lazy_static! {
    // "3 boxes of 10", "2 cases of 24"
    static ref BOXES_OF: Regex = Regex::new(
        r"(?i)\b(\d{1,4})\s*(?:boxes|box|cartons|ctns?|cases|case)\s+of\s+(\d{1,4})\b"
    ).unwrap();

    // "2 x 5kg", "4 × 750ml"
    static ref QTY_X_SIZE: Regex = Regex::new(
        r"(?i)\b(\d{1,4})\s*[x×]\s*(\d{1,4}(?:\.\d{1,2})?)\s*(?:kg|g|l|lt|ltr|ml|pk|pack|ea|un|pcs?)?\b"
    ).unwrap();

    // "6 pack", "12pk"
    static ref N_PACK: Regex = Regex::new(
        r"(?i)\b(\d{1,4})\s*(?:pack|pk)\b"
    ).unwrap();
}

/// A leading token counts as an item code when it mixes digits with
/// letters or dashes (BOK-CCGF-001, SKU1234) or is a bare numeric code of
/// three or more digits. Short bare numbers stay; they are quantities.
fn is_code_token(token: &str) -> bool {
    if !token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return false;
    }
    let has_digit = token.chars().any(|c| c.is_ascii_digit());
    let has_alpha = token.chars().any(|c| c.is_ascii_alphabetic());
    let has_dash = token.contains('-');

    has_digit && (has_alpha || has_dash || token.len() >= 3)
}

/// Quantity and pack size read from a raw description.
///
/// `"2 x 5kg"` gives quantity 2, pack 5; `"6 pack"` gives quantity 6,
/// pack 1; `"3 boxes of 10"` gives quantity 3, pack 10.
pub fn parse_quantity_pack(description: &str) -> (Option<Decimal>, Option<Decimal>) {
    if let Some(caps) = BOXES_OF.captures(description) {
        let qty = caps[1].parse::<Decimal>().ok();
        let pack = caps[2].parse::<Decimal>().ok();
        return (qty, pack);
    }

    if let Some(caps) = QTY_X_SIZE.captures(description) {
        let qty = caps[1].parse::<Decimal>().ok();
        let pack = caps[2].parse::<Decimal>().ok();
        return (qty, pack);
    }

    if let Some(caps) = N_PACK.captures(description) {
        let qty = caps[1].parse::<Decimal>().ok();
        return (qty, Some(Decimal::ONE));
    }

    (None, None)
}

/// Strip leading item codes before the first descriptive word.
///
/// `"BOK-CCGF-001 Cheesecake"` becomes `"Cheesecake"`.
pub fn strip_item_code(name: &str) -> String {
    let mut rest = name.trim();
    loop {
        let Some(token) = rest.split_whitespace().next() else {
            break;
        };
        // Never strip the whole name away.
        if token.len() == rest.len() {
            break;
        }
        if is_code_token(token) {
            rest = rest[token.len()..].trim_start();
        } else {
            break;
        }
    }
    if rest.is_empty() {
        name.trim().to_string()
    } else {
        rest.to_string()
    }
}

/// Maps recognizer output into canonical [`ExtractedLineItem`]s,
/// consulting the vendor's learned hints.
pub struct Normalizer {
    /// Minimum stored hint confidence before a learned value overrides
    /// the recognizer's guess.
    hint_threshold: f32,
}

impl Normalizer {
    /// Create a normalizer with the given hint-confidence threshold.
    pub fn new(hint_threshold: f32) -> Self {
        Self { hint_threshold }
    }

    /// Normalize one recognition run's items.
    pub fn normalize(
        &self,
        items: &[RawItem],
        profile: Option<&VendorProfile>,
    ) -> Vec<ExtractedLineItem> {
        items
            .iter()
            .map(|item| self.normalize_item(item, profile))
            .collect()
    }

    fn normalize_item(
        &self,
        raw: &RawItem,
        profile: Option<&VendorProfile>,
    ) -> ExtractedLineItem {
        let hints = profile
            .map(|p| ParsingHints::derive(p, &raw.description))
            .unwrap_or_default();

        let (desc_qty, desc_pack) = parse_quantity_pack(&raw.description);

        let quantity = raw
            .quantity
            .or(desc_qty)
            .filter(|q| *q > Decimal::ZERO)
            .unwrap_or(Decimal::ONE);

        let mut pack_size = raw
            .pack_size
            .or(desc_pack)
            .filter(|p| *p > Decimal::ZERO)
            .unwrap_or(Decimal::ONE);

        // Learned pack size wins over the recognizer's guess once its
        // confidence clears the threshold.
        if let Some((learned, confidence)) = hints.pack_size {
            if confidence >= self.hint_threshold {
                debug!(
                    description = %raw.description,
                    %learned,
                    "applying learned pack size"
                );
                pack_size = learned;
            }
        }

        let unit_cost = raw
            .unit_cost
            .or_else(|| {
                hints
                    .unit_cost
                    .filter(|(_, c)| *c >= self.hint_threshold)
                    .map(|(v, _)| v)
            })
            .unwrap_or(Decimal::ZERO);

        let effective_unit_cost = if pack_size > Decimal::ONE {
            unit_cost / pack_size
        } else {
            unit_cost
        };

        let mut category = raw
            .category_guess
            .as_deref()
            .map(Category::parse)
            .unwrap_or_default();
        if let Some((learned, confidence)) = hints.category {
            if confidence >= self.hint_threshold {
                category = learned;
            }
        }

        ExtractedLineItem {
            name: strip_item_code(&raw.description),
            raw_text: raw.description.clone(),
            quantity,
            pack_size,
            unit_cost,
            effective_unit_cost,
            category,
            gst_applicable: raw.gst_applicable.unwrap_or(true),
            confidence: raw.confidence,
            provenance: raw.provenance,
        }
    }
}
