//! Vendor and vendor learning-profile models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::catalog::Category;

/// A supplier the business buys from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    /// Repository identifier.
    pub id: i64,

    /// Display name.
    pub name: String,

    /// Vendor-level default markup, consulted before the global category
    /// table when pricing lines from this vendor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_markup: Option<Decimal>,
}

/// Which extracted field a correction applies to. Field names follow the
/// correction API payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CorrectionField {
    /// Routed to pack-size patterns.
    Quantity,
    /// Routed to price patterns.
    UnitCost,
    /// Routed to category mappings.
    Category,
    /// Routed to common-item name corrections.
    ItemDescription,
}

impl CorrectionField {
    /// Parse an API field name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quantity" => Some(Self::Quantity),
            "unitCost" => Some(Self::UnitCost),
            "category" => Some(Self::Category),
            "itemDescription" => Some(Self::ItemDescription),
            _ => None,
        }
    }
}

/// One accepted human correction, appended to the bounded log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRecord {
    /// The corrected field.
    pub field: CorrectionField,

    /// Value the pipeline produced.
    pub original: String,

    /// Value the operator accepted.
    pub corrected: String,

    /// Confidence assigned to the correction.
    pub confidence: f32,

    /// When the correction was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Learned raw-text fragment that implies a pack size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackSizePattern {
    /// Lowercased fragment matched as a substring of raw descriptions.
    pub pattern: String,

    /// Pack size to apply when the fragment matches.
    pub pack_size: Decimal,

    /// Hint confidence, reinforced by repeat corrections.
    pub confidence: f32,
}

/// Learned raw-text fragment that implies a per-unit cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePattern {
    /// Lowercased fragment matched as a substring of raw descriptions.
    pub pattern: String,

    /// Unit cost to suggest when the fragment matches.
    pub unit_cost: Decimal,

    /// Hint confidence.
    pub confidence: f32,
}

/// Learned text-prefix to category mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryMapping {
    /// Lowercased prefix fragment.
    pub prefix: String,

    /// Category to apply.
    pub category: Category,

    /// Hint confidence.
    pub confidence: f32,
}

/// Learned item-name correction pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameCorrection {
    /// Name as vendors print it.
    pub raw: String,

    /// Name the operator corrected it to.
    pub corrected: String,

    /// Hint confidence.
    pub confidence: f32,
}

/// Per-vendor accumulated corrections, consumed by the normalizer and the
/// catalog matcher on subsequent invoices. Created lazily on the first
/// correction; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorProfile {
    /// Owning vendor.
    pub vendor_id: i64,

    /// Name-correction pairs.
    #[serde(default)]
    pub common_items: Vec<NameCorrection>,

    /// Raw-text to pack-size heuristics.
    #[serde(default)]
    pub pack_size_patterns: Vec<PackSizePattern>,

    /// Raw-text to unit-cost heuristics.
    #[serde(default)]
    pub price_patterns: Vec<PricePattern>,

    /// Text-prefix to category heuristics.
    #[serde(default)]
    pub category_mappings: Vec<CategoryMapping>,

    /// Bounded correction log, most recent last. Oldest entries are
    /// evicted beyond the configured cap.
    #[serde(default)]
    pub corrections: Vec<CorrectionRecord>,

    /// Optimistic-concurrency counter.
    pub version: u64,
}

impl VendorProfile {
    /// Create an empty profile for a vendor.
    pub fn new(vendor_id: i64) -> Self {
        Self {
            vendor_id,
            common_items: Vec::new(),
            pack_size_patterns: Vec::new(),
            price_patterns: Vec::new(),
            category_mappings: Vec::new(),
            corrections: Vec::new(),
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correction_field_parse() {
        assert_eq!(
            CorrectionField::parse("itemDescription"),
            Some(CorrectionField::ItemDescription)
        );
        assert_eq!(
            CorrectionField::parse("unitCost"),
            Some(CorrectionField::UnitCost)
        );
        assert_eq!(CorrectionField::parse("packSize"), None);
    }

    #[test]
    fn test_correction_field_serde_camel_case() {
        assert_eq!(
            serde_json::to_string(&CorrectionField::ItemDescription).unwrap(),
            "\"itemDescription\""
        );
    }
}
