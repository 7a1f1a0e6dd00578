//! Vendor learning profile: corrections in, parsing hints out.
//!
//! Writes are best-effort by contract. The pipeline logs a failed
//! learning write and moves on; nothing here may fail an extraction or
//! reconciliation run. Reading hints never mutates state and never
//! propagates an error.

use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{LearningError, StoreError};
use crate::models::catalog::Category;
use crate::models::config::LearningConfig;
use crate::models::vendor::{
    CategoryMapping, CorrectionField, CorrectionRecord, NameCorrection, PackSizePattern,
    PricePattern, VendorProfile,
};
use crate::store::ProfileStore;

/// Confidence given to a correction when the caller supplies none.
const DEFAULT_CORRECTION_CONFIDENCE: f32 = 0.7;

/// Reinforcement added when the same pattern is corrected again.
const REINFORCEMENT_STEP: f32 = 0.1;

/// Stored hint confidence never exceeds this.
const CONFIDENCE_CEILING: f32 = 0.95;

/// Attempts at winning a profile compare-and-swap before giving up.
const WRITE_ATTEMPTS: usize = 3;

/// Learned values applicable to one raw description, with their stored
/// confidences.
#[derive(Debug, Clone, Default)]
pub struct ParsingHints {
    /// Learned pack size.
    pub pack_size: Option<(Decimal, f32)>,
    /// Learned unit cost.
    pub unit_cost: Option<(Decimal, f32)>,
    /// Learned category.
    pub category: Option<(Category, f32)>,
    /// Learned canonical item name.
    pub name: Option<(String, f32)>,
}

impl ParsingHints {
    /// Derive hints for a raw description from a profile. Pure; the best
    /// (highest-confidence) matching entry per collection wins.
    pub fn derive(profile: &VendorProfile, description: &str) -> Self {
        let haystack = description.to_lowercase();

        let pack_size = profile
            .pack_size_patterns
            .iter()
            .filter(|p| haystack.contains(&p.pattern))
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .map(|p| (p.pack_size, p.confidence));

        let unit_cost = profile
            .price_patterns
            .iter()
            .filter(|p| haystack.contains(&p.pattern))
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .map(|p| (p.unit_cost, p.confidence));

        let category = profile
            .category_mappings
            .iter()
            .filter(|m| haystack.contains(&m.prefix))
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .map(|m| (m.category, m.confidence));

        let name = profile
            .common_items
            .iter()
            .filter(|c| haystack.contains(&c.raw.to_lowercase()))
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .map(|c| (c.corrected.clone(), c.confidence));

        Self {
            pack_size,
            unit_cost,
            category,
            name,
        }
    }
}

/// The correction API over the profile store.
pub struct LearningService {
    store: Arc<dyn ProfileStore>,
    config: LearningConfig,
}

impl LearningService {
    /// Create a service over a profile store.
    pub fn new(store: Arc<dyn ProfileStore>, config: LearningConfig) -> Self {
        Self { store, config }
    }

    /// Record one accepted human correction.
    ///
    /// Routes to exactly one learning collection based on `field` and
    /// appends to the bounded correction log. The returned `Result` is
    /// ignorable by contract; callers that must not fail just log it.
    pub fn record_correction(
        &self,
        vendor_id: i64,
        field: &str,
        original: &str,
        corrected: &str,
        confidence: Option<f32>,
    ) -> Result<(), LearningError> {
        let field = CorrectionField::parse(field)
            .ok_or_else(|| LearningError::UnknownField(field.to_string()))?;
        let confidence = confidence
            .unwrap_or(DEFAULT_CORRECTION_CONFIDENCE)
            .clamp(0.0, CONFIDENCE_CEILING);

        for _ in 0..WRITE_ATTEMPTS {
            // Profiles are created lazily on the first correction.
            let mut profile = match self.store.find_profile(vendor_id) {
                Ok(Some(profile)) => profile,
                Ok(None) => VendorProfile::new(vendor_id),
                Err(e) => {
                    return Err(LearningError::WriteFailed {
                        vendor_id,
                        reason: e.to_string(),
                    });
                }
            };

            apply_correction(&mut profile, field, original, corrected, confidence);

            profile.corrections.push(CorrectionRecord {
                field,
                original: original.to_string(),
                corrected: corrected.to_string(),
                confidence,
                recorded_at: chrono::Utc::now(),
            });
            let cap = self.config.correction_cap;
            if profile.corrections.len() > cap {
                let excess = profile.corrections.len() - cap;
                profile.corrections.drain(..excess);
            }

            match self.store.upsert_profile(&profile) {
                Ok(_) => {
                    debug!(vendor_id, ?field, "correction recorded");
                    return Ok(());
                }
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(e) => {
                    return Err(LearningError::WriteFailed {
                        vendor_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(LearningError::WriteFailed {
            vendor_id,
            reason: "lost profile write race repeatedly".to_string(),
        })
    }

    /// Hints for one raw description. Never fails: any internal error
    /// yields empty hints.
    pub fn get_parsing_hints(&self, vendor_id: i64, description: &str) -> ParsingHints {
        match self.store.find_profile(vendor_id) {
            Ok(Some(profile)) => ParsingHints::derive(&profile, description),
            Ok(None) => ParsingHints::default(),
            Err(e) => {
                warn!(vendor_id, error = %e, "hint lookup failed, returning empty hints");
                ParsingHints::default()
            }
        }
    }

    /// The vendor's profile, if one exists. Never fails.
    pub fn profile(&self, vendor_id: i64) -> Option<VendorProfile> {
        match self.store.find_profile(vendor_id) {
            Ok(profile) => profile,
            Err(e) => {
                warn!(vendor_id, error = %e, "profile lookup failed");
                None
            }
        }
    }
}

fn apply_correction(
    profile: &mut VendorProfile,
    field: CorrectionField,
    original: &str,
    corrected: &str,
    confidence: f32,
) {
    let pattern = original.trim().to_lowercase();

    match field {
        CorrectionField::Quantity => {
            let Ok(pack_size) = Decimal::from_str(corrected.trim()) else {
                warn!(corrected, "quantity correction is not numeric, skipped");
                return;
            };
            if let Some(existing) = profile
                .pack_size_patterns
                .iter_mut()
                .find(|p| p.pattern == pattern)
            {
                existing.pack_size = pack_size;
                existing.confidence = reinforce(existing.confidence);
            } else {
                profile.pack_size_patterns.push(PackSizePattern {
                    pattern,
                    pack_size,
                    confidence,
                });
            }
        }
        CorrectionField::UnitCost => {
            let Ok(unit_cost) = Decimal::from_str(corrected.trim()) else {
                warn!(corrected, "unit cost correction is not numeric, skipped");
                return;
            };
            if let Some(existing) = profile
                .price_patterns
                .iter_mut()
                .find(|p| p.pattern == pattern)
            {
                existing.unit_cost = unit_cost;
                existing.confidence = reinforce(existing.confidence);
            } else {
                profile.price_patterns.push(PricePattern {
                    pattern,
                    unit_cost,
                    confidence,
                });
            }
        }
        CorrectionField::Category => {
            let category = Category::parse(corrected);
            if let Some(existing) = profile
                .category_mappings
                .iter_mut()
                .find(|m| m.prefix == pattern)
            {
                existing.category = category;
                existing.confidence = reinforce(existing.confidence);
            } else {
                profile.category_mappings.push(CategoryMapping {
                    prefix: pattern,
                    category,
                    confidence,
                });
            }
        }
        CorrectionField::ItemDescription => {
            if let Some(existing) = profile
                .common_items
                .iter_mut()
                .find(|c| c.raw.to_lowercase() == pattern)
            {
                existing.corrected = corrected.trim().to_string();
                existing.confidence = reinforce(existing.confidence);
            } else {
                profile.common_items.push(NameCorrection {
                    raw: original.trim().to_string(),
                    corrected: corrected.trim().to_string(),
                    confidence,
                });
            }
        }
    }
}

fn reinforce(confidence: f32) -> f32 {
    (confidence + REINFORCEMENT_STEP).min(CONFIDENCE_CEILING)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use pretty_assertions::assert_eq;

    fn service() -> LearningService {
        LearningService::new(Arc::new(InMemoryStore::new()), LearningConfig::default())
    }

    #[test]
    fn test_each_field_routes_to_one_collection() {
        let service = service();

        service
            .record_correction(1, "quantity", "catering tray", "12", None)
            .unwrap();
        service
            .record_correction(1, "unitCost", "olive oil 4l", "38.50", None)
            .unwrap();
        service
            .record_correction(1, "category", "lamington", "Bakery", None)
            .unwrap();
        service
            .record_correction(1, "itemDescription", "CHSCKE GF", "Cheesecake Gluten Free", None)
            .unwrap();

        let profile = service.profile(1).unwrap();
        assert_eq!(profile.pack_size_patterns.len(), 1);
        assert_eq!(profile.price_patterns.len(), 1);
        assert_eq!(profile.category_mappings.len(), 1);
        assert_eq!(profile.common_items.len(), 1);
        assert_eq!(profile.corrections.len(), 4);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let result = service().record_correction(1, "packSize", "x", "y", None);
        assert!(matches!(result, Err(LearningError::UnknownField(_))));
    }

    #[test]
    fn test_repeat_correction_reinforces_instead_of_duplicating() {
        let service = service();
        service
            .record_correction(1, "quantity", "catering tray", "12", Some(0.5))
            .unwrap();
        service
            .record_correction(1, "quantity", "Catering Tray", "12", Some(0.5))
            .unwrap();

        let profile = service.profile(1).unwrap();
        assert_eq!(profile.pack_size_patterns.len(), 1);
        assert!((profile.pack_size_patterns[0].confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_correction_log_is_bounded() {
        let service = LearningService::new(
            Arc::new(InMemoryStore::new()),
            LearningConfig {
                correction_cap: 100,
                ..Default::default()
            },
        );

        for i in 0..120 {
            service
                .record_correction(1, "itemDescription", &format!("raw {i}"), &format!("fixed {i}"), None)
                .unwrap();
        }

        let profile = service.profile(1).unwrap();
        assert_eq!(profile.corrections.len(), 100);
        // The oldest twenty were evicted; the most recent hundred remain.
        assert_eq!(profile.corrections[0].original, "raw 20");
        assert_eq!(profile.corrections[99].original, "raw 119");
    }

    #[test]
    fn test_hints_never_fail() {
        struct BrokenStore;
        impl ProfileStore for BrokenStore {
            fn find_profile(&self, _: i64) -> Result<Option<VendorProfile>, StoreError> {
                Err(StoreError::Backend("disk on fire".to_string()))
            }
            fn upsert_profile(&self, _: &VendorProfile) -> Result<VendorProfile, StoreError> {
                Err(StoreError::Backend("disk on fire".to_string()))
            }
        }

        let service = LearningService::new(Arc::new(BrokenStore), LearningConfig::default());
        let hints = service.get_parsing_hints(1, "anything");
        assert!(hints.pack_size.is_none());
        assert!(hints.category.is_none());
    }

    #[test]
    fn test_hints_pick_best_confidence_match() {
        let mut profile = VendorProfile::new(1);
        profile.pack_size_patterns.push(PackSizePattern {
            pattern: "tray".to_string(),
            pack_size: Decimal::from(6),
            confidence: 0.5,
        });
        profile.pack_size_patterns.push(PackSizePattern {
            pattern: "catering tray".to_string(),
            pack_size: Decimal::from(12),
            confidence: 0.9,
        });

        let hints = ParsingHints::derive(&profile, "CATERING TRAY LAMINGTONS");
        assert_eq!(hints.pack_size, Some((Decimal::from(12), 0.9)));
    }
}
