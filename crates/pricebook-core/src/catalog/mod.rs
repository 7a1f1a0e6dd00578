//! Catalog matching: resolve extracted line items to existing products.
//!
//! Matching is vendor-scoped by design. Callers pass only the invoice
//! vendor's catalog items as candidates; identical product names from
//! different vendors must never collapse into one catalog row unless an
//! operator merges them explicitly.

use tracing::debug;

use crate::models::catalog::{CatalogItem, CatalogMatch};
use crate::models::vendor::VendorProfile;

/// Words carrying no matching signal.
const STOP_WORDS: &[&str] = &[
    "the", "and", "with", "for", "per", "each", "pack", "box", "ctn", "carton", "case", "pkt",
    "new",
];

/// Resolves extracted line items against a vendor's catalog.
pub struct CatalogMatcher {
    min_shared_words: usize,
}

impl CatalogMatcher {
    /// Create a matcher requiring at least `min_shared_words` significant
    /// words for a fuzzy match.
    pub fn new(min_shared_words: usize) -> Self {
        Self { min_shared_words }
    }

    /// Resolve one line item by name. `candidates` must already be scoped
    /// to the invoice's vendor.
    pub fn match_item(
        &self,
        name: &str,
        candidates: &[CatalogItem],
        profile: Option<&VendorProfile>,
    ) -> CatalogMatch {
        let name = name.trim();

        // 1. Exact case-insensitive name match.
        if let Some(hit) = candidates
            .iter()
            .find(|c| c.name.trim().eq_ignore_ascii_case(name))
        {
            return CatalogMatch::Matched { item_id: hit.id };
        }

        let words = significant_words(name);
        if words.is_empty() {
            return CatalogMatch::Unmatched;
        }

        // 2. Word overlap against the vendor's catalog names directly;
        // operators abbreviate on invoices, the catalog keeps full names.
        if let Some(hit) = self.best_overlap(&words, candidates) {
            return CatalogMatch::Matched { item_id: hit.id };
        }

        // 3. Word overlap through the vendor's historical name
        // corrections, then the corrected name back into the catalog.
        if let Some(profile) = profile {
            for correction in &profile.common_items {
                let raw_words = significant_words(&correction.raw);
                if overlap(&words, &raw_words) < self.min_shared_words {
                    continue;
                }

                let corrected = correction.corrected.trim();
                if let Some(hit) = candidates
                    .iter()
                    .find(|c| c.name.trim().eq_ignore_ascii_case(corrected))
                {
                    debug!(
                        raw = %correction.raw,
                        corrected = %correction.corrected,
                        "matched via learned name correction"
                    );
                    return CatalogMatch::Matched { item_id: hit.id };
                }

                let corrected_words = significant_words(corrected);
                if let Some(hit) = self.best_overlap(&corrected_words, candidates) {
                    return CatalogMatch::Matched { item_id: hit.id };
                }
            }
        }

        CatalogMatch::Unmatched
    }

    fn best_overlap<'a>(
        &self,
        words: &[String],
        candidates: &'a [CatalogItem],
    ) -> Option<&'a CatalogItem> {
        candidates
            .iter()
            .map(|c| (overlap(words, &significant_words(&c.name)), c))
            .filter(|(shared, _)| *shared >= self.min_shared_words)
            .max_by_key(|(shared, _)| *shared)
            .map(|(_, c)| c)
    }
}

/// Lowercased, alphanumeric-folded words of three or more characters,
/// stop-list removed.
fn significant_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() >= 3 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

fn overlap(a: &[String], b: &[String]) -> usize {
    a.iter().filter(|w| b.contains(w)).count()
}
