//! Catalog item, price history, and category models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Closed set of business categories. Anything a recognizer guesses that
/// does not map here falls back to [`Category::Groceries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Bakery,
    Dairy,
    Produce,
    Meat,
    Seafood,
    Frozen,
    Beverages,
    Groceries,
    Cleaning,
    Packaging,
}

impl Default for Category {
    fn default() -> Self {
        Self::Groceries
    }
}

impl Category {
    /// Parse a recognizer's category guess. Unknown or empty guesses map
    /// to the generic fallback.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "bakery" | "baked goods" | "bread" => Category::Bakery,
            "dairy" | "milk" | "cheese" => Category::Dairy,
            "produce" | "fruit" | "vegetables" | "fruit & veg" => Category::Produce,
            "meat" | "butcher" | "poultry" => Category::Meat,
            "seafood" | "fish" => Category::Seafood,
            "frozen" | "freezer" => Category::Frozen,
            "beverages" | "drinks" | "beverage" => Category::Beverages,
            "cleaning" | "chemicals" | "hygiene" => Category::Cleaning,
            "packaging" | "disposables" => Category::Packaging,
            _ => Category::Groceries,
        }
    }

    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            Category::Bakery => "Bakery",
            Category::Dairy => "Dairy",
            Category::Produce => "Produce",
            Category::Meat => "Meat",
            Category::Seafood => "Seafood",
            Category::Frozen => "Frozen",
            Category::Beverages => "Beverages",
            Category::Groceries => "Groceries",
            Category::Cleaning => "Cleaning",
            Category::Packaging => "Packaging",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A sellable product.
///
/// Pricing invariant: `sell_ex_gst = cost_ex_gst * markup`, and
/// `sell_inc_gst = sell_ex_gst * (1 + gst_rate)` when GST applies, else
/// `sell_inc_gst = sell_ex_gst`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Repository identifier.
    pub id: i64,

    /// Owning vendor. Items from different vendors never merge
    /// automatically, even under identical names.
    pub vendor_id: i64,

    /// Product name.
    pub name: String,

    /// Business category.
    pub category: Category,

    /// Optional finer-grained grouping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,

    /// Current per-unit cost ex-GST.
    pub cost_ex_gst: Decimal,

    /// Current markup multiplier (1.65 = cost x 1.65).
    pub markup: Decimal,

    /// Derived sell price ex-GST.
    pub sell_ex_gst: Decimal,

    /// Derived sell price inc-GST.
    pub sell_inc_gst: Decimal,

    /// Whether GST applies when selling this item.
    pub gst_applicable: bool,

    /// SKU or barcode; unique across the catalog when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,

    /// Units currently on hand.
    pub stock_on_hand: Decimal,

    /// Optimistic-concurrency counter.
    pub version: u64,
}

/// Immutable snapshot of a catalog item's pricing fields, written whenever
/// `cost_ex_gst` changes. Records what was superseded, not what is current.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistoryEntry {
    /// Repository identifier.
    pub id: i64,

    /// The item whose pricing changed.
    pub catalog_item_id: i64,

    /// Invoice that triggered the change, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<i64>,

    /// Superseded cost ex-GST.
    pub cost_ex_gst: Decimal,

    /// Superseded markup.
    pub markup: Decimal,

    /// Superseded sell price ex-GST.
    pub sell_ex_gst: Decimal,

    /// Superseded sell price inc-GST.
    pub sell_inc_gst: Decimal,

    /// When the supersession happened.
    pub recorded_at: DateTime<Utc>,
}

impl PriceHistoryEntry {
    /// Snapshot an item's current pricing fields before they are updated.
    pub fn snapshot(id: i64, item: &CatalogItem, invoice_id: Option<i64>) -> Self {
        Self {
            id,
            catalog_item_id: item.id,
            invoice_id,
            cost_ex_gst: item.cost_ex_gst,
            markup: item.markup,
            sell_ex_gst: item.sell_ex_gst,
            sell_inc_gst: item.sell_inc_gst,
            recorded_at: Utc::now(),
        }
    }
}

/// Result of resolving one extracted line item against the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogMatch {
    /// Resolved to an existing catalog item.
    Matched { item_id: i64 },
    /// Describes a new catalog item.
    Unmatched,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_known() {
        assert_eq!(Category::parse("Dairy"), Category::Dairy);
        assert_eq!(Category::parse("fruit & veg"), Category::Produce);
        assert_eq!(Category::parse("DRINKS"), Category::Beverages);
    }

    #[test]
    fn test_category_parse_fallback() {
        assert_eq!(Category::parse(""), Category::Groceries);
        assert_eq!(Category::parse("widgets"), Category::Groceries);
    }

    #[test]
    fn test_history_snapshot_copies_current_fields() {
        let item = CatalogItem {
            id: 4,
            vendor_id: 1,
            name: "Sourdough Loaf".to_string(),
            category: Category::Bakery,
            subcategory: None,
            cost_ex_gst: Decimal::new(350, 2),
            markup: Decimal::new(165, 2),
            sell_ex_gst: Decimal::new(578, 2),
            sell_inc_gst: Decimal::new(636, 2),
            gst_applicable: true,
            sku: None,
            stock_on_hand: Decimal::ZERO,
            version: 3,
        };

        let entry = PriceHistoryEntry::snapshot(1, &item, Some(9));
        assert_eq!(entry.catalog_item_id, 4);
        assert_eq!(entry.invoice_id, Some(9));
        assert_eq!(entry.cost_ex_gst, Decimal::new(350, 2));
        assert_eq!(entry.sell_inc_gst, Decimal::new(636, 2));
    }
}
