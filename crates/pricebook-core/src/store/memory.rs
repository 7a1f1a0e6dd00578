//! In-memory store backing tests and the CLI.
//!
//! One `RwLock` per table. Writes hold exactly one table lock at a time
//! except the catalog+history pair, which holds both to keep the pair
//! atomic against concurrent readers.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use crate::error::StoreError;
use crate::models::catalog::{CatalogItem, PriceHistoryEntry};
use crate::models::invoice::{ExtractedLineItem, Invoice, InvoiceLineItem};
use crate::models::vendor::{Vendor, VendorProfile};

use super::{CatalogStore, InvoiceStore, ProfileStore, VendorStore};

/// Shared in-memory repository implementing every store trait.
#[derive(Default)]
pub struct InMemoryStore {
    next_id: AtomicI64,
    invoices: RwLock<HashMap<i64, Invoice>>,
    line_items: RwLock<Vec<InvoiceLineItem>>,
    catalog: RwLock<HashMap<i64, CatalogItem>>,
    history: RwLock<Vec<PriceHistoryEntry>>,
    vendors: RwLock<HashMap<i64, Vendor>>,
    profiles: RwLock<HashMap<i64, VendorProfile>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn poisoned(_: impl std::fmt::Debug) -> StoreError {
        StoreError::Backend("table lock poisoned".to_string())
    }
}

impl InvoiceStore for InMemoryStore {
    fn create_invoice(&self, vendor_id: i64, document: Vec<u8>) -> Result<Invoice, StoreError> {
        let id = self.allocate_id();
        let invoice = Invoice::new(id, vendor_id, document);
        self.invoices
            .write()
            .map_err(Self::poisoned)?
            .insert(id, invoice.clone());
        Ok(invoice)
    }

    fn find_invoice(&self, id: i64) -> Result<Option<Invoice>, StoreError> {
        Ok(self.invoices.read().map_err(Self::poisoned)?.get(&id).cloned())
    }

    fn update_invoice(&self, invoice: &Invoice) -> Result<Invoice, StoreError> {
        let mut table = self.invoices.write().map_err(Self::poisoned)?;
        let current = table.get_mut(&invoice.id).ok_or(StoreError::NotFound {
            entity: "invoice",
            id: invoice.id,
        })?;
        if current.version != invoice.version {
            return Err(StoreError::VersionConflict {
                entity: "invoice",
                id: invoice.id,
            });
        }
        let mut updated = invoice.clone();
        updated.version += 1;
        *current = updated.clone();
        Ok(updated)
    }

    fn replace_line_items(
        &self,
        invoice_id: i64,
        items: &[ExtractedLineItem],
    ) -> Result<Vec<InvoiceLineItem>, StoreError> {
        let mut table = self.line_items.write().map_err(Self::poisoned)?;
        table.retain(|line| line.invoice_id != invoice_id);
        let mut created = Vec::with_capacity(items.len());
        for item in items {
            let line = InvoiceLineItem::from_extracted(self.allocate_id(), invoice_id, item);
            table.push(line.clone());
            created.push(line);
        }
        Ok(created)
    }

    fn line_items(&self, invoice_id: i64) -> Result<Vec<InvoiceLineItem>, StoreError> {
        Ok(self
            .line_items
            .read()
            .map_err(Self::poisoned)?
            .iter()
            .filter(|line| line.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    fn update_line_item(&self, item: &InvoiceLineItem) -> Result<(), StoreError> {
        let mut table = self.line_items.write().map_err(Self::poisoned)?;
        let slot = table
            .iter_mut()
            .find(|line| line.id == item.id)
            .ok_or(StoreError::NotFound {
                entity: "invoice line",
                id: item.id,
            })?;
        *slot = item.clone();
        Ok(())
    }
}

impl CatalogStore for InMemoryStore {
    fn create_item(&self, mut item: CatalogItem) -> Result<CatalogItem, StoreError> {
        let mut table = self.catalog.write().map_err(Self::poisoned)?;
        if let Some(sku) = &item.sku {
            let taken = table
                .values()
                .any(|existing| existing.sku.as_deref() == Some(sku.as_str()));
            if taken {
                return Err(StoreError::DuplicateKey {
                    entity: "catalog item",
                    key: sku.clone(),
                });
            }
        }
        item.id = self.allocate_id();
        item.version = 0;
        table.insert(item.id, item.clone());
        Ok(item)
    }

    fn find_item(&self, id: i64) -> Result<Option<CatalogItem>, StoreError> {
        Ok(self.catalog.read().map_err(Self::poisoned)?.get(&id).cloned())
    }

    fn items_for_vendor(&self, vendor_id: i64) -> Result<Vec<CatalogItem>, StoreError> {
        let mut items: Vec<CatalogItem> = self
            .catalog
            .read()
            .map_err(Self::poisoned)?
            .values()
            .filter(|item| item.vendor_id == vendor_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.id);
        Ok(items)
    }

    fn find_by_name(&self, vendor_id: i64, name: &str) -> Result<Option<CatalogItem>, StoreError> {
        let needle = name.trim().to_lowercase();
        Ok(self
            .catalog
            .read()
            .map_err(Self::poisoned)?
            .values()
            .filter(|item| item.vendor_id == vendor_id)
            .find(|item| item.name.trim().to_lowercase() == needle)
            .cloned())
    }

    fn update_item(&self, item: &CatalogItem) -> Result<CatalogItem, StoreError> {
        let mut table = self.catalog.write().map_err(Self::poisoned)?;
        apply_item_update(&mut table, item)
    }

    fn update_item_with_history(
        &self,
        item: &CatalogItem,
        invoice_id: Option<i64>,
    ) -> Result<CatalogItem, StoreError> {
        // Both locks held for the pair; writers see item + history move
        // together or not at all.
        let mut table = self.catalog.write().map_err(Self::poisoned)?;
        let mut history = self.history.write().map_err(Self::poisoned)?;

        let previous = table.get(&item.id).ok_or(StoreError::NotFound {
            entity: "catalog item",
            id: item.id,
        })?;
        let entry = PriceHistoryEntry::snapshot(self.allocate_id(), previous, invoice_id);

        let updated = apply_item_update(&mut table, item)?;
        history.push(entry);
        Ok(updated)
    }

    fn price_history(&self, catalog_item_id: i64) -> Result<Vec<PriceHistoryEntry>, StoreError> {
        Ok(self
            .history
            .read()
            .map_err(Self::poisoned)?
            .iter()
            .filter(|entry| entry.catalog_item_id == catalog_item_id)
            .cloned()
            .collect())
    }
}

fn apply_item_update(
    table: &mut HashMap<i64, CatalogItem>,
    item: &CatalogItem,
) -> Result<CatalogItem, StoreError> {
    let current = table.get_mut(&item.id).ok_or(StoreError::NotFound {
        entity: "catalog item",
        id: item.id,
    })?;
    if current.version != item.version {
        return Err(StoreError::VersionConflict {
            entity: "catalog item",
            id: item.id,
        });
    }
    let mut updated = item.clone();
    updated.version += 1;
    *current = updated.clone();
    Ok(updated)
}

impl VendorStore for InMemoryStore {
    fn create_vendor(
        &self,
        name: &str,
        default_markup: Option<Decimal>,
    ) -> Result<Vendor, StoreError> {
        let vendor = Vendor {
            id: self.allocate_id(),
            name: name.to_string(),
            default_markup,
        };
        self.vendors
            .write()
            .map_err(Self::poisoned)?
            .insert(vendor.id, vendor.clone());
        Ok(vendor)
    }

    fn find_vendor(&self, id: i64) -> Result<Option<Vendor>, StoreError> {
        Ok(self.vendors.read().map_err(Self::poisoned)?.get(&id).cloned())
    }
}

impl ProfileStore for InMemoryStore {
    fn find_profile(&self, vendor_id: i64) -> Result<Option<VendorProfile>, StoreError> {
        Ok(self
            .profiles
            .read()
            .map_err(Self::poisoned)?
            .get(&vendor_id)
            .cloned())
    }

    fn upsert_profile(&self, profile: &VendorProfile) -> Result<VendorProfile, StoreError> {
        let mut table = self.profiles.write().map_err(Self::poisoned)?;
        if let Some(current) = table.get(&profile.vendor_id) {
            if current.version != profile.version {
                return Err(StoreError::VersionConflict {
                    entity: "vendor profile",
                    id: profile.vendor_id,
                });
            }
        }
        let mut updated = profile.clone();
        updated.version += 1;
        table.insert(profile.vendor_id, updated.clone());
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::Category;
    use pretty_assertions::assert_eq;

    fn item(vendor_id: i64, name: &str, sku: Option<&str>) -> CatalogItem {
        CatalogItem {
            id: 0,
            vendor_id,
            name: name.to_string(),
            category: Category::Groceries,
            subcategory: None,
            cost_ex_gst: Decimal::new(100, 2),
            markup: Decimal::new(165, 2),
            sell_ex_gst: Decimal::new(165, 2),
            sell_inc_gst: Decimal::new(182, 2),
            gst_applicable: true,
            sku: sku.map(str::to_string),
            stock_on_hand: Decimal::ZERO,
            version: 0,
        }
    }

    #[test]
    fn test_invoice_version_conflict() {
        let store = InMemoryStore::new();
        let created = store.create_invoice(1, vec![]).unwrap();

        let updated = store.update_invoice(&created).unwrap();
        assert_eq!(updated.version, created.version + 1);

        // Writing through the stale copy loses the race.
        let result = store.update_invoice(&created);
        assert!(matches!(
            result,
            Err(StoreError::VersionConflict { entity: "invoice", .. })
        ));
    }

    #[test]
    fn test_duplicate_sku_rejected() {
        let store = InMemoryStore::new();
        store.create_item(item(1, "Olive Oil", Some("SKU-1"))).unwrap();

        let result = store.create_item(item(2, "Canola Oil", Some("SKU-1")));
        assert!(matches!(result, Err(StoreError::DuplicateKey { .. })));
    }

    #[test]
    fn test_find_by_name_is_vendor_scoped_and_case_insensitive() {
        let store = InMemoryStore::new();
        let created = store.create_item(item(1, "Sourdough Loaf", None)).unwrap();
        store.create_item(item(2, "Sourdough Loaf", None)).unwrap();

        let found = store.find_by_name(1, "  SOURDOUGH loaf ").unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(store.find_by_name(3, "Sourdough Loaf").unwrap().is_none());
    }

    #[test]
    fn test_history_pair_snapshots_previous_values() {
        let store = InMemoryStore::new();
        let created = store.create_item(item(1, "Butter 250g", None)).unwrap();

        let mut updated = created.clone();
        updated.cost_ex_gst = Decimal::new(120, 2);
        updated.sell_ex_gst = Decimal::new(198, 2);
        store.update_item_with_history(&updated, Some(5)).unwrap();

        let history = store.price_history(created.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].cost_ex_gst, Decimal::new(100, 2));
        assert_eq!(history[0].sell_ex_gst, Decimal::new(165, 2));
        assert_eq!(history[0].invoice_id, Some(5));
    }

    #[test]
    fn test_replace_line_items_clears_previous_run() {
        let store = InMemoryStore::new();
        let invoice = store.create_invoice(1, vec![]).unwrap();

        let extracted = crate::models::invoice::ExtractedLineItem {
            name: "Milk 2L".to_string(),
            raw_text: "Milk 2L".to_string(),
            quantity: Decimal::ONE,
            pack_size: Decimal::ONE,
            unit_cost: Decimal::TEN,
            effective_unit_cost: Decimal::TEN,
            category: Category::Dairy,
            gst_applicable: false,
            confidence: 0.9,
            provenance: crate::models::invoice::Provenance::Ocr,
        };

        store.replace_line_items(invoice.id, &[extracted.clone()]).unwrap();
        store
            .replace_line_items(invoice.id, &[extracted.clone(), extracted])
            .unwrap();

        assert_eq!(store.line_items(invoice.id).unwrap().len(), 2);
    }
}
