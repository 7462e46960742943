//! Canonical data models.
//!
//! Raw store, channel, and AI payloads are decoded into these types at the
//! client boundaries; the mapper and the sync engine only ever see them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A product as read from the store, after normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalProduct {
    /// Store identifier, kept as a string to avoid precision loss.
    pub id: String,
    pub title: String,
    /// Rich text (HTML) body; may be empty.
    pub description: String,
    /// URL slug on the store.
    pub handle: String,
    pub vendor: String,
    pub product_type: String,
    /// Ordered as the store returns them.
    pub tags: Vec<String>,
    pub images: Vec<String>,
    pub variants: Vec<CanonicalVariant>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalVariant {
    pub id: String,
    /// Empty when the merchant never assigned one; such variants are not
    /// inventory-synced.
    pub sku: String,
    pub title: String,
    /// Decimal string exactly as the store returns it, e.g. `"29.99"`.
    pub price: String,
    pub inventory_quantity: u32,
    /// Handle used to look up stock levels; `None` when inventory is untracked.
    pub inventory_item_id: Option<String>,
    pub barcode: String,
    pub weight: f64,
    pub weight_unit: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub sku: String,
    pub title: String,
    pub quantity: u32,
    pub price: String,
    pub variant_id: Option<String>,
}

/// An order from either side of the sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalOrder {
    pub id: String,
    pub order_number: String,
    pub email: String,
    pub financial_status: String,
    pub fulfillment_status: String,
    pub line_items: Vec<OrderLineItem>,
    pub total_price: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Stock level for one inventory item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryLevel {
    pub inventory_item_id: String,
    pub sku: Option<String>,
    pub location_id: Option<String>,
    pub available: u32,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelVariant {
    pub sku: String,
    pub title: String,
    pub price: String,
    pub inventory_quantity: u32,
    pub barcode: String,
}

impl From<&CanonicalVariant> for ChannelVariant {
    fn from(v: &CanonicalVariant) -> Self {
        Self {
            sku: v.sku.clone(),
            title: v.title.clone(),
            price: v.price.clone(),
            inventory_quantity: v.inventory_quantity,
            barcode: v.barcode.clone(),
        }
    }
}

/// A product rewritten for the channel audience, ready to push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelProduct {
    pub title: String,
    pub description: String,
    pub hashtags: Vec<String>,
    pub images: Vec<String>,
    pub variants: Vec<ChannelVariant>,
    /// Store product this listing was produced from.
    pub source_id: String,
    pub source_handle: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryUpdate {
    pub sku: String,
    pub quantity: u32,
}

/// Outcome of one sync operation.
///
/// Per-item failures are counted, never raised. `error` is set when a
/// systemic failure (e.g. an upstream auth error) ended the run early.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success_count: usize,
    pub failed_count: usize,
    pub total_count: usize,
    pub ids: Vec<String>,
    pub error: Option<String>,
}

impl SyncResult {
    pub fn with_total(total_count: usize) -> Self {
        Self {
            total_count,
            ..Self::default()
        }
    }

    /// Mark the whole run as failed because of a systemic error.
    pub fn fail_all(&mut self, error: impl fmt::Display) {
        self.success_count = 0;
        self.failed_count = self.total_count;
        self.ids.clear();
        self.error = Some(error.to_string());
    }

    pub fn is_clean(&self) -> bool {
        self.failed_count == 0 && self.error.is_none()
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} success, {} failed, {} total",
            self.success_count, self.failed_count, self.total_count
        )?;
        if let Some(ref e) = self.error {
            write!(f, " (error: {})", e)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_all_marks_every_item_failed() {
        let mut result = SyncResult::with_total(4);
        result.success_count = 2;
        result.ids.push("a".into());
        result.fail_all("store unreachable");

        assert_eq!(result.success_count, 0);
        assert_eq!(result.failed_count, 4);
        assert!(result.ids.is_empty());
        assert!(!result.is_clean());
        assert_eq!(
            result.to_string(),
            "0 success, 4 failed, 4 total (error: store unreachable)"
        );
    }

    #[test]
    fn test_channel_variant_from_canonical() {
        let v = CanonicalVariant {
            id: "1".into(),
            sku: "SKU-1".into(),
            title: "Red".into(),
            price: "9.90".into(),
            inventory_quantity: 3,
            inventory_item_id: Some("77".into()),
            barcode: "0042".into(),
            weight: 0.5,
            weight_unit: "kg".into(),
        };
        let cv = ChannelVariant::from(&v);
        assert_eq!(cv.sku, "SKU-1");
        assert_eq!(cv.price, "9.90");
        assert_eq!(cv.inventory_quantity, 3);
        assert_eq!(cv.barcode, "0042");
    }
}
