//! Inventory rows and the stock ledger.

use chrono::{DateTime, Utc};
use common::{InventoryId, ProductId, StockTransactionId, WarehouseId};
use serde::{Deserialize, Serialize};

/// Natural key of an inventory row.
///
/// The derived ordering is the order in which rows are locked when a
/// single transaction touches several of them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InventoryKey {
    pub product_id: ProductId,
    pub warehouse: WarehouseId,
}

impl InventoryKey {
    pub fn new(product_id: ProductId, warehouse: impl Into<WarehouseId>) -> Self {
        Self {
            product_id,
            warehouse: warehouse.into(),
        }
    }
}

impl std::fmt::Display for InventoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.product_id, self.warehouse)
    }
}

/// Stock level of one product in one warehouse.
///
/// Invariant: `0 <= reserved <= quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRow {
    pub id: InventoryId,
    pub product_id: ProductId,
    pub warehouse: WarehouseId,
    pub quantity: i64,
    pub reserved: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryRow {
    /// A fresh, empty row for `key`.
    pub fn new(key: &InventoryKey) -> Self {
        let now = Utc::now();
        Self {
            id: InventoryId::new(),
            product_id: key.product_id,
            warehouse: key.warehouse.clone(),
            quantity: 0,
            reserved: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> InventoryKey {
        InventoryKey::new(self.product_id, self.warehouse.clone())
    }

    /// Units that can still be reserved.
    pub fn available(&self) -> i64 {
        (self.quantity - self.reserved).max(0)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Why a ledger entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockReason {
    Reserve,
    Release,
    Adjust,
}

impl StockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockReason::Reserve => "reserve",
            StockReason::Release => "release",
            StockReason::Adjust => "adjust",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reserve" => Some(StockReason::Reserve),
            "release" => Some(StockReason::Release),
            "adjust" => Some(StockReason::Adjust),
            _ => None,
        }
    }
}

impl std::fmt::Display for StockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable ledger entry for one change to an inventory row.
///
/// `change` is negative for reservations, positive for releases, and
/// the signed quantity delta for adjustments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransaction {
    pub id: StockTransactionId,
    pub inventory_id: InventoryId,
    pub change: i64,
    pub reason: StockReason,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StockTransaction {
    pub fn new(
        inventory_id: InventoryId,
        change: i64,
        reason: StockReason,
        reference: Option<String>,
    ) -> Self {
        Self {
            id: StockTransactionId::new(),
            inventory_id,
            change,
            reason,
            reference,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_is_quantity_minus_reserved() {
        let mut row = InventoryRow::new(&InventoryKey::new(ProductId::new(), "WH1"));
        row.quantity = 10;
        row.reserved = 4;
        assert_eq!(row.available(), 6);
    }

    #[test]
    fn available_never_negative() {
        let mut row = InventoryRow::new(&InventoryKey::new(ProductId::new(), "WH1"));
        row.reserved = 3;
        assert_eq!(row.available(), 0);
    }

    #[test]
    fn keys_order_by_product_then_warehouse() {
        let product = ProductId::new();
        let a = InventoryKey::new(product, "WH1");
        let b = InventoryKey::new(product, "WH2");
        assert!(a < b);
    }

    #[test]
    fn reason_round_trips() {
        for reason in [StockReason::Reserve, StockReason::Release, StockReason::Adjust] {
            assert_eq!(StockReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(StockReason::parse("restock"), None);
    }
}
