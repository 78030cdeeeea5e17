//! The reservation engine.

use std::sync::Arc;

use domain::{InventoryKey, InventoryRow, StockReason, StockTransaction};
use order_store::{Store, Transaction};
use tracing::{debug, error, info, warn};

use crate::error::{InventoryError, Result};

/// Owns the `0 <= reserved <= quantity` invariant of every inventory row.
///
/// Each operation locks its row exclusively for the read-check-write. The
/// `*_in` variants run inside a caller's transaction, so the lock is held
/// until that transaction commits or rolls back.
pub struct ReservationEngine<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Clone for ReservationEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> ReservationEngine<S> {
    /// Creates an engine over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Reserves `quantity` units in a transaction of its own.
    pub async fn reserve(
        &self,
        key: &InventoryKey,
        quantity: u32,
        reference: Option<&str>,
    ) -> Result<InventoryRow> {
        let mut tx = self.store.begin().await?;
        let result = self.reserve_in(&mut tx, key, quantity, reference).await;
        finish(tx, result).await
    }

    /// Reserves `quantity` units inside `tx`.
    ///
    /// A missing row counts as zero available stock.
    #[tracing::instrument(
        skip_all,
        fields(product_id = %key.product_id, warehouse = %key.warehouse, quantity = quantity)
    )]
    pub async fn reserve_in(
        &self,
        tx: &mut S::Tx,
        key: &InventoryKey,
        quantity: u32,
        reference: Option<&str>,
    ) -> Result<InventoryRow> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity(0));
        }
        let requested = i64::from(quantity);

        let row = tx.lock_inventory(key).await?;
        let available = row.as_ref().map(InventoryRow::available).unwrap_or(0);
        let Some(mut row) = row.filter(|_| available >= requested) else {
            metrics::counter!("inventory_reservation_rejections_total").increment(1);
            debug!(available, "Insufficient stock");
            return Err(InventoryError::InsufficientStock {
                key: key.clone(),
                requested: quantity,
                available,
            });
        };

        row.reserved += requested;
        row.touch();
        tx.save_inventory(&row).await?;
        tx.append_stock_transaction(&StockTransaction::new(
            row.id,
            -requested,
            StockReason::Reserve,
            reference.map(str::to_string),
        ))
        .await?;

        metrics::counter!("inventory_reservations_total").increment(1);
        debug!(reserved = row.reserved, available = row.available(), "Stock reserved");
        Ok(row)
    }

    /// Releases `quantity` reserved units in a transaction of its own.
    pub async fn release(
        &self,
        key: &InventoryKey,
        quantity: u32,
        reference: Option<&str>,
    ) -> Result<InventoryRow> {
        let mut tx = self.store.begin().await?;
        let result = self.release_in(&mut tx, key, quantity, reference).await;
        finish(tx, result).await
    }

    /// Releases `quantity` reserved units inside `tx`.
    #[tracing::instrument(
        skip_all,
        fields(product_id = %key.product_id, warehouse = %key.warehouse, quantity = quantity)
    )]
    pub async fn release_in(
        &self,
        tx: &mut S::Tx,
        key: &InventoryKey,
        quantity: u32,
        reference: Option<&str>,
    ) -> Result<InventoryRow> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity(0));
        }
        let requested = i64::from(quantity);

        let row = tx.lock_inventory(key).await?;
        let reserved = row.as_ref().map(|row| row.reserved).unwrap_or(0);
        let Some(mut row) = row.filter(|_| reserved >= requested) else {
            error!(reserved, "Release exceeds reserved quantity");
            return Err(InventoryError::ReleaseExceedsReserved {
                key: key.clone(),
                requested: quantity,
                reserved,
            });
        };

        row.reserved -= requested;
        row.touch();
        tx.save_inventory(&row).await?;
        tx.append_stock_transaction(&StockTransaction::new(
            row.id,
            requested,
            StockReason::Release,
            reference.map(str::to_string),
        ))
        .await?;

        metrics::counter!("inventory_releases_total").increment(1);
        debug!(reserved = row.reserved, available = row.available(), "Stock released");
        Ok(row)
    }

    /// Non-locking read of available units. Missing rows report zero.
    ///
    /// The answer may be stale by the time the caller acts on it.
    pub async fn get_available(&self, key: &InventoryKey) -> Result<i64> {
        Ok(self
            .store
            .find_inventory(key)
            .await?
            .map(|row| row.available())
            .unwrap_or(0))
    }

    /// Adds `quantity` units, creating the row on first use.
    pub async fn stock(
        &self,
        key: &InventoryKey,
        quantity: u32,
        reference: Option<&str>,
    ) -> Result<InventoryRow> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity(0));
        }
        self.adjust(key, i64::from(quantity), reference).await
    }

    /// Changes the on-hand quantity by a signed `delta`.
    #[tracing::instrument(
        skip(self, reference),
        fields(product_id = %key.product_id, warehouse = %key.warehouse)
    )]
    pub async fn adjust(
        &self,
        key: &InventoryKey,
        delta: i64,
        reference: Option<&str>,
    ) -> Result<InventoryRow> {
        if delta == 0 {
            return Err(InventoryError::InvalidQuantity(0));
        }

        let mut tx = self.store.begin().await?;
        let result = self.adjust_in(&mut tx, key, delta, reference).await;
        let row = finish(tx, result).await?;

        metrics::counter!("inventory_adjustments_total").increment(1);
        info!(quantity = row.quantity, reserved = row.reserved, "Stock adjusted");
        Ok(row)
    }

    async fn adjust_in(
        &self,
        tx: &mut S::Tx,
        key: &InventoryKey,
        delta: i64,
        reference: Option<&str>,
    ) -> Result<InventoryRow> {
        let mut row = tx.lock_or_create_inventory(key).await?;
        let quantity = row.quantity + delta;
        if quantity < row.reserved {
            return Err(InventoryError::AdjustmentBelowReserved {
                key: key.clone(),
                delta,
                quantity,
                reserved: row.reserved,
            });
        }

        row.quantity = quantity;
        row.touch();
        tx.save_inventory(&row).await?;
        tx.append_stock_transaction(&StockTransaction::new(
            row.id,
            delta,
            StockReason::Adjust,
            reference.map(str::to_string),
        ))
        .await?;
        Ok(row)
    }

    /// Ledger entries for a row, oldest first. Empty if never stocked.
    pub async fn ledger(&self, key: &InventoryKey) -> Result<Vec<StockTransaction>> {
        match self.store.find_inventory(key).await? {
            Some(row) => Ok(self.store.stock_transactions(row.id).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Checks a row against its ledger.
    ///
    /// `quantity` must equal the sum of `adjust` changes and `reserved` the
    /// negated sum of `reserve`/`release` changes.
    #[tracing::instrument(
        skip(self),
        fields(product_id = %key.product_id, warehouse = %key.warehouse)
    )]
    pub async fn reconcile(&self, key: &InventoryKey) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let result = self.reconcile_in(&mut tx, key).await;
        finish(tx, result).await
    }

    async fn reconcile_in(&self, tx: &mut S::Tx, key: &InventoryKey) -> Result<()> {
        let Some(row) = tx.lock_inventory(key).await? else {
            return Ok(());
        };
        let entries = self.store.stock_transactions(row.id).await?;

        let (ledger_quantity, ledger_reserved) =
            entries
                .iter()
                .fold((0i64, 0i64), |(quantity, reserved), entry| match entry.reason {
                    StockReason::Adjust => (quantity + entry.change, reserved),
                    StockReason::Reserve | StockReason::Release => {
                        (quantity, reserved - entry.change)
                    }
                });

        if ledger_quantity != row.quantity || ledger_reserved != row.reserved {
            error!(
                quantity = row.quantity,
                ledger_quantity,
                reserved = row.reserved,
                ledger_reserved,
                "Inventory does not match its ledger"
            );
            return Err(InventoryError::LedgerMismatch {
                key: key.clone(),
                quantity: row.quantity,
                ledger_quantity,
                reserved: row.reserved,
                ledger_reserved,
            });
        }
        Ok(())
    }
}

/// Commits on success, rolls back on failure.
async fn finish<T, Tx: Transaction>(tx: Tx, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_error) = tx.rollback().await {
                warn!(error = %rollback_error, "Rollback failed");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use domain::ProductId;
    use order_store::InMemoryStore;

    use super::*;

    fn setup() -> (ReservationEngine<InMemoryStore>, InventoryKey) {
        let engine = ReservationEngine::new(Arc::new(InMemoryStore::new()));
        (engine, InventoryKey::new(ProductId::new(), "WH1"))
    }

    #[tokio::test]
    async fn test_reserve_reduces_available() {
        let (engine, key) = setup();
        engine.stock(&key, 10, None).await.unwrap();

        let row = engine.reserve(&key, 3, Some("order-1")).await.unwrap();
        assert_eq!(row.reserved, 3);
        assert_eq!(engine.get_available(&key).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_insufficient_stock_writes_nothing() {
        let (engine, key) = setup();
        engine.stock(&key, 2, None).await.unwrap();

        let err = engine.reserve(&key, 3, None).await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InsufficientStock {
                requested: 3,
                available: 2,
                ..
            }
        ));
        assert_eq!(engine.get_available(&key).await.unwrap(), 2);
        assert_eq!(engine.ledger(&key).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unstocked_product_has_no_availability() {
        let (engine, key) = setup();

        assert_eq!(engine.get_available(&key).await.unwrap(), 0);
        assert!(matches!(
            engine.reserve(&key, 1, None).await,
            Err(InventoryError::InsufficientStock { available: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_release_restores_available() {
        let (engine, key) = setup();
        engine.stock(&key, 5, None).await.unwrap();
        engine.reserve(&key, 4, None).await.unwrap();

        let row = engine.release(&key, 4, None).await.unwrap();
        assert_eq!(row.reserved, 0);
        assert_eq!(engine.get_available(&key).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_release_exceeding_reserved_fails() {
        let (engine, key) = setup();
        engine.stock(&key, 5, None).await.unwrap();
        engine.reserve(&key, 1, None).await.unwrap();

        let err = engine.release(&key, 2, None).await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::ReleaseExceedsReserved {
                requested: 2,
                reserved: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_zero_quantity_rejected() {
        let (engine, key) = setup();

        assert!(matches!(
            engine.reserve(&key, 0, None).await,
            Err(InventoryError::InvalidQuantity(0))
        ));
        assert!(matches!(
            engine.adjust(&key, 0, None).await,
            Err(InventoryError::InvalidQuantity(0))
        ));
    }

    #[tokio::test]
    async fn test_adjust_cannot_drop_below_reserved() {
        let (engine, key) = setup();
        engine.stock(&key, 5, None).await.unwrap();
        engine.reserve(&key, 4, None).await.unwrap();

        let err = engine.adjust(&key, -2, Some("shrinkage")).await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::AdjustmentBelowReserved {
                quantity: 3,
                reserved: 4,
                ..
            }
        ));

        let row = engine.adjust(&key, -1, Some("shrinkage")).await.unwrap();
        assert_eq!(row.quantity, 4);
        assert_eq!(row.available(), 0);
    }

    #[tokio::test]
    async fn test_ledger_records_every_change() {
        let (engine, key) = setup();
        engine.stock(&key, 10, Some("po-1")).await.unwrap();
        engine.reserve(&key, 3, Some("order-1")).await.unwrap();
        engine.release(&key, 1, Some("order-1")).await.unwrap();

        let ledger = engine.ledger(&key).await.unwrap();
        let changes: Vec<(i64, StockReason)> =
            ledger.iter().map(|e| (e.change, e.reason)).collect();
        assert_eq!(
            changes,
            vec![
                (10, StockReason::Adjust),
                (-3, StockReason::Reserve),
                (1, StockReason::Release),
            ]
        );
        assert_eq!(ledger[1].reference.as_deref(), Some("order-1"));

        engine.reconcile(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_reconcile_detects_tampering() {
        let (engine, key) = setup();
        engine.stock(&key, 10, None).await.unwrap();

        // Write the row without a matching ledger entry.
        let store = engine.store();
        let mut tx = store.begin().await.unwrap();
        let mut row = tx.lock_inventory(&key).await.unwrap().unwrap();
        row.reserved = 2;
        tx.save_inventory(&row).await.unwrap();
        tx.commit().await.unwrap();

        let err = engine.reconcile(&key).await.unwrap_err();
        assert!(matches!(
            err,
            InventoryError::LedgerMismatch {
                reserved: 2,
                ledger_reserved: 0,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_reserve_in_is_undone_by_rollback() {
        let (engine, key) = setup();
        engine.stock(&key, 5, None).await.unwrap();

        let mut tx = engine.store().begin().await.unwrap();
        engine.reserve_in(&mut tx, &key, 5, None).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(engine.get_available(&key).await.unwrap(), 5);
        assert_eq!(engine.ledger(&key).await.unwrap().len(), 1);
    }
}
