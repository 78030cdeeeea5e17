use async_trait::async_trait;
use domain::{
    InventoryId, InventoryKey, InventoryRow, Order, OrderId, StockTransaction,
};

use crate::{OrderQuery, Result, Version};

/// Read access to persisted orders and stock, plus a way to open a
/// transaction for writes.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Transaction type produced by [`Store::begin`].
    type Tx: Transaction;

    /// Opens a transactional scope.
    async fn begin(&self) -> Result<Self::Tx>;

    /// Loads an order with its items and addresses.
    async fn find_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Lists orders matching `query`, newest first.
    async fn list_orders(&self, query: &OrderQuery) -> Result<Vec<Order>>;

    /// Non-locking read of an inventory row.
    async fn find_inventory(&self, key: &InventoryKey) -> Result<Option<InventoryRow>>;

    /// Ledger entries for an inventory row, oldest first.
    async fn stock_transactions(&self, inventory_id: InventoryId) -> Result<Vec<StockTransaction>>;
}

/// A unit of work.
///
/// Writes become visible to other readers only on [`Transaction::commit`].
/// Row locks taken through `lock_*` are held until the transaction ends.
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait Transaction: Send {
    /// Locks the inventory row for `key` exclusively and returns it.
    ///
    /// Returns `None` if no row exists. Callers locking several rows must
    /// do so in ascending key order.
    async fn lock_inventory(&mut self, key: &InventoryKey) -> Result<Option<InventoryRow>>;

    /// Like [`Transaction::lock_inventory`], creating an empty row first if needed.
    async fn lock_or_create_inventory(&mut self, key: &InventoryKey) -> Result<InventoryRow>;

    /// Writes quantity and reserved of a row locked in this transaction.
    async fn save_inventory(&mut self, row: &InventoryRow) -> Result<()>;

    /// Appends a ledger entry.
    async fn append_stock_transaction(&mut self, entry: &StockTransaction) -> Result<()>;

    /// Locks the order row exclusively and returns the stored order.
    ///
    /// Returns `None` if the order does not exist. A transaction that locks
    /// an existing order and inventory rows takes the order lock first.
    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Inserts a new order together with its items and addresses.
    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    /// Writes the mutable fields of `order` if the stored row is still at
    /// `expected`.
    ///
    /// Returns the new version (`expected + 1`). Fails with
    /// `VersionConflict` if the row moved on, `NotFound` if it is gone.
    async fn update_order(&mut self, order: &Order, expected: Version) -> Result<Version>;

    /// Makes all writes visible and releases locks.
    async fn commit(self) -> Result<()>;

    /// Discards all writes and releases locks.
    async fn rollback(self) -> Result<()>;
}
