use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    InventoryId, InventoryKey, InventoryRow, Order, OrderId, StockTransaction,
};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    OrderQuery, Result, StoreError, Version,
    concurrency::compare_and_swap,
    store::{Store, Transaction},
};

/// Identity of a lockable row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Inventory(InventoryKey),
    Order(OrderId),
}

#[derive(Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    inventory: HashMap<InventoryKey, InventoryRow>,
    ledger: Vec<StockTransaction>,
}

#[derive(Default)]
struct Shared {
    tables: RwLock<Tables>,
    row_locks: Mutex<HashMap<RowKey, Arc<Mutex<()>>>>,
}

/// In-memory store for tests and embedding.
///
/// Mirrors the PostgreSQL semantics that matter to callers: per-row
/// exclusive locks held until the transaction ends, writes invisible
/// until commit, and version-guarded order updates.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of committed orders.
    pub async fn order_count(&self) -> usize {
        self.shared.tables.read().await.orders.len()
    }

    /// Returns the total number of committed ledger entries.
    pub async fn ledger_len(&self) -> usize {
        self.shared.tables.read().await.ledger.len()
    }

    /// Returns the number of row locks currently tracked.
    pub async fn row_lock_count(&self) -> usize {
        self.shared.row_locks.lock().await.len()
    }

    /// Clears all tables.
    pub async fn clear(&self) {
        let mut tables = self.shared.tables.write().await;
        tables.orders.clear();
        tables.inventory.clear();
        tables.ledger.clear();
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(InMemoryTransaction {
            shared: Arc::clone(&self.shared),
            held: HashMap::new(),
            inventory: HashMap::new(),
            ledger: Vec::new(),
            orders: HashMap::new(),
        })
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.shared.tables.read().await.orders.get(&id).cloned())
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<Vec<Order>> {
        let tables = self.shared.tables.read().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|order| query.matches(order))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at().cmp(&a.created_at()));

        Ok(orders
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn find_inventory(&self, key: &InventoryKey) -> Result<Option<InventoryRow>> {
        Ok(self.shared.tables.read().await.inventory.get(key).cloned())
    }

    async fn stock_transactions(&self, inventory_id: InventoryId) -> Result<Vec<StockTransaction>> {
        Ok(self
            .shared
            .tables
            .read()
            .await
            .ledger
            .iter()
            .filter(|entry| entry.inventory_id == inventory_id)
            .cloned()
            .collect())
    }
}

/// Transaction over an [`InMemoryStore`].
///
/// Writes are buffered and applied in one step on commit.
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    inventory: HashMap<InventoryKey, InventoryRow>,
    ledger: Vec<StockTransaction>,
    orders: HashMap<OrderId, Order>,
}

impl InMemoryTransaction {
    /// Blocks until this transaction holds the row lock for `key`.
    async fn acquire(&mut self, key: RowKey) {
        if self.held.contains_key(&key) {
            return;
        }
        let lock = {
            let mut row_locks = self.shared.row_locks.lock().await;
            Arc::clone(row_locks.entry(key.clone()).or_default())
        };
        let guard = lock.lock_owned().await;
        self.held.insert(key, guard);
    }

    /// Drops every row lock held and forgets locks nobody else is waiting on.
    async fn release_locks(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let released: Vec<RowKey> = self.held.drain().map(|(key, _guard)| key).collect();
        let mut row_locks = self.shared.row_locks.lock().await;
        for key in released {
            if row_locks
                .get(&key)
                .is_some_and(|lock| Arc::strong_count(lock) == 1)
            {
                row_locks.remove(&key);
            }
        }
    }

    async fn current_inventory(&self, key: &InventoryKey) -> Option<InventoryRow> {
        if let Some(row) = self.inventory.get(key) {
            return Some(row.clone());
        }
        self.shared.tables.read().await.inventory.get(key).cloned()
    }

    async fn current_order(&self, id: OrderId) -> Option<Order> {
        if let Some(order) = self.orders.get(&id) {
            return Some(order.clone());
        }
        self.shared.tables.read().await.orders.get(&id).cloned()
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn lock_inventory(&mut self, key: &InventoryKey) -> Result<Option<InventoryRow>> {
        self.acquire(RowKey::Inventory(key.clone())).await;
        Ok(self.current_inventory(key).await)
    }

    async fn lock_or_create_inventory(&mut self, key: &InventoryKey) -> Result<InventoryRow> {
        if let Some(row) = self.lock_inventory(key).await? {
            return Ok(row);
        }
        let row = InventoryRow::new(key);
        self.inventory.insert(key.clone(), row.clone());
        Ok(row)
    }

    async fn save_inventory(&mut self, row: &InventoryRow) -> Result<()> {
        let key = row.key();
        self.acquire(RowKey::Inventory(key.clone())).await;
        self.inventory.insert(key, row.clone());
        Ok(())
    }

    async fn append_stock_transaction(&mut self, entry: &StockTransaction) -> Result<()> {
        self.ledger.push(entry.clone());
        Ok(())
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        self.acquire(RowKey::Order(id)).await;
        Ok(self.current_order(id).await)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        self.acquire(RowKey::Order(order.id())).await;
        if self.current_order(order.id()).await.is_some() {
            return Err(StoreError::AlreadyExists {
                entity: "order",
                id: order.id().to_string(),
            });
        }
        self.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn update_order(&mut self, order: &Order, expected: Version) -> Result<Version> {
        self.acquire(RowKey::Order(order.id())).await;
        let stored = self
            .current_order(order.id())
            .await
            .ok_or_else(|| StoreError::NotFound {
                entity: "order",
                id: order.id().to_string(),
            })?;

        let next = compare_and_swap(&stored, expected)?;
        let mut updated = order.clone();
        updated.set_version(next);
        self.orders.insert(order.id(), updated);
        Ok(next)
    }

    async fn commit(mut self) -> Result<()> {
        let mut tables = self.shared.tables.write().await;
        tables.inventory.extend(self.inventory.drain());
        tables.ledger.append(&mut self.ledger);
        tables.orders.extend(self.orders.drain());
        drop(tables);
        self.release_locks().await;
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        self.release_locks().await;
        Ok(())
    }
}
