use std::collections::BTreeMap;

use async_trait::async_trait;
use domain::{
    AddressDetails, AddressId, AddressKind, CustomerId, InventoryId, InventoryKey, InventoryRow,
    Money, Order, OrderAddress, OrderId, OrderItem, OrderItemId, OrderRecord, OrderStatus,
    ProductId, StockReason, StockTransaction, StockTransactionId, WarehouseId,
};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Postgres, Row, postgres::PgPoolOptions, postgres::PgRow};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    OrderQuery, Result, StoreError, Version,
    concurrency::check_rows_affected,
    store::{Store, Transaction},
};

const ORDER_COLUMNS: &str = "id, customer_id, status, currency, warehouse, subtotal, tax, \
     shipping, metadata, version, created_at, updated_at";

const INVENTORY_COLUMNS: &str =
    "id, product_id, warehouse, quantity, reserved, created_at, updated_at";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

async fn load_children(
    conn: &mut PgConnection,
    order_id: Uuid,
) -> Result<(Vec<OrderItem>, Vec<OrderAddress>)> {
    let items = sqlx::query(
        r#"
        SELECT id, order_id, product_id, sku, name, unit_price, quantity, line_total
        FROM order_items
        WHERE order_id = $1
        ORDER BY line_no ASC
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(row_to_item)
    .collect::<Result<Vec<_>>>()?;

    let addresses = sqlx::query(
        r#"
        SELECT id, order_id, kind, first_name, last_name, company, address_line1,
               address_line2, city, state, postal_code, country, phone
        FROM order_addresses
        WHERE order_id = $1
        ORDER BY kind ASC
        "#,
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(row_to_address)
    .collect::<Result<Vec<_>>>()?;

    Ok((items, addresses))
}

/// Builds an order from its `orders` row, loading children on `conn`.
async fn hydrate(conn: &mut PgConnection, row: PgRow) -> Result<Order> {
    let id: Uuid = row.try_get("id")?;
    let (items, addresses) = load_children(conn, id).await?;
    row_to_order(row, items, addresses)
}

fn row_to_order(row: PgRow, items: Vec<OrderItem>, addresses: Vec<OrderAddress>) -> Result<Order> {
    let status: String = row.try_get("status")?;
    let status = status.parse::<OrderStatus>().map_err(|e| {
        warn!(error = %e, "Order row has an unreadable status");
        StoreError::Corrupt(e.to_string())
    })?;
    let metadata: serde_json::Value = row.try_get("metadata")?;
    let metadata: BTreeMap<String, String> = serde_json::from_value(metadata)?;

    Ok(Order::from(OrderRecord {
        id: OrderId::from_uuid(row.try_get("id")?),
        customer_id: row
            .try_get::<Option<Uuid>, _>("customer_id")?
            .map(CustomerId::from_uuid),
        status,
        currency: row.try_get("currency")?,
        warehouse: WarehouseId::new(row.try_get::<String, _>("warehouse")?),
        subtotal: Money::new(row.try_get::<Decimal, _>("subtotal")?),
        tax: Money::new(row.try_get::<Decimal, _>("tax")?),
        shipping: Money::new(row.try_get::<Decimal, _>("shipping")?),
        version: Version::new(row.try_get("version")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        metadata,
        items,
        addresses,
    }))
}

fn row_to_item(row: PgRow) -> Result<OrderItem> {
    let quantity: i64 = row.try_get("quantity")?;
    let quantity = u32::try_from(quantity)
        .map_err(|_| StoreError::Corrupt(format!("order item quantity {quantity}")))?;

    Ok(OrderItem {
        id: OrderItemId::from_uuid(row.try_get("id")?),
        order_id: OrderId::from_uuid(row.try_get("order_id")?),
        product_id: row
            .try_get::<Option<Uuid>, _>("product_id")?
            .map(ProductId::from_uuid),
        sku: row.try_get("sku")?,
        name: row.try_get("name")?,
        unit_price: Money::new(row.try_get::<Decimal, _>("unit_price")?),
        quantity,
        line_total: Money::new(row.try_get::<Decimal, _>("line_total")?),
    })
}

fn row_to_address(row: PgRow) -> Result<OrderAddress> {
    let kind: String = row.try_get("kind")?;
    let kind = AddressKind::parse(&kind)
        .ok_or_else(|| StoreError::Corrupt(format!("address kind {kind:?}")))?;

    Ok(OrderAddress {
        id: AddressId::from_uuid(row.try_get("id")?),
        order_id: OrderId::from_uuid(row.try_get("order_id")?),
        details: AddressDetails {
            kind,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            company: row.try_get("company")?,
            address_line1: row.try_get("address_line1")?,
            address_line2: row.try_get("address_line2")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            postal_code: row.try_get("postal_code")?,
            country: row.try_get("country")?,
            phone: row.try_get("phone")?,
        },
    })
}

fn row_to_inventory(row: PgRow) -> Result<InventoryRow> {
    Ok(InventoryRow {
        id: InventoryId::from_uuid(row.try_get("id")?),
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        warehouse: WarehouseId::new(row.try_get::<String, _>("warehouse")?),
        quantity: row.try_get("quantity")?,
        reserved: row.try_get("reserved")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_stock_transaction(row: PgRow) -> Result<StockTransaction> {
    let reason: String = row.try_get("reason")?;
    let reason = StockReason::parse(&reason)
        .ok_or_else(|| StoreError::Corrupt(format!("stock reason {reason:?}")))?;

    Ok(StockTransaction {
        id: StockTransactionId::from_uuid(row.try_get("id")?),
        inventory_id: InventoryId::from_uuid(row.try_get("inventory_id")?),
        change: row.try_get("change")?,
        reason,
        reference: row.try_get("reference")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(PostgresTransaction {
            tx: self.pool.begin().await?,
        })
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => Ok(Some(hydrate(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<Vec<Order>> {
        let mut sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE 1=1");
        let mut param_count = 0;

        if query.customer_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND customer_id = ${param_count}"));
        }
        if query.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at DESC, id ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(customer_id) = query.customer_id {
            sqlx_query = sqlx_query.bind(customer_id.as_uuid());
        }
        if let Some(status) = query.status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let mut conn = self.pool.acquire().await?;
        let rows = sqlx_query.fetch_all(&mut *conn).await?;
        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            orders.push(hydrate(&mut conn, row).await?);
        }
        Ok(orders)
    }

    async fn find_inventory(&self, key: &InventoryKey) -> Result<Option<InventoryRow>> {
        sqlx::query(&format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory WHERE product_id = $1 AND warehouse = $2"
        ))
        .bind(key.product_id.as_uuid())
        .bind(key.warehouse.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(row_to_inventory)
        .transpose()
    }

    async fn stock_transactions(&self, inventory_id: InventoryId) -> Result<Vec<StockTransaction>> {
        sqlx::query(
            r#"
            SELECT id, inventory_id, change, reason, reference, created_at
            FROM stock_transactions
            WHERE inventory_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(inventory_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(row_to_stock_transaction)
        .collect()
    }
}

/// Transaction over a [`PostgresStore`].
///
/// Inventory locks are `SELECT ... FOR UPDATE` row locks; they last until
/// commit or rollback.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn lock_inventory(&mut self, key: &InventoryKey) -> Result<Option<InventoryRow>> {
        sqlx::query(&format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory \
             WHERE product_id = $1 AND warehouse = $2 FOR UPDATE"
        ))
        .bind(key.product_id.as_uuid())
        .bind(key.warehouse.as_str())
        .fetch_optional(&mut *self.tx)
        .await?
        .map(row_to_inventory)
        .transpose()
    }

    async fn lock_or_create_inventory(&mut self, key: &InventoryKey) -> Result<InventoryRow> {
        let fresh = InventoryRow::new(key);
        sqlx::query(
            r#"
            INSERT INTO inventory (id, product_id, warehouse, quantity, reserved, created_at, updated_at)
            VALUES ($1, $2, $3, 0, 0, $4, $4)
            ON CONFLICT (product_id, warehouse) DO NOTHING
            "#,
        )
        .bind(fresh.id.as_uuid())
        .bind(key.product_id.as_uuid())
        .bind(key.warehouse.as_str())
        .bind(fresh.created_at)
        .execute(&mut *self.tx)
        .await?;

        match self.lock_inventory(key).await? {
            Some(row) => Ok(row),
            None => {
                warn!(%key, "Inventory row vanished between insert and lock");
                Err(StoreError::Corrupt(format!("inventory row {key} vanished")))
            }
        }
    }

    async fn save_inventory(&mut self, row: &InventoryRow) -> Result<()> {
        let result = sqlx::query(
            "UPDATE inventory SET quantity = $1, reserved = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(row.quantity)
        .bind(row.reserved)
        .bind(row.updated_at)
        .bind(row.id.as_uuid())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "inventory",
                id: row.id.to_string(),
            });
        }
        Ok(())
    }

    async fn append_stock_transaction(&mut self, entry: &StockTransaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_transactions (id, inventory_id, change, reason, reference, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.inventory_id.as_uuid())
        .bind(entry.change)
        .bind(entry.reason.as_str())
        .bind(entry.reference.as_deref())
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn lock_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => Ok(Some(hydrate(&mut self.tx, row).await?)),
            None => Ok(None),
        }
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        let metadata = serde_json::to_value(order.metadata())?;

        sqlx::query(
            r#"
            INSERT INTO orders (id, customer_id, status, currency, warehouse, subtotal, tax,
                                shipping, total, metadata, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.customer_id().map(|id| id.as_uuid()))
        .bind(order.status().as_str())
        .bind(order.currency())
        .bind(order.warehouse().as_str())
        .bind(order.subtotal().amount())
        .bind(order.tax().amount())
        .bind(order.shipping().amount())
        .bind(order.total().amount())
        .bind(metadata)
        .bind(order.version().as_i64())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::AlreadyExists {
                    entity: "order",
                    id: order.id().to_string(),
                };
            }
            StoreError::Database(e)
        })?;

        for (line_no, item) in order.items().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (id, order_id, line_no, product_id, sku, name,
                                         unit_price, quantity, line_total)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(item.id.as_uuid())
            .bind(item.order_id.as_uuid())
            .bind(line_no as i32)
            .bind(item.product_id.map(|id| id.as_uuid()))
            .bind(item.sku.as_deref())
            .bind(item.name.as_deref())
            .bind(item.unit_price.amount())
            .bind(i64::from(item.quantity))
            .bind(item.line_total.amount())
            .execute(&mut *self.tx)
            .await?;
        }

        for address in order.addresses() {
            let details = &address.details;
            sqlx::query(
                r#"
                INSERT INTO order_addresses (id, order_id, kind, first_name, last_name, company,
                                             address_line1, address_line2, city, state,
                                             postal_code, country, phone)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(address.id.as_uuid())
            .bind(address.order_id.as_uuid())
            .bind(details.kind.as_str())
            .bind(&details.first_name)
            .bind(&details.last_name)
            .bind(details.company.as_deref())
            .bind(&details.address_line1)
            .bind(details.address_line2.as_deref())
            .bind(&details.city)
            .bind(&details.state)
            .bind(&details.postal_code)
            .bind(&details.country)
            .bind(details.phone.as_deref())
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn update_order(&mut self, order: &Order, expected: Version) -> Result<Version> {
        let metadata = serde_json::to_value(order.metadata())?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1, metadata = $2, tax = $3, shipping = $4, total = $5,
                updated_at = $6, version = version + 1
            WHERE id = $7 AND version = $8
            "#,
        )
        .bind(order.status().as_str())
        .bind(metadata)
        .bind(order.tax().amount())
        .bind(order.shipping().amount())
        .bind(order.total().amount())
        .bind(order.updated_at())
        .bind(order.id().as_uuid())
        .bind(expected.as_i64())
        .execute(&mut *self.tx)
        .await?;

        let mut exists = true;
        if result.rows_affected() == 0 {
            exists = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
                .bind(order.id().as_uuid())
                .fetch_one(&mut *self.tx)
                .await?;
            debug!(order_id = %order.id(), %expected, exists, "Guarded order update matched no row");
        }

        check_rows_affected(result.rows_affected(), "order", order.id(), expected, exists)
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
