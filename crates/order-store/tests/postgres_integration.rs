//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p order-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use domain::{
    CreateOrderRequest, CustomerId, InventoryKey, Money, NewOrderItem, Order, OrderStatus,
    ProductId, StockReason, StockTransaction,
};
use order_store::{OrderQuery, PostgresStore, Store, StoreError, Transaction, Version};
use serial_test::serial;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            // Create a temporary store just for migrations
            let migrator = PostgresStore::connect(&connection_string, 1).await.unwrap();
            migrator.run_migrations().await.unwrap();
            migrator.pool().close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;
    let store = PostgresStore::connect(&info.connection_string, 5)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE stock_transactions, inventory, order_addresses, order_items, orders",
    )
    .execute(store.pool())
    .await
    .unwrap();

    store
}

fn draft_order(customer: Option<CustomerId>) -> Order {
    let mut request = CreateOrderRequest::new("WH1")
        .with_item(
            NewOrderItem::for_product(ProductId::new(), Money::from_cents(1000), 2)
                .named("Widget"),
        )
        .with_item(NewOrderItem::for_sku("GIFT-WRAP", Money::from_cents(3500), 1))
        .with_metadata("channel", "web");
    if let Some(customer) = customer {
        request = request.for_customer(customer);
    }
    let mut order = Order::draft(&request, "USD").unwrap();
    order.apply_pricing(Money::from_cents(440), Money::from_cents(999));
    order
}

async fn insert(store: &PostgresStore, order: &Order) {
    let mut tx = store.begin().await.unwrap();
    tx.insert_order(order).await.unwrap();
    tx.commit().await.unwrap();
}

mod orders {
    use super::*;

    #[tokio::test]
    #[serial]
    async fn insert_and_load_order() {
        let store = get_test_store().await;
        let order = draft_order(Some(CustomerId::new()));
        insert(&store, &order).await;

        let loaded = store.find_order(order.id()).await.unwrap().unwrap();
        assert_eq!(loaded.id(), order.id());
        assert_eq!(loaded.status(), OrderStatus::Created);
        assert_eq!(loaded.version(), Version::first());
        assert_eq!(loaded.subtotal(), Money::from_cents(5500));
        assert_eq!(loaded.total(), Money::from_cents(6939));
        assert_eq!(loaded.currency(), "USD");
        assert_eq!(loaded.items(), order.items());
        assert_eq!(loaded.metadata(), order.metadata());
    }

    #[tokio::test]
    #[serial]
    async fn missing_order_is_none() {
        let store = get_test_store().await;
        let order = draft_order(None);
        assert!(store.find_order(order.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    #[serial]
    async fn duplicate_insert_rejected() {
        let store = get_test_store().await;
        let order = draft_order(None);
        insert(&store, &order).await;

        let mut tx = store.begin().await.unwrap();
        let err = tx.insert_order(&order).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    #[serial]
    async fn guarded_update_bumps_version() {
        let store = get_test_store().await;
        let mut order = draft_order(None);
        insert(&store, &order).await;

        order.transition_to(OrderStatus::Pending).unwrap();
        let mut tx = store.begin().await.unwrap();
        let next = tx.update_order(&order, Version::first()).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(next, Version::new(2));
        let loaded = store.find_order(order.id()).await.unwrap().unwrap();
        assert_eq!(loaded.status(), OrderStatus::Pending);
        assert_eq!(loaded.version(), Version::new(2));
    }

    #[tokio::test]
    #[serial]
    async fn stale_update_conflicts_and_changes_nothing() {
        let store = get_test_store().await;
        let mut order = draft_order(None);
        insert(&store, &order).await;

        order.transition_to(OrderStatus::Pending).unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.update_order(&order, Version::first()).await.unwrap();
        tx.commit().await.unwrap();

        order.transition_to(OrderStatus::Cancelled).unwrap();
        let mut tx = store.begin().await.unwrap();
        let err = tx.update_order(&order, Version::first()).await.unwrap_err();
        tx.rollback().await.unwrap();

        assert!(err.is_version_conflict());
        let loaded = store.find_order(order.id()).await.unwrap().unwrap();
        assert_eq!(loaded.status(), OrderStatus::Pending);
    }

    #[tokio::test]
    #[serial]
    async fn lock_order_reads_row_with_children() {
        let store = get_test_store().await;
        let order = draft_order(Some(CustomerId::new()));
        insert(&store, &order).await;

        let mut tx = store.begin().await.unwrap();
        let locked = tx.lock_order(order.id()).await.unwrap().unwrap();
        let missing = tx.lock_order(draft_order(None).id()).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(locked.version(), Version::first());
        assert_eq!(locked.items(), order.items());
        assert_eq!(locked.total(), Money::from_cents(6939));
        assert!(missing.is_none());
    }

    #[tokio::test]
    #[serial]
    async fn update_of_unknown_order_is_not_found() {
        let store = get_test_store().await;
        let order = draft_order(None);

        let mut tx = store.begin().await.unwrap();
        let err = tx.update_order(&order, Version::first()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    #[serial]
    async fn list_orders_filters_and_pages() {
        let store = get_test_store().await;
        let customer = CustomerId::new();
        for _ in 0..3 {
            insert(&store, &draft_order(Some(customer))).await;
        }
        insert(&store, &draft_order(None)).await;

        let mine = store
            .list_orders(&OrderQuery::for_customer(customer))
            .await
            .unwrap();
        assert_eq!(mine.len(), 3);
        assert!(
            mine.windows(2)
                .all(|pair| pair[0].created_at() >= pair[1].created_at())
        );

        let page = store
            .list_orders(&OrderQuery::new().status(OrderStatus::Created).limit(2).offset(1))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
    }
}

mod inventory {
    use super::*;

    #[tokio::test]
    #[serial]
    async fn lock_or_create_then_save() {
        let store = get_test_store().await;
        let key = InventoryKey::new(ProductId::new(), "WH1");

        let mut tx = store.begin().await.unwrap();
        let mut row = tx.lock_or_create_inventory(&key).await.unwrap();
        assert_eq!(row.quantity, 0);
        row.quantity = 8;
        row.touch();
        tx.save_inventory(&row).await.unwrap();
        tx.append_stock_transaction(&StockTransaction::new(
            row.id,
            8,
            StockReason::Adjust,
            Some("initial".to_string()),
        ))
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let stored = store.find_inventory(&key).await.unwrap().unwrap();
        assert_eq!(stored.quantity, 8);
        assert_eq!(stored.available(), 8);

        let ledger = store.stock_transactions(stored.id).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].reason, StockReason::Adjust);
        assert_eq!(ledger[0].reference.as_deref(), Some("initial"));
    }

    #[tokio::test]
    #[serial]
    async fn rolled_back_row_is_not_created() {
        let store = get_test_store().await;
        let key = InventoryKey::new(ProductId::new(), "WH1");

        let mut tx = store.begin().await.unwrap();
        tx.lock_or_create_inventory(&key).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.find_inventory(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    #[serial]
    async fn database_rejects_reserved_above_quantity() {
        let store = get_test_store().await;
        let key = InventoryKey::new(ProductId::new(), "WH1");

        let mut tx = store.begin().await.unwrap();
        let mut row = tx.lock_or_create_inventory(&key).await.unwrap();
        row.reserved = 1;
        let err = tx.save_inventory(&row).await.unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
    }
}
