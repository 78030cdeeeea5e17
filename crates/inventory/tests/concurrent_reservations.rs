//! Reservation behaviour under contention.
//!
//! These tests use the multi-threaded runtime so competing reservations
//! really do race for the row lock.

use std::sync::Arc;

use domain::{InventoryKey, ProductId, StockReason};
use futures_util::future::join_all;
use inventory::{InventoryError, ReservationEngine};
use order_store::{InMemoryStore, Store, Transaction};

async fn stocked_engine(quantity: u32) -> (ReservationEngine<InMemoryStore>, InventoryKey) {
    let engine = ReservationEngine::new(Arc::new(InMemoryStore::new()));
    let key = InventoryKey::new(ProductId::new(), "WH1");
    engine.stock(&key, quantity, Some("initial")).await.unwrap();
    (engine, key)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn five_competing_reservations_never_oversell() {
    let (engine, key) = stocked_engine(5).await;

    let attempts = (0..5).map(|n| {
        let engine = engine.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let reference = format!("order-{n}");
            engine.reserve(&key, 2, Some(&reference)).await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let shortages = results
        .iter()
        .filter(|r| matches!(r, Err(InventoryError::InsufficientStock { .. })))
        .count();
    assert_eq!(successes, 2);
    assert_eq!(shortages, 3);

    let row = engine.store().find_inventory(&key).await.unwrap().unwrap();
    assert_eq!(row.quantity, 5);
    assert_eq!(row.reserved, 4);
    assert_eq!(engine.get_available(&key).await.unwrap(), 1);

    let reserves = engine
        .ledger(&key)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.reason == StockReason::Reserve)
        .count();
    assert_eq!(reserves, 2);
    engine.reconcile(&key).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_reserve_and_release_keep_invariant() {
    let (engine, key) = stocked_engine(10).await;

    let tasks = (0..20).map(|n| {
        let engine = engine.clone();
        let key = key.clone();
        tokio::spawn(async move {
            if engine.reserve(&key, 3, None).await.is_ok() && n % 2 == 0 {
                engine.release(&key, 3, None).await.unwrap();
            }
        })
    });
    for joined in join_all(tasks).await {
        joined.unwrap();
    }

    let row = engine.store().find_inventory(&key).await.unwrap().unwrap();
    assert!(row.reserved >= 0 && row.reserved <= row.quantity);
    assert_eq!(row.reserved % 3, 0);
    engine.reconcile(&key).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn held_lock_serialises_a_competing_reservation() {
    let (engine, key) = stocked_engine(2).await;

    // An enclosing transaction reserves everything but has not committed yet.
    let mut tx = engine.store().begin().await.unwrap();
    engine.reserve_in(&mut tx, &key, 2, None).await.unwrap();

    let competitor = {
        let engine = engine.clone();
        let key = key.clone();
        tokio::spawn(async move { engine.reserve(&key, 1, None).await })
    };

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!competitor.is_finished());

    tx.rollback().await.unwrap();
    let row = competitor.await.unwrap().unwrap();
    assert_eq!(row.reserved, 1);
}
