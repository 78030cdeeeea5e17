use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use domain::{InventoryKey, ProductId};
use inventory::ReservationEngine;
use order_store::InMemoryStore;

fn stocked(rt: &tokio::runtime::Runtime) -> (ReservationEngine<InMemoryStore>, InventoryKey) {
    let engine = ReservationEngine::new(Arc::new(InMemoryStore::new()));
    let key = InventoryKey::new(ProductId::new(), "WH1");
    rt.block_on(async { engine.stock(&key, 100, None).await.unwrap() });
    (engine, key)
}

fn bench_reserve_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (engine, key) = stocked(&rt);

    c.bench_function("inventory/reserve_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine.reserve(&key, 1, None).await.unwrap();
                engine.release(&key, 1, None).await.unwrap();
            });
        });
    });
}

fn bench_get_available(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (engine, key) = stocked(&rt);

    c.bench_function("inventory/get_available", |b| {
        b.iter(|| {
            rt.block_on(async { engine.get_available(&key).await.unwrap() });
        });
    });
}

fn bench_contended_reserve(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (engine, key) = stocked(&rt);

    c.bench_function("inventory/contended_reserve_release_8", |b| {
        b.iter(|| {
            rt.block_on(async {
                let tasks: Vec<_> = (0..8)
                    .map(|_| {
                        let engine = engine.clone();
                        let key = key.clone();
                        tokio::spawn(async move {
                            engine.reserve(&key, 1, None).await?;
                            engine.release(&key, 1, None).await
                        })
                    })
                    .collect();
                for task in tasks {
                    task.await.unwrap().unwrap();
                }
            });
        });
    });
}

criterion_group!(
    benches,
    bench_reserve_release,
    bench_get_available,
    bench_contended_reserve,
);
criterion_main!(benches);
