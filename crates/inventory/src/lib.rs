//! Inventory reservation engine.
//!
//! Stock is kept per (product, warehouse) row. Reservations and releases
//! run under an exclusive row lock and append to the stock ledger in the
//! same transaction, so stock is never oversold under concurrency.

pub mod engine;
pub mod error;

pub use engine::ReservationEngine;
pub use error::{InventoryError, Result};
