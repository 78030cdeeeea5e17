//! Reservation engine error types.

use domain::InventoryKey;
use order_store::StoreError;
use thiserror::Error;

/// Errors that can occur during inventory operations.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Not enough unreserved stock. Nothing was written.
    #[error("Insufficient stock for {key}: requested {requested}, available {available}")]
    InsufficientStock {
        key: InventoryKey,
        requested: u32,
        available: i64,
    },

    /// A release asked for more than is reserved.
    #[error("Release of {requested} exceeds reserved {reserved} for {key}")]
    ReleaseExceedsReserved {
        key: InventoryKey,
        requested: u32,
        reserved: i64,
    },

    /// An adjustment would leave fewer units than are reserved.
    #[error("Adjusting {key} by {delta} would leave quantity {quantity} below reserved {reserved}")]
    AdjustmentBelowReserved {
        key: InventoryKey,
        delta: i64,
        quantity: i64,
        reserved: i64,
    },

    /// Quantities and adjustments must be non-zero.
    #[error("Invalid quantity: {0} (must be non-zero)")]
    InvalidQuantity(i64),

    /// The stored row disagrees with the sum of its ledger entries.
    #[error(
        "Ledger mismatch for {key}: quantity {quantity} vs ledger {ledger_quantity}, \
         reserved {reserved} vs ledger {ledger_reserved}"
    )]
    LedgerMismatch {
        key: InventoryKey,
        quantity: i64,
        ledger_quantity: i64,
        reserved: i64,
        ledger_reserved: i64,
    },

    /// Persistence error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience type alias for inventory results.
pub type Result<T> = std::result::Result<T, InventoryError>;
