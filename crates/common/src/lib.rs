//! Shared identifier and version types for the order-processing workspace.

mod types;
mod version;

pub use types::{
    AddressId, CustomerId, InventoryId, OrderId, OrderItemId, ProductId, StockTransactionId,
    WarehouseId,
};
pub use version::Version;
