//! Domain layer for the order-processing core.
//!
//! This crate provides:
//! - `Money`, a fixed-point amount with cent rounding
//! - the `Order` aggregate and its status state machine
//! - order request types and their validation
//! - inventory rows and stock ledger entries

pub mod error;
pub mod inventory;
pub mod money;
pub mod order;

pub use common::{
    AddressId, CustomerId, InventoryId, OrderId, OrderItemId, ProductId, StockTransactionId,
    Version, WarehouseId,
};
pub use error::ValidationError;
pub use inventory::{InventoryKey, InventoryRow, StockReason, StockTransaction};
pub use money::Money;
pub use order::{
    AddressDetails, AddressKind, CreateOrderRequest, NewOrderItem, Order, OrderAddress,
    OrderError, OrderItem, OrderRecord, OrderStatus, OrderTotals,
};
