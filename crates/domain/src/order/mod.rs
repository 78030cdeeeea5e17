//! Order aggregate and related types.

mod address;
mod aggregate;
mod item;
mod request;
mod status;

pub use address::{AddressDetails, AddressKind, OrderAddress};
pub use aggregate::{Order, OrderRecord, OrderTotals};
pub use item::OrderItem;
pub use request::{CreateOrderRequest, NewOrderItem};
pub use status::OrderStatus;

use thiserror::Error;

/// Errors raised by the order state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    /// The transition table does not allow this move.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    /// A status string did not name a known status.
    #[error("Unknown order status: {0:?}")]
    UnknownStatus(String),
}
