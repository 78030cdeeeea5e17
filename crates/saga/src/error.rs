//! Coordinator error types.
//!
//! Each public operation has its own closed error enum so callers can match
//! exhaustively on what that operation can actually fail with.

use domain::{OrderError, OrderId, OrderStatus, ProductId, ValidationError, Version, WarehouseId};
use inventory::InventoryError;
use order_store::StoreError;
use thiserror::Error;

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("Tax service error: {0}")]
    Tax(String),

    #[error("Shipping service error: {0}")]
    Shipping(String),

    #[error("Payment service error: {0}")]
    Payment(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Audit log error: {0}")]
    Audit(String),
}

/// Errors returned by `create_order`.
#[derive(Debug, Error)]
pub enum CreateOrderError {
    /// The request was rejected before any side effect.
    #[error("Invalid order: {0}")]
    Validation(#[from] ValidationError),

    /// A line could not be reserved. Earlier reservations were released.
    #[error(
        "Insufficient inventory for product {product_id} in {warehouse}: \
         requested {requested}, available {available}"
    )]
    InsufficientInventory {
        product_id: ProductId,
        warehouse: WarehouseId,
        requested: u32,
        available: i64,
    },

    /// The reservation engine failed for a reason other than shortage.
    #[error("Inventory error: {0}")]
    Inventory(InventoryError),

    /// The charge was declined. Nothing was persisted.
    #[error("Payment failed: {0}")]
    PaymentFailed(ServiceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<InventoryError> for CreateOrderError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::InsufficientStock {
                key,
                requested,
                available,
            } => CreateOrderError::InsufficientInventory {
                product_id: key.product_id,
                warehouse: key.warehouse,
                requested,
                available,
            },
            InventoryError::Store(err) => CreateOrderError::Store(err),
            other => CreateOrderError::Inventory(other),
        }
    }
}

/// Errors returned by `get_order`.
#[derive(Debug, Error)]
pub enum GetOrderError {
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors returned by `update_status`.
#[derive(Debug, Error)]
pub enum UpdateStatusError {
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    #[error("Version conflict on order {order_id}: expected version {expected}")]
    VersionConflict { order_id: OrderId, expected: Version },

    /// Only reachable when the target is `REFUNDED`.
    #[error("Payment failed: {0}")]
    PaymentFailed(ServiceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<OrderError> for UpdateStatusError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::InvalidStatusTransition { from, to } => {
                UpdateStatusError::InvalidStatusTransition { from, to }
            }
            OrderError::UnknownStatus(status) => {
                UpdateStatusError::Store(StoreError::Corrupt(format!("unknown status {status}")))
            }
        }
    }
}

impl From<CancelOrderError> for UpdateStatusError {
    fn from(err: CancelOrderError) -> Self {
        match err {
            CancelOrderError::OrderNotFound(id) => UpdateStatusError::OrderNotFound(id),
            CancelOrderError::OrderNotCancellable { status, .. } => {
                UpdateStatusError::InvalidStatusTransition {
                    from: status,
                    to: OrderStatus::Cancelled,
                }
            }
            CancelOrderError::VersionConflict { order_id, expected } => {
                UpdateStatusError::VersionConflict { order_id, expected }
            }
            CancelOrderError::Store(err) => UpdateStatusError::Store(err),
        }
    }
}

impl From<RefundOrderError> for UpdateStatusError {
    fn from(err: RefundOrderError) -> Self {
        match err {
            RefundOrderError::OrderNotFound(id) => UpdateStatusError::OrderNotFound(id),
            RefundOrderError::OrderNotRefundable { status, .. } => {
                UpdateStatusError::InvalidStatusTransition {
                    from: status,
                    to: OrderStatus::Refunded,
                }
            }
            RefundOrderError::PaymentFailed(err) => UpdateStatusError::PaymentFailed(err),
            RefundOrderError::VersionConflict { order_id, expected } => {
                UpdateStatusError::VersionConflict { order_id, expected }
            }
            RefundOrderError::Store(err) => UpdateStatusError::Store(err),
        }
    }
}

/// Errors returned by `update_metadata`.
#[derive(Debug, Error)]
pub enum UpdateMetadataError {
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Version conflict on order {order_id}: expected version {expected}")]
    VersionConflict { order_id: OrderId, expected: Version },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors returned by `cancel_order`.
#[derive(Debug, Error)]
pub enum CancelOrderError {
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Order {order_id} cannot be cancelled in status {status}")]
    OrderNotCancellable {
        order_id: OrderId,
        status: OrderStatus,
    },

    #[error("Version conflict on order {order_id}: expected version {expected}")]
    VersionConflict { order_id: OrderId, expected: Version },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors returned by `refund_order`.
#[derive(Debug, Error)]
pub enum RefundOrderError {
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Order {order_id} cannot be refunded in status {status}")]
    OrderNotRefundable {
        order_id: OrderId,
        status: OrderStatus,
    },

    /// The refund was declined. The order keeps its status.
    #[error("Payment failed: {0}")]
    PaymentFailed(ServiceError),

    #[error("Version conflict on order {order_id}: expected version {expected}")]
    VersionConflict { order_id: OrderId, expected: Version },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Operation errors that a guarded order write can end in.
pub(crate) trait GuardedWriteError: From<StoreError> {
    fn not_found(order_id: OrderId) -> Self;
    fn version_conflict(order_id: OrderId, expected: Version) -> Self;

    /// Maps a failed `update_order` onto the operation's own variants.
    fn from_guarded_write(err: StoreError, order_id: OrderId, expected: Version) -> Self {
        match err {
            StoreError::VersionConflict { .. } => Self::version_conflict(order_id, expected),
            StoreError::NotFound { .. } => Self::not_found(order_id),
            other => Self::from(other),
        }
    }
}

macro_rules! guarded_write_error {
    ($($ty:ident),* $(,)?) => {
        $(
            impl GuardedWriteError for $ty {
                fn not_found(order_id: OrderId) -> Self {
                    $ty::OrderNotFound(order_id)
                }

                fn version_conflict(order_id: OrderId, expected: Version) -> Self {
                    $ty::VersionConflict { order_id, expected }
                }
            }
        )*
    };
}

guarded_write_error!(
    UpdateStatusError,
    UpdateMetadataError,
    CancelOrderError,
    RefundOrderError,
);
