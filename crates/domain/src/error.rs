//! Domain error types.

use thiserror::Error;

use common::ProductId;

use crate::Money;

/// Reasons an order request is rejected before any side effect happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The request contains no line items.
    #[error("Order must contain at least one item")]
    EmptyItems,

    /// The warehouse code is empty.
    #[error("Warehouse is required")]
    InvalidWarehouse,

    /// The currency is not a three-letter code.
    #[error("Invalid currency: {0:?} (expected a three-letter code)")]
    InvalidCurrency(String),

    /// A line item has a non-positive quantity.
    #[error("Invalid quantity for item {index}: {quantity} (must be greater than 0)")]
    InvalidQuantity { index: usize, quantity: u32 },

    /// A line item has a non-positive unit price, or one finer than a cent.
    #[error("Invalid price for item {index}: {price} (must be a positive amount in whole cents)")]
    InvalidPrice { index: usize, price: Money },

    /// Lines for one product add up to more than can be reserved at once.
    #[error("Total quantity for product {product_id} exceeds {max}", max = u32::MAX)]
    QuantityOverflow { product_id: ProductId },

    /// A line total or the order subtotal is out of range.
    #[error("Amount overflow at item {index}")]
    AmountOverflow { index: usize },

    /// A line item has neither a product reference nor a SKU.
    #[error("Item {index} needs a product reference or a SKU")]
    MissingProductReference { index: usize },

    /// An address is missing a required field.
    #[error("Address {index} is missing {field}")]
    IncompleteAddress { index: usize, field: &'static str },
}
