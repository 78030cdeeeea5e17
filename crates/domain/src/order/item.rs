use common::{OrderId, OrderItemId, ProductId};
use serde::{Deserialize, Serialize};

use super::NewOrderItem;
use crate::Money;

/// A line item within an order.
///
/// Price and name are snapshots taken when the order is placed; the line
/// total is computed once here and never recomputed from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: Option<ProductId>,
    pub sku: Option<String>,
    pub name: Option<String>,
    pub unit_price: Money,
    pub quantity: u32,
    pub line_total: Money,
}

impl OrderItem {
    /// Builds a persisted line item from a request line.
    pub fn from_request(order_id: OrderId, line: &NewOrderItem) -> Self {
        Self {
            id: OrderItemId::new(),
            order_id,
            product_id: line.product_id,
            sku: line.sku.clone(),
            name: line.name.clone(),
            unit_price: line.unit_price,
            quantity: line.quantity,
            line_total: line.unit_price.multiply(line.quantity),
        }
    }

    /// Returns true if this line holds a stock reservation.
    pub fn is_stock_tracked(&self) -> bool {
        self.product_id.is_some()
    }
}
