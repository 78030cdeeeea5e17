//! Order aggregate implementation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, ProductId, Version, WarehouseId};
use serde::{Deserialize, Serialize};

use super::{CreateOrderRequest, OrderAddress, OrderError, OrderItem, OrderStatus};
use crate::{InventoryKey, Money, ValidationError};

/// Monetary breakdown of an order.
///
/// `total` is private and only ever derived from the other three amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
    total: Money,
}

impl OrderTotals {
    pub fn new(subtotal: Money, tax: Money, shipping: Money) -> Self {
        Self {
            subtotal,
            tax,
            shipping,
            total: subtotal + tax + shipping,
        }
    }

    pub fn total(&self) -> Money {
        self.total
    }
}

/// Order aggregate root.
///
/// Owns its items and addresses, its status, and the invariant
/// `total == subtotal + tax + shipping`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OrderRecord")]
pub struct Order {
    id: OrderId,
    customer_id: Option<CustomerId>,
    status: OrderStatus,
    currency: String,
    warehouse: WarehouseId,
    #[serde(flatten)]
    totals: OrderTotals,
    version: Version,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    metadata: BTreeMap<String, String>,
    items: Vec<OrderItem>,
    addresses: Vec<OrderAddress>,
}

/// Flat, storage-shaped view of an order.
///
/// Loading an order goes through this type so the total is always
/// recomputed rather than trusted.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub customer_id: Option<CustomerId>,
    pub status: OrderStatus,
    pub currency: String,
    pub warehouse: WarehouseId,
    pub subtotal: Money,
    pub tax: Money,
    pub shipping: Money,
    pub version: Version,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub addresses: Vec<OrderAddress>,
}

impl From<OrderRecord> for Order {
    fn from(record: OrderRecord) -> Self {
        Self {
            id: record.id,
            customer_id: record.customer_id,
            status: record.status,
            currency: record.currency,
            warehouse: record.warehouse,
            totals: OrderTotals::new(record.subtotal, record.tax, record.shipping),
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
            metadata: record.metadata,
            items: record.items,
            addresses: record.addresses,
        }
    }
}

impl Order {
    /// Builds an unpriced, not-yet-persisted order from a request.
    ///
    /// The request is validated first; `default_currency` applies when the
    /// request leaves the currency empty.
    pub fn draft(
        request: &CreateOrderRequest,
        default_currency: &str,
    ) -> Result<Self, ValidationError> {
        request.validate()?;
        let currency = request.normalized_currency(default_currency)?;

        let id = OrderId::new();
        let items: Vec<OrderItem> = request
            .items
            .iter()
            .map(|line| OrderItem::from_request(id, line))
            .collect();
        let subtotal = items.iter().map(|item| item.line_total).sum();
        let addresses = request
            .addresses
            .iter()
            .cloned()
            .map(|details| OrderAddress::new(id, details))
            .collect();
        let now = Utc::now();

        Ok(Self {
            id,
            customer_id: request.customer_id,
            status: OrderStatus::Created,
            currency,
            warehouse: request.warehouse.clone(),
            totals: OrderTotals::new(subtotal, Money::zero(), Money::zero()),
            version: Version::first(),
            created_at: now,
            updated_at: now,
            metadata: request.metadata.clone(),
            items,
            addresses,
        })
    }

    // Getters

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    /// Returns true if the order was placed without a customer account.
    pub fn is_guest(&self) -> bool {
        self.customer_id.is_none()
    }

    pub fn has_customer(&self) -> bool {
        self.customer_id.is_some()
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn warehouse(&self) -> &WarehouseId {
        &self.warehouse
    }

    pub fn totals(&self) -> OrderTotals {
        self.totals
    }

    pub fn subtotal(&self) -> Money {
        self.totals.subtotal
    }

    pub fn tax(&self) -> Money {
        self.totals.tax
    }

    pub fn shipping(&self) -> Money {
        self.totals.shipping
    }

    pub fn total(&self) -> Money {
        self.totals.total()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn addresses(&self) -> &[OrderAddress] {
        &self.addresses
    }

    pub fn is_cancellable(&self) -> bool {
        self.status.is_cancellable()
    }

    pub fn is_refundable(&self) -> bool {
        self.status.is_refundable()
    }

    /// Stock held by this order, one entry per product, sorted by key.
    ///
    /// Lines repeating a product are merged; SKU-only lines hold no stock.
    /// A merged quantity past `u32::MAX` saturates, so it can never be
    /// satisfied rather than wrapping to a small reservation.
    pub fn reservations(&self) -> Vec<(InventoryKey, u32)> {
        let mut merged: BTreeMap<ProductId, u32> = BTreeMap::new();
        for item in &self.items {
            if let Some(product_id) = item.product_id {
                let quantity = merged.entry(product_id).or_default();
                *quantity = quantity.saturating_add(item.quantity);
            }
        }

        merged
            .into_iter()
            .map(|(product_id, quantity)| {
                (
                    InventoryKey::new(product_id, self.warehouse.clone()),
                    quantity,
                )
            })
            .collect()
    }

    // Mutations

    /// Sets tax and shipping; the total follows.
    pub fn apply_pricing(&mut self, tax: Money, shipping: Money) {
        self.totals = OrderTotals::new(self.totals.subtotal, tax, shipping);
    }

    /// Moves to `target` if the transition table allows it.
    ///
    /// Returns the previous status. On error nothing changes.
    pub fn transition_to(&mut self, target: OrderStatus) -> Result<OrderStatus, OrderError> {
        self.status.ensure_transition_to(target)?;
        let previous = self.status;
        self.status = target;
        self.touch();
        Ok(previous)
    }

    /// Replaces the free-form metadata.
    pub fn replace_metadata(&mut self, metadata: BTreeMap<String, String>) {
        self.metadata = metadata;
        self.touch();
    }

    /// Records the version assigned by a successful guarded write.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
