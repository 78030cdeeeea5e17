use std::collections::BTreeMap;

use common::{CustomerId, ProductId, WarehouseId};
use serde::{Deserialize, Serialize};

use super::AddressDetails;
use crate::{Money, ValidationError};

/// One requested line of a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: Option<ProductId>,
    pub sku: Option<String>,
    pub name: Option<String>,
    pub unit_price: Money,
    pub quantity: u32,
}

impl NewOrderItem {
    /// A line referencing a stocked catalog product.
    pub fn for_product(product_id: ProductId, unit_price: Money, quantity: u32) -> Self {
        Self {
            product_id: Some(product_id),
            sku: None,
            name: None,
            unit_price,
            quantity,
        }
    }

    /// A line identified only by SKU. No stock is reserved for it.
    pub fn for_sku(sku: impl Into<String>, unit_price: Money, quantity: u32) -> Self {
        Self {
            product_id: None,
            sku: Some(sku.into()),
            name: None,
            unit_price,
            quantity,
        }
    }

    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        self.sku = Some(sku.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn has_reference(&self) -> bool {
        self.product_id.is_some() || self.sku.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// Input for placing an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    /// Absent for guest checkouts.
    pub customer_id: Option<CustomerId>,
    pub warehouse: WarehouseId,
    /// Empty means "use the configured default".
    #[serde(default)]
    pub currency: String,
    pub items: Vec<NewOrderItem>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub addresses: Vec<AddressDetails>,
}

impl CreateOrderRequest {
    /// Creates an empty guest request against a warehouse.
    pub fn new(warehouse: impl Into<WarehouseId>) -> Self {
        Self {
            customer_id: None,
            warehouse: warehouse.into(),
            currency: String::new(),
            items: Vec::new(),
            metadata: BTreeMap::new(),
            addresses: Vec::new(),
        }
    }

    pub fn for_customer(mut self, customer_id: CustomerId) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_item(mut self, item: NewOrderItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_address(mut self, address: AddressDetails) -> Self {
        self.addresses.push(address);
        self
    }

    /// Checks the request shape. Stops at the first problem found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.items.is_empty() {
            return Err(ValidationError::EmptyItems);
        }
        if self.warehouse.is_blank() {
            return Err(ValidationError::InvalidWarehouse);
        }

        let mut per_product: BTreeMap<ProductId, u64> = BTreeMap::new();
        let mut subtotal = Money::zero();
        for (index, item) in self.items.iter().enumerate() {
            if item.quantity == 0 {
                return Err(ValidationError::InvalidQuantity {
                    index,
                    quantity: item.quantity,
                });
            }
            if !item.unit_price.is_positive() || !item.unit_price.is_whole_cents() {
                return Err(ValidationError::InvalidPrice {
                    index,
                    price: item.unit_price,
                });
            }
            if !item.has_reference() {
                return Err(ValidationError::MissingProductReference { index });
            }

            if let Some(product_id) = item.product_id {
                let quantity = per_product.entry(product_id).or_default();
                *quantity += u64::from(item.quantity);
                if *quantity > u64::from(u32::MAX) {
                    return Err(ValidationError::QuantityOverflow { product_id });
                }
            }
            subtotal = item
                .unit_price
                .checked_multiply(item.quantity)
                .and_then(|line_total| subtotal.checked_add(line_total))
                .ok_or(ValidationError::AmountOverflow { index })?;
        }

        for (index, address) in self.addresses.iter().enumerate() {
            if let Some(field) = address.missing_field() {
                return Err(ValidationError::IncompleteAddress { index, field });
            }
        }

        Ok(())
    }

    /// Returns the upper-cased currency, or `default` when none was given.
    pub fn normalized_currency(&self, default: &str) -> Result<String, ValidationError> {
        let raw = self.currency.trim();
        let code = if raw.is_empty() { default.trim() } else { raw };

        if code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Ok(code.to_ascii_uppercase())
        } else {
            Err(ValidationError::InvalidCurrency(self.currency.clone()))
        }
    }
}
