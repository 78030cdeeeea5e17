//! Tax and shipping calculators.

use async_trait::async_trait;
use domain::{CustomerId, Money, OrderItem};
use rust_decimal::Decimal;

use crate::error::ServiceError;

/// Computes the tax owed on an order subtotal.
#[async_trait]
pub trait TaxCalculator: Send + Sync {
    async fn calculate_tax(
        &self,
        subtotal: Money,
        customer_id: Option<CustomerId>,
    ) -> Result<Money, ServiceError>;
}

/// Computes the shipping charge for a set of order lines.
#[async_trait]
pub trait ShippingCalculator: Send + Sync {
    async fn calculate_shipping(
        &self,
        items: &[OrderItem],
        customer_id: Option<CustomerId>,
    ) -> Result<Money, ServiceError>;
}

/// Applies one rate to every subtotal.
#[derive(Debug, Clone, Copy)]
pub struct FlatRateTaxCalculator {
    rate: Decimal,
}

impl FlatRateTaxCalculator {
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }

    pub fn rate(&self) -> Decimal {
        self.rate
    }
}

#[async_trait]
impl TaxCalculator for FlatRateTaxCalculator {
    async fn calculate_tax(
        &self,
        subtotal: Money,
        _customer_id: Option<CustomerId>,
    ) -> Result<Money, ServiceError> {
        Ok(subtotal.apply_rate(self.rate))
    }
}

/// Charges the same amount for every order.
#[derive(Debug, Clone, Copy)]
pub struct FlatShippingCalculator {
    amount: Money,
}

impl FlatShippingCalculator {
    pub fn new(amount: Money) -> Self {
        Self { amount }
    }
}

#[async_trait]
impl ShippingCalculator for FlatShippingCalculator {
    async fn calculate_shipping(
        &self,
        _items: &[OrderItem],
        _customer_id: Option<CustomerId>,
    ) -> Result<Money, ServiceError> {
        Ok(self.amount)
    }
}
