//! Payment service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use domain::{CustomerId, Money, OrderId};

use crate::error::ServiceError;

/// Provider acknowledgement of a charge or refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    /// Reference assigned by the payment provider.
    pub reference: String,
    pub amount: Money,
}

/// Trait for payment processing operations.
///
/// Failures are final. The coordinator never retries a charge or refund.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Charges `amount` for an order.
    async fn charge(
        &self,
        order_id: OrderId,
        customer_id: Option<CustomerId>,
        amount: Money,
        currency: &str,
    ) -> Result<PaymentReceipt, ServiceError>;

    /// Refunds `amount` previously charged for an order.
    async fn refund(&self, order_id: OrderId, amount: Money)
    -> Result<PaymentReceipt, ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    charges: HashMap<OrderId, PaymentReceipt>,
    refunds: Vec<(OrderId, PaymentReceipt)>,
    next_id: u32,
    fail_on_charge: bool,
    fail_on_refund: bool,
}

/// In-memory payment service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<Mutex<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment service.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryPaymentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every charge fail until reset.
    pub fn set_fail_on_charge(&self, fail: bool) {
        self.state().fail_on_charge = fail;
    }

    /// Makes every refund fail until reset.
    pub fn set_fail_on_refund(&self, fail: bool) {
        self.state().fail_on_refund = fail;
    }

    /// Number of orders with a standing charge.
    pub fn charge_count(&self) -> usize {
        self.state().charges.len()
    }

    /// Number of refunds issued.
    pub fn refund_count(&self) -> usize {
        self.state().refunds.len()
    }

    /// Receipt of the charge taken for `order_id`, if any.
    pub fn charge_for(&self, order_id: OrderId) -> Option<PaymentReceipt> {
        self.state().charges.get(&order_id).cloned()
    }

    fn next_reference(state: &mut InMemoryPaymentState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{prefix}-{:04}", state.next_id)
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn charge(
        &self,
        order_id: OrderId,
        _customer_id: Option<CustomerId>,
        amount: Money,
        _currency: &str,
    ) -> Result<PaymentReceipt, ServiceError> {
        let mut state = self.state();

        if state.fail_on_charge {
            return Err(ServiceError::Payment("Payment declined".to_string()));
        }

        let receipt = PaymentReceipt {
            reference: Self::next_reference(&mut state, "PAY"),
            amount,
        };
        state.charges.insert(order_id, receipt.clone());
        Ok(receipt)
    }

    async fn refund(
        &self,
        order_id: OrderId,
        amount: Money,
    ) -> Result<PaymentReceipt, ServiceError> {
        let mut state = self.state();

        if state.fail_on_refund {
            return Err(ServiceError::Payment("Refund declined".to_string()));
        }
        if state.charges.remove(&order_id).is_none() {
            return Err(ServiceError::Payment(format!(
                "No charge on record for order {order_id}"
            )));
        }

        let receipt = PaymentReceipt {
            reference: Self::next_reference(&mut state, "REF"),
            amount,
        };
        state.refunds.push((order_id, receipt.clone()));
        Ok(receipt)
    }
}
