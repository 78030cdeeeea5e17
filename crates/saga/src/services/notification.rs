//! Outbound notifications and audit logging.
//!
//! Both run after commit on the side-effect worker. A failure here is
//! logged and never reaches the caller of the order operation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use domain::{CustomerId, Money, OrderId, OrderStatus};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ServiceError;

/// Something that happened to an order and has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Created {
        order_id: OrderId,
        customer_id: Option<CustomerId>,
        total: Money,
    },
    StatusChanged {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },
    Cancelled {
        order_id: OrderId,
        reason: Option<String>,
    },
    Refunded {
        order_id: OrderId,
        amount: Money,
        reason: Option<String>,
    },
    MetadataUpdated {
        order_id: OrderId,
    },
}

impl OrderEvent {
    /// Stable event name used in audit records.
    pub fn name(&self) -> &'static str {
        match self {
            OrderEvent::Created { .. } => "order_created",
            OrderEvent::StatusChanged { .. } => "order_status_changed",
            OrderEvent::Cancelled { .. } => "order_cancelled",
            OrderEvent::Refunded { .. } => "order_refunded",
            OrderEvent::MetadataUpdated { .. } => "order_metadata_updated",
        }
    }

    pub fn order_id(&self) -> OrderId {
        match self {
            OrderEvent::Created { order_id, .. }
            | OrderEvent::StatusChanged { order_id, .. }
            | OrderEvent::Cancelled { order_id, .. }
            | OrderEvent::Refunded { order_id, .. }
            | OrderEvent::MetadataUpdated { order_id } => *order_id,
        }
    }
}

/// Delivers order events to customers or downstream systems.
#[async_trait]
pub trait OrderNotifier: Send + Sync {
    async fn notify(&self, event: &OrderEvent) -> Result<(), ServiceError>;
}

/// Records order events for compliance.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn log_event(
        &self,
        order_id: OrderId,
        event: &str,
        data: &serde_json::Value,
    ) -> Result<(), ServiceError>;
}

/// Notifier that only emits a log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl OrderNotifier for TracingNotifier {
    async fn notify(&self, event: &OrderEvent) -> Result<(), ServiceError> {
        info!(order_id = %event.order_id(), event = event.name(), "Order notification");
        Ok(())
    }
}

/// Audit log that writes to the `audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn log_event(
        &self,
        order_id: OrderId,
        event: &str,
        data: &serde_json::Value,
    ) -> Result<(), ServiceError> {
        info!(target: "audit", %order_id, event, %data, "Audit record");
        Ok(())
    }
}

#[derive(Debug)]
struct Recorded<T> {
    entries: Vec<T>,
    fail: bool,
}

impl<T> Default for Recorded<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            fail: false,
        }
    }
}

fn lock<T>(state: &Mutex<Recorded<T>>) -> MutexGuard<'_, Recorded<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Notifier that keeps every event it receives, for tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    state: Arc<Mutex<Recorded<OrderEvent>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every delivery fail until reset.
    pub fn set_fail(&self, fail: bool) {
        lock(&self.state).fail = fail;
    }

    pub fn events(&self) -> Vec<OrderEvent> {
        lock(&self.state).entries.clone()
    }
}

#[async_trait]
impl OrderNotifier for RecordingNotifier {
    async fn notify(&self, event: &OrderEvent) -> Result<(), ServiceError> {
        let mut state = lock(&self.state);
        if state.fail {
            return Err(ServiceError::Notification("Notifier unavailable".to_string()));
        }
        state.entries.push(event.clone());
        Ok(())
    }
}

/// Audit log that keeps every record in memory, for tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingAuditLog {
    state: Arc<Mutex<Recorded<(OrderId, String, serde_json::Value)>>>,
}

impl RecordingAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        lock(&self.state).fail = fail;
    }

    pub fn records(&self) -> Vec<(OrderId, String, serde_json::Value)> {
        lock(&self.state).entries.clone()
    }
}

#[async_trait]
impl AuditLog for RecordingAuditLog {
    async fn log_event(
        &self,
        order_id: OrderId,
        event: &str,
        data: &serde_json::Value,
    ) -> Result<(), ServiceError> {
        let mut state = lock(&self.state);
        if state.fail {
            return Err(ServiceError::Audit("Audit log unavailable".to_string()));
        }
        state.entries.push((order_id, event.to_string(), data.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let order_id = OrderId::new();
        let event = OrderEvent::StatusChanged {
            order_id,
            from: OrderStatus::Created,
            to: OrderStatus::Pending,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status_changed");
        assert_eq!(json["from"], "CREATED");
        assert_eq!(json["to"], "PENDING");
        assert_eq!(json["order_id"], order_id.to_string());
        assert_eq!(event.name(), "order_status_changed");
    }

    #[tokio::test]
    async fn test_recording_notifier_failure_toggle() {
        let notifier = RecordingNotifier::new();
        let event = OrderEvent::MetadataUpdated {
            order_id: OrderId::new(),
        };

        notifier.set_fail(true);
        assert!(notifier.notify(&event).await.is_err());
        notifier.set_fail(false);
        notifier.notify(&event).await.unwrap();

        assert_eq!(notifier.events(), vec![event]);
    }

    #[tokio::test]
    async fn test_recording_doubles_start_empty() {
        let notifier = RecordingNotifier::default();
        let audit = RecordingAuditLog::default();
        assert!(notifier.events().is_empty());
        assert!(audit.records().is_empty());

        let order_id = OrderId::new();
        audit
            .log_event(order_id, "order_created", &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(audit.records().len(), 1);
        assert_eq!(audit.records()[0].0, order_id);
    }
}
