//! Post-commit side-effect dispatch.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::services::{AuditLog, OrderEvent, OrderNotifier};

/// Hands committed order events to a background worker that notifies and
/// audits them.
///
/// Delivery is at-most-once: when the queue is full the event is dropped
/// and counted, so a slow notifier never stalls order processing.
pub struct SideEffectDispatcher {
    sender: Mutex<Option<mpsc::Sender<OrderEvent>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SideEffectDispatcher {
    /// Spawns the worker on the current tokio runtime.
    pub fn new(
        capacity: usize,
        notifier: Arc<dyn OrderNotifier>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(receiver, notifier, audit));
        Self {
            sender: Mutex::new(Some(sender)),
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    /// Queues an event without waiting.
    pub fn dispatch(&self, event: OrderEvent) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            debug!(event = event.name(), "Dispatcher shut down, dropping side effect");
            return;
        };

        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                metrics::counter!("order_side_effects_dropped_total").increment(1);
                warn!(
                    order_id = %event.order_id(),
                    event = event.name(),
                    "Side-effect queue full, dropping event"
                );
            }
            Err(TrySendError::Closed(event)) => {
                debug!(event = event.name(), "Side-effect worker gone, dropping event");
            }
        }
    }

    /// Stops accepting events and waits for queued ones to be delivered.
    pub async fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!(error = %e, "Side-effect worker ended abnormally");
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<OrderEvent>,
    notifier: Arc<dyn OrderNotifier>,
    audit: Arc<dyn AuditLog>,
) {
    while let Some(event) = receiver.recv().await {
        let order_id = event.order_id();

        if let Err(e) = notifier.notify(&event).await {
            metrics::counter!("order_side_effect_failures_total", "kind" => "notification")
                .increment(1);
            warn!(%order_id, event = event.name(), error = %e, "Notification failed");
        }

        let data = match serde_json::to_value(&event) {
            Ok(data) => data,
            Err(e) => {
                warn!(%order_id, error = %e, "Could not serialize audit record");
                continue;
            }
        };
        if let Err(e) = audit.log_event(order_id, event.name(), &data).await {
            metrics::counter!("order_side_effect_failures_total", "kind" => "audit").increment(1);
            warn!(%order_id, event = event.name(), error = %e, "Audit logging failed");
        }
    }
    debug!("Side-effect worker stopped");
}

#[cfg(test)]
mod tests {
    use domain::OrderId;

    use super::*;
    use crate::services::{RecordingAuditLog, RecordingNotifier};

    fn setup(capacity: usize) -> (SideEffectDispatcher, RecordingNotifier, RecordingAuditLog) {
        let notifier = RecordingNotifier::new();
        let audit = RecordingAuditLog::new();
        let dispatcher =
            SideEffectDispatcher::new(capacity, Arc::new(notifier.clone()), Arc::new(audit.clone()));
        (dispatcher, notifier, audit)
    }

    #[tokio::test]
    async fn test_events_delivered_before_shutdown_returns() {
        let (dispatcher, notifier, audit) = setup(8);
        let order_id = OrderId::new();

        dispatcher.dispatch(OrderEvent::MetadataUpdated { order_id });
        dispatcher.shutdown().await;

        assert_eq!(notifier.events().len(), 1);
        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, order_id);
        assert_eq!(records[0].1, "order_metadata_updated");
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_block_audit() {
        let (dispatcher, notifier, audit) = setup(8);
        notifier.set_fail(true);

        dispatcher.dispatch(OrderEvent::MetadataUpdated {
            order_id: OrderId::new(),
        });
        dispatcher.shutdown().await;

        assert!(notifier.events().is_empty());
        assert_eq!(audit.records().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_after_shutdown_is_ignored() {
        let (dispatcher, notifier, _audit) = setup(8);
        dispatcher.shutdown().await;

        dispatcher.dispatch(OrderEvent::MetadataUpdated {
            order_id: OrderId::new(),
        });
        dispatcher.shutdown().await;

        assert!(notifier.events().is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        // The current-thread runtime cannot run the worker until we yield.
        let (dispatcher, notifier, _audit) = setup(1);

        for _ in 0..3 {
            dispatcher.dispatch(OrderEvent::MetadataUpdated {
                order_id: OrderId::new(),
            });
        }
        dispatcher.shutdown().await;

        assert_eq!(notifier.events().len(), 1);
    }
}
