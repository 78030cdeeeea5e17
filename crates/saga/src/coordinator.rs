//! Order coordinator: creation with compensation, status changes,
//! cancellation and refunds.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use domain::{
    CreateOrderRequest, InventoryKey, Money, Order, OrderId, OrderStatus, Version,
};
use inventory::ReservationEngine;
use order_store::{OrderQuery, Store, StoreError, Transaction};
use tracing::{error, info, warn};

use crate::config::CoordinatorConfig;
use crate::dispatcher::SideEffectDispatcher;
use crate::error::{
    CancelOrderError, CreateOrderError, GetOrderError, GuardedWriteError, RefundOrderError,
    UpdateMetadataError, UpdateStatusError,
};
use crate::services::{
    AuditLog, FlatRateTaxCalculator, FlatShippingCalculator, OrderEvent, OrderNotifier,
    PaymentReceipt, PaymentService, ShippingCalculator, TaxCalculator, TracingAuditLog,
    TracingNotifier,
};

/// Metadata key under which a cancellation or refund reason is kept.
pub const REASON_METADATA_KEY: &str = "status_reason";

/// A committed order together with its payment.
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub order: Order,
    pub payment: PaymentReceipt,
}

/// The coordinator's non-payment collaborators.
pub struct Collaborators {
    pub tax: Arc<dyn TaxCalculator>,
    pub shipping: Arc<dyn ShippingCalculator>,
    pub notifier: Arc<dyn OrderNotifier>,
    pub audit: Arc<dyn AuditLog>,
}

impl Collaborators {
    /// Flat-rate pricing at the configured fallback values, with
    /// notifications and audit records written to the log.
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            tax: Arc::new(FlatRateTaxCalculator::new(config.fallback_tax_rate)),
            shipping: Arc::new(FlatShippingCalculator::new(config.fallback_shipping)),
            notifier: Arc::new(TracingNotifier),
            audit: Arc::new(TracingAuditLog),
        }
    }

    pub fn with_tax(mut self, tax: impl TaxCalculator + 'static) -> Self {
        self.tax = Arc::new(tax);
        self
    }

    pub fn with_shipping(mut self, shipping: impl ShippingCalculator + 'static) -> Self {
        self.shipping = Arc::new(shipping);
        self
    }

    pub fn with_notifier(mut self, notifier: impl OrderNotifier + 'static) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    pub fn with_audit(mut self, audit: impl AuditLog + 'static) -> Self {
        self.audit = Arc::new(audit);
        self
    }
}

/// Runs every order operation against a [`Store`].
///
/// Order creation reserves stock, persists the order and charges payment
/// inside one transaction. A failure at any step releases the reservations
/// taken so far (in reverse order) and rolls the transaction back, so no
/// partial order is ever visible. Notifications and audit records are
/// dispatched only after commit.
pub struct OrderCoordinator<S: Store, P: PaymentService> {
    store: Arc<S>,
    engine: ReservationEngine<S>,
    payment: P,
    tax: Arc<dyn TaxCalculator>,
    shipping: Arc<dyn ShippingCalculator>,
    dispatcher: SideEffectDispatcher,
    config: CoordinatorConfig,
}

impl<S: Store, P: PaymentService> OrderCoordinator<S, P> {
    /// Creates a coordinator. Must be called inside a tokio runtime, which
    /// runs the side-effect worker.
    pub fn new(
        store: Arc<S>,
        payment: P,
        collaborators: Collaborators,
        config: CoordinatorConfig,
    ) -> Self {
        let dispatcher = SideEffectDispatcher::new(
            config.side_effect_queue,
            collaborators.notifier,
            collaborators.audit,
        );
        Self {
            engine: ReservationEngine::new(Arc::clone(&store)),
            store,
            payment,
            tax: collaborators.tax,
            shipping: collaborators.shipping,
            dispatcher,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The reservation engine, for stock management and availability reads.
    pub fn inventory(&self) -> &ReservationEngine<S> {
        &self.engine
    }

    pub fn payment(&self) -> &P {
        &self.payment
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Validates, prices, reserves, persists and charges a new order.
    #[tracing::instrument(
        skip(self, request),
        fields(order_id = tracing::field::Empty, warehouse = %request.warehouse)
    )]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderResult, CreateOrderError> {
        let started = Instant::now();
        let result = self.place_order(&request).await;
        metrics::histogram!("order_creation_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(placed) => {
                metrics::counter!("orders_created_total").increment(1);
                info!(
                    total = %placed.order.total(),
                    payment = %placed.payment.reference,
                    "Order created"
                );
            }
            Err(e) => {
                metrics::counter!("order_creation_failures_total", "reason" => failure_reason(e))
                    .increment(1);
                warn!(error = %e, "Order creation failed");
            }
        }
        result
    }

    async fn place_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<OrderResult, CreateOrderError> {
        let mut order = Order::draft(request, &self.config.default_currency)?;
        tracing::Span::current().record("order_id", tracing::field::display(order.id()));

        let tax = self.quote_tax(&order).await;
        let shipping = self.quote_shipping(&order).await;
        order.apply_pricing(tax, shipping);

        let reference = order.id().to_string();
        let mut tx = self.store.begin().await?;

        // Rows are locked in key order.
        let mut reserved = Vec::new();
        for (key, quantity) in order.reservations() {
            match self
                .engine
                .reserve_in(&mut tx, &key, quantity, Some(&reference))
                .await
            {
                Ok(_) => reserved.push((key, quantity)),
                Err(e) => {
                    self.unwind(tx, &reserved, &reference).await;
                    return Err(e.into());
                }
            }
        }

        if let Err(e) = tx.insert_order(&order).await {
            self.unwind(tx, &reserved, &reference).await;
            return Err(e.into());
        }

        let payment = match self
            .payment
            .charge(
                order.id(),
                order.customer_id(),
                order.total(),
                order.currency(),
            )
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                self.unwind(tx, &reserved, &reference).await;
                return Err(CreateOrderError::PaymentFailed(e));
            }
        };

        if let Err(e) = tx.commit().await {
            error!(error = %e, "Commit failed after charge, refunding");
            if let Err(refund_error) = self.payment.refund(order.id(), order.total()).await {
                error!(error = %refund_error, "Refund after failed commit was declined");
            }
            return Err(e.into());
        }

        self.dispatcher.dispatch(OrderEvent::Created {
            order_id: order.id(),
            customer_id: order.customer_id(),
            total: order.total(),
        });
        Ok(OrderResult { order, payment })
    }

    async fn quote_tax(&self, order: &Order) -> Money {
        match self
            .tax
            .calculate_tax(order.subtotal(), order.customer_id())
            .await
        {
            Ok(tax) => tax.round(),
            Err(e) => {
                metrics::counter!("order_pricing_fallbacks_total", "kind" => "tax").increment(1);
                warn!(
                    error = %e,
                    rate = %self.config.fallback_tax_rate,
                    "Tax service unavailable, using fallback rate"
                );
                order.subtotal().apply_rate(self.config.fallback_tax_rate)
            }
        }
    }

    async fn quote_shipping(&self, order: &Order) -> Money {
        match self
            .shipping
            .calculate_shipping(order.items(), order.customer_id())
            .await
        {
            Ok(shipping) => shipping.round(),
            Err(e) => {
                metrics::counter!("order_pricing_fallbacks_total", "kind" => "shipping")
                    .increment(1);
                warn!(
                    error = %e,
                    amount = %self.config.fallback_shipping,
                    "Shipping service unavailable, using fallback amount"
                );
                self.config.fallback_shipping.round()
            }
        }
    }

    /// Releases `reserved` in reverse order, then rolls `tx` back.
    async fn unwind(&self, mut tx: S::Tx, reserved: &[(InventoryKey, u32)], reference: &str) {
        for (key, quantity) in reserved.iter().rev() {
            if let Err(e) = self
                .engine
                .release_in(&mut tx, key, *quantity, Some(reference))
                .await
            {
                warn!(%key, quantity, error = %e, "Compensating release failed");
            }
        }
        rollback(tx).await;
    }

    /// Loads an order.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order, GetOrderError> {
        self.store
            .find_order(order_id)
            .await?
            .ok_or(GetOrderError::OrderNotFound(order_id))
    }

    /// Lists orders, newest first.
    pub async fn list_orders(&self, query: &OrderQuery) -> order_store::Result<Vec<Order>> {
        self.store.list_orders(query).await
    }

    /// Moves an order to `target` if the caller's `version` is current.
    ///
    /// `CANCELLED` and `REFUNDED` go through [`Self::cancel_order`] and
    /// [`Self::refund_order`], so they release stock or refund payment.
    #[tracing::instrument(skip(self), fields(%order_id, %target, %version))]
    pub async fn update_status(
        &self,
        order_id: OrderId,
        target: OrderStatus,
        version: Version,
    ) -> Result<Order, UpdateStatusError> {
        match target {
            OrderStatus::Cancelled => return Ok(self.cancel_order(order_id, version, None).await?),
            OrderStatus::Refunded => return Ok(self.refund_order(order_id, version, None).await?),
            _ => {}
        }

        let mut tx = self.store.begin().await?;
        let result = advance_in(&mut tx, order_id, target, version).await;
        let (order, from) = finish(tx, result).await?;

        metrics::counter!("order_status_updates_total", "to" => target.as_str()).increment(1);
        info!(%from, "Order status updated");
        self.dispatcher.dispatch(OrderEvent::StatusChanged {
            order_id,
            from,
            to: target,
        });
        Ok(order)
    }

    /// Replaces an order's metadata if the caller's `version` is current.
    #[tracing::instrument(skip(self, metadata), fields(%order_id, %version))]
    pub async fn update_metadata(
        &self,
        order_id: OrderId,
        metadata: BTreeMap<String, String>,
        version: Version,
    ) -> Result<Order, UpdateMetadataError> {
        let mut tx = self.store.begin().await?;
        let result = replace_metadata_in(&mut tx, order_id, metadata, version).await;
        let order = finish(tx, result).await?;

        self.dispatcher
            .dispatch(OrderEvent::MetadataUpdated { order_id });
        Ok(order)
    }

    /// Cancels an order and returns its reserved stock.
    ///
    /// A release that fails is logged and skipped; the cancellation still
    /// goes through.
    #[tracing::instrument(skip(self, reason), fields(%order_id, %version))]
    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        version: Version,
        reason: Option<String>,
    ) -> Result<Order, CancelOrderError> {
        let mut tx = self.store.begin().await?;
        let result = self
            .cancel_in(&mut tx, order_id, version, reason.as_deref())
            .await;
        let (order, from) = finish(tx, result).await?;

        metrics::counter!("orders_cancelled_total").increment(1);
        info!(%from, "Order cancelled");
        self.dispatcher
            .dispatch(OrderEvent::Cancelled { order_id, reason });
        Ok(order)
    }

    async fn cancel_in(
        &self,
        tx: &mut S::Tx,
        order_id: OrderId,
        expected: Version,
        reason: Option<&str>,
    ) -> Result<(Order, OrderStatus), CancelOrderError> {
        let mut order = lock_for_write::<CancelOrderError, _>(tx, order_id, expected).await?;
        let status = order.status();
        if !order.is_cancellable() {
            return Err(CancelOrderError::OrderNotCancellable { order_id, status });
        }
        order
            .transition_to(OrderStatus::Cancelled)
            .map_err(|_| CancelOrderError::OrderNotCancellable { order_id, status })?;
        record_reason(&mut order, reason);

        let new_version = guarded_update::<CancelOrderError, _>(tx, &order, expected).await?;
        order.set_version(new_version);

        let reference = order_id.to_string();
        for (key, quantity) in order.reservations() {
            if let Err(e) = self
                .engine
                .release_in(tx, &key, quantity, Some(&reference))
                .await
            {
                warn!(%key, quantity, error = %e, "Could not release reservation, continuing");
            }
        }
        Ok((order, status))
    }

    /// Refunds the order total and marks the order refunded.
    ///
    /// A declined refund leaves the order untouched. Stock is not returned.
    #[tracing::instrument(skip(self, reason), fields(%order_id, %version))]
    pub async fn refund_order(
        &self,
        order_id: OrderId,
        version: Version,
        reason: Option<String>,
    ) -> Result<Order, RefundOrderError> {
        let mut tx = self.store.begin().await?;
        let result = self
            .refund_in(&mut tx, order_id, version, reason.as_deref())
            .await;
        let (order, receipt) = finish(tx, result).await?;

        metrics::counter!("orders_refunded_total").increment(1);
        info!(refund = %receipt.reference, amount = %receipt.amount, "Order refunded");
        self.dispatcher.dispatch(OrderEvent::Refunded {
            order_id,
            amount: receipt.amount,
            reason,
        });
        Ok(order)
    }

    async fn refund_in(
        &self,
        tx: &mut S::Tx,
        order_id: OrderId,
        expected: Version,
        reason: Option<&str>,
    ) -> Result<(Order, PaymentReceipt), RefundOrderError> {
        let mut order = lock_for_write::<RefundOrderError, _>(tx, order_id, expected).await?;
        let status = order.status();
        if !order.is_refundable() {
            return Err(RefundOrderError::OrderNotRefundable { order_id, status });
        }
        order
            .transition_to(OrderStatus::Refunded)
            .map_err(|_| RefundOrderError::OrderNotRefundable { order_id, status })?;
        record_reason(&mut order, reason);

        // The guarded write runs first so a stale caller never moves money.
        let new_version = guarded_update::<RefundOrderError, _>(tx, &order, expected).await?;
        order.set_version(new_version);

        let receipt = self
            .payment
            .refund(order_id, order.total())
            .await
            .map_err(RefundOrderError::PaymentFailed)?;
        Ok((order, receipt))
    }

    /// Stops the side-effect worker after it drains queued events.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}

fn record_reason(order: &mut Order, reason: Option<&str>) {
    if let Some(reason) = reason.filter(|r| !r.trim().is_empty()) {
        let mut metadata = order.metadata().clone();
        metadata.insert(REASON_METADATA_KEY.to_string(), reason.to_string());
        order.replace_metadata(metadata);
    }
}

/// Locks the stored order and checks it is at `expected`.
///
/// A terminal order skips the version check: it can no longer move, and
/// the caller hears that instead of a conflict.
async fn lock_for_write<E: GuardedWriteError, Tx: Transaction>(
    tx: &mut Tx,
    order_id: OrderId,
    expected: Version,
) -> Result<Order, E> {
    let order = tx
        .lock_order(order_id)
        .await?
        .ok_or_else(|| E::not_found(order_id))?;
    if order.version() != expected && !order.status().is_terminal() {
        return Err(E::version_conflict(order_id, expected));
    }
    Ok(order)
}

async fn advance_in<Tx: Transaction>(
    tx: &mut Tx,
    order_id: OrderId,
    target: OrderStatus,
    expected: Version,
) -> Result<(Order, OrderStatus), UpdateStatusError> {
    let mut order = lock_for_write::<UpdateStatusError, _>(tx, order_id, expected).await?;
    let from = order.transition_to(target)?;
    let new_version = guarded_update::<UpdateStatusError, _>(tx, &order, expected).await?;
    order.set_version(new_version);
    Ok((order, from))
}

async fn replace_metadata_in<Tx: Transaction>(
    tx: &mut Tx,
    order_id: OrderId,
    metadata: BTreeMap<String, String>,
    expected: Version,
) -> Result<Order, UpdateMetadataError> {
    let mut order = tx
        .lock_order(order_id)
        .await?
        .ok_or(UpdateMetadataError::OrderNotFound(order_id))?;
    order.replace_metadata(metadata);
    let new_version = guarded_update::<UpdateMetadataError, _>(tx, &order, expected).await?;
    order.set_version(new_version);
    Ok(order)
}

async fn guarded_update<E: GuardedWriteError, Tx: Transaction>(
    tx: &mut Tx,
    order: &Order,
    expected: Version,
) -> Result<Version, E> {
    tx.update_order(order, expected)
        .await
        .map_err(|e| E::from_guarded_write(e, order.id(), expected))
}

/// Commits on success, rolls back on failure.
async fn finish<T, E: From<StoreError>, Tx: Transaction>(
    tx: Tx,
    result: Result<T, E>,
) -> Result<T, E> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            rollback(tx).await;
            Err(e)
        }
    }
}

async fn rollback<Tx: Transaction>(tx: Tx) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "Rollback failed");
    }
}

fn failure_reason(err: &CreateOrderError) -> &'static str {
    match err {
        CreateOrderError::Validation(_) => "validation",
        CreateOrderError::InsufficientInventory { .. } => "insufficient_inventory",
        CreateOrderError::Inventory(_) => "inventory",
        CreateOrderError::PaymentFailed(_) => "payment",
        CreateOrderError::Store(_) => "store",
    }
}
