//! Order creation orchestration with compensation.
//!
//! [`OrderCoordinator`] places an order as one all-or-nothing unit:
//! 1. Validate and price the request
//! 2. Reserve stock for every line, in key order
//! 3. Persist the order
//! 4. Charge payment
//! 5. Commit, then notify and audit
//!
//! If any step fails, reservations taken so far are released in reverse
//! order and nothing is persisted. The coordinator also owns guarded
//! status changes, cancellation (which returns stock) and refunds.

pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod services;
pub mod telemetry;

pub use config::CoordinatorConfig;
pub use coordinator::{Collaborators, OrderCoordinator, OrderResult, REASON_METADATA_KEY};
pub use dispatcher::SideEffectDispatcher;
pub use error::{
    CancelOrderError, CreateOrderError, GetOrderError, RefundOrderError, ServiceError,
    UpdateMetadataError, UpdateStatusError,
};
pub use services::{
    AuditLog, FlatRateTaxCalculator, FlatShippingCalculator, InMemoryPaymentService, OrderEvent,
    OrderNotifier, PaymentReceipt, PaymentService, RecordingAuditLog, RecordingNotifier,
    ShippingCalculator, TaxCalculator, TracingAuditLog, TracingNotifier,
};
pub use telemetry::init_tracing;
