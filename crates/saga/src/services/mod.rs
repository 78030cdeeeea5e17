//! Collaborator traits and their in-process implementations.
//!
//! The coordinator only talks to the outside world through these narrow
//! capabilities. Tax and shipping failures degrade to configured
//! fallbacks; payment failures abort; notifications are best-effort.

pub mod notification;
pub mod payment;
pub mod pricing;

pub use notification::{
    AuditLog, OrderEvent, OrderNotifier, RecordingAuditLog, RecordingNotifier, TracingAuditLog,
    TracingNotifier,
};
pub use payment::{InMemoryPaymentService, PaymentReceipt, PaymentService};
pub use pricing::{
    FlatRateTaxCalculator, FlatShippingCalculator, ShippingCalculator, TaxCalculator,
};
