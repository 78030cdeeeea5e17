//! Transactional persistence for the order-processing core.
//!
//! Two implementations of the same [`Store`] / [`Transaction`] contract:
//! - [`PostgresStore`] using row locks (`FOR UPDATE`) and guarded updates
//! - [`InMemoryStore`] with equivalent locking for tests

pub mod concurrency;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod store;

pub use common::Version;
pub use concurrency::{Versioned, compare_and_swap};
pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, InMemoryTransaction};
pub use postgres::{PostgresStore, PostgresTransaction};
pub use query::OrderQuery;
pub use store::{Store, Transaction};
