//! Optimistic concurrency guard.
//!
//! A guarded write carries the version the caller last observed. It is
//! applied only if the stored row is still at that version, and it moves
//! the row to exactly the next version. There is no merging: a stale
//! write is rejected as a whole.

use domain::Order;

use crate::{StoreError, Version};

/// A row protected by the concurrency guard.
pub trait Versioned {
    /// Entity name used in conflict errors.
    const ENTITY: &'static str;

    fn version(&self) -> Version;

    fn guard_id(&self) -> String;
}

impl Versioned for Order {
    const ENTITY: &'static str = "order";

    fn version(&self) -> Version {
        Order::version(self)
    }

    fn guard_id(&self) -> String {
        self.id().to_string()
    }
}

/// Checks `stored` against the caller's `expected` version.
///
/// Returns the version the row must be written at.
pub fn compare_and_swap<T: Versioned>(stored: &T, expected: Version) -> Result<Version, StoreError> {
    if stored.version() != expected {
        return Err(StoreError::VersionConflict {
            entity: T::ENTITY,
            id: stored.guard_id(),
            expected,
        });
    }
    Ok(expected.next())
}

/// Maps a guarded `UPDATE ... WHERE version = $n` outcome.
///
/// `rows_affected == 0` means the row either vanished or moved on.
pub fn check_rows_affected(
    rows_affected: u64,
    entity: &'static str,
    id: impl ToString,
    expected: Version,
    exists: bool,
) -> Result<Version, StoreError> {
    match (rows_affected, exists) {
        (0, false) => Err(StoreError::NotFound {
            entity,
            id: id.to_string(),
        }),
        (0, true) => Err(StoreError::VersionConflict {
            entity,
            id: id.to_string(),
            expected,
        }),
        _ => Ok(expected.next()),
    }
}
