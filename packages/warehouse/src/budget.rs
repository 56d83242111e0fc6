use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{Error, Result};

/// A draw-down ledger for the byte budget reserved at supervisor initialization time.
///
/// The total is fixed for the lifetime of the ledger. Every new bay charges its storage
/// bytes against the ledger before being constructed; a charge that would overdraw the
/// remaining budget fails with [`BudgetExceeded`][Error::BudgetExceeded] instead of
/// blocking or retrying.
///
/// The ledger is lock-free. Charges use an atomic compare-exchange loop, so pools on
/// different shelves can share one ledger without any mutex, while the rest of the
/// subsystem stays single-owner.
#[derive(Debug)]
pub struct MemoryBudget {
    total_bytes: usize,

    remaining_bytes: AtomicUsize,
}

impl MemoryBudget {
    /// Creates a ledger with the given byte total available for bay storage.
    #[must_use]
    pub fn new(total_bytes: usize) -> Self {
        Self {
            total_bytes,
            remaining_bytes: AtomicUsize::new(total_bytes),
        }
    }

    /// Creates a ledger that never refuses a charge.
    ///
    /// Useful for standalone [`ObjectPool`][crate::ObjectPool] usage outside a
    /// supervisor, and in tests that do not care about budget accounting.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    /// The byte total this ledger started with.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Bytes not yet consumed by bay storage.
    #[must_use]
    pub fn remaining_bytes(&self) -> usize {
        self.remaining_bytes.load(Ordering::Relaxed)
    }

    /// Consumes `bytes` from the remaining budget.
    ///
    /// # Errors
    ///
    /// Fails with [`BudgetExceeded`][Error::BudgetExceeded] when fewer than `bytes`
    /// bytes remain. The ledger is unchanged in that case.
    pub(crate) fn charge(&self, bytes: usize) -> Result<()> {
        self.remaining_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |remaining| {
                remaining.checked_sub(bytes)
            })
            .map(|_| ())
            .map_err(|remaining| Error::BudgetExceeded {
                requested_bytes: bytes,
                remaining_bytes: remaining,
            })
    }
}
