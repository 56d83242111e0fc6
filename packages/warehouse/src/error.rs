use thiserror::Error;

/// Errors that can occur when allocating from or maintaining the warehouse.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Every slot in a bay is alive. The owning pool recovers from this internally by
    /// chaining a new bay, so callers only observe it when using a bay-sized pool surface
    /// directly.
    #[error("bay is at capacity ({capacity}) with no dead slots remaining")]
    PoolExhausted {
        /// Capacity of the bay that had no free slot.
        capacity: usize,
    },

    /// A handle or slot index did not identify an alive slot. This covers out of range
    /// indexes, handles pointing at bays that do not exist and double-release of the
    /// same handle.
    #[error("handle does not identify an alive slot: index {index} is invalid: {problem}")]
    InvalidHandle {
        /// The offending slot or pool-level index.
        index: usize,

        /// A human-readable description of the problem.
        problem: String,
    },

    /// An operation that requires a reserved memory budget was called before the
    /// supervisor was initialized. This is a usage error in the calling code, not a
    /// recoverable runtime condition.
    #[error("the memory supervisor has not been initialized")]
    NotInitialized,

    /// No pool has been registered for the requested type. Registration happens at
    /// supervisor build time; this is a configuration error, not something to retry.
    #[error("no pool is registered for type {type_name}")]
    UnknownType {
        /// Name of the type that had no registered pool.
        type_name: &'static str,
    },

    /// Reserving storage for a new bay would overdraw the memory budget fixed at
    /// supervisor initialization time.
    #[error(
        "memory budget exceeded: {requested_bytes} bytes requested but only {remaining_bytes} remain"
    )]
    BudgetExceeded {
        /// Bytes the failed reservation asked for.
        requested_bytes: usize,

        /// Bytes that remained in the budget at the time of the failure.
        remaining_bytes: usize,
    },
}

/// A specialized `Result` type for warehouse operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
