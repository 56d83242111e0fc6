//! Pre-reserved, fixed-capacity object pools that hand out reusable slots without
//! per-request heap allocation, deferring cleanup to idle time.
//!
//! The crate is built around a hot-path/idle-path split. On the hot path,
//! [`MemorySupervisor::allocate()`] resolves to a bitmask scan over a bay of
//! pre-constructed objects: find a dead bit, set it, hand back the object that already
//! lives in that slot. No constructor runs, no memory moves, nothing is reset. On the
//! idle path, [`MemorySupervisor::perform_idle_maintenance()`] walks the dead slots and
//! restores each to its canonical factory value, so the next allocation observes a
//! clean object at zero cost.
//!
//! # Key pieces
//!
//! - **Bay** (internal) - a fixed-capacity table of pre-constructed objects plus a
//!   packed liveness bitmask and a rotational search cursor for cache locality.
//! - **[`ObjectPool<T>`]** - chains bays to present an unbounded-looking allocation
//!   surface for one type; grows by whole bays, never per object.
//! - **[`Shelf`]** - one pool per registered type, iterated in order for maintenance.
//! - **[`MemorySupervisor`]** - owns the shelves and the [`MemoryBudget`], a byte
//!   ledger fixed at initialization time as total physical memory minus an OS reserve.
//!   Initialization is lazy: nothing is reserved until the first real need.
//!
//! # Example
//!
//! ```rust
//! use warehouse::MemorySupervisor;
//!
//! #[derive(Default)]
//! struct Enemy {
//!     health: u32,
//!     position: (f32, f32),
//! }
//!
//! let mut supervisor = MemorySupervisor::builder()
//!     .total_memory(64 * 1024 * 1024)
//!     .os_reserve_mib(16)
//!     .register::<Enemy>(Enemy::default)
//!     .build();
//!
//! supervisor.initialize()?;
//!
//! let enemy = supervisor.allocate::<Enemy>()?;
//! supervisor.get_mut(enemy)?.health = 100;
//!
//! supervisor.release(enemy)?;
//! supervisor.perform_idle_maintenance()?;
//! # Ok::<(), warehouse::Error>(())
//! ```
//!
//! # Concurrency
//!
//! Nothing in this crate locks, blocks or suspends. All mutating operations take
//! `&mut self`; the intended usage is a single-threaded tick loop that alternates
//! between allocation ticks and maintenance ticks. Types are thread-mobile ([`Send`]),
//! so a supervisor can be moved to a worker thread or shared behind an external mutex.

mod bay;
mod budget;
mod builder;
mod error;
mod machine;
mod object_pool;
mod shelf;
mod supervisor;

pub use budget::*;
pub use builder::MemorySupervisorBuilder;
pub use error::*;
pub use object_pool::*;
pub use shelf::*;
pub use supervisor::MemorySupervisor;

pub(crate) use bay::*;
pub(crate) use machine::*;
