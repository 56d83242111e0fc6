use std::any::{TypeId, type_name};
use std::fmt;
use std::sync::Arc;

use foldhash::{HashMap, HashMapExt};

use crate::builder::ShelfPlan;
use crate::{Bindings, Error, Handle, MemoryBudget, MemorySupervisorBuilder, Result, Shelf};

pub(crate) const BYTES_PER_MIB: usize = 1024 * 1024;

/// The owner of the reserved memory budget and the shelf set built over it.
///
/// A supervisor is created cheap and inert by [`builder()`][Self::builder]. Nothing is
/// reserved and no pool exists until [`initialize()`][Self::initialize] runs - the
/// intended pattern is lazy ignition, where the driving scheduler initializes on the
/// first real allocation event (or on an explicit "enter active mode" transition), so
/// that programs which never allocate never pay for the reservation.
///
/// After ignition the reservable budget - total physical memory minus the OS reserve -
/// is fixed for the lifetime of the supervisor, and the shelves recorded at build time
/// subdivide it. There is no teardown short of dropping the supervisor.
///
/// Create one supervisor in the application's composition root and pass it to everything
/// that allocates; the type deliberately has no process-global instance.
///
/// # Example
///
/// ```rust
/// use warehouse::MemorySupervisor;
///
/// #[derive(Debug, Default)]
/// struct Projectile {
///     x: f32,
///     y: f32,
///     live_frames: u32,
/// }
///
/// let mut supervisor = MemorySupervisor::builder()
///     .total_memory(64 * 1024 * 1024) // fixed total, so the example is deterministic
///     .os_reserve_mib(16)
///     .register::<Projectile>(Projectile::default)
///     .build();
///
/// // Active tick: first allocation ignites the reservation.
/// supervisor.initialize()?;
/// let projectile = supervisor.allocate::<Projectile>()?;
/// supervisor.get_mut(projectile)?.live_frames = 1;
///
/// // The object's lifetime ends; the slot becomes reusable.
/// supervisor.release(projectile)?;
///
/// // Idle tick: scrub released slots back to their canonical state.
/// supervisor.perform_idle_maintenance()?;
/// # Ok::<(), warehouse::Error>(())
/// ```
///
/// # Concurrency
///
/// No internal locks; every mutating operation takes `&mut self`. The reference usage is
/// a single-threaded tick loop alternating between allocation ticks and maintenance
/// ticks. Sharing across threads requires an external mutex around the supervisor.
pub struct MemorySupervisor {
    os_reserve_bytes: usize,

    bay_capacity: usize,

    total_memory_override: Option<usize>,

    bindings: Box<dyn Bindings>,

    /// Registrations recorded at build time, consumed by ignition.
    shelf_plans: Vec<ShelfPlan>,

    /// `Some` once ignited. The transition is one-way.
    state: Option<IgnitedState>,
}

#[derive(Debug)]
struct IgnitedState {
    shelves: Vec<Shelf>,

    shelf_index_by_type: HashMap<TypeId, usize>,

    budget: Arc<MemoryBudget>,
}

impl IgnitedState {
    fn shelf_of<T: 'static>(&self) -> Result<&Shelf> {
        let index = *self
            .shelf_index_by_type
            .get(&TypeId::of::<T>())
            .ok_or(Error::UnknownType {
                type_name: type_name::<T>(),
            })?;

        Ok(self
            .shelves
            .get(index)
            .expect("shelf map entries always point at an existing shelf"))
    }

    fn shelf_of_mut<T: 'static>(&mut self) -> Result<&mut Shelf> {
        let index = *self
            .shelf_index_by_type
            .get(&TypeId::of::<T>())
            .ok_or(Error::UnknownType {
                type_name: type_name::<T>(),
            })?;

        Ok(self
            .shelves
            .get_mut(index)
            .expect("shelf map entries always point at an existing shelf"))
    }
}

impl MemorySupervisor {
    /// Starts building a supervisor: OS reserve, bay capacity and the set of poolable
    /// types are all fixed at build time.
    pub fn builder() -> MemorySupervisorBuilder {
        MemorySupervisorBuilder::new()
    }

    #[must_use]
    pub(crate) fn new_inner(
        os_reserve_bytes: usize,
        bay_capacity: usize,
        total_memory_override: Option<usize>,
        bindings: Box<dyn Bindings>,
        shelf_plans: Vec<ShelfPlan>,
    ) -> Self {
        Self {
            os_reserve_bytes,
            bay_capacity,
            total_memory_override,
            bindings,
            shelf_plans,
            state: None,
        }
    }

    /// Whether [`initialize()`][Self::initialize] has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    /// The budget ledger, once ignited.
    #[must_use]
    pub fn budget(&self) -> Option<&MemoryBudget> {
        self.state.as_ref().map(|state| &*state.budget)
    }

    /// Fixes the memory budget and builds the shelf set.
    ///
    /// Computes the reservable budget as total physical memory minus the configured OS
    /// reserve, then creates one pool (with its eagerly constructed first bay) for every
    /// registered type. Calling this on an already-initialized supervisor is a no-op
    /// that returns `Ok`, so the driving scheduler may call it on every activation
    /// without tracking whether it already did.
    ///
    /// # Errors
    ///
    /// Fails with [`BudgetExceeded`][Error::BudgetExceeded] when the OS reserve is
    /// larger than total physical memory, or when the budget cannot cover the first bay
    /// of every registered pool. A failed ignition consumes the recorded registrations
    /// and leaves the supervisor uninitialized; treat it as a fatal configuration error
    /// rather than something to retry with the same parameters.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state.is_some() {
            return Ok(());
        }

        let total_memory = self
            .total_memory_override
            .unwrap_or_else(|| self.bindings.total_physical_memory());

        let budget_bytes =
            total_memory
                .checked_sub(self.os_reserve_bytes)
                .ok_or(Error::BudgetExceeded {
                    requested_bytes: self.os_reserve_bytes,
                    remaining_bytes: total_memory,
                })?;

        let budget = Arc::new(MemoryBudget::new(budget_bytes));

        let plans = std::mem::take(&mut self.shelf_plans);

        let mut shelves = Vec::with_capacity(plans.len());
        let mut shelf_index_by_type = HashMap::new();

        for (shelf_index, plan) in plans.into_iter().enumerate() {
            let mut shelf = Shelf::new(self.bay_capacity, Arc::clone(&budget));

            for (type_id, register) in plan.registrations {
                register(&mut shelf)?;
                shelf_index_by_type.insert(type_id, shelf_index);
            }

            shelves.push(shelf);
        }

        self.state = Some(IgnitedState {
            shelves,
            shelf_index_by_type,
            budget,
        });

        Ok(())
    }

    /// Hands out a slot for one object of type `T`.
    ///
    /// This is the hot path: a bitmask scan in the responsible pool's active bay, plus a
    /// whole-bay growth step in the rare case every bay is full. Nothing is constructed.
    ///
    /// # Errors
    ///
    /// Fails with [`NotInitialized`][Error::NotInitialized] before ignition, with
    /// [`UnknownType`][Error::UnknownType] when `T` was never registered and with
    /// [`BudgetExceeded`][Error::BudgetExceeded] when growth would overdraw the budget.
    pub fn allocate<T: Send + 'static>(&mut self) -> Result<Handle<T>> {
        self.ignited_mut()?.shelf_of_mut::<T>()?.allocate()
    }

    /// Returns the object behind `handle` to its pool when its logical lifetime ends.
    ///
    /// # Errors
    ///
    /// Fails with [`NotInitialized`][Error::NotInitialized],
    /// [`UnknownType`][Error::UnknownType] or [`InvalidHandle`][Error::InvalidHandle]
    /// (including double-release, which is always reported).
    pub fn release<T: Send + 'static>(&mut self, handle: Handle<T>) -> Result<()> {
        self.ignited_mut()?.shelf_of_mut::<T>()?.release(handle)
    }

    /// Shared access to the alive object behind `handle`.
    ///
    /// # Errors
    ///
    /// Fails with [`NotInitialized`][Error::NotInitialized],
    /// [`UnknownType`][Error::UnknownType] or [`InvalidHandle`][Error::InvalidHandle].
    pub fn get<T: Send + 'static>(&self, handle: Handle<T>) -> Result<&T> {
        self.ignited()?.shelf_of::<T>()?.get(handle)
    }

    /// Exclusive access to the alive object behind `handle`.
    ///
    /// # Errors
    ///
    /// Fails with [`NotInitialized`][Error::NotInitialized],
    /// [`UnknownType`][Error::UnknownType] or [`InvalidHandle`][Error::InvalidHandle].
    pub fn get_mut<T: Send + 'static>(&mut self, handle: Handle<T>) -> Result<&mut T> {
        self.ignited_mut()?.shelf_of_mut::<T>()?.get_mut(handle)
    }

    /// Runs the idle scrub across every shelf.
    ///
    /// Call during ticks with no allocation pressure. Each call scrubs everything; the
    /// work is not amortized across ticks.
    ///
    /// # Errors
    ///
    /// Fails with [`NotInitialized`][Error::NotInitialized] before ignition.
    pub fn perform_idle_maintenance(&mut self) -> Result<()> {
        let state = self.ignited_mut()?;

        for shelf in &mut state.shelves {
            shelf.idle_maintain();
        }

        Ok(())
    }

    fn ignited(&self) -> Result<&IgnitedState> {
        self.state.as_ref().ok_or(Error::NotInitialized)
    }

    fn ignited_mut(&mut self) -> Result<&mut IgnitedState> {
        self.state.as_mut().ok_or(Error::NotInitialized)
    }
}

impl fmt::Debug for MemorySupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySupervisor")
            .field("os_reserve_bytes", &self.os_reserve_bytes)
            .field("bay_capacity", &self.bay_capacity)
            .field("initialized", &self.state.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::MockBindings;

    assert_impl_all!(MemorySupervisor: Send, Debug);

    const MIB: usize = BYTES_PER_MIB;

    #[derive(Debug, Default, PartialEq)]
    struct Agent {
        energy: u64,
    }

    fn small_supervisor() -> MemorySupervisor {
        MemorySupervisor::builder()
            .total_memory(64 * MIB)
            .os_reserve_mib(16)
            .bay_capacity(64)
            .register::<Agent>(Agent::default)
            .build()
    }

    #[test]
    fn starts_uninitialized_and_inert() {
        let supervisor = small_supervisor();

        assert!(!supervisor.is_initialized());
        assert!(supervisor.budget().is_none());
    }

    #[test]
    fn operations_before_ignition_are_not_initialized() {
        let mut supervisor = small_supervisor();

        assert!(matches!(
            supervisor.allocate::<Agent>(),
            Err(Error::NotInitialized)
        ));
        assert!(matches!(
            supervisor.perform_idle_maintenance(),
            Err(Error::NotInitialized)
        ));
    }

    #[test]
    fn ignition_fixes_the_budget() {
        let mut supervisor = small_supervisor();

        supervisor.initialize().unwrap();

        let budget = supervisor.budget().unwrap();
        assert_eq!(budget.total_bytes(), 48 * MIB);

        // The one registered pool has already charged its first bay.
        assert_eq!(
            budget.remaining_bytes(),
            48 * MIB - 64 * size_of::<Agent>()
        );
    }

    #[test]
    fn ignition_is_idempotent() {
        let mut supervisor = small_supervisor();

        supervisor.initialize().unwrap();
        let handle = supervisor.allocate::<Agent>().unwrap();
        supervisor.get_mut(handle).unwrap().energy = 9;

        // A repeated initialize is a no-op; live allocations survive it.
        supervisor.initialize().unwrap();

        assert_eq!(supervisor.get(handle).unwrap().energy, 9);
    }

    #[test]
    fn allocate_release_round_trip() {
        let mut supervisor = small_supervisor();
        supervisor.initialize().unwrap();

        let handle = supervisor.allocate::<Agent>().unwrap();
        supervisor.get_mut(handle).unwrap().energy = 100;

        supervisor.release(handle).unwrap();

        assert!(matches!(
            supervisor.get(handle),
            Err(Error::InvalidHandle { .. })
        ));
        assert!(matches!(
            supervisor.release(handle),
            Err(Error::InvalidHandle { .. })
        ));
    }

    #[test]
    fn unregistered_type_is_unknown_type() {
        let mut supervisor = small_supervisor();
        supervisor.initialize().unwrap();

        assert!(matches!(
            supervisor.allocate::<String>(),
            Err(Error::UnknownType { .. })
        ));
    }

    #[test]
    fn maintenance_scrubs_released_objects() {
        let mut supervisor = small_supervisor();
        supervisor.initialize().unwrap();

        let handle = supervisor.allocate::<Agent>().unwrap();
        supervisor.get_mut(handle).unwrap().energy = 123;
        supervisor.release(handle).unwrap();

        supervisor.perform_idle_maintenance().unwrap();

        let handle = supervisor.allocate::<Agent>().unwrap();
        assert_eq!(*supervisor.get(handle).unwrap(), Agent::default());
    }

    #[test]
    fn reserve_larger_than_total_memory_is_budget_exceeded() {
        let mut supervisor = MemorySupervisor::builder()
            .total_memory(512 * MIB)
            .os_reserve_mib(1024)
            .register::<Agent>(Agent::default)
            .build();

        assert!(matches!(
            supervisor.initialize(),
            Err(Error::BudgetExceeded { .. })
        ));
        assert!(!supervisor.is_initialized());
    }

    #[test]
    fn physical_memory_is_queried_when_no_override_is_set() {
        let mut bindings = MockBindings::new();
        bindings
            .expect_total_physical_memory()
            .return_const(4096 * MIB);

        let mut supervisor = MemorySupervisor::builder()
            .with_bindings(Box::new(bindings))
            .os_reserve_mib(1024)
            .register::<Agent>(Agent::default)
            .build();

        supervisor.initialize().unwrap();

        assert_eq!(supervisor.budget().unwrap().total_bytes(), 3072 * MIB);
    }

    #[test]
    fn types_can_be_grouped_onto_separate_shelves() {
        #[derive(Debug, Default)]
        struct Fox {
            speed: u32,
        }

        let mut supervisor = MemorySupervisor::builder()
            .total_memory(64 * MIB)
            .os_reserve_mib(16)
            .register::<Agent>(Agent::default)
            .shelf()
            .register::<Fox>(Fox::default)
            .build();

        supervisor.initialize().unwrap();

        assert_eq!(supervisor.state.as_ref().unwrap().shelves.len(), 2);

        let agent = supervisor.allocate::<Agent>().unwrap();
        let fox = supervisor.allocate::<Fox>().unwrap();

        supervisor.get_mut(fox).unwrap().speed = 3;
        supervisor.release(agent).unwrap();
        supervisor.release(fox).unwrap();
    }

    #[test]
    fn budget_is_shared_across_shelves() {
        #[derive(Debug, Default)]
        struct Fox {
            speed: u64,
        }

        // Room for exactly the two first bays, nothing more.
        let bay_bytes = 64 * size_of::<Agent>();
        let mut supervisor = MemorySupervisor::builder()
            .total_memory(MIB + 2 * bay_bytes)
            .os_reserve_mib(1)
            .bay_capacity(64)
            .register::<Agent>(Agent::default)
            .shelf()
            .register::<Fox>(Fox::default)
            .build();

        supervisor.initialize().unwrap();
        assert_eq!(supervisor.budget().unwrap().remaining_bytes(), 0);

        // Filling either pool beyond its first bay must fail - the ledger is shared.
        for _ in 0..64 {
            _ = supervisor.allocate::<Agent>().unwrap();
        }
        assert!(matches!(
            supervisor.allocate::<Agent>(),
            Err(Error::BudgetExceeded { .. })
        ));
    }
}
