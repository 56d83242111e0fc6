use std::any::{TypeId, type_name};
use std::fmt;

use foldhash::{HashSet, HashSetExt};

use crate::supervisor::BYTES_PER_MIB;
use crate::{Bindings, BuildTargetBindings, MemorySupervisor, Result, Shelf};

/// Physical memory left to the operating system by default. Enough for a typical OS
/// plus the small amount of ordinary heap this process still uses.
const DEFAULT_OS_RESERVE_MIB: usize = 1024;

/// Default slot count per bay. Chosen so one bay's liveness mask is a couple of words;
/// there is no universally right value, so callers with unusual object sizes should
/// tune it.
const DEFAULT_BAY_CAPACITY: usize = 128;

/// Deferred creation of one pool; run against the owning shelf at ignition time.
pub(crate) type RegisterFn = Box<dyn FnOnce(&mut Shelf) -> Result<()> + Send>;

/// The registrations destined for one shelf.
#[derive(Default)]
pub(crate) struct ShelfPlan {
    pub(crate) registrations: Vec<(TypeId, RegisterFn)>,
}

/// Builder for creating a [`MemorySupervisor`].
///
/// Everything configurable about the supervisor is fixed here: the OS reserve, the bay
/// capacity, the poolable types and their factories, and how the types are grouped into
/// shelves. The built supervisor is inert until
/// [`initialize()`][MemorySupervisor::initialize] ignites it.
///
/// # Examples
///
/// ```
/// use warehouse::MemorySupervisor;
///
/// #[derive(Default)]
/// struct Particle {
///     x: f64,
///     y: f64,
/// }
///
/// let supervisor = MemorySupervisor::builder()
///     .os_reserve_mib(512)
///     .bay_capacity(256)
///     .register::<Particle>(Particle::default)
///     .build();
///
/// assert!(!supervisor.is_initialized());
/// ```
#[must_use]
pub struct MemorySupervisorBuilder {
    os_reserve_bytes: usize,

    bay_capacity: usize,

    total_memory_override: Option<usize>,

    bindings: Box<dyn Bindings>,

    /// One plan per shelf; registrations go to the last entry.
    shelf_plans: Vec<ShelfPlan>,

    /// Guards against the same type being registered twice, on any shelf.
    registered_types: HashSet<TypeId>,
}

impl MemorySupervisorBuilder {
    pub(crate) fn new() -> Self {
        Self {
            os_reserve_bytes: DEFAULT_OS_RESERVE_MIB
                .checked_mul(BYTES_PER_MIB)
                .expect("the default OS reserve is far below the usize range"),
            bay_capacity: DEFAULT_BAY_CAPACITY,
            total_memory_override: None,
            bindings: Box::new(BuildTargetBindings),
            shelf_plans: vec![ShelfPlan::default()],
            registered_types: HashSet::new(),
        }
    }

    /// Sets how much physical memory is left untouched for the operating system when
    /// the budget is computed at ignition time. Defaults to 1024 MiB.
    pub fn os_reserve_mib(mut self, mib: usize) -> Self {
        self.os_reserve_bytes = mib
            .checked_mul(BYTES_PER_MIB)
            .expect("an OS reserve beyond the usize range makes no sense");
        self
    }

    /// Sets the slot count of every bay chained by every pool. Defaults to 128.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn bay_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "bay capacity must be non-zero");

        self.bay_capacity = capacity;
        self
    }

    /// Uses `bytes` as the total physical memory instead of querying the operating
    /// system. Intended for tests and for embedders that know better than the OS query
    /// (containers with memory limits, for example).
    pub fn total_memory(mut self, bytes: usize) -> Self {
        self.total_memory_override = Some(bytes);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_bindings(mut self, bindings: Box<dyn Bindings>) -> Self {
        self.bindings = bindings;
        self
    }

    /// Records type `T` as poolable, with `factory` producing the canonical clean value
    /// used both for up-front slot construction and for the idle scrub.
    ///
    /// The pool itself is only created at ignition time. Registrations land on the
    /// current shelf; see [`shelf()`][Self::shelf].
    ///
    /// # Panics
    ///
    /// Panics if `T` is already registered with this builder.
    pub fn register<T: Send + 'static>(
        mut self,
        factory: impl FnMut() -> T + Send + 'static,
    ) -> Self {
        assert!(
            self.registered_types.insert(TypeId::of::<T>()),
            "{} is already registered with this supervisor",
            type_name::<T>()
        );

        let register: RegisterFn = Box::new(move |shelf| shelf.register::<T>(factory));

        self.shelf_plans
            .last_mut()
            .expect("the builder always holds at least one shelf plan")
            .registrations
            .push((TypeId::of::<T>(), register));

        self
    }

    /// Starts a new shelf; subsequent [`register()`][Self::register] calls land on it.
    ///
    /// Grouping only affects maintenance iteration order and bookkeeping granularity -
    /// all shelves draw on the same budget ledger.
    pub fn shelf(mut self) -> Self {
        self.shelf_plans.push(ShelfPlan::default());
        self
    }

    /// Builds the supervisor. No memory is reserved and no pool exists until
    /// [`initialize()`][MemorySupervisor::initialize] is called on the result.
    #[must_use]
    pub fn build(self) -> MemorySupervisor {
        MemorySupervisor::new_inner(
            self.os_reserve_bytes,
            self.bay_capacity,
            self.total_memory_override,
            self.bindings,
            self.shelf_plans,
        )
    }
}

impl fmt::Debug for MemorySupervisorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySupervisorBuilder")
            .field("os_reserve_bytes", &self.os_reserve_bytes)
            .field("bay_capacity", &self.bay_capacity)
            .field("total_memory_override", &self.total_memory_override)
            .field("shelf_count", &self.shelf_plans.len())
            .field("registered_types", &self.registered_types.len())
            .finish_non_exhaustive()
    }
}
