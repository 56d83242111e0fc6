use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

use foldhash::{HashMap, HashMapExt};

use crate::{Error, Handle, MemoryBudget, ObjectPool, Result};

/// Object-safe view of one typed pool, for uniform maintenance iteration.
pub(crate) trait ShelfPool: Any + Send + fmt::Debug {
    fn idle_maintain(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Send + 'static> ShelfPool for ObjectPool<T> {
    fn idle_maintain(&mut self) {
        Self::idle_maintain(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// An ordered collection of [`ObjectPool`]s, one per registered type, drawing on one
/// shared chunk of the reserved memory budget.
///
/// Typed calls are routed to the pool keyed by the type's identity; requesting a type
/// that was never registered is a configuration error
/// ([`UnknownType`][Error::UnknownType]), not something the shelf retries or repairs.
///
/// Maintenance iterates the pools in registration order, which keeps the idle-tick work
/// deterministic.
#[derive(Debug)]
pub struct Shelf {
    /// Pools in registration order.
    pools: Vec<Box<dyn ShelfPool>>,

    /// Type identity to position in `pools`.
    /// We use foldhash for better performance with small hash tables.
    pool_index_by_type: HashMap<TypeId, usize>,

    bay_capacity: usize,

    budget: Arc<MemoryBudget>,
}

impl Shelf {
    /// Creates an empty shelf whose pools will chain bays of `bay_capacity` slots,
    /// charged against `budget`.
    ///
    /// # Panics
    ///
    /// Panics if `bay_capacity` is zero.
    #[must_use]
    pub fn new(bay_capacity: usize, budget: Arc<MemoryBudget>) -> Self {
        assert!(bay_capacity > 0, "Shelf must have non-zero bay capacity");

        Self {
            pools: Vec::new(),
            pool_index_by_type: HashMap::new(),
            bay_capacity,
            budget,
        }
    }

    /// Creates the pool for type `T`, including its eagerly constructed first bay.
    ///
    /// # Errors
    ///
    /// Fails with [`BudgetExceeded`][Error::BudgetExceeded] when the budget cannot cover
    /// the pool's first bay. The shelf is unchanged in that case.
    ///
    /// # Panics
    ///
    /// Panics if `T` is already registered on this shelf.
    pub fn register<T: Send + 'static>(
        &mut self,
        factory: impl FnMut() -> T + Send + 'static,
    ) -> Result<()> {
        assert!(
            !self.pool_index_by_type.contains_key(&TypeId::of::<T>()),
            "{} is already registered on this shelf",
            type_name::<T>()
        );

        let pool = ObjectPool::new(self.bay_capacity, Arc::clone(&self.budget), factory)?;

        let index = self.pools.len();
        self.pools.push(Box::new(pool));
        self.pool_index_by_type.insert(TypeId::of::<T>(), index);

        Ok(())
    }

    /// Whether a pool exists for type `T`.
    #[must_use]
    pub fn is_registered<T: 'static>(&self) -> bool {
        self.pool_index_by_type.contains_key(&TypeId::of::<T>())
    }

    /// The number of registered pools.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    fn pool<T: Send + 'static>(&self) -> Result<&ObjectPool<T>> {
        let index = *self
            .pool_index_by_type
            .get(&TypeId::of::<T>())
            .ok_or(Error::UnknownType {
                type_name: type_name::<T>(),
            })?;

        Ok(self
            .pools
            .get(index)
            .expect("index map entries always point at an existing pool")
            .as_any()
            .downcast_ref::<ObjectPool<T>>()
            .expect("the pool registered under a TypeId is always of the matching type"))
    }

    fn pool_mut<T: Send + 'static>(&mut self) -> Result<&mut ObjectPool<T>> {
        let index = *self
            .pool_index_by_type
            .get(&TypeId::of::<T>())
            .ok_or(Error::UnknownType {
                type_name: type_name::<T>(),
            })?;

        Ok(self
            .pools
            .get_mut(index)
            .expect("index map entries always point at an existing pool")
            .as_any_mut()
            .downcast_mut::<ObjectPool<T>>()
            .expect("the pool registered under a TypeId is always of the matching type"))
    }

    /// Hands out a slot from the pool for type `T`.
    ///
    /// # Errors
    ///
    /// Fails with [`UnknownType`][Error::UnknownType] when no pool is registered for
    /// `T`, or with [`BudgetExceeded`][Error::BudgetExceeded] when the pool would need a
    /// new bay the budget cannot cover.
    pub fn allocate<T: Send + 'static>(&mut self) -> Result<Handle<T>> {
        self.pool_mut::<T>()?.allocate()
    }

    /// Returns an object to the pool for type `T`.
    ///
    /// # Errors
    ///
    /// Fails with [`UnknownType`][Error::UnknownType] when no pool is registered for `T`
    /// and with [`InvalidHandle`][Error::InvalidHandle] when the handle does not
    /// identify an alive object.
    pub fn release<T: Send + 'static>(&mut self, handle: Handle<T>) -> Result<()> {
        self.pool_mut::<T>()?.release(handle)
    }

    /// Shared access to an alive object in the pool for type `T`.
    ///
    /// # Errors
    ///
    /// Fails with [`UnknownType`][Error::UnknownType] or
    /// [`InvalidHandle`][Error::InvalidHandle], as for [`release()`][Self::release].
    pub fn get<T: Send + 'static>(&self, handle: Handle<T>) -> Result<&T> {
        self.pool::<T>()?.get(handle)
    }

    /// Exclusive access to an alive object in the pool for type `T`.
    ///
    /// # Errors
    ///
    /// Fails with [`UnknownType`][Error::UnknownType] or
    /// [`InvalidHandle`][Error::InvalidHandle], as for [`release()`][Self::release].
    pub fn get_mut<T: Send + 'static>(&mut self, handle: Handle<T>) -> Result<&mut T> {
        self.pool_mut::<T>()?.get_mut(handle)
    }

    /// Runs the idle scrub on every pool, in registration order.
    pub fn idle_maintain(&mut self) {
        for pool in &mut self.pools {
            pool.idle_maintain();
        }
    }
}
