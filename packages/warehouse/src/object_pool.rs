use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use num_integer::Integer;

use crate::{Bay, Error, MemoryBudget, Result};

/// A single logical, unbounded-looking allocation surface for objects of type `T`,
/// assembled from fixed-capacity [`Bay`]s.
///
/// The pool starts with one eagerly constructed bay and chains a new bay whenever every
/// existing bay is full. Chaining is the only point where new memory is reserved after
/// pool construction - growth happens one whole bay at a time, never per object, and
/// every bay's storage bytes are charged against the shared [`MemoryBudget`] before the
/// bay is built.
///
/// Allocation prefers the most recently active bay, then probes the remaining bays in
/// rotation, mirroring the slot-level cursor inside each bay.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
///
/// use warehouse::{MemoryBudget, ObjectPool};
///
/// let budget = Arc::new(MemoryBudget::unlimited());
/// let mut pool = ObjectPool::new(128, budget, || 0_u64)?;
///
/// let handle = pool.allocate()?;
/// *pool.get_mut(handle)? = 42;
///
/// assert_eq!(*pool.get(handle)?, 42);
///
/// pool.release(handle)?;
/// # Ok::<(), warehouse::Error>(())
/// ```
///
/// # Concurrency
///
/// The pool holds no locks; all mutating operations take `&mut self`, so the
/// single-owner discipline is compiler-enforced. Wrap the pool in a mutex if it must be
/// shared across threads.
pub struct ObjectPool<T> {
    /// The bays that provide the storage of the pool, in creation order. Bays are never
    /// removed: handles encode bay positions, and the capacity they represent stays
    /// reserved for the lifetime of the pool.
    bays: Vec<Bay<T>>,

    /// Constructs the canonical clean value, both for bay pre-construction and for the
    /// idle scrub of dead slots.
    factory: Box<dyn FnMut() -> T + Send>,

    /// Every bay in this pool has exactly this capacity. Handles rely on it to translate
    /// between a flat pool index and (bay, slot) coordinates.
    bay_capacity: usize,

    /// Index of the bay that most recently satisfied an allocation. The next allocation
    /// probes this bay first.
    active_bay: usize,

    budget: Arc<MemoryBudget>,
}

/// An opaque handle to an object handed out by an [`ObjectPool`].
///
/// The handle identifies both the bay and the slot within it; it is the only currency
/// accepted by [`release()`][ObjectPool::release], [`get()`][ObjectPool::get] and
/// [`get_mut()`][ObjectPool::get_mut]. Handles are `Copy` and may be stored freely.
///
/// A handle is only meaningful to the pool that issued it. After the object is released
/// the pool may reuse the same handle for a later allocation.
pub struct Handle<T> {
    index_in_pool: usize,

    _type: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    #[must_use]
    fn from_coordinates(bay_index: usize, index_in_bay: usize, bay_capacity: usize) -> Self {
        Self {
            index_in_pool: bay_index
                .checked_mul(bay_capacity)
                .and_then(|base| base.checked_add(index_in_bay))
                .expect("a handle beyond the range of virtual memory is impossible to reach from a valid history"),
            _type: PhantomData,
        }
    }

    #[must_use]
    fn coordinates(&self, bay_capacity: usize) -> (usize, usize) {
        self.index_in_pool.div_rem(&bay_capacity)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index_in_pool == other.index_in_pool
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("index_in_pool", &self.index_in_pool)
            .finish()
    }
}

impl<T> ObjectPool<T> {
    /// Creates a pool whose bays hold `bay_capacity` objects each, charging the first
    /// bay's storage to `budget` and pre-constructing its slots from `factory`.
    ///
    /// # Errors
    ///
    /// Fails with [`BudgetExceeded`][Error::BudgetExceeded] when the budget cannot cover
    /// even the first bay.
    ///
    /// # Panics
    ///
    /// Panics if `bay_capacity` is zero or `T` is zero-sized.
    pub fn new(
        bay_capacity: usize,
        budget: Arc<MemoryBudget>,
        factory: impl FnMut() -> T + Send + 'static,
    ) -> Result<Self> {
        assert!(bay_capacity > 0, "ObjectPool must have non-zero bay capacity");

        let mut factory: Box<dyn FnMut() -> T + Send> = Box::new(factory);

        budget.charge(Self::bay_bytes(bay_capacity))?;
        let first_bay = Bay::new(bay_capacity, factory.as_mut());

        Ok(Self {
            bays: vec![first_bay],
            factory,
            bay_capacity,
            active_bay: 0,
            budget,
        })
    }

    #[must_use]
    fn bay_bytes(bay_capacity: usize) -> usize {
        bay_capacity
            .checked_mul(size_of::<T>())
            .expect("a single bay larger than the address space cannot be constructed")
    }

    /// The number of objects currently handed out.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub fn len(&self) -> usize {
        self.bays.iter().map(Bay::len).sum()
    }

    /// Whether no objects are currently handed out.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bays.iter().all(Bay::is_empty)
    }

    /// The number of objects the pool can hand out without chaining another bay.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bays
            .len()
            .checked_mul(self.bay_capacity)
            .expect("total capacity is bounded by the memory budget, which fits in usize")
    }

    /// The number of bays chained so far.
    #[must_use]
    pub fn bay_count(&self) -> usize {
        self.bays.len()
    }

    /// The fixed per-bay slot count this pool was created with.
    #[must_use]
    pub fn bay_capacity(&self) -> usize {
        self.bay_capacity
    }

    /// Hands out a slot, chaining a new bay if every existing bay is full.
    ///
    /// The returned handle must accompany every later [`release()`][Self::release] or
    /// access call for this object; the pool does not track object identity on its own.
    ///
    /// The object behind the handle is whatever the slot already contained - a factory
    /// value if the slot was never used or was scrubbed, the previous user's leftovers
    /// otherwise. Nothing is constructed on this path.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::sync::Arc;
    ///
    /// use warehouse::{MemoryBudget, ObjectPool};
    ///
    /// let mut pool = ObjectPool::new(64, Arc::new(MemoryBudget::unlimited()), String::new)?;
    ///
    /// // Fill the first bay completely; the 65th allocation chains a second bay.
    /// for _ in 0..65 {
    ///     _ = pool.allocate()?;
    /// }
    ///
    /// assert_eq!(pool.bay_count(), 2);
    /// # Ok::<(), warehouse::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Fails with [`BudgetExceeded`][Error::BudgetExceeded] when every bay is full and
    /// the budget cannot cover another one.
    pub fn allocate(&mut self) -> Result<Handle<T>> {
        let bay_count = self.bays.len();

        for probe in 0..bay_count {
            let bay_index = probe
                .checked_add(self.active_bay)
                .expect("bay count and active bay index are bounded by the memory budget")
                % bay_count;

            let bay = self
                .bays
                .get_mut(bay_index)
                .expect("bay index was reduced modulo bay count");

            match bay.take() {
                Ok((slot_index, _)) => {
                    self.active_bay = bay_index;
                    return Ok(Handle::from_coordinates(
                        bay_index,
                        slot_index,
                        self.bay_capacity,
                    ));
                }
                Err(Error::PoolExhausted { .. }) => {}
                Err(other) => return Err(other),
            }
        }

        // Every bay is full - grow by one whole bay.
        self.budget.charge(Self::bay_bytes(self.bay_capacity))?;

        let Self {
            bays,
            factory,
            bay_capacity,
            ..
        } = self;

        let mut bay = Bay::new(*bay_capacity, factory.as_mut());
        let (slot_index, _) = bay
            .take()
            .expect("a freshly created bay always has a free slot");

        bays.push(bay);

        let new_bay_index = bays
            .len()
            .checked_sub(1)
            .expect("a bay was just pushed, so the count is at least 1");

        self.active_bay = new_bay_index;

        Ok(Handle::from_coordinates(
            new_bay_index,
            slot_index,
            self.bay_capacity,
        ))
    }

    /// Returns the object behind `handle` to the pool.
    ///
    /// The object's data is left as-is until the next [`idle_maintain()`][Self::idle_maintain].
    ///
    /// # Errors
    ///
    /// Fails with [`InvalidHandle`][Error::InvalidHandle] when the handle does not
    /// identify an alive slot in this pool - including a second release of the same
    /// handle, which is reported rather than silently ignored.
    pub fn release(&mut self, handle: Handle<T>) -> Result<()> {
        let (bay_index, index_in_bay) = handle.coordinates(self.bay_capacity);

        let Some(bay) = self.bays.get_mut(bay_index) else {
            return Err(Error::InvalidHandle {
                index: handle.index_in_pool,
                problem: format!("handle points at bay {bay_index}, which does not exist"),
            });
        };

        bay.free(index_in_bay)
    }

    /// Shared access to the alive object behind `handle`.
    ///
    /// # Errors
    ///
    /// Fails with [`InvalidHandle`][Error::InvalidHandle] when the handle does not
    /// identify an alive slot in this pool.
    pub fn get(&self, handle: Handle<T>) -> Result<&T> {
        let (bay_index, index_in_bay) = handle.coordinates(self.bay_capacity);

        let Some(bay) = self.bays.get(bay_index) else {
            return Err(Error::InvalidHandle {
                index: handle.index_in_pool,
                problem: format!("handle points at bay {bay_index}, which does not exist"),
            });
        };

        bay.get(index_in_bay)
    }

    /// Exclusive access to the alive object behind `handle`.
    ///
    /// # Errors
    ///
    /// Fails with [`InvalidHandle`][Error::InvalidHandle] when the handle does not
    /// identify an alive slot in this pool.
    pub fn get_mut(&mut self, handle: Handle<T>) -> Result<&mut T> {
        let (bay_index, index_in_bay) = handle.coordinates(self.bay_capacity);

        let Some(bay) = self.bays.get_mut(bay_index) else {
            return Err(Error::InvalidHandle {
                index: handle.index_in_pool,
                problem: format!("handle points at bay {bay_index}, which does not exist"),
            });
        };

        bay.get_mut(index_in_bay)
    }

    /// Runs the idle scrub on every owned bay, resetting dead slots to the factory's
    /// canonical value.
    ///
    /// Call this only during ticks with no allocation pressure; it is the slow half of
    /// the hot-path/idle-path split.
    pub fn idle_maintain(&mut self) {
        let Self { bays, factory, .. } = self;

        for bay in bays.iter_mut() {
            bay.idle_scrub(factory.as_mut());
        }
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("bay_count", &self.bays.len())
            .field("bay_capacity", &self.bay_capacity)
            .field("active_bay", &self.active_bay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::indexing_slicing,
        reason = "we do not need to worry about these things when writing test code"
    )]

    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(ObjectPool<u32>: Send, Debug);
    assert_impl_all!(Handle<u32>: Send, Sync, Copy, Debug);

    fn u32_pool(bay_capacity: usize) -> ObjectPool<u32> {
        ObjectPool::new(bay_capacity, Arc::new(MemoryBudget::unlimited()), || 0).unwrap()
    }

    #[test]
    fn smoke_test() {
        let mut pool = u32_pool(64);

        assert_eq!(pool.len(), 0);
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 64);

        let handle_a = pool.allocate().unwrap();
        let handle_b = pool.allocate().unwrap();

        *pool.get_mut(handle_a).unwrap() = 42;
        *pool.get_mut(handle_b).unwrap() = 43;

        assert_eq!(*pool.get(handle_a).unwrap(), 42);
        assert_eq!(*pool.get(handle_b).unwrap(), 43);
        assert_eq!(pool.len(), 2);

        pool.release(handle_a).unwrap();
        pool.release(handle_b).unwrap();

        assert!(pool.is_empty());
    }

    #[test]
    fn exhausted_bay_chains_a_second_bay() {
        let mut pool = u32_pool(64);

        for _ in 0..64 {
            _ = pool.allocate().unwrap();
        }

        assert_eq!(pool.bay_count(), 1);

        // The 65th allocation lands in a transparently chained second bay.
        let overflow = pool.allocate().unwrap();

        assert_eq!(pool.bay_count(), 2);
        assert_eq!(overflow.index_in_pool, 64);

        // The handle identifies the second bay on release.
        pool.release(overflow).unwrap();
        assert_eq!(pool.len(), 64);

        // And the freed slot in the second bay is handed out again.
        let retaken = pool.allocate().unwrap();
        assert_eq!(retaken, overflow);
    }

    #[test]
    fn allocation_prefers_most_recently_active_bay() {
        let mut pool = u32_pool(64);

        let first_in_bay_0 = pool.allocate().unwrap();
        for _ in 0..63 {
            _ = pool.allocate().unwrap();
        }

        let first_in_bay_1 = pool.allocate().unwrap();
        assert_eq!(pool.bay_count(), 2);

        // Holes in both bays; the active bay (bay 1) wins.
        pool.release(first_in_bay_0).unwrap();
        pool.release(first_in_bay_1).unwrap();

        let next = pool.allocate().unwrap();
        assert_eq!(next, first_in_bay_1);
    }

    #[test]
    fn release_with_foreign_handle_is_invalid_handle() {
        let mut pool = u32_pool(64);

        let bogus = Handle::<u32> {
            index_in_pool: 9_999_999,
            _type: PhantomData,
        };

        assert!(matches!(
            pool.release(bogus),
            Err(Error::InvalidHandle { .. })
        ));
    }

    #[test]
    fn double_release_is_invalid_handle() {
        let mut pool = u32_pool(64);

        let handle = pool.allocate().unwrap();
        pool.release(handle).unwrap();

        assert!(matches!(
            pool.release(handle),
            Err(Error::InvalidHandle { .. })
        ));
    }

    #[test]
    fn budget_refuses_first_bay() {
        // 64 slots of u32 need 256 bytes; only 255 are available.
        let budget = Arc::new(MemoryBudget::new(255));

        let result = ObjectPool::new(64, budget, || 0_u32);

        assert!(matches!(result, Err(Error::BudgetExceeded { .. })));
    }

    #[test]
    fn budget_refuses_chaining_when_drained() {
        // Exactly one bay of 64 u32 values fits.
        let budget = Arc::new(MemoryBudget::new(256));
        let mut pool = ObjectPool::new(64, budget, || 0_u32).unwrap();

        for _ in 0..64 {
            _ = pool.allocate().unwrap();
        }

        assert!(matches!(
            pool.allocate(),
            Err(Error::BudgetExceeded {
                requested_bytes: 256,
                remaining_bytes: 0
            })
        ));

        // Releasing makes the existing capacity usable again without growing.
        let handle = Handle::<u32> {
            index_in_pool: 7,
            _type: PhantomData,
        };
        pool.release(handle).unwrap();
        assert_eq!(pool.allocate().unwrap(), handle);
    }

    #[test]
    fn idle_maintain_scrubs_every_bay() {
        let mut pool = u32_pool(64);

        let mut handles = Vec::new();
        for _ in 0..65 {
            handles.push(pool.allocate().unwrap());
        }
        assert_eq!(pool.bay_count(), 2);

        for handle in &handles {
            *pool.get_mut(*handle).unwrap() = 1234;
        }

        // One hole per bay.
        pool.release(handles[0]).unwrap();
        pool.release(handles[64]).unwrap();

        pool.idle_maintain();

        // Alive objects kept their data.
        assert_eq!(*pool.get(handles[1]).unwrap(), 1234);

        // Scrubbing does not resurrect anything.
        assert!(pool.get(handles[0]).is_err());

        // The scrubbed slot in the active bay comes back clean.
        let reused_bay_1 = pool.allocate().unwrap();
        assert_eq!(reused_bay_1, handles[64]);
        assert_eq!(*pool.get(reused_bay_1).unwrap(), 0);

        // Fill the rest of bay 1 so the next allocation wraps to the hole in bay 0.
        for _ in 0..63 {
            _ = pool.allocate().unwrap();
        }

        let reused_bay_0 = pool.allocate().unwrap();
        assert_eq!(reused_bay_0, handles[0]);
        assert_eq!(*pool.get(reused_bay_0).unwrap(), 0);
    }

    #[test]
    fn handles_are_copy_and_comparable() {
        let mut pool = u32_pool(64);

        let handle = pool.allocate().unwrap();
        let copy = handle;

        assert_eq!(handle, copy);
        assert!(format!("{handle:?}").contains("u32"));
    }

    #[test]
    fn factory_values_survive_until_first_write() {
        let mut pool =
            ObjectPool::new(8, Arc::new(MemoryBudget::unlimited()), || 77_u32).unwrap();

        let handle = pool.allocate().unwrap();

        assert_eq!(*pool.get(handle).unwrap(), 77);
    }

    #[test]
    #[should_panic]
    fn zero_bay_capacity_is_panic() {
        drop(ObjectPool::new(
            0,
            Arc::new(MemoryBudget::unlimited()),
            || 0_u32,
        ));
    }
}
