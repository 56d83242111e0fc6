use std::any::type_name;

use num_integer::Integer;

use crate::{Error, Result};

/// Number of slots tracked by one liveness word.
pub(crate) const SLOTS_PER_WORD: usize = 64;

/// This is the backing storage of an `ObjectPool`. It is an implementation detail of the
/// pool layer; the pool decides when to create bays and how to address into them.
///
/// A bay is a fixed-capacity table of pre-constructed objects plus a packed liveness
/// bitmask, one bit per slot (`1` = alive, `0` = dead). All objects are constructed once,
/// up front, from a caller-supplied factory; the storage is never resized or reallocated
/// afterwards. Handing out a slot is a bit-scan and a bit-set, nothing more - no
/// construction, no reset, no heap traffic.
///
/// The search for a free slot starts at the word where the previous search ended (the
/// rotational cursor) and wraps around, skipping words that are all-ones. This biases
/// consecutive allocations toward the same region of the storage array.
///
/// Freeing a slot only clears its bit. The object keeps whatever state its previous user
/// left in it until [`idle_scrub()`][Self::idle_scrub] runs, which is expected to happen
/// off the allocation hot path, during ticks with no allocation pressure.
#[derive(Debug)]
pub(crate) struct Bay<T> {
    /// Exactly `capacity` objects, constructed once at bay creation.
    slots: Box<[T]>,

    /// One bit per slot, `1` = alive. Unused high bits of the last word are pre-set to
    /// `1` so the free-slot scan can never select an index beyond `capacity`.
    live_words: Box<[u64]>,

    /// Word index where the next free-slot search starts. Retained across calls so the
    /// search does not rescan from the start every time.
    cursor: usize,

    /// Number of alive slots. Mirrors the population count of the real (non-padding)
    /// bits in `live_words` at all times.
    alive: usize,
}

impl<T> Bay<T> {
    /// Creates a bay with `capacity` slots, filling every slot from `factory`.
    ///
    /// This is the "take the hit up front" moment: all construction cost is paid here so
    /// that [`take()`][Self::take] never constructs anything.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or `T` is zero-sized.
    #[must_use]
    pub(crate) fn new(capacity: usize, factory: &mut dyn FnMut() -> T) -> Self {
        assert!(capacity > 0, "Bay must have non-zero capacity");
        assert!(
            size_of::<T>() > 0,
            "Bay must have non-zero item size in bay of {}",
            type_name::<T>()
        );

        let slots = (0..capacity)
            .map(|_| factory())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let word_count = capacity.div_ceil(SLOTS_PER_WORD);
        let mut live_words = vec![0_u64; word_count].into_boxed_slice();

        // Slots beyond `capacity` do not exist, so their bits are permanently alive.
        let tail_bits = capacity % SLOTS_PER_WORD;
        if tail_bits != 0 {
            let last = live_words
                .last_mut()
                .expect("word count is at least 1 because capacity is non-zero");
            *last = !0_u64 << tail_bits;
        }

        Self {
            slots,
            live_words,
            cursor: 0,
            alive: 0,
        }
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub(crate) fn len(&self) -> usize {
        self.alive
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.alive == 0
    }

    #[must_use]
    pub(crate) fn is_full(&self) -> bool {
        self.alive == self.slots.len()
    }

    /// Marks the first dead slot found as alive and returns its index together with the
    /// pre-existing object stored there.
    ///
    /// The scan starts at the cursor word, wraps around and skips all-ones words. Within
    /// the first non-full word the free bit is located with a hardware bit scan. The
    /// cursor is left on that word so the next search starts near the most recently used
    /// region.
    ///
    /// The object is returned exactly as the previous user (or the idle scrub) left it;
    /// nothing is constructed or reset on this path.
    ///
    /// # Errors
    ///
    /// Fails with [`PoolExhausted`][Error::PoolExhausted] when every slot is alive. The
    /// caller decides whether to chain a new bay; the bay itself never retries or blocks.
    pub(crate) fn take(&mut self) -> Result<(usize, &mut T)> {
        let word_count = self.live_words.len();

        for probe in 0..word_count {
            let word_index = probe
                .checked_add(self.cursor)
                .expect("word count and cursor are bounded by capacity, far below usize::MAX")
                % word_count;

            let word = self
                .live_words
                .get_mut(word_index)
                .expect("word index was reduced modulo word count");

            if *word == u64::MAX {
                // Every slot tracked by this word is alive.
                continue;
            }

            let bit = usize::try_from(word.trailing_ones())
                .expect("a bit position within a u64 always fits in usize");

            *word |= 1_u64 << bit;
            self.cursor = word_index;
            self.alive = self
                .alive
                .checked_add(1)
                .expect("alive count is bounded by capacity");

            let slot_index = word_index
                .checked_mul(SLOTS_PER_WORD)
                .and_then(|base| base.checked_add(bit))
                .expect("slot index is bounded by capacity");

            let slot = self.slots.get_mut(slot_index).expect(
                "padding bits of the last word are pre-set to alive, so the scan cannot select an out-of-range index",
            );

            return Ok((slot_index, slot));
        }

        Err(Error::PoolExhausted {
            capacity: self.slots.len(),
        })
    }

    /// Marks the slot at `index` as dead, making it available to a later
    /// [`take()`][Self::take].
    ///
    /// The object's data is not touched; it may still contain the previous user's values
    /// until the next [`idle_scrub()`][Self::idle_scrub].
    ///
    /// # Errors
    ///
    /// Fails with [`InvalidHandle`][Error::InvalidHandle] when `index` is out of range
    /// or the slot is already dead (double free).
    pub(crate) fn free(&mut self, index: usize) -> Result<()> {
        if index >= self.slots.len() {
            return Err(Error::InvalidHandle {
                index,
                problem: format!("index is beyond bay capacity {}", self.slots.len()),
            });
        }

        let (word_index, bit) = index.div_rem(&SLOTS_PER_WORD);

        let word = self
            .live_words
            .get_mut(word_index)
            .expect("word index was derived from an in-range slot index");

        let mask = 1_u64 << bit;

        if *word & mask == 0 {
            return Err(Error::InvalidHandle {
                index,
                problem: "slot is already dead (double free?)".to_string(),
            });
        }

        *word &= !mask;
        self.alive = self
            .alive
            .checked_sub(1)
            .expect("an alive bit was just cleared, so the count must have been non-zero");

        Ok(())
    }

    #[must_use]
    fn is_alive(&self, index: usize) -> bool {
        if index >= self.slots.len() {
            return false;
        }

        let (word_index, bit) = index.div_rem(&SLOTS_PER_WORD);

        self.live_words
            .get(word_index)
            .is_some_and(|word| word & (1_u64 << bit) != 0)
    }

    /// Shared access to the alive slot at `index`.
    ///
    /// # Errors
    ///
    /// Fails with [`InvalidHandle`][Error::InvalidHandle] when `index` is out of range
    /// or the slot is dead.
    pub(crate) fn get(&self, index: usize) -> Result<&T> {
        if !self.is_alive(index) {
            return Err(Error::InvalidHandle {
                index,
                problem: "slot is not alive".to_string(),
            });
        }

        Ok(self
            .slots
            .get(index)
            .expect("an alive index is always in range"))
    }

    /// Exclusive access to the alive slot at `index`.
    ///
    /// # Errors
    ///
    /// Fails with [`InvalidHandle`][Error::InvalidHandle] when `index` is out of range
    /// or the slot is dead.
    pub(crate) fn get_mut(&mut self, index: usize) -> Result<&mut T> {
        if !self.is_alive(index) {
            return Err(Error::InvalidHandle {
                index,
                problem: "slot is not alive".to_string(),
            });
        }

        Ok(self
            .slots
            .get_mut(index)
            .expect("an alive index is always in range"))
    }

    /// Resets every dead slot's object to the factory's canonical value, leaving alive
    /// slots untouched.
    ///
    /// O(capacity). Intended to run during ticks with no allocation pressure so that a
    /// later [`take()`][Self::take] observes a pre-cleaned object at zero cost. The full
    /// bay is scrubbed in one call; very large bays amortize nothing across ticks.
    pub(crate) fn idle_scrub(&mut self, factory: &mut dyn FnMut() -> T) {
        for word_index in 0..self.live_words.len() {
            let word = *self
                .live_words
                .get(word_index)
                .expect("loop is bounded by word count");

            if word == u64::MAX {
                // Fully alive, nothing to scrub here.
                continue;
            }

            for bit in 0..SLOTS_PER_WORD {
                if word & (1_u64 << bit) != 0 {
                    continue;
                }

                let slot_index = word_index
                    .checked_mul(SLOTS_PER_WORD)
                    .and_then(|base| base.checked_add(bit))
                    .expect("slot index is bounded by capacity");

                *self
                    .slots
                    .get_mut(slot_index)
                    .expect("dead bits always map to a real slot because padding bits are pre-set to alive") =
                    factory();
            }
        }
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    pub(crate) fn integrity_check(&self) {
        let observed_alive = (0..self.slots.len())
            .filter(|index| self.is_alive(*index))
            .count();

        assert!(
            observed_alive == self.alive,
            "alive count {} does not match the observed population count {} in bay of {}",
            self.alive,
            observed_alive,
            type_name::<T>()
        );

        let tail_bits = self.slots.len() % SLOTS_PER_WORD;
        if tail_bits != 0 {
            let last = self
                .live_words
                .last()
                .expect("a bay always has at least one liveness word");

            let padding_mask = !0_u64 << tail_bits;

            assert!(
                last & padding_mask == padding_mask,
                "padding bits of the last liveness word lost their permanently-alive marking in bay of {}",
                type_name::<T>()
            );
        }
    }
}
