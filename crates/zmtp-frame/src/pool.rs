//! Fixed-capacity slab pools.
//!
//! A [`Pool`] holds at most `N` values in an inline array and hands out typed
//! [`Handle`]s. Capacity is a const generic, so it is fixed at build time;
//! exhaustion is reported as [`FrameError::PoolExhausted`] and the pool never
//! grows. Handles are neither `Copy` nor `Clone`: releasing one consumes it,
//! so a slot cannot be released twice through the same handle.
//!
//! Each handle also records the pool it came from and the slot generation it
//! was issued for. A handle from another pool, or one whose slot has since
//! been released and reused, is refused with [`FrameError::InvalidHandle`].

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::warn;

use crate::error::{FrameError, Result};

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// Typed index of a live pool slot.
pub struct Handle<T> {
    pool: u32,
    index: usize,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(pool: u32, index: usize, generation: u32) -> Self {
        Self {
            pool,
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index inside the owning pool.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.pool == other.pool
            && self.index == other.index
            && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

/// Array-backed slab allocator with a free-list stack.
pub struct Pool<T, const N: usize> {
    name: &'static str,
    id: u32,
    slots: [Option<T>; N],
    generations: [u32; N],
    free: [usize; N],
    free_len: usize,
}

impl<T, const N: usize> Pool<T, N> {
    /// Create an empty pool. `name` appears in exhaustion errors and logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            slots: std::array::from_fn(|_| None),
            generations: [0; N],
            // Lowest index on top so slot 0 is handed out first.
            free: std::array::from_fn(|i| N - 1 - i),
            free_len: N,
        }
    }

    /// Move `value` into a free slot.
    pub fn allocate(&mut self, value: T) -> Result<Handle<T>> {
        if self.free_len == 0 {
            warn!(pool = self.name, capacity = N, "pool exhausted");
            return Err(FrameError::PoolExhausted {
                pool: self.name,
                capacity: N,
            });
        }
        self.free_len -= 1;
        let index = self.free[self.free_len];
        self.slots[index] = Some(value);
        Ok(Handle::new(self.id, index, self.generations[index]))
    }

    /// Return the slot to the pool and hand back its value.
    pub fn release(&mut self, handle: Handle<T>) -> Result<T> {
        if !self.owns(&handle) {
            return Err(FrameError::InvalidHandle);
        }
        let value = self.slots[handle.index]
            .take()
            .ok_or(FrameError::InvalidHandle)?;
        self.generations[handle.index] = self.generations[handle.index].wrapping_add(1);
        self.free[self.free_len] = handle.index;
        self.free_len += 1;
        Ok(value)
    }

    pub fn get(&self, handle: &Handle<T>) -> Option<&T> {
        if !self.owns(handle) {
            return None;
        }
        self.slots[handle.index].as_ref()
    }

    pub fn get_mut(&mut self, handle: &Handle<T>) -> Option<&mut T> {
        if !self.owns(handle) {
            return None;
        }
        self.slots[handle.index].as_mut()
    }

    /// Whether `handle` was issued by this pool for the current occupant of its slot.
    fn owns(&self, handle: &Handle<T>) -> bool {
        handle.pool == self.id
            && handle.index < N
            && self.generations[handle.index] == handle.generation
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Free slots left.
    pub fn available(&self) -> usize {
        self.free_len
    }

    /// Slots currently allocated.
    pub fn in_use(&self) -> usize {
        N - self.free_len
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T, const N: usize> fmt::Debug for Pool<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("capacity", &N)
            .field("in_use", &self.in_use())
            .finish()
    }
}
