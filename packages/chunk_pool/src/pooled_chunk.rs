use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

/// Exclusive handle to one chunk allocated from a [`FixedChunkPool`] or [`GrowableChunkPool`].
///
/// The chunk is large enough and suitably aligned to hold one `T`. The pool neither initializes
/// the chunk nor drops anything stored in it - the chunk is raw storage owned by the holder
/// of the handle until it is returned to the pool via `deallocate()`.
///
/// The handle cannot be copied or cloned and returning it to the pool consumes it, so the type
/// system rules out returning the same handle twice.
///
/// # Lifetime
///
/// The handle is not tied to the lifetime of the pool. The pointer it carries is only valid
/// while the pool that issued it is alive and has not been cleared. Moving the pool does not
/// affect the validity of the pointer, as the chunk storage itself never moves.
///
/// # Thread safety
///
/// The handle is [`Send`] if `T` is [`Send`] and [`Sync`] if `T` is [`Sync`].
///
/// [`FixedChunkPool`]: crate::FixedChunkPool
/// [`GrowableChunkPool`]: crate::GrowableChunkPool
pub struct PooledChunk<T> {
    /// Global index of the chunk within its pool, used to put the chunk back
    /// on the free list without any address arithmetic.
    index: usize,

    ptr: NonNull<T>,
}

impl<T> PooledChunk<T> {
    #[must_use]
    pub(crate) fn new(index: usize, ptr: NonNull<T>) -> Self {
        Self { index, ptr }
    }

    /// Returns a pointer to the start of the chunk.
    ///
    /// The pointer is aligned for `T` and valid for reads and writes of `T`, though the memory
    /// is uninitialized until the caller writes to it. It remains valid until the chunk is
    /// returned to the pool or the pool is cleared or dropped.
    ///
    /// # Example
    ///
    /// ```rust
    /// use chunk_pool::FixedChunkPool;
    ///
    /// let mut pool = FixedChunkPool::<u64>::new(8, 4);
    /// let chunk = pool.allocate().unwrap();
    ///
    /// // SAFETY: The chunk is exclusively ours and sized and aligned for u64.
    /// unsafe {
    ///     chunk.ptr().write(42);
    ///     assert_eq!(chunk.ptr().read(), 42);
    /// }
    ///
    /// // SAFETY: The chunk came from this pool and is returned exactly once.
    /// unsafe { pool.deallocate(chunk) };
    /// ```
    #[must_use]
    #[inline]
    pub fn ptr(&self) -> NonNull<T> {
        self.ptr
    }

    /// The position of the chunk within its pool.
    ///
    /// Chunk indexes are stable for the lifetime of the pool and unique among its chunks.
    /// Slab `s` holds the indexes `s * chunk_count..(s + 1) * chunk_count`.
    #[must_use]
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Exposes the chunk as possibly uninitialized storage for one `T`.
    ///
    /// # Safety
    ///
    /// The pool that issued the chunk must still be alive and must not have been cleared.
    #[must_use]
    #[inline]
    pub unsafe fn as_uninit_mut(&mut self) -> &mut MaybeUninit<T> {
        // SAFETY: The caller guarantees the storage is still owned by a live pool. The chunk is
        // sized and aligned for `T` and the handle grants exclusive access to it.
        unsafe { self.ptr.cast::<MaybeUninit<T>>().as_mut() }
    }

    /// Moves `value` into the chunk, returning a reference to it.
    ///
    /// Any value previously stored in the chunk is overwritten without being dropped.
    ///
    /// # Safety
    ///
    /// The pool that issued the chunk must still be alive and must not have been cleared.
    #[inline]
    pub unsafe fn write(&mut self, value: T) -> &mut T {
        // SAFETY: Forwarding the caller's guarantee.
        unsafe { self.as_uninit_mut() }.write(value)
    }
}

impl<T> fmt::Debug for PooledChunk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledChunk")
            .field("item_type", &format_args!("{}", std::any::type_name::<T>()))
            .field("index", &self.index)
            .field("ptr", &self.ptr)
            .finish()
    }
}

// SAFETY: The handle grants exclusive access to storage for one `T`, so it may move between
// threads whenever `T` may.
unsafe impl<T: Send> Send for PooledChunk<T> {}

// SAFETY: Shared references to the handle only expose the pointer, never the value, so sharing
// is as safe as sharing `T`.
unsafe impl<T: Sync> Sync for PooledChunk<T> {}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(PooledChunk<u64>: Send, Sync, fmt::Debug);
    assert_impl_all!(PooledChunk<Cell<u64>>: Send);
    assert_not_impl_any!(PooledChunk<Cell<u64>>: Sync);
    assert_not_impl_any!(PooledChunk<RefCell<u64>>: Sync);
    assert_not_impl_any!(PooledChunk<Rc<u64>>: Send, Sync);
    assert_not_impl_any!(PooledChunk<u64>: Copy, Clone);

    #[test]
    fn accessors_return_parts() {
        let mut value = 5_u32;
        let ptr = NonNull::from(&mut value);

        let chunk = PooledChunk::new(7, ptr);

        assert_eq!(chunk.index(), 7);
        assert_eq!(chunk.ptr(), ptr);
    }

    #[test]
    fn write_stores_value() {
        let mut storage = MaybeUninit::<u64>::uninit();
        let mut chunk = PooledChunk::new(0, NonNull::from(&mut storage).cast::<u64>());

        // SAFETY: The storage outlives the handle.
        let value = unsafe { chunk.write(11) };
        *value += 1;

        // SAFETY: The value was initialized above.
        assert_eq!(unsafe { chunk.ptr().read() }, 12);
    }

    #[test]
    fn uninit_view_points_at_chunk() {
        let mut storage = MaybeUninit::<u64>::uninit();
        let ptr = NonNull::from(&mut storage).cast::<u64>();
        let mut chunk = PooledChunk::new(0, ptr);

        // SAFETY: The storage outlives the handle.
        let view = unsafe { chunk.as_uninit_mut() };

        assert_eq!(view.as_mut_ptr(), ptr.as_ptr());
    }

    #[test]
    fn debug_names_item_type() {
        let mut value = 5_u32;
        let chunk = PooledChunk::new(3, NonNull::from(&mut value));

        let output = format!("{chunk:?}");

        assert!(output.contains("u32"));
        assert!(output.contains("index: 3"));
    }
}
