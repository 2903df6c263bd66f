use std::fmt;
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard};

use crate::{
    ChunkLayout, ChunkPoolBuilder, ChunkStore, ERR_POISONED_LOCK, Error, PooledChunk, Result,
};

/// A thread-safe pool of equally sized chunks that grows when exhausted.
///
/// The pool starts with one slab of `chunk_count` chunks. When every chunk is allocated, the
/// next [`allocate()`](Self::allocate) appends another slab of the same size and hands out a
/// chunk from it. Slabs are never released or moved while the pool is alive and not cleared,
/// so chunks handed out before growth stay valid after it.
///
/// One lock guards the whole pool. Every operation, including growth, holds the lock for its
/// full duration, so callers contending with a growing pool wait for the new slab to be
/// linked. There is no timeout on waiting for the lock.
///
/// The pool only manages storage. It never initializes chunks and never drops anything the
/// caller stored in them.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use std::thread;
///
/// use chunk_pool::GrowableChunkPool;
///
/// let pool = Arc::new(GrowableChunkPool::<u64>::new(8, 2));
///
/// let workers: Vec<_> = (0..4)
///     .map(|_| {
///         let pool = Arc::clone(&pool);
///
///         thread::spawn(move || {
///             let chunk = pool.allocate().unwrap();
///
///             // SAFETY: The chunk is exclusively ours and sized and aligned for u64.
///             unsafe { chunk.ptr().write(7) };
///
///             // SAFETY: The chunk came from this pool and is returned exactly once.
///             unsafe { pool.deallocate(chunk) };
///         })
///     })
///     .collect();
///
/// for worker in workers {
///     worker.join().unwrap();
/// }
///
/// assert!(pool.is_empty());
/// assert!(pool.capacity() >= 2);
/// ```
///
/// # Thread safety
///
/// The pool is thread-safe ([`Send`] and [`Sync`]) if `T` is [`Send`].
pub struct GrowableChunkPool<T> {
    store: Mutex<ChunkStore>,

    // The layout never changes, so we keep a copy outside the lock for cheap observers.
    layout: ChunkLayout,

    _item: PhantomData<T>,
}

impl<T> GrowableChunkPool<T> {
    /// Creates a pool with an initial slab of `chunk_count` chunks of `chunk_size` bytes each.
    ///
    /// Every slab added later has the same number of chunks.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized, if `chunk_size` is smaller than `T` or smaller than
    /// a free list link (one `usize`), if `chunk_count` is zero or if the initial backing
    /// storage cannot be allocated.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use chunk_pool::GrowableChunkPool;
    ///
    /// let pool = GrowableChunkPool::<u32>::new(16, 64);
    ///
    /// assert_eq!(pool.capacity(), 64);
    /// assert_eq!(pool.slab_count(), 1);
    /// ```
    #[must_use]
    pub fn new(chunk_size: usize, chunk_count: usize) -> Self {
        ChunkPoolBuilder::new()
            .chunk_size(chunk_size)
            .chunk_count(chunk_count)
            .build_growable()
    }

    /// Creates a builder for configuring and constructing a chunk pool.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use chunk_pool::GrowableChunkPool;
    ///
    /// let pool = GrowableChunkPool::<u32>::builder()
    ///     .chunk_size(32)
    ///     .build_growable();
    ///
    /// assert_eq!(pool.chunk_size(), 32);
    /// ```
    #[inline]
    pub fn builder() -> ChunkPoolBuilder<T> {
        ChunkPoolBuilder::new()
    }

    #[must_use]
    pub(crate) fn new_inner(layout: ChunkLayout) -> Self {
        let store = ChunkStore::new(layout).expect(
            "we do not intend to handle allocation failure as a real possibility - OOM results in panic",
        );

        Self {
            store: Mutex::new(store),
            layout,
            _item: PhantomData,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChunkStore> {
        self.store.lock().expect(ERR_POISONED_LOCK)
    }

    /// Takes a vacant chunk out of the pool, appending a new slab first if none is vacant.
    ///
    /// The most recently returned chunk is handed out first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailure`] if the pool is exhausted and storage for a new
    /// slab cannot be acquired. Returns [`Error::OutOfMemory`] if the pool was cleared.
    pub fn allocate(&self) -> Result<PooledChunk<T>> {
        let mut store = self.lock();

        if store.is_exhausted() {
            if store.is_cleared() {
                return Err(Error::OutOfMemory { capacity: 0 });
            }

            store.grow()?;
        }

        let (index, ptr) = store
            .pop()
            .expect("we just ensured that the free list is not empty");

        Ok(PooledChunk::new(index, ptr.cast::<T>()))
    }

    /// Returns a chunk to the pool so it can be handed out again.
    ///
    /// The pool does not drop anything stored in the chunk. The leading bytes of the chunk
    /// are overwritten.
    ///
    /// # Panics
    ///
    /// May panic if the safety requirements are violated and the violation happens to be
    /// detectable. No checks are guaranteed.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    /// - The chunk was allocated from this pool.
    /// - The pool has not been cleared since the chunk was allocated.
    /// - No pointers derived from the chunk are used after this call, on any thread.
    pub unsafe fn deallocate(&self, chunk: PooledChunk<T>) {
        self.lock().push(chunk.index());
    }

    /// Releases all slabs of the pool.
    ///
    /// Every chunk handed out earlier becomes invalid, whether or not it was returned, no
    /// matter which thread holds it. The caller must ensure no other thread is still using
    /// chunks from this pool. A cleared pool has zero capacity, never grows again and all
    /// further allocations fail with [`Error::OutOfMemory`].
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// The number of chunks currently allocated.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no chunks are currently allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The total number of chunks owned by the pool, allocated or not.
    ///
    /// This never decreases, except when the pool is cleared.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// The number of slabs the pool owns.
    #[must_use]
    pub fn slab_count(&self) -> usize {
        self.lock().slab_count()
    }

    /// The chunk size the pool was created with.
    #[must_use]
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.layout.chunk_size()
    }

    /// The number of chunks in each slab.
    #[must_use]
    #[inline]
    pub fn chunks_per_slab(&self) -> usize {
        self.layout.chunk_count().get()
    }

    /// The distance in bytes between neighboring chunks of a slab.
    #[must_use]
    #[inline]
    pub fn stride(&self) -> usize {
        self.layout.stride()
    }

    /// Whether [`clear()`](Self::clear) has been called on this pool.
    #[must_use]
    pub fn is_cleared(&self) -> bool {
        self.lock().is_cleared()
    }

    #[cfg(test)]
    pub(crate) fn fail_next_growth(&self) {
        self.lock().fail_next_growth();
    }

    #[cfg(test)]
    pub(crate) fn integrity_check(&self) {
        self.lock().integrity_check();
    }
}

impl<T> fmt::Debug for GrowableChunkPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrowableChunkPool")
            .field("item_type", &format_args!("{}", std::any::type_name::<T>()))
            .field("layout", &self.layout)
            .field("store", &self.store)
            .finish()
    }
}

// SAFETY: All mutable state is behind the mutex. The pool never creates references to the
// values stored in its chunks, it only hands out storage, which is safe to do from any thread
// as long as the values themselves may move between threads.
unsafe impl<T: Send> Sync for GrowableChunkPool<T> {}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashSet;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::thread;

    use static_assertions::{assert_impl_all, assert_not_impl_any};
    use testing::with_watchdog;

    use super::*;

    assert_impl_all!(GrowableChunkPool<u64>: Send, Sync, fmt::Debug);
    assert_impl_all!(GrowableChunkPool<Cell<u64>>: Send, Sync);
    assert_not_impl_any!(GrowableChunkPool<u64>: Clone, Copy);
    assert_not_impl_any!(GrowableChunkPool<Rc<u64>>: Send);

    #[test]
    fn smoke_test() {
        let pool = GrowableChunkPool::<u64>::new(8, 4);

        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.slab_count(), 1);
        assert_eq!(pool.chunks_per_slab(), 4);
        assert!(pool.is_empty());

        let chunk = pool.allocate().unwrap();
        unsafe {
            chunk.ptr().write(1234);
        }
        assert_eq!(pool.len(), 1);

        unsafe {
            assert_eq!(chunk.ptr().read(), 1234);
            pool.deallocate(chunk);
        }

        assert!(pool.is_empty());
        pool.integrity_check();
    }

    #[test]
    fn grows_when_exhausted() {
        const N: usize = 4;
        const K: usize = 9;

        let pool = GrowableChunkPool::<u64>::new(8, N);

        let mut chunks = Vec::new();

        for i in 0..N {
            let chunk = pool.allocate().unwrap();
            unsafe {
                chunk.ptr().write(i as u64);
            }
            chunks.push(chunk);
        }

        let before_growth: Vec<_> = chunks.iter().map(PooledChunk::ptr).collect();
        assert_eq!(pool.slab_count(), 1);

        for i in N..N + K {
            let chunk = pool.allocate().unwrap();
            unsafe {
                chunk.ptr().write(i as u64);
            }
            chunks.push(chunk);
        }

        assert_eq!(pool.len(), N + K);
        assert_eq!(pool.slab_count(), (N + K).div_ceil(N));
        assert_eq!(pool.capacity(), pool.slab_count() * N);

        let distinct: HashSet<_> = chunks.iter().map(PooledChunk::ptr).collect();
        assert_eq!(distinct.len(), N + K);

        // The chunks allocated before growth did not move and kept their contents.
        for (i, chunk) in chunks.iter().enumerate() {
            unsafe {
                assert_eq!(chunk.ptr().read(), i as u64);
            }
        }

        for (chunk, ptr) in chunks.iter().zip(before_growth) {
            assert_eq!(chunk.ptr(), ptr);
        }

        pool.integrity_check();
    }

    #[test]
    fn returned_chunks_are_reused_before_growing() {
        let pool = GrowableChunkPool::<u64>::new(8, 2);

        let _a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let b_ptr = b.ptr();

        unsafe {
            pool.deallocate(b);
        }

        assert_eq!(pool.allocate().unwrap().ptr(), b_ptr);
        assert_eq!(pool.slab_count(), 1);
    }

    #[test]
    fn growth_failure_is_reported() {
        let pool = GrowableChunkPool::<u64>::new(8, 1);
        let _held = pool.allocate().unwrap();

        pool.fail_next_growth();

        assert!(matches!(
            pool.allocate(),
            Err(Error::AllocationFailure { bytes: 8 })
        ));

        // Nothing was lost and the next attempt may succeed.
        assert_eq!(pool.capacity(), 1);
        assert_eq!(pool.len(), 1);
        assert!(pool.allocate().is_ok());
        assert_eq!(pool.slab_count(), 2);
    }

    #[test]
    fn clear_makes_pool_inert() {
        let pool = GrowableChunkPool::<u64>::new(8, 2);
        _ = pool.allocate().unwrap();
        _ = pool.allocate().unwrap();
        _ = pool.allocate().unwrap();
        assert_eq!(pool.slab_count(), 2);

        pool.clear();

        assert!(pool.is_cleared());
        assert_eq!(pool.capacity(), 0);
        assert_eq!(pool.slab_count(), 0);
        assert_eq!(pool.len(), 0);
        assert_eq!(
            pool.allocate().unwrap_err(),
            Error::OutOfMemory { capacity: 0 }
        );
        assert_eq!(pool.slab_count(), 0);
    }

    #[test]
    fn moved_pool_keeps_free_chunks() {
        let pool = GrowableChunkPool::<u64>::new(8, 4);

        let returned = pool.allocate().unwrap();
        let returned_ptr = returned.ptr();
        unsafe {
            pool.deallocate(returned);
        }

        let moved = thread::spawn(move || pool).join().unwrap();

        assert_eq!(moved.allocate().unwrap().ptr(), returned_ptr);
    }

    #[test]
    fn concurrent_allocate_deallocate() {
        const THREADS: usize = 8;
        const CYCLES: usize = 500;

        with_watchdog(|| {
            let pool = Arc::new(GrowableChunkPool::<u64>::new(8, 4));
            let live = Arc::new(Mutex::new(HashSet::new()));

            let initial_len = pool.len();

            let workers: Vec<_> = (0..THREADS)
                .map(|thread_index| {
                    let pool = Arc::clone(&pool);
                    let live = Arc::clone(&live);

                    thread::spawn(move || {
                        for cycle in 0..CYCLES {
                            let chunk = pool.allocate().unwrap();
                            let address = chunk.ptr().as_ptr() as usize;

                            assert!(
                                live.lock().unwrap().insert(address),
                                "chunk {address:#x} handed out twice"
                            );

                            let marker = (thread_index * CYCLES + cycle) as u64;
                            unsafe {
                                chunk.ptr().write(marker);
                            }
                            thread::yield_now();
                            unsafe {
                                assert_eq!(chunk.ptr().read(), marker);
                            }

                            live.lock().unwrap().remove(&address);

                            unsafe {
                                pool.deallocate(chunk);
                            }
                        }
                    })
                })
                .collect();

            for worker in workers {
                worker.join().unwrap();
            }

            assert_eq!(pool.len(), initial_len);
            assert!(pool.capacity() >= 4);
            assert!(pool.capacity() <= THREADS.div_ceil(4) * 4);
            pool.integrity_check();
        });
    }
}
