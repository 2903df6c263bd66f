use std::fmt;
use std::marker::PhantomData;

use crate::{ChunkLayout, ChunkPoolBuilder, ChunkStore, Error, PooledChunk, Result};

/// A fixed-capacity pool of equally sized chunks, each able to hold one `T`.
///
/// The pool reserves a single slab of `chunk_count` chunks at creation time and hands them
/// out in O(1). Returned chunks are reused in LIFO order. Once every chunk is allocated,
/// [`allocate()`](Self::allocate) fails with [`Error::OutOfMemory`] until a chunk is returned.
/// The pool never acquires more memory after creation.
///
/// The pool only manages storage. It never initializes chunks and never drops anything the
/// caller stored in them.
///
/// # Examples
///
/// ```rust
/// use chunk_pool::{Error, FixedChunkPool};
///
/// let mut pool = FixedChunkPool::<u64>::new(8, 2);
///
/// let a = pool.allocate().unwrap();
/// let b = pool.allocate().unwrap();
/// assert!(matches!(pool.allocate(), Err(Error::OutOfMemory { .. })));
///
/// let a_ptr = a.ptr();
///
/// // SAFETY: Both chunks came from this pool and each is returned exactly once.
/// unsafe {
///     pool.deallocate(a);
///     pool.deallocate(b);
/// }
///
/// // The most recently returned chunk is handed out first.
/// let c = pool.allocate().unwrap();
/// assert_ne!(c.ptr(), a_ptr);
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) if `T` is [`Send`] but it is not thread-safe
/// ([`Sync`]). Use [`GrowableChunkPool`](crate::GrowableChunkPool) for a pool that can be
/// shared between threads.
pub struct FixedChunkPool<T> {
    store: ChunkStore,

    _item: PhantomData<T>,
}

impl<T> FixedChunkPool<T> {
    /// Creates a pool of `chunk_count` chunks of `chunk_size` bytes each.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized, if `chunk_size` is smaller than `T` or smaller than
    /// a free list link (one `usize`), if `chunk_count` is zero or if the backing storage
    /// cannot be allocated.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use chunk_pool::FixedChunkPool;
    ///
    /// let pool = FixedChunkPool::<u8>::new(100, 100);
    ///
    /// assert_eq!(pool.capacity(), 100);
    /// assert_eq!(pool.chunk_size(), 100);
    /// assert!(pool.is_empty());
    /// ```
    #[must_use]
    pub fn new(chunk_size: usize, chunk_count: usize) -> Self {
        ChunkPoolBuilder::new()
            .chunk_size(chunk_size)
            .chunk_count(chunk_count)
            .build_fixed()
    }

    /// Creates a builder for configuring and constructing a chunk pool.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use chunk_pool::FixedChunkPool;
    ///
    /// let pool = FixedChunkPool::<u32>::builder().chunk_count(16).build_fixed();
    ///
    /// assert_eq!(pool.capacity(), 16);
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
            store,
            _item: PhantomData,
        }
    }

    /// Takes a vacant chunk out of the pool.
    ///
    /// The most recently returned chunk is handed out first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if every chunk is allocated or the pool was cleared.
    pub fn allocate(&mut self) -> Result<PooledChunk<T>> {
        let (index, ptr) = self.store.pop().ok_or(Error::OutOfMemory {
            capacity: self.store.capacity(),
        })?;

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
    /// - No pointers derived from the chunk are used after this call.
    pub unsafe fn deallocate(&mut self, chunk: PooledChunk<T>) {
        self.store.push(chunk.index());
    }

    /// Releases the backing storage of the pool.
    ///
    /// Every chunk handed out earlier becomes invalid, whether or not it was returned.
    /// A cleared pool has zero capacity and all further allocations fail with
    /// [`Error::OutOfMemory`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use chunk_pool::{Error, FixedChunkPool};
    ///
    /// let mut pool = FixedChunkPool::<u64>::new(8, 4);
    /// pool.clear();
    ///
    /// assert_eq!(pool.capacity(), 0);
    /// assert!(pool.is_cleared());
    /// assert!(matches!(pool.allocate(), Err(Error::OutOfMemory { .. })));
    /// ```
    pub fn clear(&mut self) {
        self.store.clear();
    }

    /// The number of chunks currently allocated.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether no chunks are currently allocated.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.store.len() == 0
    }

    /// The total number of chunks owned by the pool, allocated or not.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    /// The chunk size the pool was created with.
    #[must_use]
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.store.layout().chunk_size()
    }

    /// The distance in bytes between neighboring chunks.
    ///
    /// This is the chunk size rounded up to the alignment of `T` and of the free list link.
    #[must_use]
    #[inline]
    pub fn stride(&self) -> usize {
        self.store.layout().stride()
    }

    /// Whether [`clear()`](Self::clear) has been called on this pool.
    #[must_use]
    #[inline]
    pub fn is_cleared(&self) -> bool {
        self.store.is_cleared()
    }

    #[cfg(test)]
    pub(crate) fn integrity_check(&self) {
        self.store.integrity_check();
    }
}

impl<T> fmt::Debug for FixedChunkPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedChunkPool")
            .field("item_type", &format_args!("{}", std::any::type_name::<T>()))
            .field("store", &self.store)
            .finish()
    }
}

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

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(FixedChunkPool<u64>: Send, fmt::Debug);
    assert_impl_all!(FixedChunkPool<Cell<u64>>: Send);
    assert_not_impl_any!(FixedChunkPool<u64>: Sync, Clone, Copy);
    assert_not_impl_any!(FixedChunkPool<Rc<u64>>: Send, Sync);

    #[test]
    fn smoke_test() {
        let mut pool = FixedChunkPool::<u64>::new(8, 4);

        assert_eq!(pool.len(), 0);
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 4);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();

        unsafe {
            a.ptr().write(1);
            b.ptr().write(2);
        }

        assert_eq!(pool.len(), 2);
        assert!(!pool.is_empty());

        unsafe {
            assert_eq!(a.ptr().read(), 1);
            assert_eq!(b.ptr().read(), 2);
        }

        unsafe {
            pool.deallocate(a);
        }

        // The surviving chunk is unaffected by the free list link written into its neighbor.
        unsafe {
            assert_eq!(b.ptr().read(), 2);
        }

        unsafe {
            pool.deallocate(b);
        }

        assert!(pool.is_empty());
        pool.integrity_check();
    }

    #[test]
    fn exhaustion_after_capacity_allocations() {
        let mut pool = FixedChunkPool::<u32>::new(8, 10);

        let chunks: Vec<_> = (0..10).map(|_| pool.allocate().unwrap()).collect();

        let distinct: HashSet<_> = chunks.iter().map(PooledChunk::ptr).collect();
        assert_eq!(distinct.len(), 10);

        assert_eq!(pool.allocate().unwrap_err(), Error::OutOfMemory { capacity: 10 });

        // Exhaustion is not permanent once something is returned.
        let mut chunks = chunks;
        unsafe {
            pool.deallocate(chunks.pop().unwrap());
        }
        assert!(pool.allocate().is_ok());
    }

    #[test]
    fn first_allocation_is_last_chunk_of_slab() {
        let mut pool = FixedChunkPool::<u64>::new(8, 4);

        let chunk = pool.allocate().unwrap();

        assert_eq!(chunk.index(), 3);
    }

    #[test]
    fn chunks_do_not_overlap() {
        let mut pool = FixedChunkPool::<[u8; 3]>::new(13, 6);

        let mut addresses: Vec<_> = (0..6)
            .map(|_| pool.allocate().unwrap().ptr().as_ptr() as usize)
            .collect();
        addresses.sort_unstable();

        for pair in addresses.windows(2) {
            assert!(pair[1] - pair[0] >= 13);
        }
    }

    #[test]
    fn chunks_are_aligned_for_item() {
        #[repr(align(64))]
        struct CacheLine([u8; 64]);

        let mut pool = FixedChunkPool::<CacheLine>::new(64, 8);

        for _ in 0..8 {
            let chunk = pool.allocate().unwrap();
            assert_eq!(chunk.ptr().as_ptr() as usize % 64, 0);
        }
    }

    #[test]
    fn lifo_reuse() {
        let mut pool = FixedChunkPool::<u64>::new(8, 3);

        let chunks: Vec<_> = (0..3).map(|_| pool.allocate().unwrap()).collect();
        let mut chunks = chunks.into_iter();
        let first = chunks.next().unwrap();
        let first_ptr = first.ptr();

        unsafe {
            pool.deallocate(first);
        }

        assert_eq!(pool.allocate().unwrap().ptr(), first_ptr);
    }

    #[test]
    fn reallocation_yields_same_set() {
        let mut pool = FixedChunkPool::<u64>::new(16, 8);

        let chunks: Vec<_> = (0..8).map(|_| pool.allocate().unwrap()).collect();
        let original: HashSet<_> = chunks.iter().map(PooledChunk::ptr).collect();

        // Return in an order unrelated to allocation order.
        let mut chunks = chunks;
        chunks.swap(0, 5);
        chunks.swap(2, 7);

        for chunk in chunks {
            unsafe {
                pool.deallocate(chunk);
            }
        }

        pool.integrity_check();

        let again: HashSet<_> = (0..8).map(|_| pool.allocate().unwrap().ptr()).collect();

        assert_eq!(again, original);
        assert!(pool.allocate().is_err());
    }

    #[test]
    fn clear_makes_pool_inert() {
        let mut pool = FixedChunkPool::<u64>::new(8, 4);
        _ = pool.allocate().unwrap();

        pool.clear();

        assert!(pool.is_cleared());
        assert_eq!(pool.capacity(), 0);
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.allocate().unwrap_err(), Error::OutOfMemory { capacity: 0 });
    }

    #[test]
    fn moved_pool_keeps_free_chunks() {
        let mut pool = FixedChunkPool::<u64>::new(8, 4);

        let kept = pool.allocate().unwrap();
        let returned = pool.allocate().unwrap();
        let returned_ptr = returned.ptr();

        unsafe {
            pool.deallocate(returned);
        }

        let mut moved = pool;

        assert_eq!(moved.len(), 1);
        assert_eq!(moved.allocate().unwrap().ptr(), returned_ptr);

        unsafe {
            kept.ptr().write(99);
            assert_eq!(kept.ptr().read(), 99);
            moved.deallocate(kept);
        }
    }

    #[test]
    fn stride_and_chunk_size_are_reported() {
        let pool = FixedChunkPool::<u8>::new(100, 10);

        assert_eq!(pool.chunk_size(), 100);
        assert_eq!(pool.stride(), 100_usize.next_multiple_of(align_of::<usize>()));
    }

    #[test]
    #[should_panic]
    fn zero_chunk_count_panics() {
        drop(FixedChunkPool::<u64>::new(8, 0));
    }

    #[test]
    #[should_panic]
    fn chunk_size_below_item_size_panics() {
        drop(FixedChunkPool::<[u64; 2]>::new(8, 4));
    }

    #[test]
    fn debug_output_names_item_type() {
        let pool = FixedChunkPool::<u16>::new(8, 2);

        assert!(format!("{pool:?}").contains("u16"));
    }
}
