use std::marker::PhantomData;
use std::num::NonZero;

use new_zealand::nz;

use crate::{ChunkLayout, FixedChunkPool, GrowableChunkPool};

/// Number of chunks per slab if the caller does not specify otherwise.
pub(crate) const DEFAULT_CHUNK_COUNT: NonZero<usize> = nz!(128);

/// Builder for creating an instance of [`FixedChunkPool`] or [`GrowableChunkPool`].
///
/// You only need to use this builder if you want to rely on defaults for some of the pool
/// configuration. Otherwise, [`FixedChunkPool::new()`] and [`GrowableChunkPool::new()`] take
/// the chunk size and chunk count directly.
///
/// By default, chunks are exactly large enough to hold either one `T` or one free list link,
/// whichever is larger, and each slab holds 128 chunks.
///
/// # Examples
///
/// ```
/// use chunk_pool::{ChunkPoolBuilder, FixedChunkPool};
///
/// let pool = FixedChunkPool::<[u8; 48]>::builder()
///     .chunk_size(64)
///     .chunk_count(32)
///     .build_fixed();
///
/// assert_eq!(pool.capacity(), 32);
/// assert_eq!(pool.chunk_size(), 64);
///
/// let pool = ChunkPoolBuilder::<u32>::new().build_growable();
///
/// assert_eq!(pool.chunks_per_slab(), 128);
/// ```
#[must_use]
pub struct ChunkPoolBuilder<T> {
    chunk_size: Option<usize>,
    chunk_count: NonZero<usize>,

    _item: PhantomData<T>,
}

impl<T> std::fmt::Debug for ChunkPoolBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkPoolBuilder")
            .field(
                "item_type",
                &std::format_args!("{}", std::any::type_name::<T>()),
            )
            .field("chunk_size", &self.chunk_size)
            .field("chunk_count", &self.chunk_count)
            .finish()
    }
}

impl<T> Default for ChunkPoolBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ChunkPoolBuilder<T> {
    /// Creates a builder with the default configuration.
    #[inline]
    pub fn new() -> Self {
        Self {
            chunk_size: None,
            chunk_count: DEFAULT_CHUNK_COUNT,
            _item: PhantomData,
        }
    }

    /// Sets the size of each chunk in bytes.
    ///
    /// The size must be able to hold one `T` and one free list link (one `usize`). This is
    /// verified when the pool is built. Chunks are spaced apart by this size rounded up to
    /// the alignment of `T` and of the link.
    #[inline]
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Sets the number of chunks in the pool's slab.
    ///
    /// For a fixed pool this is the capacity of the pool. For a growable pool this is the
    /// initial capacity and the number of chunks added by every growth step.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_count` is zero.
    #[inline]
    pub fn chunk_count(mut self, chunk_count: usize) -> Self {
        self.chunk_count =
            NonZero::new(chunk_count).expect("chunk pool must have a non-zero chunk count");
        self
    }

    /// Builds a fixed-capacity pool with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized, if the chunk size cannot hold a `T` or a free list link
    /// or if the backing storage cannot be allocated.
    #[must_use]
    pub fn build_fixed(self) -> FixedChunkPool<T> {
        FixedChunkPool::new_inner(self.layout())
    }

    /// Builds a thread-safe growable pool with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized, if the chunk size cannot hold a `T` or a free list link
    /// or if the initial backing storage cannot be allocated.
    #[must_use]
    pub fn build_growable(self) -> GrowableChunkPool<T> {
        GrowableChunkPool::new_inner(self.layout())
    }

    fn layout(&self) -> ChunkLayout {
        let chunk_size = self
            .chunk_size
            .unwrap_or_else(ChunkLayout::min_chunk_size::<T>);

        ChunkLayout::new::<T>(chunk_size, self.chunk_count)
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(ChunkPoolBuilder<u64>: Send, Sync, std::fmt::Debug);
    assert_not_impl_any!(ChunkPoolBuilder<std::rc::Rc<u64>>: Send, Sync);

    #[test]
    fn builder_new_creates_default_state() {
        let builder = ChunkPoolBuilder::<u64>::new();

        assert!(builder.chunk_size.is_none());
        assert_eq!(builder.chunk_count, DEFAULT_CHUNK_COUNT);
    }

    #[test]
    fn default_chunk_size_fits_small_items_and_links() {
        let pool = ChunkPoolBuilder::<u8>::new().build_fixed();

        assert_eq!(pool.chunk_size(), size_of::<usize>());
        assert_eq!(pool.capacity(), DEFAULT_CHUNK_COUNT.get());
    }

    #[test]
    fn default_chunk_size_fits_large_items() {
        let pool = ChunkPoolBuilder::<[u64; 5]>::new().build_growable();

        assert_eq!(pool.chunk_size(), 40);
    }

    #[test]
    fn chunk_settings_are_applied() {
        let pool = ChunkPoolBuilder::<u32>::new()
            .chunk_size(24)
            .chunk_count(3)
            .build_growable();

        assert_eq!(pool.chunk_size(), 24);
        assert_eq!(pool.chunks_per_slab(), 3);
        assert_eq!(pool.capacity(), 3);
    }

    #[test]
    #[should_panic]
    fn zero_chunk_count_panics() {
        _ = ChunkPoolBuilder::<u64>::new().chunk_count(0);
    }

    #[test]
    #[should_panic]
    fn zero_sized_item_panics() {
        drop(ChunkPoolBuilder::<()>::new().build_fixed());
    }

    #[test]
    #[should_panic]
    fn undersized_chunk_panics() {
        drop(ChunkPoolBuilder::<u64>::new().chunk_size(4).build_growable());
    }
}
