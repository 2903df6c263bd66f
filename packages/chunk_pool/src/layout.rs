use std::alloc::Layout;
use std::any::type_name;
use std::num::NonZero;

/// The value stored in the leading bytes of every vacant chunk: the global index of the
/// next vacant chunk, or [`END_OF_LIST`].
pub(crate) type Link = usize;

/// Terminates the free list. No chunk can ever have this index because that would imply
/// a pool larger than virtual memory.
pub(crate) const END_OF_LIST: Link = usize::MAX;

/// Geometry shared by every slab of one pool.
///
/// A chunk is at least as large as the caller asked for, at least as large as the item type
/// and at least as large as a [`Link`]. Chunks are laid out back to back with a stride that
/// keeps every chunk aligned for both the item type and the link.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ChunkLayout {
    /// The chunk size requested by the caller.
    chunk_size: usize,

    /// Distance in bytes between the starts of two neighboring chunks.
    stride: usize,

    /// Number of chunks in every slab.
    chunk_count: NonZero<usize>,

    /// Memory layout of one whole slab.
    slab_layout: Layout,
}

impl ChunkLayout {
    /// Calculates the chunk geometry for items of type `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized, if `chunk_size` cannot hold either a `T` or a [`Link`],
    /// or if a slab of `chunk_count` chunks would exceed the size of virtual memory.
    #[must_use]
    pub(crate) fn new<T>(chunk_size: usize, chunk_count: NonZero<usize>) -> Self {
        assert!(
            size_of::<T>() > 0,
            "chunk pool of {} must have non-zero item size",
            type_name::<T>()
        );
        assert!(
            chunk_size >= size_of::<T>(),
            "chunk size {chunk_size} cannot hold an item of {} ({} bytes)",
            type_name::<T>(),
            size_of::<T>()
        );
        assert!(
            chunk_size >= size_of::<Link>(),
            "chunk size {chunk_size} cannot hold a free list link ({} bytes)",
            size_of::<Link>()
        );

        let align = align_of::<T>().max(align_of::<Link>());

        // Layout::pad_to_align() rounds the size up to a multiple of the alignment, which is
        // exactly the spacing we need between chunks.
        let chunk_layout = Layout::from_size_align(chunk_size, align)
            .expect("chunk size exceeds the size of virtual memory")
            .pad_to_align();

        let total_size = chunk_layout
            .size()
            .checked_mul(chunk_count.get())
            .expect("slab size exceeds the size of virtual memory");

        let slab_layout = Layout::from_size_align(total_size, align)
            .expect("slab size exceeds the size of virtual memory");

        Self {
            chunk_size,
            stride: chunk_layout.size(),
            chunk_count,
            slab_layout,
        }
    }

    /// The smallest chunk size that can hold both a `T` and a [`Link`].
    #[must_use]
    pub(crate) fn min_chunk_size<T>() -> usize {
        size_of::<T>().max(size_of::<Link>())
    }

    #[must_use]
    pub(crate) fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub(crate) fn stride(&self) -> usize {
        self.stride
    }

    #[must_use]
    pub(crate) fn chunk_count(&self) -> NonZero<usize> {
        self.chunk_count
    }

    #[must_use]
    pub(crate) fn slab_layout(&self) -> Layout {
        self.slab_layout
    }
}

#[cfg(test)]
mod tests {
    use new_zealand::nz;

    use super::*;

    #[test]
    fn exact_fit_keeps_requested_size() {
        let layout = ChunkLayout::new::<u64>(8, nz!(4));

        assert_eq!(layout.chunk_size(), 8);
        assert_eq!(layout.stride(), 8);
        assert_eq!(layout.chunk_count().get(), 4);
        assert_eq!(layout.slab_layout().size(), 32);
        assert_eq!(layout.slab_layout().align(), align_of::<u64>());
    }

    #[test]
    fn stride_is_rounded_to_link_alignment() {
        // A byte-sized item with an oversized chunk still needs link alignment.
        let layout = ChunkLayout::new::<u8>(100, nz!(10));

        let expected_stride = 100_usize.next_multiple_of(align_of::<Link>());

        assert_eq!(layout.chunk_size(), 100);
        assert_eq!(layout.stride(), expected_stride);
        assert_eq!(layout.slab_layout().size(), expected_stride * 10);
    }

    #[test]
    fn stride_is_rounded_to_item_alignment() {
        #[repr(align(32))]
        struct Aligned([u8; 32]);

        let layout = ChunkLayout::new::<Aligned>(40, nz!(3));

        assert_eq!(layout.stride(), 64);
        assert_eq!(layout.slab_layout().align(), 32);
        assert_eq!(layout.slab_layout().size(), 192);
    }

    #[test]
    fn min_chunk_size_covers_item_and_link() {
        assert_eq!(ChunkLayout::min_chunk_size::<u8>(), size_of::<Link>());
        assert_eq!(ChunkLayout::min_chunk_size::<[u64; 4]>(), 32);
    }

    #[test]
    #[should_panic]
    fn zero_sized_item_panics() {
        _ = ChunkLayout::new::<()>(8, nz!(1));
    }

    #[test]
    #[should_panic]
    fn chunk_smaller_than_item_panics() {
        _ = ChunkLayout::new::<[u64; 4]>(16, nz!(1));
    }

    #[test]
    #[should_panic]
    fn chunk_smaller_than_link_panics() {
        _ = ChunkLayout::new::<u8>(1, nz!(1));
    }

    #[test]
    #[should_panic]
    fn slab_larger_than_virtual_memory_panics() {
        _ = ChunkLayout::new::<u64>(usize::MAX / 4, nz!(16));
    }
}
