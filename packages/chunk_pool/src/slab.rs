use std::alloc::{alloc, dealloc};
use std::ops::Range;
use std::ptr::NonNull;

use crate::{ChunkLayout, Error, Result};

/// One contiguous block of backing storage, sliced into `chunk_count` chunks.
///
/// The slab knows nothing about which of its chunks are free. It never reads or writes the
/// chunk contents, so it is valid for callers to access chunks via pointers while the slab
/// is alive.
#[derive(Debug)]
pub(crate) struct ChunkSlab {
    /// Start of the allocation, aligned for both the item type and the free list link.
    first_chunk_ptr: NonNull<u8>,

    layout: ChunkLayout,
}

impl ChunkSlab {
    /// Acquires storage for one slab from the global allocator.
    ///
    /// The contents of the new slab are uninitialized.
    pub(crate) fn new(layout: ChunkLayout) -> Result<Self> {
        let slab_layout = layout.slab_layout();

        // SAFETY: ChunkLayout guarantees a valid layout with non-zero size, as it rejects
        // zero-sized items and zero chunk counts.
        let ptr = unsafe { alloc(slab_layout) };

        let first_chunk_ptr = NonNull::new(ptr).ok_or(Error::AllocationFailure {
            bytes: slab_layout.size(),
        })?;

        Ok(Self {
            first_chunk_ptr,
            layout,
        })
    }

    /// Returns a pointer to the start of the chunk at `index` within this slab.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of bounds.
    #[must_use]
    pub(crate) fn chunk_ptr(&self, index: usize) -> NonNull<u8> {
        assert!(
            index < self.layout.chunk_count().get(),
            "chunk {index} index out of bounds in slab of {} chunks",
            self.layout.chunk_count()
        );

        // Cannot overflow because that would imply the slab extends beyond virtual memory.
        let offset = index.wrapping_mul(self.layout.stride());

        // SAFETY: The offset is within the allocation due to the bounds check above.
        unsafe { self.first_chunk_ptr.byte_add(offset) }
    }
}

impl Drop for ChunkSlab {
    fn drop(&mut self) {
        // SAFETY: The layout matches the one used for the allocation in new().
        unsafe {
            dealloc(self.first_chunk_ptr.as_ptr(), self.layout.slab_layout());
        }
    }
}

// SAFETY: The slab is plain memory without thread affinity. What is stored in the chunks is
// governed by the pool and its handles, which carry their own thread safety requirements.
unsafe impl Send for ChunkSlab {}

/// The insertion-ordered list of slabs owned by a pool.
///
/// Slabs are only ever appended. Existing slabs are never moved, replaced or released until
/// the whole list is cleared, so chunks handed out earlier stay valid across growth.
///
/// Every chunk has a global index: `slab_index * chunk_count + index_in_slab`.
#[derive(Debug)]
pub(crate) struct SlabList {
    layout: ChunkLayout,

    slabs: Vec<ChunkSlab>,

    /// Makes the next append fail as if the host allocator had refused, to exercise the
    /// failure path in tests.
    #[cfg(test)]
    fail_next_append: bool,
}

impl SlabList {
    #[must_use]
    pub(crate) fn new(layout: ChunkLayout) -> Self {
        Self {
            layout,
            slabs: Vec::new(),
            #[cfg(test)]
            fail_next_append: false,
        }
    }

    #[must_use]
    pub(crate) fn layout(&self) -> ChunkLayout {
        self.layout
    }

    #[must_use]
    pub(crate) fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    /// Total number of chunks across all slabs.
    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        // Overflow here would imply capacity is greater than virtual memory - impossible.
        self.slabs
            .len()
            .wrapping_mul(self.layout.chunk_count().get())
    }

    /// Appends a new slab and returns the range of global chunk indexes it covers.
    pub(crate) fn append(&mut self) -> Result<Range<usize>> {
        #[cfg(test)]
        if self.fail_next_append {
            self.fail_next_append = false;

            return Err(Error::AllocationFailure {
                bytes: self.layout.slab_layout().size(),
            });
        }

        let first_index = self.capacity();
        self.slabs.push(ChunkSlab::new(self.layout)?);

        Ok(first_index..self.capacity())
    }

    /// Returns a pointer to the start of the chunk with the given global index.
    ///
    /// # Panics
    ///
    /// Panics if no slab contains a chunk with this index.
    #[must_use]
    #[allow(
        clippy::integer_division,
        clippy::modulo_arithmetic,
        reason = "splitting a global index into slab coordinates is exactly what we want here"
    )]
    pub(crate) fn chunk_ptr(&self, index: usize) -> NonNull<u8> {
        let chunk_count = self.layout.chunk_count().get();

        let slab = self.slabs.get(index / chunk_count).unwrap_or_else(|| {
            panic!(
                "chunk {index} is outside the {} chunks owned by the pool",
                self.capacity()
            )
        });

        slab.chunk_ptr(index % chunk_count)
    }

    /// Releases every slab. All chunk pointers handed out earlier become dangling.
    pub(crate) fn clear(&mut self) {
        self.slabs.clear();
    }

    #[cfg(test)]
    pub(crate) fn fail_next_append(&mut self) {
        self.fail_next_append = true;
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(ChunkSlab: Send);
    assert_not_impl_any!(ChunkSlab: Sync);

    #[test]
    fn chunks_are_stride_apart() {
        let layout = ChunkLayout::new::<u64>(24, nz!(4));
        let slab = ChunkSlab::new(layout).unwrap();

        let first = slab.chunk_ptr(0).as_ptr() as usize;

        for index in 1..4 {
            let ptr = slab.chunk_ptr(index).as_ptr() as usize;
            assert_eq!(ptr - first, index * layout.stride());
            assert_eq!(ptr % align_of::<u64>(), 0);
        }
    }

    #[test]
    fn chunks_are_writable() {
        let layout = ChunkLayout::new::<u64>(8, nz!(8));
        let slab = ChunkSlab::new(layout).unwrap();

        for index in 0..8 {
            unsafe { slab.chunk_ptr(index).cast::<u64>().write(index as u64) };
        }

        for index in 0..8 {
            assert_eq!(
                unsafe { slab.chunk_ptr(index).cast::<u64>().read() },
                index as u64
            );
        }
    }

    #[test]
    #[should_panic]
    fn chunk_out_of_bounds_panics() {
        let layout = ChunkLayout::new::<u64>(8, nz!(2));
        let slab = ChunkSlab::new(layout).unwrap();

        _ = slab.chunk_ptr(2);
    }

    #[test]
    fn append_assigns_consecutive_index_ranges() {
        let mut slabs = SlabList::new(ChunkLayout::new::<u32>(8, nz!(3)));

        assert_eq!(slabs.capacity(), 0);
        assert_eq!(slabs.append().unwrap(), 0..3);
        assert_eq!(slabs.append().unwrap(), 3..6);
        assert_eq!(slabs.slab_count(), 2);
        assert_eq!(slabs.capacity(), 6);
    }

    #[test]
    fn append_does_not_move_existing_slabs() {
        let mut slabs = SlabList::new(ChunkLayout::new::<u32>(8, nz!(2)));
        slabs.append().unwrap();

        let before = slabs.chunk_ptr(1);

        for _ in 0..16 {
            slabs.append().unwrap();
        }

        assert_eq!(slabs.chunk_ptr(1), before);
    }

    #[test]
    fn global_index_maps_into_correct_slab() {
        let layout = ChunkLayout::new::<u64>(8, nz!(4));
        let mut slabs = SlabList::new(layout);
        slabs.append().unwrap();
        slabs.append().unwrap();

        let slab_1_start = slabs.chunk_ptr(4).as_ptr() as usize;
        let slab_1_third = slabs.chunk_ptr(6).as_ptr() as usize;

        assert_eq!(slab_1_third - slab_1_start, 2 * layout.stride());
    }

    #[test]
    #[should_panic]
    fn chunk_ptr_beyond_capacity_panics() {
        let mut slabs = SlabList::new(ChunkLayout::new::<u64>(8, nz!(4)));
        slabs.append().unwrap();

        _ = slabs.chunk_ptr(4);
    }

    #[test]
    fn injected_failure_is_reported_once() {
        let layout = ChunkLayout::new::<u64>(8, nz!(4));
        let mut slabs = SlabList::new(layout);

        slabs.fail_next_append();

        assert_eq!(
            slabs.append(),
            Err(Error::AllocationFailure {
                bytes: layout.slab_layout().size()
            })
        );
        assert_eq!(slabs.capacity(), 0);

        assert_eq!(slabs.append().unwrap(), 0..4);
    }

    #[test]
    fn clear_releases_all_slabs() {
        let mut slabs = SlabList::new(ChunkLayout::new::<u64>(8, nz!(4)));
        slabs.append().unwrap();
        slabs.append().unwrap();

        slabs.clear();

        assert_eq!(slabs.slab_count(), 0);
        assert_eq!(slabs.capacity(), 0);
    }
}
