use std::ptr::NonNull;

use crate::{ChunkLayout, FreeList, Result, SlabList};

/// The allocation state shared by both pool flavors: the slabs, the free list threaded
/// through them and the number of chunks currently handed out.
///
/// The store deals in untyped chunks. The pools on top of it attach the item type.
#[derive(Debug)]
pub(crate) struct ChunkStore {
    slabs: SlabList,

    free_list: FreeList,

    /// Number of chunks currently handed out. We track this explicitly so callers can
    /// detect leaks and so the free list can be verified in tests.
    length: usize,

    /// Set once the store has been cleared. A cleared store has no storage and never
    /// acquires any again.
    cleared: bool,
}

impl ChunkStore {
    /// Creates a store with one slab, all of its chunks vacant.
    pub(crate) fn new(layout: ChunkLayout) -> Result<Self> {
        let mut store = Self {
            slabs: SlabList::new(layout),
            free_list: FreeList::new(),
            length: 0,
            cleared: false,
        };

        store.grow()?;

        tracing::trace!(
            chunk_size = layout.chunk_size(),
            stride = layout.stride(),
            chunk_count = layout.chunk_count().get(),
            "created chunk store"
        );

        Ok(store)
    }

    #[must_use]
    pub(crate) fn layout(&self) -> ChunkLayout {
        self.slabs.layout()
    }

    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub(crate) fn len(&self) -> usize {
        self.length
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.slabs.capacity()
    }

    #[must_use]
    pub(crate) fn slab_count(&self) -> usize {
        self.slabs.slab_count()
    }

    #[must_use]
    pub(crate) fn is_exhausted(&self) -> bool {
        self.free_list.is_empty()
    }

    #[must_use]
    pub(crate) fn is_cleared(&self) -> bool {
        self.cleared
    }

    /// Takes the most recently freed chunk, returning its global index and address.
    #[must_use]
    pub(crate) fn pop(&mut self) -> Option<(usize, NonNull<u8>)> {
        let index = self.free_list.pop(&self.slabs)?;

        // Cannot overflow because every outstanding chunk occupies memory.
        self.length = self.length.wrapping_add(1);

        Some((index, self.slabs.chunk_ptr(index)))
    }

    /// Returns a chunk to the free list.
    ///
    /// The caller must guarantee that the chunk was handed out by `pop()` of this store
    /// and has not been returned since.
    ///
    /// # Panics
    ///
    /// Panics if no chunks are outstanding or if the index is outside the store.
    pub(crate) fn push(&mut self, index: usize) {
        self.length = self
            .length
            .checked_sub(1)
            .expect("returned a chunk to a store that has no chunks outstanding");

        self.free_list.push(&self.slabs, index);
    }

    /// Appends a slab and links all of its chunks into the free list.
    ///
    /// Existing slabs are untouched, so chunks handed out earlier remain valid.
    pub(crate) fn grow(&mut self) -> Result<()> {
        let indexes = self.slabs.append().inspect_err(|error| {
            tracing::warn!(
                %error,
                slab_count = self.slabs.slab_count(),
                "chunk pool could not acquire a new slab"
            );
        })?;

        self.free_list.link(&self.slabs, indexes);

        tracing::debug!(
            slab_count = self.slabs.slab_count(),
            capacity = self.slabs.capacity(),
            "chunk pool appended a slab"
        );

        Ok(())
    }

    /// Releases all slabs. Every chunk handed out earlier becomes invalid.
    pub(crate) fn clear(&mut self) {
        if !self.cleared {
            tracing::debug!(
                slab_count = self.slabs.slab_count(),
                outstanding = self.length,
                "chunk pool cleared"
            );
        }

        self.free_list.clear();
        self.slabs.clear();
        self.length = 0;
        self.cleared = true;
    }

    #[cfg(test)]
    pub(crate) fn fail_next_growth(&mut self) {
        self.slabs.fail_next_append();
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(test)]
    pub(crate) fn integrity_check(&self) {
        self.free_list.integrity_check(&self.slabs, self.length);
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZero;

    use new_zealand::nz;

    use super::*;
    use crate::Error;

    fn store(chunk_count: usize) -> ChunkStore {
        let chunk_count = NonZero::new(chunk_count).unwrap();
        ChunkStore::new(ChunkLayout::new::<u64>(8, chunk_count)).unwrap()
    }

    #[test]
    fn new_store_has_one_vacant_slab() {
        let store = store(4);

        assert_eq!(store.len(), 0);
        assert_eq!(store.capacity(), 4);
        assert_eq!(store.slab_count(), 1);
        assert!(!store.is_exhausted());
        assert!(!store.is_cleared());
        store.integrity_check();
    }

    #[test]
    fn pop_until_exhausted() {
        let mut store = store(3);

        let mut indexes = Vec::new();

        while let Some((index, _)) = store.pop() {
            indexes.push(index);
        }

        indexes.sort_unstable();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(store.len(), 3);
        assert!(store.is_exhausted());
        store.integrity_check();
    }

    #[test]
    fn push_then_pop_returns_same_chunk() {
        let mut store = store(2);

        let (index, ptr) = store.pop().unwrap();
        store.push(index);

        assert_eq!(store.pop(), Some((index, ptr)));
        store.integrity_check();
    }

    #[test]
    fn grow_keeps_existing_chunks_in_place() {
        let mut store = store(2);

        let first = store.pop().unwrap();
        let second = store.pop().unwrap();
        assert!(store.is_exhausted());

        store.grow().unwrap();

        assert_eq!(store.capacity(), 4);
        assert_eq!(store.slab_count(), 2);
        assert_eq!(store.slabs.chunk_ptr(first.0), first.1);
        assert_eq!(store.slabs.chunk_ptr(second.0), second.1);
        store.integrity_check();

        let (third, _) = store.pop().unwrap();
        assert!(third >= 2);
    }

    #[test]
    fn failed_growth_leaves_store_unchanged() {
        let mut store = store(2);
        _ = store.pop().unwrap();
        _ = store.pop().unwrap();

        store.fail_next_growth();

        assert!(matches!(
            store.grow(),
            Err(Error::AllocationFailure { .. })
        ));
        assert_eq!(store.capacity(), 2);
        assert!(store.is_exhausted());
        store.integrity_check();
    }

    #[test]
    fn clear_releases_everything() {
        let mut store = store(4);
        _ = store.pop().unwrap();
        store.grow().unwrap();

        store.clear();

        assert!(store.is_cleared());
        assert!(store.is_exhausted());
        assert_eq!(store.len(), 0);
        assert_eq!(store.capacity(), 0);
        assert_eq!(store.slab_count(), 0);
        assert_eq!(store.pop(), None);

        // Clearing twice is harmless.
        store.clear();
        assert_eq!(store.capacity(), 0);
    }

    #[test]
    #[should_panic]
    fn push_without_outstanding_chunks_panics() {
        let mut store = store(4);
        store.push(0);
    }

    #[test]
    fn layout_is_preserved() {
        let store = ChunkStore::new(ChunkLayout::new::<u32>(12, nz!(5))).unwrap();

        assert_eq!(store.layout().chunk_size(), 12);
        assert_eq!(store.layout().chunk_count().get(), 5);
    }
}
