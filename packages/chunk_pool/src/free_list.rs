use std::ops::Range;
use std::ptr::NonNull;

use crate::{END_OF_LIST, Link, SlabList};

/// Intrusive stack of vacant chunks.
///
/// The only state kept outside the chunks is the index of the most recently freed chunk.
/// Every vacant chunk stores the index of the next vacant chunk in its leading bytes, so the
/// free list costs no memory beyond the chunks themselves. The most recently pushed chunk is
/// the next one popped.
#[derive(Debug)]
pub(crate) struct FreeList {
    /// Global index of the next chunk to hand out, or [`END_OF_LIST`] if there is none.
    head: Link,
}

impl FreeList {
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self { head: END_OF_LIST }
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.head == END_OF_LIST
    }

    /// Pushes every chunk in `indexes` onto the stack, in ascending order.
    ///
    /// When this is used to link a fresh slab, the last chunk of the slab becomes the head.
    pub(crate) fn link(&mut self, slabs: &SlabList, indexes: Range<usize>) {
        for index in indexes {
            self.push(slabs, index);
        }
    }

    /// Pushes the chunk with the given global index onto the stack.
    ///
    /// The caller is responsible for ensuring that the chunk is not already on the stack and
    /// that nobody else accesses the chunk until it is popped again. The leading bytes of the
    /// chunk are overwritten.
    pub(crate) fn push(&mut self, slabs: &SlabList, index: usize) {
        let link_ptr = link_ptr(slabs, index);

        // SAFETY: ChunkLayout guarantees every chunk is large enough and aligned for a Link
        // and the slab stays alive for the duration of the borrow. The caller guarantees the
        // chunk is not in use by anyone else.
        unsafe {
            link_ptr.write(self.head);
        }

        self.head = index;
    }

    /// Pops the most recently pushed chunk off the stack, returning its global index.
    #[must_use]
    pub(crate) fn pop(&mut self, slabs: &SlabList) -> Option<usize> {
        if self.is_empty() {
            return None;
        }

        let index = self.head;
        let link_ptr = link_ptr(slabs, index);

        // SAFETY: Every chunk on the stack had its link written by push() and nobody else
        // writes to a chunk while it is on the stack.
        self.head = unsafe { link_ptr.read() };

        Some(index)
    }

    /// Forgets all vacant chunks. Used when the slabs backing them are released.
    pub(crate) fn clear(&mut self) {
        self.head = END_OF_LIST;
    }

    /// Walks the stack and verifies that it is consistent with the slabs and the number of
    /// chunks handed out.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(test)]
    pub(crate) fn integrity_check(&self, slabs: &SlabList, outstanding: usize) {
        let capacity = slabs.capacity();
        let mut observed_vacant = vec![false; capacity];
        let mut vacant_count: usize = 0;

        let mut index = self.head;

        while index != END_OF_LIST {
            let seen = observed_vacant.get_mut(index).unwrap_or_else(|| {
                panic!("free list links to chunk {index} beyond capacity {capacity}")
            });

            assert!(!*seen, "free list visits chunk {index} twice");
            *seen = true;

            vacant_count = vacant_count
                .checked_add(1)
                .expect("guarded by the duplicate check above");

            // SAFETY: Every chunk on the stack had its link written by push().
            index = unsafe { link_ptr(slabs, index).read() };
        }

        assert_eq!(
            vacant_count.checked_add(outstanding),
            Some(capacity),
            "{vacant_count} vacant and {outstanding} allocated chunks do not add up to capacity {capacity}"
        );
    }
}

#[allow(
    clippy::cast_ptr_alignment,
    reason = "ChunkLayout aligns every chunk for a Link"
)]
fn link_ptr(slabs: &SlabList, index: usize) -> NonNull<Link> {
    slabs.chunk_ptr(index).cast::<Link>()
}

#[cfg(test)]
mod tests {
    use new_zealand::nz;

    use super::*;
    use crate::ChunkLayout;

    fn slabs_with(slab_count: usize) -> SlabList {
        let mut slabs = SlabList::new(ChunkLayout::new::<u64>(16, nz!(4)));

        for _ in 0..slab_count {
            slabs.append().unwrap();
        }

        slabs
    }

    #[test]
    fn new_list_is_empty() {
        let slabs = slabs_with(0);
        let mut free_list = FreeList::new();

        assert!(free_list.is_empty());
        assert_eq!(free_list.pop(&slabs), None);
    }

    #[test]
    fn linked_slab_pops_in_reverse_order() {
        let slabs = slabs_with(1);
        let mut free_list = FreeList::new();
        free_list.link(&slabs, 0..4);

        free_list.integrity_check(&slabs, 0);

        assert_eq!(free_list.pop(&slabs), Some(3));
        assert_eq!(free_list.pop(&slabs), Some(2));
        assert_eq!(free_list.pop(&slabs), Some(1));
        assert_eq!(free_list.pop(&slabs), Some(0));
        assert_eq!(free_list.pop(&slabs), None);
        assert!(free_list.is_empty());

        free_list.integrity_check(&slabs, 4);
    }

    #[test]
    fn pushed_chunk_is_popped_first() {
        let slabs = slabs_with(1);
        let mut free_list = FreeList::new();
        free_list.link(&slabs, 0..4);

        let a = free_list.pop(&slabs).unwrap();
        let b = free_list.pop(&slabs).unwrap();

        free_list.push(&slabs, a);
        free_list.integrity_check(&slabs, 1);

        assert_eq!(free_list.pop(&slabs), Some(a));
        assert_ne!(free_list.pop(&slabs), Some(b));
    }

    #[test]
    fn links_span_multiple_slabs() {
        let slabs = slabs_with(2);
        let mut free_list = FreeList::new();
        free_list.link(&slabs, 0..4);
        free_list.link(&slabs, 4..8);

        free_list.integrity_check(&slabs, 0);

        let popped: Vec<_> = std::iter::from_fn(|| free_list.pop(&slabs)).collect();

        assert_eq!(popped, vec![7, 6, 5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn clear_forgets_everything() {
        let slabs = slabs_with(1);
        let mut free_list = FreeList::new();
        free_list.link(&slabs, 0..4);

        free_list.clear();

        assert!(free_list.is_empty());
        assert_eq!(free_list.pop(&slabs), None);
    }

    #[test]
    #[should_panic]
    fn integrity_check_detects_miscount() {
        let slabs = slabs_with(1);
        let mut free_list = FreeList::new();
        free_list.link(&slabs, 0..4);

        _ = free_list.pop(&slabs);

        // One chunk is outstanding, not zero.
        free_list.integrity_check(&slabs, 0);
    }
}
