#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Memory pools that hand out equally sized chunks of raw storage in O(1).
//!
//! A pool reserves a slab of `chunk_count` chunks of `chunk_size` bytes up front and recycles
//! returned chunks through an intrusive free list: every vacant chunk stores the position of
//! the next vacant chunk in its own leading bytes, so tracking vacancy costs no memory beyond
//! the chunks themselves. Chunks are handed out in LIFO order - the most recently returned
//! chunk is the next one allocated, which keeps bursty allocate/deallocate patterns cache-hot.
//!
//! Two flavors are provided:
//!
//! * [`FixedChunkPool`] owns exactly one slab and fails with [`Error::OutOfMemory`] once all of
//!   its chunks are allocated. It is single-threaded ([`Send`] but not [`Sync`]).
//! * [`GrowableChunkPool`] appends another slab whenever it runs out of chunks and can be shared
//!   between threads. Growth never moves or releases existing slabs, so chunks handed out before
//!   growth remain valid. It fails with [`Error::AllocationFailure`] only if the host refuses to
//!   provide memory for a new slab.
//!
//! The pools manage storage only. A [`PooledChunk<T>`] is sized and aligned for one `T` but the
//! pool neither initializes it nor drops anything stored in it.
//!
//! # Example
//!
//! ```rust
//! use chunk_pool::{Error, FixedChunkPool};
//!
//! let mut pool = FixedChunkPool::<u64>::new(8, 2);
//!
//! let first = pool.allocate().unwrap();
//! let second = pool.allocate().unwrap();
//!
//! // SAFETY: The chunks are exclusively ours and sized and aligned for u64.
//! unsafe {
//!     first.ptr().write(1);
//!     second.ptr().write(2);
//! }
//!
//! assert!(matches!(pool.allocate(), Err(Error::OutOfMemory { capacity: 2 })));
//!
//! let second_ptr = second.ptr();
//!
//! // SAFETY: The chunk came from this pool and is returned exactly once.
//! unsafe { pool.deallocate(second) };
//!
//! // The most recently returned chunk is the next one handed out.
//! let third = pool.allocate().unwrap();
//! assert_eq!(third.ptr(), second_ptr);
//! ```
//!
//! # Misuse
//!
//! Returning a chunk twice, returning a chunk to a pool it did not come from, or using a chunk
//! after its pool was cleared or dropped corrupts the pool. The pools do not detect this, which
//! is why the `deallocate()` methods are `unsafe`. Returning the same [`PooledChunk<T>`] twice
//! is ruled out by the type system, as the handle is consumed on return and cannot be cloned.

mod builder;
mod error;
mod fixed_pool;
mod free_list;
mod growable_pool;
mod layout;
mod pooled_chunk;
mod slab;
mod store;

pub use builder::*;
pub use error::*;
pub use fixed_pool::*;
pub(crate) use free_list::*;
pub use growable_pool::*;
pub(crate) use layout::*;
pub use pooled_chunk::*;
pub(crate) use slab::*;
pub(crate) use store::*;

const ERR_POISONED_LOCK: &str = "encountered poisoned lock - program validity cannot be guaranteed";
