use thiserror::Error;

/// Errors that can occur when allocating chunks from a pool.
///
/// Misuse of the pool (returning a chunk twice, returning a chunk to a pool it did not come
/// from or using a chunk after its pool was cleared or dropped) is not reported through this
/// type. Such misuse is ruled out by the safety contract of the `deallocate()` methods.
#[derive(Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// Every chunk of the pool is currently allocated and the pool is not permitted to grow.
    ///
    /// This is a logical condition of the pool, not of the host. It lasts until a chunk is
    /// returned to the pool.
    #[error("chunk pool is exhausted: all {capacity} chunks are allocated")]
    OutOfMemory {
        /// The number of chunks the pool owned when the allocation was attempted.
        capacity: usize,
    },

    /// The pool attempted to acquire storage for a new slab and the host allocator refused.
    #[error("failed to acquire {bytes} bytes of backing storage for a new slab")]
    AllocationFailure {
        /// The size of the slab allocation that was refused.
        bytes: usize,
    },
}

/// A specialized `Result` type for chunk pool operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
