//! Basic usage of the `chunk_pool` crate:
//!
//! * Creating a fixed pool of 100 chunks of 100 bytes.
//! * Allocating chunks until the pool runs out.
//! * Returning chunks and observing LIFO reuse.
//! * Letting a growable pool add slabs on demand from several threads.

use std::sync::Arc;
use std::thread;

use chunk_pool::{Error, FixedChunkPool, GrowableChunkPool};

type Block = [u8; 100];

fn main() {
    let mut pool = FixedChunkPool::<Block>::new(100, 100);

    println!(
        "Fixed pool: chunk size {} bytes, stride {} bytes, capacity {}",
        pool.chunk_size(),
        pool.stride(),
        pool.capacity()
    );

    let first = pool.allocate().expect("a fresh pool has vacant chunks");

    // SAFETY: The chunk is exclusively ours and sized and aligned for one Block.
    unsafe { first.ptr().write([0xAB; 100]) };

    println!("Allocated chunk #{} at {:?}", first.index(), first.ptr());

    let mut rest = Vec::new();

    loop {
        match pool.allocate() {
            Ok(chunk) => rest.push(chunk),
            Err(Error::OutOfMemory { capacity }) => {
                println!("Pool exhausted after handing out all {capacity} chunks");
                break;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let returned_ptr = first.ptr();

    // SAFETY: The chunk came from this pool and is returned exactly once. Nothing in it
    // needs dropping.
    unsafe { pool.deallocate(first) };

    let reused = pool.allocate().expect("we just returned a chunk");
    println!(
        "The most recently returned chunk is reused first: {}",
        reused.ptr() == returned_ptr
    );

    // Dropping the pool releases its slab. Outstanding handles must not be used afterwards.
    drop(rest);
    drop(reused);
    drop(pool);

    let pool = Arc::new(GrowableChunkPool::<u64>::new(8, 16));

    let workers: Vec<_> = (0..4_u64)
        .map(|worker| {
            let pool = Arc::clone(&pool);

            thread::spawn(move || {
                (0..20_u64)
                    .map(|i| {
                        let chunk = pool
                            .allocate()
                            .expect("growable pool only fails if the host is out of memory");

                        // SAFETY: The chunk is exclusively ours and sized and aligned for u64.
                        unsafe { chunk.ptr().write(worker * 100 + i) };

                        chunk
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let chunks: Vec<_> = workers
        .into_iter()
        .flat_map(|worker| worker.join().expect("worker thread panicked"))
        .collect();

    println!(
        "Growable pool: {} chunks in use across {} slabs (capacity {})",
        pool.len(),
        pool.slab_count(),
        pool.capacity()
    );

    for chunk in chunks {
        // SAFETY: The chunk came from this pool and is returned exactly once.
        unsafe { pool.deallocate(chunk) };
    }

    println!("After returning everything: {} chunks in use", pool.len());
}
