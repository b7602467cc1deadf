//! Workload generators shared by the Kiln benchmarks.
//!
//! - [`alloc_sizes`]: a seeded, reproducible mix of allocation sizes
//! - [`fan_out`]: submit many small counting tasks and wait for them

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kiln_pool::ThreadPool;
use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// `count` allocation sizes in `1..=max`, skewed towards small requests
/// (three in four fall under `max / 8`).
///
/// The same seed always yields the same sequence.
pub fn alloc_sizes(count: usize, max: usize, seed: u64) -> Vec<usize> {
    let max = max.max(8);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let roll = rng.next_u32() as usize;
            let limit = if roll % 4 == 0 { max } else { max / 8 };
            1 + (rng.next_u32() as usize) % limit
        })
        .collect()
}

/// Submit `tasks` closures that each bump a shared counter, wait for all of
/// them, and return the final count.
///
/// # Panics
///
/// Panics if the pool rejects a submission.
pub fn fan_out(pool: &mut ThreadPool, tasks: usize) -> u64 {
    let counter = Arc::new(AtomicU64::new(0));
    for _ in 0..tasks {
        let counter = Arc::clone(&counter);
        if let Err(err) = pool.add(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        }) {
            panic!("benchmark submission failed: {err}");
        }
    }
    pool.wait();
    counter.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_reproducible_and_in_range() {
        let a = alloc_sizes(500, 1024, 7);
        let b = alloc_sizes(500, 1024, 7);
        assert_eq!(a, b);
        assert!(a.iter().all(|&s| (1..=1024).contains(&s)));
        assert_ne!(a, alloc_sizes(500, 1024, 8));
    }
}
