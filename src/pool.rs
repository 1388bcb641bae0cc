// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The block pool (spec §4.2): a single fixed-cost allocator per cache
//! instance, handing out quantised byte blocks and tracking enough
//! bookkeeping for a low-memory handler to tell whether a cooperative
//! release actually returned memory.
//!
//! The real named-pool allocator (the MPS arena) is an external
//! collaborator (spec §1); this module stands in for it with plain
//! `Vec<u8>`-backed blocks, rounded up to the quantum.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::metrics;

/// A fixed-capacity byte region owned by exactly one `BlockPool`
/// allocation at a time. Capacity is always a power-of-two multiple of the
/// pool's allocation quantum (spec §3 Block).
pub struct PoolBlock {
    bytes: Vec<u8>,
    /// Number of bytes at the front of the block that hold valid data.
    /// Distinct from `capacity`; callers update this as they fill the block.
    valid_len: usize,
}

impl PoolBlock {
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn valid_len(&self) -> usize {
        self.valid_len
    }

    pub fn set_valid_len(&mut self, len: usize) {
        debug_assert!(len <= self.capacity());
        self.valid_len = len.min(self.capacity());
    }

    /// The block's actual (allocator-provided) pointer alignment. No
    /// alignment above what the global allocator naturally hands back is
    /// ever requested by a caller of this pool, so unlike a hand-rolled
    /// `Layout`-based allocator this is observational rather than enforced.
    pub fn alignment(&self) -> usize {
        let addr = self.bytes.as_ptr() as usize;
        if addr == 0 {
            std::mem::align_of::<u8>().max(1)
        } else {
            1usize << addr.trailing_zeros()
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Deref for PoolBlock {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.bytes[..self.valid_len]
    }
}

impl DerefMut for PoolBlock {
    fn deref_mut(&mut self) -> &mut [u8] {
        let len = self.valid_len;
        &mut self.bytes[..len]
    }
}

/// Records each allocation's outstanding-byte count so a low-memory handler
/// can observe whether a cooperative release actually freed memory (spec
/// §4.2, §4.7 "offers_limited").
#[derive(Default)]
pub struct PurgeTracker {
    live_bytes: AtomicU64,
}

impl PurgeTracker {
    pub fn sample(&self) -> u64 {
        self.live_bytes.load(Ordering::Acquire)
    }

    fn add(&self, n: u64) {
        self.live_bytes.fetch_add(n, Ordering::AcqRel);
    }

    fn sub(&self, n: u64) {
        self.live_bytes.fetch_sub(n, Ordering::AcqRel);
    }
}

/// A single pool per cache instance (spec §4.2).
pub struct BlockPool {
    quantum: usize,
    max_alignment: usize,
    tracker: PurgeTracker,
}

impl BlockPool {
    /// `quantum` is the allocation quantum. `max_alignment` is kept for API
    /// compatibility with callers that still size it against a `Map`'s
    /// alignment needs (spec §4.4); no caller in this crate currently
    /// requests a block alignment above what `Vec<u8>` already provides, so
    /// it is not threaded into `allocate` (see `DESIGN.md`).
    pub fn new(quantum: usize, max_alignment: usize) -> Self {
        assert!(quantum.is_power_of_two(), "allocation quantum must be a power of two");
        assert!(max_alignment.is_power_of_two(), "max alignment must be a power of two");
        Self {
            quantum,
            max_alignment,
            tracker: PurgeTracker::default(),
        }
    }

    pub fn quantum(&self) -> usize {
        self.quantum
    }

    pub fn max_alignment(&self) -> usize {
        self.max_alignment
    }

    pub fn tracker(&self) -> &PurgeTracker {
        &self.tracker
    }

    fn round_up_to_quantum(&self, size: usize) -> usize {
        if size == 0 {
            return self.quantum;
        }
        size.next_power_of_two().max(self.quantum)
    }

    /// Returns a block of capacity at least `size`, rounded up to the
    /// allocation quantum. `cost` is a scalar the caller supplies for
    /// accounting only; the pool itself never reserves headroom against it
    /// (spec §4.2).
    pub fn allocate(&self, size: usize, _cost: f64) -> Option<PoolBlock> {
        let capacity = self.round_up_to_quantum(size);
        let bytes = vec![0u8; capacity];
        self.tracker.add(capacity as u64);
        metrics::BLOCK_SIZE_BYTES.observe(capacity as f64);
        Some(PoolBlock { bytes, valid_len: 0 })
    }

    /// Releases capacity immediately back to the allocator.
    pub fn free(&self, block: PoolBlock) {
        self.tracker.sub(block.capacity() as u64);
        drop(block);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rounds_up_to_quantum() {
        let pool = BlockPool::new(1024, 4096);
        let b = pool.allocate(100, 1.0).unwrap();
        assert_eq!(b.capacity(), 1024);
        let b2 = pool.allocate(1025, 1.0).unwrap();
        assert_eq!(b2.capacity(), 2048);
    }

    #[test]
    fn tracker_reflects_live_bytes() {
        let pool = BlockPool::new(512, 4096);
        assert_eq!(pool.tracker().sample(), 0);
        let b = pool.allocate(512, 1.0).unwrap();
        assert_eq!(pool.tracker().sample(), 512);
        pool.free(b);
        assert_eq!(pool.tracker().sample(), 0);
    }

    #[test]
    fn allocated_bytes_start_zeroed() {
        let pool = BlockPool::new(64, 64);
        let mut b = pool.allocate(64, 1.0).unwrap();
        assert!(b.as_slice().iter().all(|&byte| byte == 0));
        b.set_valid_len(64);
        assert_eq!(b.len(), 64);
    }

    #[test]
    fn alignment_is_a_power_of_two_and_matches_the_pointer() {
        let pool = BlockPool::new(64, 64);
        let b = pool.allocate(64, 1.0).unwrap();
        assert!(b.alignment().is_power_of_two());
        assert_eq!((b.as_slice().as_ptr() as usize) % b.alignment(), 0);
    }
}
