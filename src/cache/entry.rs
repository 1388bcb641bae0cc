// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! [`BlobEntry`] and [`Block`] (spec §3): the cache's per-identity record
//! and the fixed-capacity, aligned byte regions it fills on demand through
//! its adapter.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::adapter::{AccessMode, EntryFlags, Identity, SourceAdapter};
use crate::error::Error;
use crate::pool::{BlockPool, PoolBlock};

/// A fixed-capacity, aligned byte region owned by exactly one [`BlobEntry`]
/// (spec §3 Block). `stored_on_disk` is carried for data-model fidelity but
/// is never set by the blob cache itself — the cache's eviction policy
/// (spec §4.3) only ever frees blocks back to the pool, it does not spill
/// to the scratch device (only [`crate::rsd`] does that).
pub struct Block {
    pub offset: u64,
    pub bytes: PoolBlock,
    pub stored_on_disk: bool,
    pub pin_count: u32,
}

impl Block {
    fn valid_len(&self) -> usize {
        self.bytes.valid_len()
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }
}

/// The cache's per-identity record (spec §3 BlobEntry).
pub struct BlobEntry {
    pub identity: Identity,
    pub adapter: Box<dyn SourceAdapter>,
    pub mode: AccessMode,
    pub flags: EntryFlags,
    pub save_level: u64,
    pub length: Option<u64>,
    /// Blocks keyed by their quantum-aligned start offset, ascending —
    /// walking this map in key order is walking the block list "oldest to
    /// newest" for eviction (spec §4.3).
    pub blocks: BTreeMap<u64, Block>,
    pub handle_count: usize,
    pub expired: bool,
    pub last_use: Instant,
}

impl BlobEntry {
    pub fn new(identity: Identity, adapter: Box<dyn SourceAdapter>, mode: AccessMode, flags: EntryFlags, save_level: u64) -> Self {
        Self {
            identity,
            adapter,
            mode,
            flags,
            save_level,
            length: None,
            blocks: BTreeMap::new(),
            handle_count: 0,
            expired: false,
            last_use: Instant::now(),
        }
    }

    pub fn bytes_in_use(&self) -> u64 {
        self.blocks.values().map(|b| b.bytes.capacity() as u64).sum()
    }

    fn aligned_start(offset: u64, quantum: u64) -> u64 {
        (offset / quantum) * quantum
    }

    /// Fetches (allocating and filling from the adapter if necessary) the
    /// block covering quantum-aligned `aligned_offset`, returning `Ok(None)`
    /// at source EOF.
    pub(crate) fn fetch_block(&mut self, aligned_offset: u64, quantum: usize, pool: &BlockPool, cost: f64) -> Result<&Block, Error> {
        if self.expired {
            return Err(Error::Expired);
        }
        if !self.blocks.contains_key(&aligned_offset) {
            let mut block = Block {
                offset: aligned_offset,
                bytes: pool.allocate(quantum, cost).ok_or(Error::OutOfMemory)?,
                stored_on_disk: false,
                pin_count: 0,
            };
            block.bytes.set_valid_len(block.bytes.capacity());
            let n = self.adapter.read(block.bytes.as_mut_slice(), aligned_offset)?;
            block.bytes.set_valid_len(n);
            self.blocks.insert(aligned_offset, block);
        }
        Ok(self.blocks.get(&aligned_offset).expect("just inserted"))
    }

    /// Reads `buf.len()` bytes starting at `offset` through the block
    /// cache, returning the number of bytes actually copied (spec §4.3,
    /// §4.4 `Blob::read`).
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8], quantum: usize, pool: &BlockPool, cost: f64) -> Result<usize, Error> {
        if !self.mode.can_read() {
            return Err(Error::AccessDenied);
        }
        let quantum = quantum as u64;
        let mut total = 0usize;
        while total < buf.len() {
            let global_offset = offset + total as u64;
            let aligned = Self::aligned_start(global_offset, quantum);
            let block = self.fetch_block(aligned, quantum as usize, pool, cost)?;
            let within = (global_offset - block.offset) as usize;
            if within >= block.valid_len() {
                break;
            }
            let n = (block.valid_len() - within).min(buf.len() - total);
            buf[total..total + n].copy_from_slice(&block.bytes.as_slice()[within..within + n]);
            total += n;
            if within + n < quantum as usize {
                // Partial block: short of a full quantum means source EOF.
                break;
            }
        }
        self.last_use = Instant::now();
        Ok(total)
    }

    /// Writes through directly to the adapter and invalidates any cached
    /// blocks the write overlaps, so a subsequent read re-fetches fresh
    /// bytes rather than observing stale cache content.
    pub fn write_at(&mut self, offset: u64, buf: &[u8], quantum: usize) -> Result<(), Error> {
        if !self.mode.can_write() {
            return Err(Error::AccessDenied);
        }
        if self.expired {
            return Err(Error::Expired);
        }
        self.adapter.write(buf, offset)?;
        let quantum = quantum as u64;
        let first = Self::aligned_start(offset, quantum);
        let last = Self::aligned_start(offset + buf.len() as u64, quantum);
        let mut cursor = first;
        while cursor <= last {
            self.blocks.remove(&cursor);
            cursor += quantum;
        }
        self.length = None;
        self.last_use = Instant::now();
        Ok(())
    }

    pub fn query_length(&mut self) -> Result<u64, Error> {
        if self.expired {
            return Err(Error::Expired);
        }
        if let Some(len) = self.length {
            return Ok(len);
        }
        let len = self.adapter.length()?;
        self.length = Some(len);
        Ok(len)
    }

    /// Releases unpinned blocks, oldest (lowest offset) first, until
    /// `target_bytes` have been reclaimed or only pinned blocks remain
    /// (spec §4.3 Eviction policy). Returns the number of bytes actually
    /// freed.
    pub fn evict_unpinned(&mut self, target_bytes: u64, pool: &BlockPool) -> u64 {
        let mut freed = 0u64;
        let victims: Vec<u64> = self
            .blocks
            .iter()
            .filter(|(_, b)| !b.is_pinned())
            .map(|(&off, _)| off)
            .collect();
        for off in victims {
            if freed >= target_bytes {
                break;
            }
            if let Some(block) = self.blocks.remove(&off) {
                freed += block.bytes.capacity() as u64;
                pool.free(block.bytes);
            }
        }
        freed
    }
}
