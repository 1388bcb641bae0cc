// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The RSD block list (spec §4.5): a per-stream ordered list of fixed-size
//! blocks filled on demand from a source stream, purgeable to a scratch
//! device, rewindable and re-fillable.

use std::sync::Arc;

use ahash::HashMap as AHashMap;

use crate::config::RsdConfig;
use crate::error::Error;
use crate::metrics;
use crate::pool::{BlockPool, PoolBlock};
use crate::scratch::{rsd_filename, ScratchDevice, ScratchHandle};
use crate::stream_iface::Stream;

/// Sequential or random access hint (spec §4.5), controlling block size and
/// purge scan order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessHint {
    Sequential,
    Random,
}

/// One of the four escalating purge actions `find_reclaim` tries in order
/// (spec §4.5 Purge path).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReclaimAction {
    MemOnlyExact,
    MemOnlyAny,
    DiskEligibleExact,
    DiskEligibleAny,
}

fn reclaim_escalation(hint: AccessHint) -> &'static [(ReclaimAction, bool)] {
    use ReclaimAction::*;
    match hint {
        // `from_fill_block = true`: scanning starts at the current fill
        // pointer, the shape used for sequential replay (spec §4.5).
        AccessHint::Sequential => &[
            (MemOnlyExact, true),
            (MemOnlyAny, true),
            (DiskEligibleExact, true),
            (DiskEligibleAny, true),
        ],
        AccessHint::Random => &[
            (MemOnlyExact, false),
            (MemOnlyAny, false),
            (DiskEligibleExact, false),
            (DiskEligibleAny, false),
        ],
    }
}

/// Computes a new block size by repeatedly halving `from` until halving
/// again would fall below `floor` (spec §0.7 `rsdblist.c`): handles
/// sequential/random quanta that aren't a clean power-of-two ratio apart.
pub fn halving_steps_to(from: usize, floor: usize) -> usize {
    let mut size = from.max(floor);
    while size / 2 >= floor {
        size /= 2;
    }
    size
}

struct RsdFile {
    id: u32,
    name: String,
    write_handle: ScratchHandle,
    appended_size: u64,
}

/// Per-block record (spec §3 RsdBlock).
pub struct RsdBlock {
    pub offset: u64,
    pub stored_bytes: usize,
    pub capacity: usize,
    pub buffer: Option<PoolBlock>,
    pub file: Option<(u32, u64)>,
}

impl RsdBlock {
    pub fn is_memory_resident(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn is_disk_backed(&self) -> bool {
        self.file.is_some()
    }
}

/// The result of [`RsdBlockList::read_block`] (spec §4.5 Fill path): the
/// block's stored bytes, and whether this was the list's final block.
pub struct BlockRead<'a> {
    pub bytes: &'a [u8],
    pub is_last: bool,
}

/// Per-stream ordered block list (spec §4.5).
pub struct RsdBlockList {
    source: Box<dyn Stream>,
    source_cursor: u64,
    is_original: bool,
    seekable: bool,
    encoded: bool,
    access_hint: AccessHint,
    block_bytes: usize,
    rewind_offset: u64,
    eof: bool,
    total_length: Option<u64>,
    blocks: Vec<RsdBlock>,
    read_index: usize,
    /// Index of the block `read_block` most recently returned with
    /// `save_restore_file_position = true`; never purged (spec §3 RsdBlock
    /// "`lock` block is never purged").
    lock_index: Option<usize>,
    files: AHashMap<u32, RsdFile>,
    next_file_id: u32,
    current_write_file: Option<u32>,
    config: RsdConfig,
    pool: Arc<BlockPool>,
    scratch: Arc<dyn ScratchDevice>,
}

const MAX_SCRATCH_FILE_BYTES: u64 = (1u64 << 31) - 1;

impl RsdBlockList {
    pub fn new(
        source: Box<dyn Stream>,
        is_original: bool,
        seekable: bool,
        encoded: bool,
        access_hint: AccessHint,
        rewind_offset: u64,
        config: RsdConfig,
        pool: Arc<BlockPool>,
        scratch: Arc<dyn ScratchDevice>,
    ) -> Self {
        let block_bytes = match access_hint {
            AccessHint::Sequential => config.sequential_block_bytes,
            AccessHint::Random => config.random_block_bytes,
        };
        Self {
            source,
            source_cursor: rewind_offset,
            is_original,
            seekable,
            encoded,
            access_hint,
            block_bytes,
            rewind_offset,
            eof: false,
            total_length: None,
            blocks: Vec::new(),
            read_index: 0,
            lock_index: None,
            files: AHashMap::default(),
            next_file_id: 0,
            current_write_file: None,
            config,
            pool,
            scratch,
        }
    }

    pub fn access_hint(&self) -> AccessHint {
        self.access_hint
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn total_length(&self) -> Option<u64> {
        self.total_length
    }

    pub fn stored_bytes_sum(&self) -> u64 {
        self.blocks.iter().map(|b| b.stored_bytes as u64).sum()
    }

    pub fn bytes_in_memory(&self) -> u64 {
        self.blocks
            .iter()
            .filter_map(|b| b.buffer.as_ref())
            .map(|b| b.capacity() as u64)
            .sum()
    }

    /// Promotes this list to random-access hint (spec §4.5 `store_seek`):
    /// halves the block size toward the random floor per spec §0.7. Only
    /// affects blocks allocated from this point on.
    pub fn promote_to_random(&mut self) {
        if self.access_hint == AccessHint::Sequential {
            self.access_hint = AccessHint::Random;
            self.block_bytes = halving_steps_to(self.config.sequential_block_bytes, self.config.random_block_bytes);
        }
    }

    fn reposition_source(&mut self, target: u64) -> Result<(), Error> {
        if self.source_cursor == target {
            return Ok(());
        }
        if self.seekable {
            self.source.seek(target)?;
            self.source_cursor = target;
            return Ok(());
        }
        // Non-seekable source: only a restart from byte zero is available
        // (the filter-chain rewind of spec §4.5 Fill path step 3); anything
        // else is forward replay, discarding bytes until `target`.
        if target < self.source_cursor {
            self.source.seek(0)?;
            self.source_cursor = 0;
        }
        let mut scratch_buf = [0u8; 4096];
        while self.source_cursor < target {
            let want = ((target - self.source_cursor) as usize).min(scratch_buf.len());
            let n = self.source.read(&mut scratch_buf[..want])?;
            if n == 0 {
                break;
            }
            self.source_cursor += n as u64;
        }
        Ok(())
    }

    /// Rewinds the read cursor to the list's rewind offset (spec §4.5
    /// Rewind, reread and reposition). Blocks whose buffer or file is still
    /// present are served without touching the source again.
    pub fn rewind(&mut self) {
        self.read_index = 0;
    }

    /// Seeks the read cursor to the block containing `offset`, creating
    /// blocks up to that point if necessary. Returns the realised
    /// (block-aligned) offset (spec §4.6 `store_seek`).
    pub fn seek_to_containing_block(&mut self, offset: u64) -> Result<u64, Error> {
        for idx in 0..self.blocks.len() {
            let block = &self.blocks[idx];
            if offset < block.offset + block.stored_bytes as u64 {
                self.read_index = idx;
                return Ok(block.offset);
            }
        }
        loop {
            if self.eof {
                let idx = self.blocks.len().saturating_sub(1);
                self.read_index = idx;
                return Ok(self.blocks.get(idx).map(|b| b.offset).unwrap_or(self.rewind_offset));
            }
            self.ensure_tail_block()?;
            if self.eof {
                continue;
            }
            let idx = self.blocks.len() - 1;
            let block = &self.blocks[idx];
            if offset < block.offset + block.stored_bytes as u64 {
                self.read_index = idx;
                return Ok(block.offset);
            }
        }
    }

    fn ensure_tail_block(&mut self) -> Result<(), Error> {
        if self.eof {
            return Ok(());
        }
        let offset = self.blocks.last().map(|b| b.offset + b.stored_bytes as u64).unwrap_or(self.rewind_offset);
        self.reposition_source(offset)?;
        let mut buf = self.pool.allocate(self.block_bytes, 1.0).ok_or(Error::OutOfMemory)?;
        buf.set_valid_len(buf.capacity());
        let n = self.source.read(buf.as_mut_slice())?;
        self.source_cursor += n as u64;
        buf.set_valid_len(n);
        if n == 0 {
            self.pool.free(buf);
            self.eof = true;
            self.total_length = Some(offset);
            return Ok(());
        }
        self.blocks.push(RsdBlock {
            offset,
            stored_bytes: n,
            capacity: self.block_bytes,
            buffer: Some(buf),
            file: None,
        });
        if n < self.block_bytes {
            self.eof = true;
            self.total_length = Some(offset + n as u64);
        }
        Ok(())
    }

    fn refill_from_disk(&mut self, idx: usize) -> Result<(), Error> {
        let (file_id, file_off) = self.blocks[idx].file.expect("refill requires disk backing");
        let name = self.files.get(&file_id).expect("file table entry must exist").name.clone();
        let reader = self.scratch.open_file(&name, crate::adapter::AccessMode::Read)?;
        self.scratch.seek(reader, file_off)?;
        let capacity = self.blocks[idx].capacity;
        let stored = self.blocks[idx].stored_bytes;
        let mut buf = self.pool.allocate(capacity, 1.0).ok_or(Error::OutOfMemory)?;
        buf.set_valid_len(stored);
        let n = self.scratch.read(reader, &mut buf.as_mut_slice()[..stored])?;
        buf.set_valid_len(n);
        self.scratch.close_file(reader)?;
        self.blocks[idx].buffer = Some(buf);
        Ok(())
    }

    /// Returns the next block's bytes (spec §4.5 Fill path). When
    /// `save_restore_file_position` is set, the returned block becomes the
    /// list's `lock` block, ineligible for purge until superseded by a
    /// later locked read; when unset (used during RSD store preload) any
    /// existing lock is released so reclamation may proceed freely.
    pub fn read_block(&mut self, save_restore_file_position: bool) -> Result<BlockRead<'_>, Error> {
        if self.read_index >= self.blocks.len() {
            self.ensure_tail_block()?;
            if self.read_index >= self.blocks.len() {
                return Ok(BlockRead { bytes: &[], is_last: true });
            }
        }
        let idx = self.read_index;
        if self.blocks[idx].buffer.is_none() {
            self.refill_from_disk(idx)?;
        }
        if save_restore_file_position {
            self.lock_index = Some(idx);
        } else if self.lock_index == Some(idx) {
            self.lock_index = None;
        }
        self.read_index += 1;
        let is_last = self.eof && idx == self.blocks.len() - 1;
        let block = &self.blocks[idx];
        let stored = block.stored_bytes;
        Ok(BlockRead {
            bytes: &block.buffer.as_ref().expect("just filled")[..stored],
            is_last,
        })
    }

    fn next_file_with_room(&mut self, need: u64) -> Result<u32, Error> {
        if let Some(id) = self.current_write_file {
            if self.files[&id].appended_size + need <= MAX_SCRATCH_FILE_BYTES {
                return Ok(id);
            }
        }
        let id = self.next_file_id;
        self.next_file_id += 1;
        let name = rsd_filename(id);
        let handle = self.scratch.open_file(&name, crate::adapter::AccessMode::ReadWrite)?;
        self.files.insert(
            id,
            RsdFile {
                id,
                name,
                write_handle: handle,
                appended_size: 0,
            },
        );
        self.current_write_file = Some(id);
        Ok(id)
    }

    fn spill_to_disk(&mut self, idx: usize) -> Result<(), Error> {
        let stored = self.blocks[idx].stored_bytes;
        let payload: Vec<u8> = self.blocks[idx].buffer.as_ref().expect("spill requires buffer").as_slice()[..stored].to_vec();
        let file_id = self.next_file_with_room(stored as u64)?;
        let file = self.files.get_mut(&file_id).expect("just ensured");
        let offset = file.appended_size;
        self.scratch.seek(file.write_handle, offset)?;
        let n = self.scratch.write(file.write_handle, &payload)?;
        if n < payload.len() {
            return Err(Error::WriteError);
        }
        file.appended_size += n as u64;
        self.blocks[idx].file = Some((file_id, offset));
        metrics::RSD_BLOCKS_ON_DISK.with_label_values(&["default"]).inc();
        Ok(())
    }

    /// Scans for a block to release per the escalating action list (spec
    /// §4.5 Purge path), frees it back to the pool (spilling to disk first
    /// when the chosen action permits), and returns the bytes reclaimed.
    /// With `no_write` set, only probes eligibility without purging
    /// anything, returning the candidate's capacity.
    pub fn find_reclaim(&mut self, target_bytes: usize, allow_disk_write: bool, no_write: bool) -> Option<usize> {
        for &(action, from_fill_block) in reclaim_escalation(self.access_hint) {
            let disk_eligible = matches!(action, ReclaimAction::DiskEligibleExact | ReclaimAction::DiskEligibleAny);
            if disk_eligible && !allow_disk_write {
                continue;
            }
            let start = if from_fill_block { self.read_index } else { 0 };
            for idx in start..self.blocks.len() {
                if Some(idx) == self.lock_index {
                    continue;
                }
                let block = &self.blocks[idx];
                if block.buffer.is_none() {
                    continue;
                }
                let size_matches = match action {
                    ReclaimAction::MemOnlyExact | ReclaimAction::DiskEligibleExact => block.capacity == target_bytes,
                    ReclaimAction::MemOnlyAny | ReclaimAction::DiskEligibleAny => block.capacity >= target_bytes,
                };
                if !size_matches {
                    continue;
                }
                let needs_disk_write = block.file.is_none();
                if needs_disk_write && !disk_eligible {
                    continue;
                }
                if no_write {
                    return Some(block.capacity);
                }
                if needs_disk_write {
                    if self.spill_to_disk(idx).is_err() {
                        continue;
                    }
                }
                let cap = self.blocks[idx].buffer.as_ref().expect("still present").capacity();
                if let Some(buf) = self.blocks[idx].buffer.take() {
                    self.pool.free(buf);
                }
                return Some(cap);
            }
        }
        None
    }

    /// Removes a block that came back empty at EOF entirely from the list
    /// (spec §4.5 EOF handling). No-op if the tail isn't actually empty.
    pub fn drop_empty_tail(&mut self) {
        if matches!(self.blocks.last(), Some(b) if b.stored_bytes == 0) {
            self.blocks.pop();
        }
    }

    /// Checks the monotonic-offset invariant of spec §4.5 / §8: a violation
    /// indicates a source that changed under the store.
    pub fn check_monotonic(&self) -> Result<(), Error> {
        if !self.blocks.is_empty() && self.blocks[0].offset != self.rewind_offset {
            return Err(Error::Invalid);
        }
        for pair in self.blocks.windows(2) {
            if pair[1].offset != pair[0].offset + pair[0].stored_bytes as u64 {
                return Err(Error::Invalid);
            }
        }
        Ok(())
    }

    pub fn is_original(&self) -> bool {
        self.is_original
    }

    pub fn is_encoded(&self) -> bool {
        self.encoded
    }

    pub fn is_seekable(&self) -> bool {
        self.seekable
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn halving_reaches_exact_floor() {
        assert_eq!(halving_steps_to(16 * 1024, 1024), 1024);
    }

    #[test]
    fn halving_stops_above_floor_when_not_power_of_two_apart() {
        // 3000 -> 1500 -> 750 (below floor, stop at 1500).
        assert_eq!(halving_steps_to(3000, 1024), 1500);
    }

    #[test]
    fn escalation_order_sequential() {
        let actions = reclaim_escalation(AccessHint::Sequential);
        assert_eq!(actions.len(), 4);
        assert!(actions.iter().all(|(_, from_fill)| *from_fill));
    }

    #[test]
    fn escalation_order_random_omits_from_fill() {
        let actions = reclaim_escalation(AccessHint::Random);
        assert!(actions.iter().all(|(_, from_fill)| !*from_fill));
    }
}
