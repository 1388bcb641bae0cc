// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The RSD store (spec §4.6): owns up to two block lists per stream (decoded
//! and, when the input chain has a seekable unencoded boundary, raw
//! compressed) and exposes a byte-stream read/seek/length API to the RSD
//! filter.

use std::sync::Arc;

use crate::config::RsdConfig;
use crate::error::Error;
use crate::pool::BlockPool;
use crate::rsd::block_list::{AccessHint, RsdBlockList};
use crate::scratch::ScratchDevice;
use crate::stream_iface::Stream;

/// Owns the decoded (and optional compressed) block lists for one RSD-wrapped
/// stream (spec §3 RsdStore).
pub struct RsdStore {
    store_id: String,
    decoded: RsdBlockList,
    /// Present only when the input chain had a seekable, unencoded boundary
    /// below at least one data-expanding decoding filter (spec §4.6
    /// Construction). This crate does not re-drive the external decode
    /// pipeline through it (the filter chain is an out-of-scope
    /// collaborator per spec §1) — it is preloaded independently and kept
    /// purely so `compressed_savings_estimate` can decide whether retaining
    /// it is worthwhile, per spec §4.6's discard heuristic.
    compressed: Option<RsdBlockList>,
    /// `false` during preload (so blocks stay evictable), `true` afterward
    /// (spec §4.6 Eager preload policy).
    save_restore_file_position: bool,
    cached_compressed_worthwhile: bool,
    compressed_savings_estimate: u64,
    logical_pos: u64,
    pending_block: Option<(Vec<u8>, usize)>,
    config: RsdConfig,
}

impl RsdStore {
    /// Constructs the store and immediately performs the eager preload of
    /// spec §4.6: reads the decoded list end-to-end with
    /// `save_restore_file_position` disabled, then resets to the head.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store_id: String,
        decoded_source: Box<dyn Stream>,
        decoded_seekable: bool,
        compressed_source: Option<Box<dyn Stream>>,
        access_hint: AccessHint,
        config: RsdConfig,
        pool: Arc<BlockPool>,
        scratch: Arc<dyn ScratchDevice>,
    ) -> Result<Self, Error> {
        let encoded = compressed_source.is_some();
        let decoded = RsdBlockList::new(
            decoded_source,
            true,
            decoded_seekable,
            encoded,
            access_hint,
            0,
            config.clone(),
            pool.clone(),
            scratch.clone(),
        );
        let compressed = compressed_source.map(|source| {
            RsdBlockList::new(source, false, true, false, AccessHint::Sequential, 0, config.clone(), pool, scratch)
        });

        let mut store = Self {
            store_id,
            decoded,
            compressed,
            save_restore_file_position: false,
            cached_compressed_worthwhile: false,
            compressed_savings_estimate: 0,
            logical_pos: 0,
            pending_block: None,
            config,
        };
        store.preload()?;
        Ok(store)
    }

    fn preload(&mut self) -> Result<(), Error> {
        loop {
            let (len, is_last) = {
                let r = self.decoded.read_block(false)?;
                (r.bytes.len(), r.is_last)
            };
            if len == 0 || is_last {
                break;
            }
        }
        self.decoded.rewind();

        if let Some(compressed) = &mut self.compressed {
            loop {
                let (len, is_last) = {
                    let r = compressed.read_block(false)?;
                    (r.bytes.len(), r.is_last)
                };
                self.compressed_savings_estimate += len as u64;
                if len == 0 || is_last {
                    break;
                }
            }
            compressed.rewind();
        }

        self.save_restore_file_position = true;
        log::info!("RSD store '{}' preloaded", self.store_id);
        Ok(())
    }

    /// Evaluates whether retaining the compressed list still saves enough
    /// memory to be worthwhile (spec §4.6: threshold of a better-than-40%
    /// compression ratio); discards it otherwise. Called once the decoded
    /// list reaches EOF.
    fn maybe_discard_compressed(&mut self) {
        if self.compressed.is_none() {
            return;
        }
        let decoded_bytes = self.decoded.stored_bytes_sum().max(1) as f64;
        let ratio = self.compressed_savings_estimate as f64 / decoded_bytes;
        if ratio >= self.config.cached_compressed_worthwhile_ratio {
            log::debug!(
                "RSD store '{}' discarding compressed list (ratio {ratio:.2} not worthwhile)",
                self.store_id
            );
            self.compressed = None;
            self.cached_compressed_worthwhile = false;
        } else {
            self.cached_compressed_worthwhile = true;
        }
    }

    pub fn compressed_savings_estimate(&self) -> u64 {
        self.compressed_savings_estimate
    }

    pub fn cached_compressed_worthwhile(&self) -> bool {
        self.cached_compressed_worthwhile
    }

    /// `store_read` (spec §4.6): delegates to the decoded list's fill path.
    /// Returns the block's bytes and whether it was the list's final block.
    pub fn store_read_block(&mut self) -> Result<(Vec<u8>, bool), Error> {
        let (bytes, is_last) = {
            let r = self.decoded.read_block(self.save_restore_file_position)?;
            (r.bytes.to_vec(), r.is_last)
        };
        if is_last {
            self.maybe_discard_compressed();
        }
        Ok((bytes, is_last))
    }

    /// Byte-stream convenience wrapper over [`Self::store_read_block`] for
    /// consumers that want plain `read(buf)` semantics rather than
    /// block-at-a-time access. Wraps to offset zero on EOF when
    /// [`RsdConfig::allow_circular`] is set (spec §4.6 Circular mode,
    /// supplemented per spec §0.7: only the decoded list is reopened at
    /// offset zero, any compressed list is left untouched).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut total = 0usize;
        while total < buf.len() {
            if self.pending_block.is_none() {
                let (bytes, _is_last) = self.store_read_block()?;
                if bytes.is_empty() {
                    if self.config.allow_circular {
                        self.store_seek(0)?;
                        continue;
                    }
                    break;
                }
                self.pending_block = Some((bytes, 0));
            }
            let (bytes, consumed) = self.pending_block.as_mut().expect("just set");
            let avail = bytes.len() - *consumed;
            let want = avail.min(buf.len() - total);
            buf[total..total + want].copy_from_slice(&bytes[*consumed..*consumed + want]);
            *consumed += want;
            total += want;
            self.logical_pos += want as u64;
            if *consumed == bytes.len() {
                self.pending_block = None;
            }
        }
        Ok(total)
    }

    /// `store_seek` (spec §4.6): finds the block containing `offset`,
    /// repositions the read cursor there, and returns the realised
    /// (block-aligned) offset. A non-adjacent seek on a sequential-hint
    /// store promotes it to random access.
    pub fn store_seek(&mut self, offset: u64) -> Result<u64, Error> {
        self.pending_block = None;
        if self.decoded.access_hint() == AccessHint::Sequential && offset != self.logical_pos {
            self.decoded.promote_to_random();
        }
        let realised = self.decoded.seek_to_containing_block(offset)?;
        self.logical_pos = offset;
        Ok(realised)
    }

    /// `store_length` (spec §4.6): forces full preload if length is still
    /// unknown, then returns the sum of stored bytes.
    pub fn store_length(&mut self) -> Result<u64, Error> {
        if self.decoded.total_length().is_none() {
            let saved_pos = self.logical_pos;
            loop {
                let (bytes, is_last) = self.store_read_block()?;
                if bytes.is_empty() || is_last {
                    break;
                }
            }
            self.store_seek(saved_pos)?;
        }
        Ok(self.decoded.stored_bytes_sum())
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    pub fn access_hint(&self) -> AccessHint {
        self.decoded.access_hint()
    }

    pub fn decoded_list(&self) -> &RsdBlockList {
        &self.decoded
    }

    pub fn decoded_list_mut(&mut self) -> &mut RsdBlockList {
        &mut self.decoded
    }

    pub fn compressed_list(&self) -> Option<&RsdBlockList> {
        self.compressed.as_ref()
    }

    /// Invoked by the `rsd-seq-ram`/`rsd-rand-ram`/`rsd-seq-disk`/`rsd-rand-disk`
    /// low-memory handlers (spec §4.7) to reclaim one block from the decoded
    /// list. `allow_disk_write` corresponds to the disk-eligible action tier.
    pub fn find_reclaim(&mut self, target_bytes: usize, allow_disk_write: bool, no_write: bool) -> Option<usize> {
        self.decoded.find_reclaim(target_bytes, allow_disk_write, no_write)
    }
}
