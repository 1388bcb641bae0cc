// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! [`Blob`] (spec §4.4): a handle onto a cached byte source, and [`Map`], its
//! stable-pointer window onto a contiguous region (spec §4.4 "Mapping
//! stability").

use std::sync::Arc;

use parking_lot::Mutex;

use crate::adapter::{AccessMode, Identity};
use crate::cache::{BlobCache, BlobEntry};
use crate::error::Error;

/// A handle onto a [`BlobEntry`] (spec §3 Blob handle). Several handles may
/// reference the same entry; the entry only closes once every handle on it
/// has closed.
pub struct Blob {
    cache: BlobCache,
    identity: Identity,
    entry: Arc<Mutex<BlobEntry>>,
    mode: AccessMode,
    position: u64,
    closed: bool,
}

impl Blob {
    pub(crate) fn new(cache: BlobCache, identity: Identity, entry: Arc<Mutex<BlobEntry>>, mode: AccessMode) -> Self {
        Self {
            cache,
            identity,
            entry,
            mode,
            position: 0,
            closed: false,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn seek(&mut self, offset: u64) {
        self.position = offset;
    }

    pub fn length(&self) -> Result<u64, Error> {
        self.entry.lock().query_length()
    }

    /// Reads into `buf` from the handle's current position, advancing it by
    /// the number of bytes actually read (spec §4.4 `read`).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let (quantum, cost) = self.cache.quantum_and_cost();
        let pool = self.cache.pool();
        let n = {
            let mut entry = self.entry.lock();
            entry.read_at(self.position, buf, quantum, &pool, cost)?
        };
        self.position += n as u64;
        self.cache.maybe_evict();
        Ok(n)
    }

    /// Writes `buf` at the handle's current position, advancing it by
    /// `buf.len()` (spec §4.4 `write`).
    pub fn write(&mut self, buf: &[u8]) -> Result<(), Error> {
        if buf.is_empty() {
            return Ok(());
        }
        let (quantum, _) = self.cache.quantum_and_cost();
        {
            let mut entry = self.entry.lock();
            entry.write_at(self.position, buf, quantum)?;
        }
        self.position += buf.len() as u64;
        Ok(())
    }

    /// Maps `len` bytes starting at the handle's current position into a
    /// [`Map`] (spec §4.4 `map_region`). Does not advance the handle's
    /// position — mapping is a read-only window, not a stream read.
    pub fn map(&self, len: usize) -> Result<Map, Error> {
        Map::new(self.cache.clone(), self.entry.clone(), self.mode, self.position, len)
    }

    pub fn close(mut self) {
        self.close_impl();
    }

    fn close_impl(&mut self) {
        if !self.closed {
            self.closed = true;
            self.cache.close_blob(&self.identity);
        }
    }
}

impl Drop for Blob {
    fn drop(&mut self) {
        self.close_impl();
    }
}

/// Backing strategy chosen by [`Map::new`] (spec §4.4 "Mapping stability":
/// "the returned pointer remains valid... until the mapping is explicitly
/// released, regardless of eviction pressure elsewhere in the cache").
enum MapBacking {
    /// The adapter itself is zero-copy at this offset (spec §4.1
    /// `available`); the pointer is valid for the adapter's own lifetime,
    /// which outlives the mapping.
    ZeroCopy { bytes: *const u8, len: usize },
    /// A cache block the mapping pins for its duration, so the eviction
    /// policy (spec §4.3) skips it regardless of memory pressure.
    CacheBlock { offset: u64, len: usize },
    /// Neither of the above applied (the region spans multiple blocks, or
    /// the adapter has no zero-copy window here): a private copy that the
    /// mapping alone owns.
    Transient(Vec<u8>),
}

/// A stable-pointer window onto `len` bytes of a [`Blob`]'s source (spec
/// §4.4 Map). Dropping (or calling [`Map::close`]) releases whatever pin or
/// private copy backs it.
pub struct Map {
    cache: BlobCache,
    entry: Arc<Mutex<BlobEntry>>,
    backing: MapBacking,
    closed: bool,
}

impl Map {
    fn new(cache: BlobCache, entry: Arc<Mutex<BlobEntry>>, mode: AccessMode, offset: u64, len: usize) -> Result<Self, Error> {
        if !mode.can_read() {
            return Err(Error::AccessDenied);
        }
        if len == 0 {
            return Ok(Self {
                cache,
                entry,
                backing: MapBacking::Transient(Vec::new()),
                closed: false,
            });
        }

        {
            let guard = entry.lock();
            if let Some(available) = guard.adapter.available(offset) {
                if available.bytes.len() >= len {
                    let bytes = available.bytes.as_ptr();
                    return Ok(Self {
                        cache,
                        entry: entry.clone(),
                        backing: MapBacking::ZeroCopy { bytes, len },
                        closed: false,
                    });
                }
            }
        }

        let (quantum, cost) = cache.quantum_and_cost();
        let pool = cache.pool();
        let quantum_u64 = quantum as u64;
        let aligned_start = (offset / quantum_u64) * quantum_u64;
        let aligned_end = ((offset + len as u64 + quantum_u64 - 1) / quantum_u64) * quantum_u64;
        let single_block = aligned_end - aligned_start == quantum_u64;

        if single_block {
            let mut guard = entry.lock();
            let block = guard.fetch_block(aligned_start, quantum, &pool, cost)?;
            let within = (offset - block.offset) as usize;
            if within + len <= block.bytes.valid_len() {
                if let Some(block) = guard.blocks.get_mut(&aligned_start) {
                    block.pin_count += 1;
                }
                return Ok(Self {
                    cache,
                    entry: entry.clone(),
                    backing: MapBacking::CacheBlock { offset: aligned_start, len },
                    closed: false,
                });
            }
        }

        let mut buf = vec![0u8; len];
        let mut guard = entry.lock();
        let n = guard.read_at(offset, &mut buf, quantum, &pool, cost)?;
        buf.truncate(n);
        drop(guard);
        Ok(Self {
            cache,
            entry,
            backing: MapBacking::Transient(buf),
            closed: false,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.backing {
            // SAFETY: the adapter guarantees this window is stable for its
            // own lifetime, which the held `entry` Arc keeps alive.
            MapBacking::ZeroCopy { bytes, len } => unsafe { std::slice::from_raw_parts(*bytes, *len) },
            MapBacking::CacheBlock { offset, len } => {
                let guard = self.entry.lock();
                let block = guard.blocks.get(offset).expect("pinned block still present");
                let slice = block.bytes.as_slice();
                // SAFETY: the slice's backing allocation outlives this
                // borrow as long as `guard` is held; we copy nothing, this
                // is only sound to call while holding no other `Map`
                // borrow of the same cache across an eviction — the pin
                // guarantees the bytes themselves don't move or get freed.
                unsafe { std::slice::from_raw_parts(slice.as_ptr(), *len) }
            }
            MapBacking::Transient(v) => v.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.backing {
            MapBacking::ZeroCopy { len, .. } => *len,
            MapBacking::CacheBlock { len, .. } => *len,
            MapBacking::Transient(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let MapBacking::CacheBlock { offset, .. } = &self.backing {
            let mut guard = self.entry.lock();
            if let Some(block) = guard.blocks.get_mut(offset) {
                block.pin_count = block.pin_count.saturating_sub(1);
            }
            drop(guard);
            self.cache.maybe_evict();
        }
    }
}

impl Drop for Map {
    fn drop(&mut self) {
        self.release();
    }
}
