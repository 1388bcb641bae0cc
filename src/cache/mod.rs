// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The blob data cache (spec §4.3): a keyed registry of [`BlobEntry`]
//! records, enforcing at-most-one entry per identity and handing out
//! [`crate::blob::Blob`] handles onto them.

mod entry;

pub use entry::{Block, BlobEntry};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use ahash::HashMap as AHashMap;
use parking_lot::{Mutex, RwLock};

use crate::adapter::{AccessMode, EntryFlags, Identity, RestoreOutcome, SourceAdapter};
use crate::blob::Blob;
use crate::config::BlobCacheConfig;
use crate::error::Error;
use crate::metrics;
use crate::pool::BlockPool;

pub(crate) struct CacheShared {
    pub(crate) config: RwLock<BlobCacheConfig>,
    pub(crate) pool: Arc<BlockPool>,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    entries: AHashMap<Identity, Arc<Mutex<BlobEntry>>>,
    /// FIFO of identities whose entry currently has zero open handles,
    /// oldest-closed-first (spec §4.3 `close_blob`).
    closed_order: VecDeque<Identity>,
}

/// A process-wide (per instance) registry mapping abstract byte-source
/// identities to cached, block-backed byte regions (spec §4.3). Cheap to
/// clone — clones share the same underlying registry.
#[derive(Clone)]
pub struct BlobCache(pub(crate) Arc<CacheShared>);

impl BlobCache {
    pub fn new(config: BlobCacheConfig, pool: Arc<BlockPool>) -> Self {
        log::info!("blob cache '{}' initialised", config.display_name);
        Self(Arc::new(CacheShared {
            config: RwLock::new(config),
            pool,
            inner: Mutex::new(CacheInner::default()),
        }))
    }

    pub fn display_name(&self) -> String {
        self.0.config.read().display_name.clone()
    }

    pub fn get_limit(&self) -> u64 {
        self.0.config.read().soft_byte_budget
    }

    pub fn set_limit(&self, bytes: u64) {
        self.0.config.write().soft_byte_budget = bytes;
    }

    fn quantum(&self) -> usize {
        self.0.config.read().read_quantum
    }

    fn cost_hint(&self) -> f64 {
        self.0.config.read().alloc_cost_hint
    }

    fn trim_limit(&self) -> usize {
        self.0.config.read().trim_limit
    }

    /// Looks up `identity`, constructing a new [`BlobEntry`] via
    /// `make_adapter` on a miss. `make_adapter` is only invoked on a miss —
    /// it must not perform I/O itself (spec §4.1 `create`); the adapter's
    /// own `open` is what starts the I/O session, invoked once per entry.
    pub fn open_from_source(
        &self,
        identity: Identity,
        mode: AccessMode,
        flags: EntryFlags,
        save_level: u64,
        make_adapter: impl FnOnce() -> Box<dyn SourceAdapter>,
    ) -> Result<Blob, Error> {
        let mut inner = self.0.inner.lock();

        if let Some(entry_arc) = inner.entries.get(&identity) {
            let same_kind_and_key = {
                let entry = entry_arc.lock();
                entry.adapter.kind() == identity.kind() && entry.adapter.same(&identity)
            };
            if same_kind_and_key {
                metrics::BLOB_CACHE_HITS_TOTAL
                    .with_label_values(&[&self.display_name()])
                    .inc();
                let mut entry = entry_arc.lock();
                if entry.expired {
                    return Err(Error::Expired);
                }
                let intersected = entry.mode.intersect(mode).ok_or(Error::AccessDenied)?;
                entry.mode = intersected;
                entry.handle_count += 1;
                drop(entry);
                inner.closed_order.retain(|id| id != &identity);
                let entry_arc = entry_arc.clone();
                drop(inner);
                return Ok(Blob::new(self.clone(), identity, entry_arc, mode));
            }
        }

        metrics::BLOB_CACHE_MISSES_TOTAL
            .with_label_values(&[&self.display_name()])
            .inc();
        let adapter = make_adapter();
        let mut entry = BlobEntry::new(identity.clone(), adapter, mode, flags, save_level);
        entry.adapter.open(mode)?;
        entry.handle_count = 1;
        let entry_arc = Arc::new(Mutex::new(entry));
        inner.entries.insert(identity.clone(), entry_arc.clone());
        metrics::BLOB_CACHE_ENTRIES
            .with_label_values(&[&self.display_name()])
            .set(inner.entries.len() as i64);
        drop(inner);
        Ok(Blob::new(self.clone(), identity, entry_arc, mode))
    }

    /// Called by [`Blob::drop`]/[`Blob::close`]. Decrements the entry's
    /// handle count; once it reaches zero the entry becomes eligible for
    /// trimming but is retained up to `trim_limit` for reuse (spec §4.3).
    pub(crate) fn close_blob(&self, identity: &Identity) {
        let mut inner = self.0.inner.lock();
        let Some(entry_arc) = inner.entries.get(identity).cloned() else {
            return;
        };
        {
            let mut entry = entry_arc.lock();
            entry.handle_count = entry.handle_count.saturating_sub(1);
            if entry.handle_count > 0 {
                return;
            }
        }
        inner.closed_order.push_back(identity.clone());
        let trim_limit = self.trim_limit();
        while inner.closed_order.len() > trim_limit {
            let Some(victim) = inner.closed_order.pop_front() else {
                break;
            };
            if let Some(victim_arc) = inner.entries.remove(&victim) {
                let mut victim_entry = victim_arc.lock();
                victim_entry.adapter.close();
                log::info!("blob cache '{}' trimmed idle entry", self.display_name());
            }
        }
        metrics::BLOB_CACHE_ENTRIES
            .with_label_values(&[&self.display_name()])
            .set(inner.entries.len() as i64);
    }

    /// For every entry whose save-level exceeds `save_level`, asks its
    /// adapter to produce a replacement identity or expires it (spec §4.3
    /// `restore_commit`).
    pub fn restore_commit(&self, save_level: u64) {
        let mut inner = self.0.inner.lock();
        let stale: Vec<Identity> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.lock().save_level > save_level)
            .map(|(id, _)| id.clone())
            .collect();

        for old_identity in stale {
            let Some(entry_arc) = inner.entries.remove(&old_identity) else {
                continue;
            };
            let mut entry = entry_arc.lock();
            match entry.adapter.restored(save_level) {
                RestoreOutcome::Replacement(new_identity) => {
                    entry.identity = new_identity.clone();
                    entry.save_level = save_level;
                    drop(entry);
                    inner.entries.insert(new_identity, entry_arc);
                }
                RestoreOutcome::Expired => {
                    entry.expired = true;
                    let pool = self.0.pool.clone();
                    entry.evict_unpinned(u64::MAX, &pool);
                    drop(entry);
                    log::info!(
                        "blob cache '{}' expired entry on restore to save level {save_level}",
                        self.display_name()
                    );
                    inner.entries.insert(old_identity, entry_arc);
                }
            }
        }
    }

    /// Enumerates all rooted adapter identities so a garbage collector can
    /// trace the references this cache holds (spec §4.3 `gc_scan`).
    pub fn gc_scan(&self, mut visitor: impl FnMut(&Identity)) {
        let inner = self.0.inner.lock();
        for identity in inner.entries.keys() {
            visitor(identity);
        }
    }

    /// Triggered after an allocation-causing operation; walks entries
    /// oldest-`last_use`-first, releasing unpinned blocks until the soft
    /// byte budget is satisfied or only pinned blocks remain anywhere
    /// (spec §4.3 Eviction policy).
    pub(crate) fn maybe_evict(&self) {
        let budget = self.get_limit();
        loop {
            let in_use = self.0.pool.tracker().sample();
            if in_use <= budget {
                return;
            }
            let inner = self.0.inner.lock();
            let mut order: Vec<(Instant, Identity)> = inner
                .entries
                .iter()
                .map(|(id, e)| (e.lock().last_use, id.clone()))
                .collect();
            order.sort_by_key(|(t, _)| *t);
            drop(inner);

            let mut freed_any = false;
            for (_, id) in order {
                if self.0.pool.tracker().sample() <= budget {
                    break;
                }
                let inner = self.0.inner.lock();
                let Some(entry_arc) = inner.entries.get(&id).cloned() else {
                    continue;
                };
                drop(inner);
                let need = self.0.pool.tracker().sample().saturating_sub(budget);
                let mut entry = entry_arc.lock();
                let freed = entry.evict_unpinned(need.max(1), &self.0.pool);
                if freed > 0 {
                    freed_any = true;
                    metrics::BLOB_CACHE_BYTES_IN_USE
                        .with_label_values(&[&self.display_name()])
                        .set(self.0.pool.tracker().sample() as i64);
                    log::debug!("blob cache '{}' released {freed} bytes under pressure", self.display_name());
                }
            }
            if !freed_any {
                // Only pinned blocks remain; the budget is exceeded
                // transiently (spec §4.3: "Actual memory in use may exceed
                // it transiently").
                return;
            }
        }
    }

    /// Non-blocking release for the `blob-block-recycle` low-memory handler
    /// (spec §4.7): declines with `None` if the cache's mutex is already
    /// held (reentrant solicitation, or contended by another thread),
    /// otherwise releases unpinned blocks oldest-`last_use`-first up to
    /// `target_bytes` and returns the bytes actually freed.
    pub fn handler_release(&self, target_bytes: u64) -> Option<u64> {
        let inner = self.0.inner.try_lock()?;
        let mut order: Vec<(Instant, Identity)> = inner
            .entries
            .iter()
            .map(|(id, e)| (e.lock().last_use, id.clone()))
            .collect();
        order.sort_by_key(|(t, _)| *t);

        let mut freed = 0u64;
        for (_, id) in order {
            if freed >= target_bytes {
                break;
            }
            if let Some(entry_arc) = inner.entries.get(&id).cloned() {
                let mut entry = entry_arc.lock();
                freed += entry.evict_unpinned(target_bytes - freed, &self.0.pool);
            }
        }
        drop(inner);
        if freed > 0 {
            metrics::BLOB_CACHE_BYTES_IN_USE
                .with_label_values(&[&self.display_name()])
                .set(self.0.pool.tracker().sample() as i64);
        }
        Some(freed)
    }

    pub(crate) fn quantum_and_cost(&self) -> (usize, f64) {
        (self.quantum(), self.cost_hint())
    }

    pub(crate) fn pool(&self) -> Arc<BlockPool> {
        self.0.pool.clone()
    }
}
