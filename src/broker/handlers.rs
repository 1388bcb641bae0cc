// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The concrete low-memory handlers (spec §4.7): one per cache kind, plus
//! the always-declining `pfin-module` stub (spec §0.7 `pfin.c` supplement —
//! pluggable-font module suspension is an external collaborator this crate
//! never implements).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::broker::rsd_registry::RsdStoreRegistry;
use crate::broker::LowMemoryHandler;
use crate::cache::BlobCache;
use crate::rsd::AccessHint;

/// `blob-block-recycle` (spec §4.7): releases unpinned blocks from one
/// [`BlobCache`] instance, oldest-`last_use`-first.
pub struct BlobBlockRecycleHandler {
    cache: BlobCache,
    releasing: AtomicBool,
    offers_limited: AtomicBool,
}

impl BlobBlockRecycleHandler {
    pub fn new(cache: BlobCache) -> Self {
        Self {
            cache,
            releasing: AtomicBool::new(false),
            offers_limited: AtomicBool::new(false),
        }
    }
}

impl LowMemoryHandler for BlobBlockRecycleHandler {
    fn name(&self) -> &'static str {
        "blob-block-recycle"
    }

    fn solicit(&self, target_bytes: u64) -> Option<u64> {
        if self.offers_limited.load(Ordering::Acquire) {
            return None;
        }
        if self.releasing.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.releasing.store(false, Ordering::Release);
        Some(target_bytes)
    }

    fn release(&self, target_bytes: u64) -> u64 {
        if self.releasing.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let freed = self.cache.handler_release(target_bytes).unwrap_or(0);
        if freed == 0 {
            self.offers_limited.store(true, Ordering::Release);
        }
        self.releasing.store(false, Ordering::Release);
        freed
    }

    fn notify_memory_increased(&self) {
        self.offers_limited.store(false, Ordering::Release);
    }
}

/// One of the four RSD purge handlers (`rsd-seq-ram`, `rsd-rand-ram`,
/// `rsd-seq-disk`, `rsd-rand-disk`, spec §4.7): walks the broker's
/// [`RsdStoreRegistry`] for a live store matching `hint`, releasing a block
/// via its non-blocking `find_reclaim` path. `allow_disk_write` corresponds
/// to the disk-eligible action tiers; the RAM-only handlers must never spill
/// (spec §4.5 "memory-only exact-size... memory-only any-size" tiers).
pub struct RsdPurgeHandler {
    name: &'static str,
    registry: RsdStoreRegistry,
    hint: AccessHint,
    allow_disk_write: bool,
    releasing: AtomicBool,
    offers_limited: AtomicBool,
}

impl RsdPurgeHandler {
    pub fn new_ram(name: &'static str, registry: RsdStoreRegistry, hint: AccessHint) -> Self {
        Self {
            name,
            registry,
            hint,
            allow_disk_write: false,
            releasing: AtomicBool::new(false),
            offers_limited: AtomicBool::new(false),
        }
    }

    pub fn new_disk(name: &'static str, registry: RsdStoreRegistry, hint: AccessHint) -> Self {
        Self {
            name,
            registry,
            hint,
            allow_disk_write: true,
            releasing: AtomicBool::new(false),
            offers_limited: AtomicBool::new(false),
        }
    }
}

impl LowMemoryHandler for RsdPurgeHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn solicit(&self, target_bytes: u64) -> Option<u64> {
        if self.offers_limited.load(Ordering::Acquire) {
            return None;
        }
        if self.releasing.swap(true, Ordering::AcqRel) {
            return None;
        }
        let allow_disk_write = self.allow_disk_write;
        let offer = self
            .registry
            .try_for_each_matching(self.hint, |store| store.find_reclaim(target_bytes as usize, allow_disk_write, true).map(|n| n as u64));
        self.releasing.store(false, Ordering::Release);
        offer.or(Some(0))
    }

    fn release(&self, target_bytes: u64) -> u64 {
        if self.releasing.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let allow_disk_write = self.allow_disk_write;
        let freed = self
            .registry
            .try_for_each_matching(self.hint, |store| store.find_reclaim(target_bytes as usize, allow_disk_write, false).map(|n| n as u64))
            .unwrap_or(0);
        if freed == 0 {
            self.offers_limited.store(true, Ordering::Release);
        }
        self.releasing.store(false, Ordering::Release);
        freed
    }

    fn notify_memory_increased(&self) {
        self.offers_limited.store(false, Ordering::Release);
    }
}

/// `pfin-module` (spec §4.7, §0.7 `pfin.c` supplement): the pluggable-font
/// module loader is an out-of-scope external collaborator, so this handler
/// is a permanent no-op stub that always declines — registered purely so
/// the broker's handler roster matches spec §4.7's seven-entry list.
pub struct PfinModuleHandler;

impl LowMemoryHandler for PfinModuleHandler {
    fn name(&self) -> &'static str {
        "pfin-module"
    }

    fn solicit(&self, _target_bytes: u64) -> Option<u64> {
        None
    }

    fn release(&self, _target_bytes: u64) -> u64 {
        0
    }

    fn notify_memory_increased(&self) {}
}

#[cfg(feature = "icc")]
mod icc_handler {
    use super::*;
    use crate::icc::IccRegistry;

    /// `icc-profile` (spec §4.7, §4.8 Eviction under memory pressure):
    /// frees one least-recently-used transform chain from a detached (or
    /// registry-only-referenced) profile, dropping the profile itself only
    /// once it has no chains and no binding left to justify keeping it.
    pub struct IccProfileHandler {
        registry: Arc<IccRegistry>,
        releasing: AtomicBool,
        offers_limited: AtomicBool,
    }

    impl IccProfileHandler {
        pub fn new(registry: Arc<IccRegistry>) -> Self {
            Self {
                registry,
                releasing: AtomicBool::new(false),
                offers_limited: AtomicBool::new(false),
            }
        }
    }

    impl LowMemoryHandler for IccProfileHandler {
        fn name(&self) -> &'static str {
            "icc-profile"
        }

        fn solicit(&self, _target_bytes: u64) -> Option<u64> {
            if self.offers_limited.load(Ordering::Acquire) {
                return None;
            }
            if self.releasing.swap(true, Ordering::AcqRel) {
                return None;
            }
            self.releasing.store(false, Ordering::Release);
            Some(1)
        }

        fn release(&self, _target_bytes: u64) -> u64 {
            if self.releasing.swap(true, Ordering::AcqRel) {
                return 0;
            }
            let freed = self.registry.evict_one().unwrap_or(0);
            if freed == 0 {
                self.offers_limited.store(true, Ordering::Release);
            }
            self.releasing.store(false, Ordering::Release);
            // Chains and profile records are small and variably sized; the
            // registry does not track their byte cost individually, so the
            // handler reports a nominal per-unit-freed count rather than a
            // byte count (spec §4.8 does not name a specific accounting
            // unit here).
            freed
        }

        fn notify_memory_increased(&self) {
            self.offers_limited.store(false, Ordering::Release);
        }
    }
}

#[cfg(feature = "icc")]
pub use icc_handler::IccProfileHandler;
