// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The ICC profile registry (spec §4.8): dedups profile streams by header
//! MD5 *and* full-profile MD5, tracks per-stream bindings across save
//! levels, and hands out cached transform chains on request.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::config::IccRegistryConfig;
use crate::error::Error;
use crate::icc::profile::{ContentId, IccProfileInfo, IccStreamBinding};
use crate::icc::profile::RenderingIntent;
use crate::icc::transform::{build_transform, Direction, TransformChain};
use crate::metrics::ICC_PROFILES_CACHED;
use crate::stream_iface::Stream;

/// Reads an entire ICC profile stream into memory. Profiles are small
/// (hundreds of bytes to a few megabytes); the registry is not built to
/// stream-parse them (spec §4.8 step 1).
fn read_all(stream: &mut dyn Stream) -> Result<Vec<u8>, Error> {
    let len = stream.length()? as usize;
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..])?;
        if n == 0 {
            buf.truncate(filled);
            break;
        }
        filled += n;
    }
    Ok(buf)
}

/// Shared profile registry (spec §4.8, Scenario S6: two distinct stream
/// identities whose bytes hash identically dedup to one [`IccProfileInfo`]).
/// The header MD5 only narrows the search: two profiles can share a header
/// and still differ in their tag data, so every candidate in a header
/// bucket is confirmed against the full-profile MD5 before merging.
pub struct IccRegistry {
    name: String,
    config: IccRegistryConfig,
    next_id: AtomicU64,
    by_header: Mutex<AHashMap<[u8; 16], Vec<u64>>>,
    profiles: Mutex<AHashMap<u64, Arc<Mutex<IccProfileInfo>>>>,
    /// LRU order of registry-assigned ids with no open binding, most-recently
    /// detached at the back (spec §4.8 lifetime: "kept for possible
    /// reattachment up to a bounded count").
    detached_lru: Mutex<VecDeque<u64>>,
}

impl IccRegistry {
    pub fn new(name: impl Into<String>, config: IccRegistryConfig) -> Self {
        Self {
            name: name.into(),
            config,
            next_id: AtomicU64::new(0),
            by_header: Mutex::new(AHashMap::new()),
            profiles: Mutex::new(AHashMap::new()),
            detached_lru: Mutex::new(VecDeque::new()),
        }
    }

    /// `lookup_or_load` (spec §4.8 steps 1-4): reads `source`, computes its
    /// header MD5 and full-profile MD5, and either attaches a new binding to
    /// an existing dedup'd entry or parses and inserts a fresh one.
    /// `content_id` identifies this particular stream opening for later
    /// `restored` bookkeeping; it does not participate in the dedup key.
    pub fn lookup_or_load(
        &self,
        content_id: ContentId,
        source: &mut dyn Stream,
        original_save_level: u64,
        wrapper_save_level: u64,
    ) -> Result<Arc<Mutex<IccProfileInfo>>, Error> {
        let bytes = read_all(source)?;
        let mut info = IccProfileInfo::from_bytes(&bytes)?;
        let full_md5 = crate::icc::profile::full_md5(&bytes);
        info.full_md5 = Some(full_md5);
        let header_key = info.header_md5;

        let mut by_header = self.by_header.lock();
        let mut profiles = self.profiles.lock();

        // A header-MD5 hit is only a candidate; spec §4.8 step 4 (and
        // `gscicc.c`'s `calculate_profile_MD5`) require the full MD5 to
        // match too before two streams are treated as the same profile.
        if let Some(candidates) = by_header.get(&header_key) {
            for &id in candidates {
                let Some(existing) = profiles.get(&id).cloned() else {
                    continue;
                };
                let hit = existing.lock().full_md5 == Some(full_md5);
                if !hit {
                    continue;
                }
                {
                    let mut locked = existing.lock();
                    locked.last_use = std::time::Instant::now();
                    locked.bindings.push(IccStreamBinding {
                        content_id,
                        original_save_level,
                        wrapper_save_level,
                        detached: false,
                    });
                }
                self.detached_lru.lock().retain(|&k| k != id);
                log::debug!(
                    "icc registry '{}' dedup hit for header md5 {:x?}",
                    self.name,
                    &header_key[..4]
                );
                return Ok(existing);
            }
        }

        info.bindings.push(IccStreamBinding {
            content_id,
            original_save_level,
            wrapper_save_level,
            detached: false,
        });
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(Mutex::new(info));
        profiles.insert(id, entry.clone());
        by_header.entry(header_key).or_default().push(id);
        ICC_PROFILES_CACHED.set(profiles.len() as i64);
        log::debug!(
            "icc registry '{}' loaded new profile, header md5 {:x?}",
            self.name,
            &header_key[..4]
        );
        Ok(entry)
    }

    /// `transform_for` (spec §4.8 step 4): returns the cached transform
    /// chain for `profile` at `intent`/`direction` if one has already been
    /// built, otherwise constructs it (applying the lut8 whitepoint
    /// correction when [`IccRegistryConfig::lut8_whitepoint_correction`] is
    /// set — spec §9 Open Question, resolved on per spec §0.7's default)
    /// and caches the result for next time.
    pub fn transform_for(&self, profile: &Arc<Mutex<IccProfileInfo>>, direction: Direction, intent: RenderingIntent) -> TransformChain {
        let mut locked = profile.lock();
        if let Some(chain) = locked.cached_chain(direction, intent) {
            return chain;
        }
        let chain = build_transform(&locked, direction, intent, self.config.lut8_whitepoint_correction);
        locked.cache_chain(direction, intent, chain.clone());
        chain
    }

    /// Marks a binding detached at restore time, or drops the whole entry
    /// if no cheaper replacement identity applies and it was the last open
    /// binding (spec §4.1 `restored`, §4.8 lifetime).
    pub fn restore_commit(&self, restoring_to_save_level: u64) {
        let mut by_header = self.by_header.lock();
        let mut profiles = self.profiles.lock();
        let mut newly_detached = Vec::new();
        let mut drop_ids = Vec::new();

        for (&id, entry) in profiles.iter() {
            let mut locked = entry.lock();
            locked.bindings.retain_mut(|b| {
                if b.wrapper_save_level > restoring_to_save_level {
                    if b.original_save_level <= restoring_to_save_level {
                        b.detached = true;
                    } else {
                        return false;
                    }
                }
                true
            });
            if !locked.has_open_binding() {
                if locked.is_detached_with_valid_md5() {
                    newly_detached.push(id);
                } else {
                    drop_ids.push(id);
                }
            }
        }

        for id in &drop_ids {
            Self::remove_entry(&mut profiles, &mut by_header, *id);
        }
        let mut lru = self.detached_lru.lock();
        for id in &drop_ids {
            lru.retain(|k| k != id);
        }
        for id in newly_detached {
            lru.retain(|&k| k != id);
            lru.push_back(id);
        }
        while lru.len() > self.config.trim_limit {
            if let Some(id) = lru.pop_front() {
                Self::remove_entry(&mut profiles, &mut by_header, id);
            }
        }
        ICC_PROFILES_CACHED.set(profiles.len() as i64);
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.lock().len()
    }

    fn remove_entry(profiles: &mut AHashMap<u64, Arc<Mutex<IccProfileInfo>>>, by_header: &mut AHashMap<[u8; 16], Vec<u64>>, id: u64) {
        let Some(entry) = profiles.remove(&id) else {
            return;
        };
        let header = entry.lock().header_md5;
        if let Some(bucket) = by_header.get_mut(&header) {
            bucket.retain(|&x| x != id);
            if bucket.is_empty() {
                by_header.remove(&header);
            }
        }
    }

    /// Frees one unit of memory for the `icc-profile` low-memory handler
    /// (spec §4.7, §4.8 Eviction under memory pressure): evicts the
    /// least-recently-used cached transform chain from a detached profile
    /// (preferred) or from any profile referenced only by the registry
    /// itself; once a profile has no cached chains left and no open
    /// binding, it is dropped entirely unless it is still worth keeping as
    /// dedup metadata. Non-blocking: returns `None` if a lock is already
    /// held (spec §5 "the registry's handler uses non-blocking
    /// acquisition").
    pub fn evict_one(&self) -> Option<u64> {
        let mut by_header = self.by_header.try_lock()?;
        let mut profiles = self.profiles.try_lock()?;
        let mut lru = self.detached_lru.try_lock()?;

        let mut candidates: Vec<u64> = lru.iter().copied().collect();
        for (&id, entry) in profiles.iter() {
            if !candidates.contains(&id) && Arc::strong_count(entry) <= 1 {
                candidates.push(id);
            }
        }

        for id in candidates {
            let Some(entry) = profiles.get(&id).cloned() else {
                continue;
            };
            let mut locked = entry.lock();
            if locked.evict_lru_chain() {
                return Some(1);
            }
            if locked.has_open_binding() || locked.is_detached_with_valid_md5() {
                continue;
            }
            drop(locked);
            Self::remove_entry(&mut profiles, &mut by_header, id);
            lru.retain(|&k| k != id);
            ICC_PROFILES_CACHED.set(profiles.len() as i64);
            return Some(1);
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error as CrateError;

    struct BytesStream {
        data: Vec<u8>,
        pos: usize,
    }

    impl Stream for BytesStream {
        fn seek(&mut self, offset: u64) -> Result<u64, CrateError> {
            self.pos = offset as usize;
            Ok(offset)
        }
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, CrateError> {
            let avail = self.data.len().saturating_sub(self.pos);
            let n = avail.min(buf.len());
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
        fn write(&mut self, _buf: &[u8]) -> Result<usize, CrateError> {
            Err(CrateError::AccessDenied)
        }
        fn bytes_available(&mut self) -> Result<u64, CrateError> {
            Ok((self.data.len() - self.pos) as u64)
        }
        fn length(&mut self) -> Result<u64, CrateError> {
            Ok(self.data.len() as u64)
        }
        fn close(&mut self) -> Result<(), CrateError> {
            Ok(())
        }
    }

    fn synthetic_profile() -> Vec<u8> {
        let mut buf = vec![0u8; crate::icc::profile::HEADER_LEN];
        buf[8] = 2;
        buf[12..16].copy_from_slice(b"mntr");
        buf[16..20].copy_from_slice(b"RGB ");
        buf[20..24].copy_from_slice(b"XYZ ");
        buf[36..40].copy_from_slice(b"acsp");
        buf
    }

    #[test]
    fn two_distinct_streams_with_identical_bytes_dedup() {
        let registry = IccRegistry::new("test", IccRegistryConfig::default());
        let mut a = BytesStream { data: synthetic_profile(), pos: 0 };
        let mut b = BytesStream { data: synthetic_profile(), pos: 0 };

        let p1 = registry.lookup_or_load(1, &mut a, 0, 0).unwrap();
        let p2 = registry.lookup_or_load(2, &mut b, 0, 0).unwrap();

        assert!(Arc::ptr_eq(&p1, &p2));
        assert_eq!(registry.profile_count(), 1);
        assert_eq!(p1.lock().bindings.len(), 2);
    }

    /// Two profiles can share a 128-byte header yet carry different tag
    /// data beyond it; the header MD5 alone must not merge them.
    #[test]
    fn profiles_sharing_a_header_but_differing_beyond_it_do_not_dedup() {
        let registry = IccRegistry::new("test", IccRegistryConfig::default());
        let mut base = synthetic_profile();
        base.extend_from_slice(&[0u8; 64]);
        let mut other = base.clone();
        let last = other.len() - 1;
        other[last] = 0xff;

        let mut a = BytesStream { data: base, pos: 0 };
        let mut b = BytesStream { data: other, pos: 0 };

        let p1 = registry.lookup_or_load(1, &mut a, 0, 0).unwrap();
        let p2 = registry.lookup_or_load(2, &mut b, 0, 0).unwrap();

        assert!(!Arc::ptr_eq(&p1, &p2));
        assert_eq!(registry.profile_count(), 2);
    }

    #[test]
    fn restore_commit_detaches_then_evicts() {
        let mut config = IccRegistryConfig::default();
        config.trim_limit = 0;
        let registry = IccRegistry::new("test", config);
        let mut a = BytesStream { data: synthetic_profile(), pos: 0 };
        let entry = registry.lookup_or_load(1, &mut a, 2, 2).unwrap();
        entry.lock().full_md5 = Some([9u8; 16]);

        registry.restore_commit(0);
        assert_eq!(registry.profile_count(), 0);
    }
}
