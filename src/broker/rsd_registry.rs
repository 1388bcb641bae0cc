// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The broker-owned handle table of live [`RsdStore`]s (spec §4.6 linkage
//! field, §9 REDESIGN FLAGS: "prefer a handle table owned by the broker;
//! each store registers and deregisters itself" rather than a process-wide
//! mutable list threaded through the store type itself).

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::rsd::{AccessHint, RsdStore};

/// A registration token; dropping it deregisters the store. Holding this
/// alongside the `Arc<Mutex<RsdStore>>` is the caller's responsibility —
/// typically the RSD filter instance that owns the store (spec §3
/// Ownership summary).
pub struct RsdStoreRegistration {
    registry: Arc<RsdRegistryInner>,
    id: u64,
}

impl Drop for RsdStoreRegistration {
    fn drop(&mut self) {
        self.registry.stores.lock().retain(|(id, _)| *id != self.id);
    }
}

struct RsdRegistryInner {
    stores: Mutex<Vec<(u64, Weak<Mutex<RsdStore>>)>>,
}

/// Shared handle table the four RSD low-memory handlers walk to find a
/// store to solicit (spec §4.7).
#[derive(Clone)]
pub struct RsdStoreRegistry(Arc<RsdRegistryInner>);

impl Default for RsdStoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RsdStoreRegistry {
    pub fn new() -> Self {
        Self(Arc::new(RsdRegistryInner { stores: Mutex::new(Vec::new()) }))
    }

    /// Registers `store` and returns a token that deregisters it on drop.
    pub fn register(&self, id: u64, store: &Arc<Mutex<RsdStore>>) -> RsdStoreRegistration {
        self.0.stores.lock().push((id, Arc::downgrade(store)));
        RsdStoreRegistration { registry: self.0.clone(), id }
    }

    /// Non-blockingly walks every still-live registered store whose access
    /// hint matches `hint`, calling `f` on the first one that accepts a
    /// non-blocking lock and returns `Some` from `f`. Dead (dropped) entries
    /// are pruned as they're found. Used by the `rsd-*-ram`/`rsd-*-disk`
    /// handlers (spec §4.7).
    pub fn try_for_each_matching(&self, hint: AccessHint, mut f: impl FnMut(&mut RsdStore) -> Option<u64>) -> Option<u64> {
        let mut stores = self.0.stores.lock();
        stores.retain(|(_, weak)| weak.strong_count() > 0);
        for (_, weak) in stores.iter() {
            let Some(store) = weak.upgrade() else { continue };
            let Some(mut guard) = store.try_lock() else { continue };
            if guard.access_hint() != hint {
                continue;
            }
            if let Some(freed) = f(&mut guard) {
                return Some(freed);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.0.stores.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::RsdConfig;
    use crate::error::Error;
    use crate::pool::BlockPool;
    use crate::scratch::FilesystemScratchDevice;
    use crate::stream_iface::Stream;

    struct VecStream(Vec<u8>, usize);
    impl Stream for VecStream {
        fn seek(&mut self, offset: u64) -> Result<u64, Error> {
            self.1 = offset as usize;
            Ok(offset)
        }
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
            let avail = self.0.len().saturating_sub(self.1);
            let n = avail.min(buf.len());
            buf[..n].copy_from_slice(&self.0[self.1..self.1 + n]);
            self.1 += n;
            Ok(n)
        }
        fn write(&mut self, _buf: &[u8]) -> Result<usize, Error> {
            Err(Error::AccessDenied)
        }
        fn bytes_available(&mut self) -> Result<u64, Error> {
            Ok((self.0.len() - self.1) as u64)
        }
        fn length(&mut self) -> Result<u64, Error> {
            Ok(self.0.len() as u64)
        }
        fn close(&mut self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn registration_drop_deregisters() {
        let registry = RsdStoreRegistry::new();
        let pool = Arc::new(BlockPool::new(1024, 4096));
        let scratch: Arc<dyn crate::scratch::ScratchDevice> =
            Arc::new(FilesystemScratchDevice::new(std::env::temp_dir()).unwrap());
        let source: Box<dyn Stream> = Box::new(VecStream(vec![1u8; 4096], 0));
        let store = Arc::new(Mutex::new(
            RsdStore::new("t".into(), source, true, None, AccessHint::Sequential, RsdConfig::default(), pool, scratch).unwrap(),
        ));
        {
            let _token = registry.register(1, &store);
            assert_eq!(registry.len(), 1);
        }
        assert_eq!(registry.len(), 0);
    }
}
