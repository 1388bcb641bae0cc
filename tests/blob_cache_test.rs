// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Integration coverage for the blob data cache (spec §8 scenarios S1, S3).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ripblob_core::pool::BlockPool;
use ripblob_core::{
    AccessMode, Blob, BlobCache, BlobCacheConfig, EntryFlags, Error, Identity, MemoryAdapter, Protection,
    StreamAdapter, StreamKey,
};
use ripblob_core::Stream;

struct VecStream {
    data: Vec<u8>,
    pos: usize,
}

impl Stream for VecStream {
    fn seek(&mut self, offset: u64) -> Result<u64, Error> {
        self.pos = offset as usize;
        Ok(offset)
    }
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let avail = self.data.len().saturating_sub(self.pos);
        let n = avail.min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
    fn write(&mut self, _buf: &[u8]) -> Result<usize, Error> {
        Err(Error::AccessDenied)
    }
    fn bytes_available(&mut self) -> Result<u64, Error> {
        Ok((self.data.len() - self.pos) as u64)
    }
    fn length(&mut self) -> Result<u64, Error> {
        Ok(self.data.len() as u64)
    }
    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

fn open_stream_blob(cache: &BlobCache, object_ref: u64, data: Vec<u8>, mode: AccessMode) -> Blob {
    let identity = Identity::Stream(StreamKey::ObjectRef(object_ref));
    cache
        .open_from_source(identity, mode, EntryFlags::empty(), 0, move || {
            Box::new(StreamAdapter::new(object_ref, Box::new(VecStream { data, pos: 0 }), Protection::None, None))
        })
        .unwrap()
}

fn open_memory_blob(cache: &BlobCache, buf: &mut [u8], mode: AccessMode) -> ripblob_core::Blob {
    let ptr = buf.as_ptr();
    let mutable_ptr = if mode.can_write() { Some(buf.as_mut_ptr()) } else { None };
    let len = buf.len();
    let identity = Identity::Memory {
        base: ptr as usize,
        len,
    };
    cache
        .open_from_source(identity, mode, EntryFlags::empty(), 0, move || {
            Box::new(unsafe { MemoryAdapter::new(ptr, mutable_ptr, len) })
        })
        .unwrap()
}

/// S1 — memory round trip: open a memory blob, read its contents back,
/// close it, reopen on the same buffer and observe a cache hit.
#[test]
fn memory_round_trip_and_cache_hit() {
    let config = BlobCacheConfig {
        display_name: "s1".into(),
        soft_byte_budget: 64 * 1024,
        read_quantum: 4096,
        alloc_quantum: 1024,
        trim_limit: 2,
        ..Default::default()
    };
    let pool = Arc::new(BlockPool::new(config.alloc_quantum, 4096));
    let cache = BlobCache::new(config, pool);

    let mut data = vec![0u8; 10_000];
    for (i, b) in data.iter_mut().enumerate() {
        *b = (i % 256) as u8;
    }

    let mut blob = open_memory_blob(&cache, &mut data, AccessMode::Read);
    let mut out = vec![0u8; 10_000];
    let mut total = 0;
    while total < out.len() {
        let n = blob.read(&mut out[total..]).unwrap();
        assert!(n > 0, "short read before EOF");
        total += n;
    }
    for (j, b) in out.iter().enumerate() {
        assert_eq!(*b, (j % 256) as u8, "byte {j} mismatched");
    }
    blob.close();

    // Reopening on the same identity must hit the existing entry rather
    // than constructing a fresh adapter.
    let mut blob2 = open_memory_blob(&cache, &mut data, AccessMode::Read);
    let mut out2 = vec![0u8; 10_000];
    let mut total2 = 0;
    while total2 < out2.len() {
        let n = blob2.read(&mut out2[total2..]).unwrap();
        total2 += n;
    }
    assert_eq!(out, out2);
}

/// S3 — a mapped window must stay valid across eviction pressure caused
/// by reads on an unrelated blob in the same cache.
#[test]
fn map_stable_across_eviction() {
    let config = BlobCacheConfig {
        display_name: "s3".into(),
        soft_byte_budget: 8192,
        read_quantum: 4096,
        alloc_quantum: 4096,
        trim_limit: 8,
        ..Default::default()
    };
    let pool = Arc::new(BlockPool::new(config.alloc_quantum, 4096));
    let cache = BlobCache::new(config, pool);

    let a = vec![0xABu8; 16 * 1024];
    let mut b = vec![0xCDu8; 16 * 1024];

    // A stream source (never zero-copy) so `map` is forced through the
    // cache-block pinning path rather than a zero-copy borrow.
    let blob_a = open_stream_blob(&cache, 1, a, AccessMode::Read);
    let map = blob_a.map(4096).unwrap();
    let expected: Vec<u8> = map.as_slice().to_vec();
    assert_eq!(expected, vec![0xABu8; 4096]);

    let mut blob_b = open_memory_blob(&cache, &mut b, AccessMode::Read);
    let mut sink = vec![0u8; 12 * 1024];
    let mut read = 0;
    while read < sink.len() {
        let n = blob_b.read(&mut sink[read..]).unwrap();
        if n == 0 {
            break;
        }
        read += n;
    }

    // The pinned mapping must be unaffected by whatever the cache evicted
    // to make room for B's reads.
    assert_eq!(map.as_slice(), expected.as_slice());

    map.close();
    blob_a.close();
    blob_b.close();
}

/// Round-trip and idempotence (spec §8): writing bytes to a memory-backed
/// blob at an offset, then reading that many bytes back from the same
/// offset, must return exactly what was written.
#[test]
fn memory_write_then_read_back_round_trip() {
    let config = BlobCacheConfig {
        display_name: "write-round-trip".into(),
        ..Default::default()
    };
    let pool = Arc::new(BlockPool::new(config.alloc_quantum, 4096));
    let cache = BlobCache::new(config, pool);

    let mut buf = vec![0u8; 4096];
    let mut blob = open_memory_blob(&cache, &mut buf, AccessMode::ReadWrite);

    let payload: Vec<u8> = (0..256u32).map(|i| (i * 7) as u8).collect();
    blob.seek(1024);
    blob.write(&payload).unwrap();

    blob.seek(1024);
    let mut readback = vec![0u8; payload.len()];
    let mut total = 0;
    while total < readback.len() {
        let n = blob.read(&mut readback[total..]).unwrap();
        assert!(n > 0, "short read before EOF");
        total += n;
    }
    assert_eq!(readback, payload);
    blob.close();
}

/// Round-trip and idempotence (spec §8): reopening a still-live entry must
/// not invoke `make_adapter` a second time — the cache hit path skips
/// `create` entirely, so the underlying source is never loaded twice while
/// the entry is alive.
#[test]
fn reopen_on_live_entry_never_invokes_create_twice() {
    let config = BlobCacheConfig {
        display_name: "no-double-load".into(),
        ..Default::default()
    };
    let pool = Arc::new(BlockPool::new(config.alloc_quantum, 4096));
    let cache = BlobCache::new(config, pool);

    let create_count = Arc::new(AtomicUsize::new(0));
    let identity = Identity::Stream(StreamKey::ObjectRef(42));
    let data = b"hello round trip".to_vec();

    let open_once = |cache: &BlobCache| {
        let create_count = create_count.clone();
        let data = data.clone();
        cache
            .open_from_source(identity.clone(), AccessMode::Read, EntryFlags::empty(), 0, move || {
                create_count.fetch_add(1, Ordering::SeqCst);
                Box::new(StreamAdapter::new(42, Box::new(VecStream { data, pos: 0 }), Protection::None, None))
            })
            .unwrap()
    };

    // First open is a miss: `create` runs once. A second handle on the same
    // still-open identity must hit the existing entry without re-invoking it.
    let first = open_once(&cache);
    let second = open_once(&cache);
    assert_eq!(create_count.load(Ordering::SeqCst), 1);

    first.close();
    second.close();
}

/// Round-trip and idempotence (spec §8): invoking the block-recycle handler
/// twice on a settled cache releases memory only on the first call.
#[test]
fn block_recycle_handler_idempotent_on_settled_cache() {
    let config = BlobCacheConfig {
        display_name: "recycle-idempotent".into(),
        soft_byte_budget: 64 * 1024,
        read_quantum: 4096,
        alloc_quantum: 4096,
        trim_limit: 8,
        ..Default::default()
    };
    let pool = Arc::new(BlockPool::new(config.alloc_quantum, 4096));
    let cache = BlobCache::new(config, pool);

    let mut buf = vec![0xEFu8; 16 * 1024];
    let mut blob = open_memory_blob(&cache, &mut buf, AccessMode::Read);
    let mut sink = vec![0u8; buf.len()];
    let mut read = 0;
    while read < sink.len() {
        let n = blob.read(&mut sink[read..]).unwrap();
        if n == 0 {
            break;
        }
        read += n;
    }
    blob.close();

    let first = cache.handler_release(u64::MAX).unwrap();
    assert!(first > 0, "first call should release the unpinned blocks just read");

    let second = cache.handler_release(u64::MAX).unwrap();
    assert_eq!(second, 0, "second call on a settled cache must release nothing further");
}

/// Identity uniqueness (spec §8): two distinct memory buffers never
/// collide on the same entry.
#[test]
fn distinct_buffers_get_distinct_entries() {
    let config = BlobCacheConfig {
        display_name: "distinct".into(),
        ..Default::default()
    };
    let pool = Arc::new(BlockPool::new(config.alloc_quantum, 4096));
    let cache = BlobCache::new(config, pool);

    let mut a = vec![1u8; 64];
    let mut b = vec![2u8; 64];
    let blob_a = open_memory_blob(&cache, &mut a, AccessMode::Read);
    let blob_b = open_memory_blob(&cache, &mut b, AccessMode::Read);
    assert_ne!(blob_a.identity(), blob_b.identity());
}
