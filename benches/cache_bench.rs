// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ripblob_core::pool::BlockPool;
use ripblob_core::{AccessMode, BlobCache, BlobCacheConfig, EntryFlags, Identity, MemoryAdapter};

fn open_memory_blob(cache: &BlobCache, buf: &mut [u8]) -> ripblob_core::Blob {
    let ptr = buf.as_ptr();
    let len = buf.len();
    let identity = Identity::Memory { base: ptr as usize, len };
    cache
        .open_from_source(identity, AccessMode::Read, EntryFlags::empty(), 0, move || {
            Box::new(unsafe { MemoryAdapter::new(ptr, None, len) })
        })
        .unwrap()
}

fn blob_cache_read_bench(c: &mut Criterion) {
    const RECORD_BYTES: usize = 2048;
    const N_RECORDS: usize = 256;

    let config = BlobCacheConfig {
        display_name: "bench".into(),
        soft_byte_budget: 16 * 1024 * 1024,
        ..Default::default()
    };
    let pool = Arc::new(BlockPool::new(config.alloc_quantum, 4096));
    let cache = BlobCache::new(config, pool);

    // Kept alive for the whole benchmark so repeated iterations open the
    // *same* identities, exercising the cache-hit path rather than forcing
    // a miss (and a fresh adapter) on every record every iteration.
    let mut buffers: Vec<Vec<u8>> = (0..N_RECORDS).map(|i| vec![i as u8; RECORD_BYTES]).collect();

    c.bench_function("blob_cache_read_hit", |b| {
        b.iter(|| {
            for buf in buffers.iter_mut() {
                let mut blob = open_memory_blob(&cache, buf);
                let mut out = vec![0u8; RECORD_BYTES];
                let mut read = 0;
                while read < out.len() {
                    let n = blob.read(&mut out[read..]).unwrap();
                    if n == 0 {
                        break;
                    }
                    read += n;
                }
                black_box(&out);
                blob.close();
            }
        })
    });
}

criterion_group!(benches, blob_cache_read_bench);
criterion_main!(benches);
