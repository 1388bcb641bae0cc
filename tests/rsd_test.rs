// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Integration coverage for the RSD store (spec §8 scenarios S4, S5).

use std::sync::Arc;

use ripblob_core::config::RsdConfig;
use ripblob_core::error::Error;
use ripblob_core::pool::BlockPool;
use ripblob_core::rsd::{AccessHint, RsdStore};
use ripblob_core::scratch::FilesystemScratchDevice;
use ripblob_core::stream_iface::Stream;

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

fn read_to_eof(store: &mut RsdStore) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let (bytes, is_last) = store.store_read_block().unwrap();
        out.extend_from_slice(&bytes);
        if is_last || bytes.is_empty() {
            break;
        }
    }
    out
}

/// S4 — rewinding a non-seekable source must replay the exact same bytes,
/// including after the block-recycle handler has spilled a block to disk.
#[test]
fn rewind_over_non_seekable_source_matches_after_disk_spill() {
    let dir = tempfile::tempdir().unwrap();
    let scratch: Arc<dyn ripblob_core::ScratchDevice> = Arc::new(FilesystemScratchDevice::new(dir.path()).unwrap());
    let pool = Arc::new(BlockPool::new(4096, 4096));
    let data: Vec<u8> = (0..50_000u32).map(|i| (i % 256) as u8).collect();
    let source: Box<dyn Stream> = Box::new(VecStream { data: data.clone(), pos: 0 });

    let mut store = RsdStore::new(
        "s4".into(),
        source,
        false,
        None,
        AccessHint::Sequential,
        RsdConfig::default(),
        pool,
        scratch.clone(),
    )
    .unwrap();

    let first_pass = read_to_eof(&mut store);
    assert_eq!(first_pass, data);

    store.store_seek(0).unwrap();
    let second_pass = read_to_eof(&mut store);
    assert_eq!(second_pass, first_pass);

    store.store_seek(0).unwrap();
    let freed = store.find_reclaim(16 * 1024, true, false);
    assert!(freed.is_some(), "block-recycle handler should find a disk-eligible block");
    assert!(
        store.decoded_list().bytes_in_memory() < data.len() as u64,
        "at least one block must have moved out of memory"
    );

    store.store_seek(0).unwrap();
    let third_pass = read_to_eof(&mut store);
    assert_eq!(third_pass, data);
}

/// S5 — seeking away from sequential replay promotes the list to
/// random-access hint, halving the size of subsequently allocated blocks.
#[test]
fn seek_promotes_sequential_list_to_random() {
    let dir = tempfile::tempdir().unwrap();
    let scratch: Arc<dyn ripblob_core::ScratchDevice> = Arc::new(FilesystemScratchDevice::new(dir.path()).unwrap());
    let pool = Arc::new(BlockPool::new(1024, 4096));
    let data: Vec<u8> = vec![0u8; 64 * 1024];
    let source: Box<dyn Stream> = Box::new(VecStream { data, pos: 0 });

    let mut store = RsdStore::new(
        "s5".into(),
        source,
        true,
        None,
        AccessHint::Sequential,
        RsdConfig::default(),
        pool,
        scratch,
    )
    .unwrap();

    assert_eq!(store.access_hint(), AccessHint::Sequential);
    store.store_seek(24 * 1024).unwrap();
    assert_eq!(store.access_hint(), AccessHint::Random);
}
