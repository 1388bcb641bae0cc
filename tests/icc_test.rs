// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Integration coverage for the ICC profile registry (spec §8 scenario S6).

#![cfg(feature = "icc")]

use std::sync::Arc;

use ripblob_core::error::Error;
use ripblob_core::{IccRegistry, IccRegistryConfig, Stream};

struct BytesStream {
    data: Vec<u8>,
    pos: usize,
}

impl Stream for BytesStream {
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

fn well_formed_header(intent: u32) -> Vec<u8> {
    let mut buf = vec![0u8; 128];
    buf[8] = 2; // major version 2
    buf[12..16].copy_from_slice(b"mntr");
    buf[16..20].copy_from_slice(b"RGB ");
    buf[20..24].copy_from_slice(b"XYZ ");
    buf[36..40].copy_from_slice(b"acsp");
    buf[64..68].copy_from_slice(&intent.to_be_bytes());
    buf
}

/// S6 — two streams with bytewise identical profile contents dedup to the
/// same `IccProfileInfo`, and a profile differing only in the
/// rendering-intent header field still shares the same header MD5 (that
/// field is zeroed before hashing) and also dedups once its full MD5 is
/// compared.
#[test]
fn identical_profile_bytes_dedup_across_distinct_streams() {
    let registry = IccRegistry::new("s6", IccRegistryConfig::default());
    let bytes = well_formed_header(0);

    let mut stream_a = BytesStream { data: bytes.clone(), pos: 0 };
    let mut stream_b = BytesStream { data: bytes.clone(), pos: 0 };

    let profile_a = registry.lookup_or_load(1, &mut stream_a, 0, 0).unwrap();
    let profile_b = registry.lookup_or_load(2, &mut stream_b, 0, 0).unwrap();

    assert!(Arc::ptr_eq(&profile_a, &profile_b));
    assert_eq!(registry.profile_count(), 1);
}

#[test]
fn rendering_intent_byte_does_not_affect_header_md5_dedup() {
    let registry = IccRegistry::new("s6b", IccRegistryConfig::default());
    let perceptual = well_formed_header(0);
    let saturation = well_formed_header(2);
    assert_ne!(perceptual, saturation, "fixture sanity: the two buffers do differ");

    let mut stream_a = BytesStream { data: perceptual, pos: 0 };
    let mut stream_b = BytesStream { data: saturation, pos: 0 };

    let profile_a = registry.lookup_or_load(1, &mut stream_a, 0, 0).unwrap();
    let profile_b = registry.lookup_or_load(2, &mut stream_b, 0, 0).unwrap();

    // The rendering-intent field is zeroed before hashing (spec §4.8 step
    // 3), so the two streams share a header MD5 and the full-MD5 compare
    // in step 4 finds them identical too (the only byte difference is the
    // zeroed field) and dedups them onto one entry.
    assert!(Arc::ptr_eq(&profile_a, &profile_b));
    assert_eq!(registry.profile_count(), 1);
}
