// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The memory-span adapter (spec §4.1 `memory` variant): a contiguous
//! client-owned byte range. The blob cache never owns this memory — the
//! caller must keep it alive for as long as any blob built on it is open
//! (spec §3 Ownership summary).

use crate::adapter::{AccessMode, Available, Identity, Protection, RestoreOutcome, SourceAdapter};
use crate::error::Error;

use super::AdapterKind;

pub struct MemoryAdapter {
    identity: Identity,
    ptr: *const u8,
    mutable_ptr: Option<*mut u8>,
    len: usize,
    open: bool,
}

// SAFETY: `MemoryAdapter` never exposes its raw pointer outside a lifetime
// bound to `&self`/`&mut self`, and the caller who constructed it is
// responsible for the pointed-to memory's thread-safety, matching the
// client-owned-memory contract documented above.
unsafe impl Send for MemoryAdapter {}

impl MemoryAdapter {
    /// # Safety
    /// `ptr` must be valid for reads of `len` bytes for as long as this
    /// adapter (and any blob built on it) is alive. If `mutable_ptr` is
    /// `Some`, it must alias `ptr` and be valid for writes of `len` bytes
    /// for the same duration.
    pub unsafe fn new(ptr: *const u8, mutable_ptr: Option<*mut u8>, len: usize) -> Self {
        Self {
            identity: Identity::Memory {
                base: ptr as usize,
                len,
            },
            ptr,
            mutable_ptr,
            len,
            open: false,
        }
    }
}

impl SourceAdapter for MemoryAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Memory
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn open(&mut self, mode: AccessMode) -> Result<(), Error> {
        if mode.can_write() && self.mutable_ptr.is_none() {
            return Err(Error::AccessDenied);
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn available(&self, offset: u64) -> Option<Available<'_>> {
        let offset = offset as usize;
        if offset >= self.len {
            return None;
        }
        // SAFETY: constructor's contract guarantees `ptr..ptr+len` is valid
        // for reads for the adapter's lifetime.
        let bytes = unsafe { std::slice::from_raw_parts(self.ptr.add(offset), self.len - offset) };
        Some(Available { bytes })
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, Error> {
        let offset = offset as usize;
        if offset >= self.len {
            return Ok(0);
        }
        let n = buf.len().min(self.len - offset);
        // SAFETY: bounds checked above against the constructor's contract.
        let src = unsafe { std::slice::from_raw_parts(self.ptr.add(offset), n) };
        buf[..n].copy_from_slice(src);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<(), Error> {
        let Some(mutable_ptr) = self.mutable_ptr else {
            return Err(Error::AccessDenied);
        };
        let offset = offset as usize;
        if offset.checked_add(buf.len()).map(|e| e > self.len).unwrap_or(true) {
            return Err(Error::EndOfData);
        }
        // SAFETY: bounds checked above; constructor's contract guarantees
        // writability for the adapter's lifetime.
        let dst = unsafe { std::slice::from_raw_parts_mut(mutable_ptr.add(offset), buf.len()) };
        dst.copy_from_slice(buf);
        Ok(())
    }

    fn length(&mut self) -> Result<u64, Error> {
        Ok(self.len as u64)
    }

    fn restored(&mut self, _save_level: u64) -> RestoreOutcome {
        // A raw memory span has no cheaper global key to fall back to.
        RestoreOutcome::Expired
    }

    fn protection(&self) -> Protection {
        Protection::None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_and_write_round_trip() {
        let mut buf = vec![0u8; 16];
        let ptr = buf.as_mut_ptr();
        let mut adapter = unsafe { MemoryAdapter::new(ptr, Some(ptr), 16) };
        adapter.open(AccessMode::ReadWrite).unwrap();
        let data: Vec<u8> = (0..16).collect();
        adapter.write(&data, 0).unwrap();
        let mut out = vec![0u8; 16];
        let n = adapter.read(&mut out, 0).unwrap();
        assert_eq!(n, 16);
        assert_eq!(out, data);
    }

    #[test]
    fn read_only_rejects_write() {
        let buf = vec![0u8; 8];
        let mut adapter = unsafe { MemoryAdapter::new(buf.as_ptr(), None, 8) };
        adapter.open(AccessMode::Read).unwrap();
        assert_eq!(adapter.write(&[1], 0), Err(Error::AccessDenied));
    }

    #[test]
    fn available_shrinks_toward_end() {
        let buf = vec![0u8; 8];
        let adapter = unsafe { MemoryAdapter::new(buf.as_ptr(), None, 8) };
        assert_eq!(adapter.available(0).unwrap().bytes.len(), 8);
        assert_eq!(adapter.available(6).unwrap().bytes.len(), 2);
        assert!(adapter.available(8).is_none());
    }
}
