// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The byte-string adapter (spec §4.1 `byte-string`/`long-byte-string`
//! variants): an interpreter string object treated as a flat byte range.
//! The two variants share identical behaviour; `long` only changes which
//! [`AdapterKind`] is reported, mirroring the original's int-vs-long length
//! field split, which Rust's `usize` makes unnecessary to model separately.

use crate::adapter::{AccessMode, Available, Identity, Protection, RestoreOutcome, SourceAdapter};
use crate::error::Error;

use super::AdapterKind;

pub struct ByteStringAdapter {
    identity: Identity,
    ptr: *const u8,
    mutable_ptr: Option<*mut u8>,
    len: usize,
    long: bool,
    protection: Protection,
}

// SAFETY: see `MemoryAdapter` — the client owns the pointed-to string
// object's storage for the adapter's lifetime.
unsafe impl Send for ByteStringAdapter {}

impl ByteStringAdapter {
    /// # Safety
    /// Same contract as [`MemoryAdapter::new`].
    pub unsafe fn new(
        ptr: *const u8,
        mutable_ptr: Option<*mut u8>,
        len: usize,
        long: bool,
        protection: Protection,
    ) -> Self {
        let identity = if long {
            Identity::LongByteString {
                base: ptr as usize,
                len,
            }
        } else {
            Identity::ByteString {
                base: ptr as usize,
                len,
            }
        };
        Self {
            identity,
            ptr,
            mutable_ptr,
            len,
            long,
            protection,
        }
    }
}

impl SourceAdapter for ByteStringAdapter {
    fn kind(&self) -> AdapterKind {
        if self.long {
            AdapterKind::LongByteString
        } else {
            AdapterKind::ByteString
        }
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn open(&mut self, mode: AccessMode) -> Result<(), Error> {
        if mode.can_write() && (self.mutable_ptr.is_none() || self.protection.is_protected()) {
            return Err(Error::AccessDenied);
        }
        Ok(())
    }

    fn close(&mut self) {}

    fn available(&self, offset: u64) -> Option<Available<'_>> {
        if self.protection.is_protected() {
            return None;
        }
        let offset = offset as usize;
        if offset >= self.len {
            return None;
        }
        // SAFETY: constructor's contract.
        let bytes = unsafe { std::slice::from_raw_parts(self.ptr.add(offset), self.len - offset) };
        Some(Available { bytes })
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, Error> {
        let offset = offset as usize;
        if offset >= self.len {
            return Ok(0);
        }
        let n = buf.len().min(self.len - offset);
        // SAFETY: bounds checked above.
        let src = unsafe { std::slice::from_raw_parts(self.ptr.add(offset), n) };
        buf[..n].copy_from_slice(src);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<(), Error> {
        if self.protection.is_protected() {
            return Err(Error::AccessDenied);
        }
        let Some(mutable_ptr) = self.mutable_ptr else {
            return Err(Error::AccessDenied);
        };
        let offset = offset as usize;
        if offset.checked_add(buf.len()).map(|e| e > self.len).unwrap_or(true) {
            return Err(Error::EndOfData);
        }
        // SAFETY: bounds checked above.
        let dst = unsafe { std::slice::from_raw_parts_mut(mutable_ptr.add(offset), buf.len()) };
        dst.copy_from_slice(buf);
        Ok(())
    }

    fn length(&mut self) -> Result<u64, Error> {
        Ok(self.len as u64)
    }

    fn restored(&mut self, _save_level: u64) -> RestoreOutcome {
        RestoreOutcome::Expired
    }

    fn protection(&self) -> Protection {
        self.protection
    }
}
