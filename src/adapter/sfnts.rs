// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The `sfnts`-array adapter (spec §4.1): a `TrueType` `sfnts` array, whose
//! logical byte stream is the concatenation of the *even-lengthed prefix*
//! of each element — the last byte of an odd-length element is dropped
//! (spec §4.1, scenario S2).

use crate::adapter::{AccessMode, Available, Identity, Protection, RestoreOutcome, SourceAdapter};
use crate::error::Error;

use super::AdapterKind;

#[derive(Clone, Copy)]
pub struct SfntsElement {
    pub ptr: *const u8,
    pub len: usize,
}

// SAFETY: see `MemoryAdapter` — elements are client-owned for the
// adapter's lifetime.
unsafe impl Send for SfntsElement {}

impl SfntsElement {
    /// The even-lengthed prefix length actually contributed to the logical
    /// stream (spec §4.1).
    fn effective_len(&self) -> usize {
        self.len & !1
    }
}

pub struct SfntsArrayAdapter {
    identity: Identity,
    elements: Vec<SfntsElement>,
    offsets: Vec<u64>,
    total_len: u64,
}

impl SfntsArrayAdapter {
    pub fn new(array_base: usize, elements: Vec<SfntsElement>) -> Self {
        let mut offsets = Vec::with_capacity(elements.len());
        let mut acc = 0u64;
        for e in &elements {
            offsets.push(acc);
            acc += e.effective_len() as u64;
        }
        let identity = Identity::SfntsArray {
            base: array_base,
            count: elements.len(),
        };
        Self {
            identity,
            elements,
            offsets,
            total_len: acc,
        }
    }

    fn locate(&self, offset: u64) -> Option<(usize, usize)> {
        if offset >= self.total_len {
            return None;
        }
        let idx = self.offsets.iter().rposition(|&start| start <= offset)?;
        Some((idx, (offset - self.offsets[idx]) as usize))
    }
}

impl SourceAdapter for SfntsArrayAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::SfntsArray
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn open(&mut self, mode: AccessMode) -> Result<(), Error> {
        if mode.can_write() {
            return Err(Error::AccessDenied);
        }
        Ok(())
    }

    fn close(&mut self) {}

    fn available(&self, offset: u64) -> Option<Available<'_>> {
        let (idx, within) = self.locate(offset)?;
        let elem = self.elements[idx];
        let effective = elem.effective_len();
        if within >= effective {
            return None;
        }
        // SAFETY: constructor's contract on `SfntsElement`.
        let bytes = unsafe { std::slice::from_raw_parts(elem.ptr.add(within), effective - within) };
        Some(Available { bytes })
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, Error> {
        let mut written = 0;
        let mut cursor = offset;
        while written < buf.len() {
            let Some((idx, within)) = self.locate(cursor) else {
                break;
            };
            let elem = self.elements[idx];
            let effective = elem.effective_len();
            let avail = effective - within;
            let n = avail.min(buf.len() - written);
            // SAFETY: bounds checked by `locate`/`avail` above.
            let src = unsafe { std::slice::from_raw_parts(elem.ptr.add(within), n) };
            buf[written..written + n].copy_from_slice(src);
            written += n;
            cursor += n as u64;
        }
        Ok(written)
    }

    fn write(&mut self, _buf: &[u8], _offset: u64) -> Result<(), Error> {
        Err(Error::AccessDenied)
    }

    fn length(&mut self) -> Result<u64, Error> {
        Ok(self.total_len)
    }

    fn restored(&mut self, _save_level: u64) -> RestoreOutcome {
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
    fn odd_length_element_truncated() {
        // element 0: 11 bytes (0x00..=0x0A) -> even prefix is 10 bytes.
        // element 1: 1 byte (0xFF) -> even prefix is 0 bytes.
        let a: Vec<u8> = (0..=0x0Au8).collect();
        let b = vec![0xFFu8];
        let elements = vec![
            SfntsElement { ptr: a.as_ptr(), len: a.len() },
            SfntsElement { ptr: b.as_ptr(), len: b.len() },
        ];
        let mut adapter = SfntsArrayAdapter::new(0x2000, elements);
        assert_eq!(adapter.length().unwrap(), 10);
        let mut out = vec![0u8; 10];
        let n = adapter.read(&mut out, 0).unwrap();
        assert_eq!(n, 10);
        assert_eq!(out, a[..10]);
    }
}
