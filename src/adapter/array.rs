// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The byte-string-array adapter (spec §4.1 `byte-string-array` variant):
//! a logical byte stream formed by concatenating the *full* length of each
//! element of an array of byte strings (contrast with [`super::sfnts`],
//! which strips odd trailing bytes).

use crate::adapter::{AccessMode, Available, Identity, Protection, RestoreOutcome, SourceAdapter};
use crate::error::Error;

use super::AdapterKind;

/// One element of the backing array: a client-owned byte range.
#[derive(Clone, Copy)]
pub struct ArrayElement {
    pub ptr: *const u8,
    pub len: usize,
}

// SAFETY: see `MemoryAdapter` — elements are client-owned for the
// adapter's lifetime.
unsafe impl Send for ArrayElement {}

pub struct ByteStringArrayAdapter {
    identity: Identity,
    elements: Vec<ArrayElement>,
    /// Prefix sums of element lengths; `offsets[i]` is the logical offset
    /// at which element `i` begins.
    offsets: Vec<u64>,
    total_len: u64,
}

impl ByteStringArrayAdapter {
    pub fn new(array_base: usize, elements: Vec<ArrayElement>) -> Self {
        let mut offsets = Vec::with_capacity(elements.len());
        let mut acc = 0u64;
        for e in &elements {
            offsets.push(acc);
            acc += e.len as u64;
        }
        let identity = Identity::ByteStringArray {
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

    /// Finds the element containing logical `offset`, returning its index
    /// and the offset within that element.
    fn locate(&self, offset: u64) -> Option<(usize, usize)> {
        if offset >= self.total_len {
            return None;
        }
        // `offsets` is sorted; a small array makes linear scan fine, and
        // keeps this adapter free of a binary-search edge case when two
        // elements are both zero-length.
        let idx = self
            .offsets
            .iter()
            .rposition(|&start| start <= offset)?;
        Some((idx, (offset - self.offsets[idx]) as usize))
    }
}

impl SourceAdapter for ByteStringArrayAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::ByteStringArray
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn open(&mut self, mode: AccessMode) -> Result<(), Error> {
        if mode.can_write() {
            // Interpreter byte-string-array sources are read-only in this
            // core; writing through an array adapter is not modelled.
            return Err(Error::AccessDenied);
        }
        Ok(())
    }

    fn close(&mut self) {}

    fn available(&self, offset: u64) -> Option<Available<'_>> {
        let (idx, within) = self.locate(offset)?;
        let elem = self.elements[idx];
        if within >= elem.len {
            return None;
        }
        // SAFETY: constructor's contract on `ArrayElement`.
        let bytes = unsafe { std::slice::from_raw_parts(elem.ptr.add(within), elem.len - within) };
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
            let avail = elem.len - within;
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
    fn concatenates_full_element_lengths() {
        let a = vec![1u8, 2, 3];
        let b = vec![4u8, 5];
        let elements = vec![
            ArrayElement { ptr: a.as_ptr(), len: a.len() },
            ArrayElement { ptr: b.as_ptr(), len: b.len() },
        ];
        let mut adapter = ByteStringArrayAdapter::new(0x1000, elements);
        assert_eq!(adapter.length().unwrap(), 5);
        let mut out = vec![0u8; 5];
        let n = adapter.read(&mut out, 0).unwrap();
        assert_eq!(n, 5);
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn available_never_spans_elements() {
        let a = vec![1u8, 2, 3];
        let b = vec![4u8, 5];
        let elements = vec![
            ArrayElement { ptr: a.as_ptr(), len: a.len() },
            ArrayElement { ptr: b.as_ptr(), len: b.len() },
        ];
        let adapter = ByteStringArrayAdapter::new(0x1000, elements);
        let avail = adapter.available(2).unwrap();
        assert_eq!(avail.bytes, &[3]);
    }
}
