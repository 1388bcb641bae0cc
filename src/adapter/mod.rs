// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Source adapters (spec §4.1): a closed set of variants providing uniform
//! read/write/length/identity over one opaque byte source. Modelled as a
//! trait with one implementer per variant (spec §9's re-architecting note),
//! stored behind `Box<dyn SourceAdapter>` in a [`crate::cache::BlobEntry`].

mod array;
mod byte_string;
mod memory;
mod sfnts;
mod stream;
mod stream_by_name;

pub use array::ByteStringArrayAdapter;
pub use byte_string::ByteStringAdapter;
pub use memory::MemoryAdapter;
pub use sfnts::SfntsArrayAdapter;
pub use stream::StreamAdapter;
pub use stream_by_name::StreamByNameAdapter;

use enumflags2::{bitflags, BitFlags};

use crate::error::Error;

/// The closed set of source adapter variants (spec §4.1).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    Memory,
    ByteString,
    LongByteString,
    ByteStringArray,
    SfntsArray,
    Stream,
    StreamByName,
}

/// A stream identity: either a direct interpreter object reference, or a
/// `(device, filename)` pair that survives a save-restore (spec §3
/// Identity, §4.1 `restored`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StreamKey {
    ObjectRef(u64),
    Named { device: String, filename: String },
}

/// `(adapter kind, adapter-specific key)` (spec §3 Identity). Two identities
/// compare equal only when both the kind and the key match; cross-kind
/// equality is never asked (enforced by [`BlobCache`](crate::cache::BlobCache)
/// before it ever calls [`SourceAdapter::same`]).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Identity {
    Memory { base: usize, len: usize },
    ByteString { base: usize, len: usize },
    LongByteString { base: usize, len: usize },
    ByteStringArray { base: usize, count: usize },
    SfntsArray { base: usize, count: usize },
    Stream(StreamKey),
}

impl Identity {
    pub fn kind(&self) -> AdapterKind {
        match self {
            Identity::Memory { .. } => AdapterKind::Memory,
            Identity::ByteString { .. } => AdapterKind::ByteString,
            Identity::LongByteString { .. } => AdapterKind::LongByteString,
            Identity::ByteStringArray { .. } => AdapterKind::ByteStringArray,
            Identity::SfntsArray { .. } => AdapterKind::SfntsArray,
            Identity::Stream(StreamKey::Named { .. }) => AdapterKind::StreamByName,
            Identity::Stream(StreamKey::ObjectRef(_)) => AdapterKind::Stream,
        }
    }
}

/// Access mode requested of a blob or adapter (spec §3 BlobEntry).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    /// `true` if `self` requests no capability that `other` lacks (spec §3
    /// Blob handle invariant: "a handle's mode is a subset of its entry's
    /// mode").
    pub fn is_subset_of(self, other: AccessMode) -> bool {
        use AccessMode::*;
        match (self, other) {
            (Read, Read) | (Read, ReadWrite) => true,
            (Write, Write) | (Write, ReadWrite) => true,
            (ReadWrite, ReadWrite) => true,
            _ => false,
        }
    }

    /// Narrowest mode both `self` and `other` agree on, or `None` on
    /// conflict (spec §4.3 `open_from_source`: "mode is intersected with
    /// the entry's stored mode; on conflict, fails with `access-denied`").
    pub fn intersect(self, other: AccessMode) -> Option<AccessMode> {
        use AccessMode::*;
        match (self, other) {
            (a, b) if a == b => Some(a),
            (ReadWrite, x) | (x, ReadWrite) => Some(x),
            _ => None,
        }
    }

    pub fn can_read(self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite)
    }
}

#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntryFlag {
    FontHint,
    Exclusive,
}

pub type EntryFlags = BitFlags<EntryFlag>;

/// Content-protection tag on a source (spec §4.1 `protection`). Any
/// non-`None` tag forbids writes and zero-copy mappings.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Protection {
    None,
    HqxRun,
    HqxDownload,
    Blanket,
}

impl Protection {
    pub fn is_protected(self) -> bool {
        !matches!(self, Protection::None)
    }
}

/// Outcome of [`SourceAdapter::restored`] (spec §4.1).
pub enum RestoreOutcome {
    /// The source can be described by a cheaper, lower-save-level identity;
    /// the cache should replace the entry's identity with this one.
    Replacement(Identity),
    /// No cheaper global key exists; the entry transitions to `expired`.
    Expired,
}

/// A contiguous zero-copy borrow into source memory (spec §4.1
/// `available`). The length is the number of contiguous bytes from the
/// requested offset *within the source's own internal segmentation* — it
/// never spans a byte-string-array or sfnts element boundary (spec §0.7).
pub struct Available<'a> {
    pub bytes: &'a [u8],
}

/// The twelve-operation capability set of spec §4.1, expressed as a trait
/// with one implementer per [`AdapterKind`].
///
/// `create`/`destroy` from the distilled spec are represented idiomatically:
/// `create` is each adapter's constructor (which must not perform I/O, same
/// as the original), and `destroy` is `Drop`, tolerant of `open` never
/// having been called.
pub trait SourceAdapter: Send {
    fn kind(&self) -> AdapterKind;
    fn identity(&self) -> &Identity;

    /// Identity predicate, invoked only after the cheap pointer-identity
    /// test (`Identity::eq`) fails, and only within one adapter kind.
    fn same(&self, other: &Identity) -> bool {
        self.identity() == other
    }

    /// Starts an I/O session; must pair with `close`.
    fn open(&mut self, mode: AccessMode) -> Result<(), Error>;

    fn close(&mut self);

    /// Returns a zero-copy borrow starting at `offset`, or `None` if the
    /// source is not zero-copy-capable at that offset (spec §4.1).
    fn available(&self, offset: u64) -> Option<Available<'_>>;

    /// Copies at most `buf.len()` bytes starting at `offset`; returns the
    /// number of bytes actually copied. Short returns indicate EOF or a
    /// recoverable read error. Never called with an empty `buf`.
    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, Error>;

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<(), Error>;

    /// May be expensive; implementations may memoise internally.
    fn length(&mut self) -> Result<u64, Error>;

    /// Invoked before the interpreter discards an object this source
    /// references, with the save level being restored to.
    fn restored(&mut self, save_level: u64) -> RestoreOutcome;

    fn protection(&self) -> Protection;
}
