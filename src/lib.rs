// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Blob data cache, reusable-stream-decode store, and ICC profile registry
//! shared by a RIP's font/image/color subsystems.
//!
//! This crate caches and reuses byte sources behind three independent
//! subsystems that share one block allocator and one cooperative
//! low-memory broker:
//!
//! - [`cache`]/[`blob`]: a keyed registry of cached byte sources ([`adapter`]
//!   providing the closed set of source kinds), handed out as [`blob::Blob`]
//!   handles and stable [`blob::Map`] windows.
//! - [`rsd`]: gives a possibly non-seekable, possibly compressed stream
//!   unbounded rewind and random access over a block-cached, disk-spillable
//!   overlay.
//! - [`icc`]: dedups ICC profile streams by content hash and builds their
//!   transform chains.
//!
//! [`broker`] is the low-memory cooperation layer tying the three together;
//! [`pool`] is the single block allocator all three draw from; [`scratch`]
//! and [`stream_iface`] are the interfaces to the host's disk and stream
//! layers, both external collaborators this crate only consumes.

pub mod adapter;
pub mod blob;
pub mod broker;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod rsd;
pub mod scratch;
pub mod stream_iface;

#[cfg(feature = "icc")]
pub mod icc;

pub use adapter::{
    AccessMode, AdapterKind, Available, ByteStringAdapter, ByteStringArrayAdapter, EntryFlag, EntryFlags, Identity,
    MemoryAdapter, Protection, RestoreOutcome, SfntsArrayAdapter, SourceAdapter, StreamAdapter, StreamByNameAdapter,
    StreamKey,
};
pub use blob::{Blob, Map};
pub use broker::{LowMemoryBroker, LowMemoryHandler};
pub use cache::BlobCache;
pub use config::{BlobCacheConfig, RsdConfig};
pub use error::Error;
pub use rsd::RsdStore;
pub use scratch::{ScratchDevice, ScratchHandle};
pub use stream_iface::{DeviceOpener, Stream};

#[cfg(feature = "icc")]
pub use config::IccRegistryConfig;
#[cfg(feature = "icc")]
pub use icc::IccRegistry;
