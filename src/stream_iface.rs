// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The external collaborators the stream and file adapters consume from
//! (spec §1): a byte-oriented `Stream` abstraction and a device layer able
//! to open streams by `(device, filename)`. Both are interfaces only — this
//! crate never implements a concrete stream or device itself.

use crate::adapter::{AccessMode, Protection};
use crate::error::Error;

/// A byte-oriented stream: seek/read/write/bytes-available/length/close.
/// Implemented by the interpreter's I/O layer; consumed, never implemented,
/// by this core.
pub trait Stream: Send {
    fn seek(&mut self, offset: u64) -> Result<u64, Error>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error>;
    fn write(&mut self, buf: &[u8]) -> Result<usize, Error>;
    fn bytes_available(&mut self) -> Result<u64, Error>;
    fn length(&mut self) -> Result<u64, Error>;
    fn close(&mut self) -> Result<(), Error>;
}

/// The device-driver file layer (spec §1: external collaborator, interface
/// only). Resolves a `(device, filename)` pair to an open [`Stream`] and
/// reports its content-protection tag.
pub trait DeviceOpener: Send + Sync {
    fn open(&self, device: &str, filename: &str, mode: AccessMode) -> Result<Box<dyn Stream>, Error>;
    fn protection_of(&self, device: &str, filename: &str) -> Protection;
}
