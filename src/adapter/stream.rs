// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The open-stream adapter (spec §4.1 `stream` variant): an already-open
//! interpreter stream object, keyed by object reference.

use crate::adapter::{AccessMode, Available, Identity, Protection, RestoreOutcome, SourceAdapter, StreamKey};
use crate::error::Error;
use crate::stream_iface::Stream;

use super::AdapterKind;

/// Installed by the client at construction (spec §9 "Interpreter callback
/// for restored objects"): given the save level being restored to, either
/// names a cheaper global identity this source can be replaced by, or
/// returns `None` if no such identity exists.
pub type RestoreCallback = Box<dyn FnMut(u64) -> Option<Identity> + Send>;

pub struct StreamAdapter {
    identity: Identity,
    stream: Box<dyn Stream>,
    protection: Protection,
    restore_callback: Option<RestoreCallback>,
    cached_length: Option<u64>,
}

impl StreamAdapter {
    pub fn new(
        object_ref: u64,
        stream: Box<dyn Stream>,
        protection: Protection,
        restore_callback: Option<RestoreCallback>,
    ) -> Self {
        Self {
            identity: Identity::Stream(StreamKey::ObjectRef(object_ref)),
            stream,
            protection,
            restore_callback,
            cached_length: None,
        }
    }
}

impl SourceAdapter for StreamAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Stream
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn open(&mut self, mode: AccessMode) -> Result<(), Error> {
        if mode.can_write() && self.protection.is_protected() {
            return Err(Error::AccessDenied);
        }
        Ok(())
    }

    fn close(&mut self) {
        let _ = self.stream.close();
    }

    fn available(&self, _offset: u64) -> Option<Available<'_>> {
        // Open streams are never zero-copy: their bytes live behind the
        // interpreter's I/O layer, not in adapter-owned memory.
        None
    }

    fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, Error> {
        self.stream.seek(offset)?;
        self.stream.read(buf)
    }

    fn write(&mut self, buf: &[u8], offset: u64) -> Result<(), Error> {
        if self.protection.is_protected() {
            return Err(Error::AccessDenied);
        }
        self.stream.seek(offset)?;
        let n = self.stream.write(buf)?;
        if n < buf.len() {
            return Err(Error::EndOfData);
        }
        Ok(())
    }

    fn length(&mut self) -> Result<u64, Error> {
        if let Some(len) = self.cached_length {
            return Ok(len);
        }
        let len = self.stream.length()?;
        self.cached_length = Some(len);
        Ok(len)
    }

    fn restored(&mut self, save_level: u64) -> RestoreOutcome {
        match self.restore_callback.as_mut() {
            Some(cb) => match cb(save_level) {
                Some(identity) => RestoreOutcome::Replacement(identity),
                None => RestoreOutcome::Expired,
            },
            None => RestoreOutcome::Expired,
        }
    }

    fn protection(&self) -> Protection {
        self.protection
    }
}
