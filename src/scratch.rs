// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The scratch disk layer (spec §6 Scratch device contract, §4.5/§4.6
//! on-disk tier): an external collaborator the RSD store spills blocks to
//! under memory pressure. This crate only consumes the trait; a filesystem
//! implementation is provided for tests and for callers with no host scratch
//! device of their own.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::adapter::AccessMode;
use crate::error::Error;

/// Opaque handle returned by [`ScratchDevice::open_file`]. Never interpreted
/// by RSD code beyond passing it back to the device.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScratchHandle(pub u64);

/// The scratch block device contract of spec §6: open/close/delete a named
/// file, enumerate a directory, and seek/read/write/measure an open handle.
pub trait ScratchDevice: Send + Sync {
    fn open_file(&self, name: &str, mode: AccessMode) -> Result<ScratchHandle, Error>;
    fn close_file(&self, handle: ScratchHandle) -> Result<(), Error>;
    fn delete_file(&self, name: &str) -> Result<(), Error>;
    /// Enumerates filenames matching `pattern` (a simple `*`-glob), standing
    /// in for the `start_list`/`next_list`/`end_list` iterator trio of spec
    /// §6 — an iterator object carries no information a `Vec` doesn't here.
    fn list_files(&self, pattern: &str) -> Result<Vec<String>, Error>;
    fn seek(&self, handle: ScratchHandle, offset: u64) -> Result<(), Error>;
    fn read(&self, handle: ScratchHandle, buf: &mut [u8]) -> Result<usize, Error>;
    fn write(&self, handle: ScratchHandle, buf: &[u8]) -> Result<usize, Error>;
    fn bytes_total(&self, handle: ScratchHandle) -> Result<u64, Error>;
}

/// Generates the next `RSD/XXXX.RSD` scratch filename (spec §6), `XXXX` a
/// 4-hex-digit monotonically increasing id.
pub fn rsd_filename(id: u32) -> String {
    format!("RSD/{:04X}.RSD", id & 0xFFFF)
}

/// Deletes any surviving `RSD/*.RSD` scratch files at process start (spec
/// §6 Persisted state layout), before the first store is created.
pub fn cleanup_stale_scratch_files(device: &dyn ScratchDevice) -> Result<(), Error> {
    for name in device.list_files("RSD/*.RSD")? {
        device.delete_file(&name)?;
    }
    Ok(())
}

/// A plain-filesystem [`ScratchDevice`] rooted at a base directory, used by
/// tests and by callers with no platform scratch device of their own.
pub struct FilesystemScratchDevice {
    root: PathBuf,
    next_handle: AtomicU64,
    open: Mutex<HashMap<u64, File>>,
}

impl FilesystemScratchDevice {
    pub fn new(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("RSD"))?;
        Ok(Self {
            root,
            next_handle: AtomicU64::new(1),
            open: Mutex::new(HashMap::new()),
        })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl ScratchDevice for FilesystemScratchDevice {
    fn open_file(&self, name: &str, mode: AccessMode) -> Result<ScratchHandle, Error> {
        let path = self.path_for(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(mode.can_read())
            .write(mode.can_write())
            .create(mode.can_write())
            .open(path)?;
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.open.lock().unwrap().insert(id, file);
        Ok(ScratchHandle(id))
    }

    fn close_file(&self, handle: ScratchHandle) -> Result<(), Error> {
        self.open.lock().unwrap().remove(&handle.0);
        Ok(())
    }

    fn delete_file(&self, name: &str) -> Result<(), Error> {
        match fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_files(&self, pattern: &str) -> Result<Vec<String>, Error> {
        let dir = pattern.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        let suffix = pattern.rsplit_once('.').map(|(_, s)| s).unwrap_or("");
        let scan_dir = self.root.join(dir);
        if !scan_dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&scan_dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if suffix.is_empty() || file_name.ends_with(&format!(".{suffix}")) {
                names.push(if dir.is_empty() {
                    file_name.into_owned()
                } else {
                    format!("{dir}/{file_name}")
                });
            }
        }
        Ok(names)
    }

    fn seek(&self, handle: ScratchHandle, offset: u64) -> Result<(), Error> {
        let mut open = self.open.lock().unwrap();
        let file = open.get_mut(&handle.0).ok_or(Error::Invalid)?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    fn read(&self, handle: ScratchHandle, buf: &mut [u8]) -> Result<usize, Error> {
        let mut open = self.open.lock().unwrap();
        let file = open.get_mut(&handle.0).ok_or(Error::Invalid)?;
        Ok(file.read(buf)?)
    }

    fn write(&self, handle: ScratchHandle, buf: &[u8]) -> Result<usize, Error> {
        let mut open = self.open.lock().unwrap();
        let file = open.get_mut(&handle.0).ok_or(Error::Invalid)?;
        Ok(file.write(buf)?)
    }

    fn bytes_total(&self, handle: ScratchHandle) -> Result<u64, Error> {
        let open = self.open.lock().unwrap();
        let file = open.get(&handle.0).ok_or(Error::Invalid)?;
        Ok(file.metadata()?.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn filename_pattern() {
        assert_eq!(rsd_filename(0), "RSD/0000.RSD");
        assert_eq!(rsd_filename(255), "RSD/00FF.RSD");
    }

    #[test]
    fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let dev = FilesystemScratchDevice::new(dir.path()).unwrap();
        let h = dev.open_file("RSD/0001.RSD", AccessMode::ReadWrite).unwrap();
        dev.write(h, b"hello").unwrap();
        dev.seek(h, 0).unwrap();
        let mut buf = [0u8; 5];
        let n = dev.read(h, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        dev.close_file(h).unwrap();
    }

    #[test]
    fn cleanup_removes_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        let dev = FilesystemScratchDevice::new(dir.path()).unwrap();
        let h = dev.open_file(&rsd_filename(3), AccessMode::ReadWrite).unwrap();
        dev.close_file(h).unwrap();
        cleanup_stale_scratch_files(&dev).unwrap();
        assert!(dev.list_files("RSD/*.RSD").unwrap().is_empty());
    }
}
