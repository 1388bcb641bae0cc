// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Stable error codes exposed at the boundary of the blob/stream cache core
/// (spec §6, §7).
#[derive(Debug, Error)]
pub enum Error {
    #[error("ill-formed argument")]
    Invalid,

    #[error("mode or content protection forbids this operation")]
    AccessDenied,

    #[error("named stream not found")]
    InvalidFilename,

    #[error("underlying source was torn down by a save-restore")]
    Expired,

    #[error("device-level write failure")]
    WriteError,

    #[error("read or write past the end of a fixed-size source")]
    EndOfData,

    #[error("allocation failed and no low-memory handler offered enough")]
    OutOfMemory,

    #[error("{0}")]
    Other(String),
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        use Error::*;
        match (self, other) {
            (Invalid, Invalid)
            | (AccessDenied, AccessDenied)
            | (InvalidFilename, InvalidFilename)
            | (Expired, Expired)
            | (WriteError, WriteError)
            | (EndOfData, EndOfData)
            | (OutOfMemory, OutOfMemory) => true,
            (Other(a), Other(b)) => a == b,
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match e.kind() {
            NotFound => Error::InvalidFilename,
            PermissionDenied => Error::AccessDenied,
            UnexpectedEof => Error::EndOfData,
            _ => Error::WriteError,
        }
    }
}

impl From<Error> for String {
    fn from(e: Error) -> Self {
        e.to_string()
    }
}

/// Asserts a structural cache invariant (spec §7: "fatal only if structural").
///
/// Panics in debug builds so the violation is caught where it happens;
/// in release builds it is downgraded to a recoverable `Error::Invalid`
/// at the call site instead of aborting the process.
#[macro_export]
macro_rules! invariant {
    ($cond:expr, $msg:expr) => {{
        debug_assert!($cond, $msg);
        if !$cond {
            return Err($crate::error::Error::Invalid);
        }
    }};
}
