// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use serde::{Deserialize, Serialize};

/// Construction parameters for a [`crate::cache::BlobCache`] (spec §4.3, §6).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BlobCacheConfig {
    /// Used only for logging and metric labels.
    pub display_name: String,
    /// Soft byte budget; may be exceeded transiently.
    pub soft_byte_budget: u64,
    /// Default block size; must be a power of two.
    pub read_quantum: usize,
    /// Must divide `read_quantum`.
    pub alloc_quantum: usize,
    /// Maximum number of closed (zero-handle) entries retained for reuse.
    pub trim_limit: usize,
    /// Scalar cost hint passed through to the block pool's allocator.
    pub alloc_cost_hint: f64,
    /// Whether this cache instance must guard its state with a mutex.
    pub multi_thread_safe: bool,
}

impl Default for BlobCacheConfig {
    fn default() -> Self {
        Self {
            display_name: "blobcache".into(),
            soft_byte_budget: 16 * 1024 * 1024,
            read_quantum: 4096,
            alloc_quantum: 1024,
            trim_limit: 32,
            alloc_cost_hint: 1.0,
            multi_thread_safe: true,
        }
    }
}

/// Construction parameters for an [`crate::rsd::RsdStore`] (spec §4.5, §4.6).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RsdConfig {
    pub sequential_block_bytes: usize,
    pub random_block_bytes: usize,
    /// Ratio below which retaining the compressed block list is judged not
    /// worthwhile once the decoded list is complete (spec §4.6).
    pub cached_compressed_worthwhile_ratio: f64,
    /// The legacy wrap-on-EOF extension (spec §4.6, §9 Open Question). Off
    /// by default; `RsdStore::store_read` returns `Error::Invalid` on EOF
    /// wrap unless this is explicitly enabled.
    pub allow_circular: bool,
}

impl Default for RsdConfig {
    fn default() -> Self {
        Self {
            sequential_block_bytes: 16 * 1024,
            random_block_bytes: 1024,
            cached_compressed_worthwhile_ratio: 0.40,
            allow_circular: false,
        }
    }
}

/// Construction parameters for an [`crate::icc::IccRegistry`] (spec §4.8).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IccRegistryConfig {
    /// Controls whether [`crate::icc::transform`]'s lut8 whitepoint probe
    /// inserts a corrective parametric pre-curve (spec §9 Open Question).
    pub lut8_whitepoint_correction: bool,
    /// Maximum number of zero-binding, valid-MD5 "detached" profiles kept
    /// around for reattachment before the least-recently-used is dropped.
    pub trim_limit: usize,
}

impl Default for IccRegistryConfig {
    fn default() -> Self {
        Self {
            lut8_whitepoint_correction: true,
            trim_limit: 16,
        }
    }
}
