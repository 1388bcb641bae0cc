// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The Reusable-Stream-Decode store (spec §1, §4.5, §4.6): gives a possibly
//! non-seekable, possibly compressed source unbounded random-access and
//! rewindability over a block-cached, disk-spillable overlay.

mod block_list;
mod store;

pub use block_list::{halving_steps_to, AccessHint, BlockRead, ReclaimAction, RsdBlock, RsdBlockList};
pub use store::RsdStore;
