// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The ICC profile registry (spec §1, §4.8): dedups profile streams by
//! content hash and constructs transform chains for them. Gated behind the
//! `icc` feature since it depends on the `md-5` crate.

pub mod profile;
pub mod registry;
pub mod transform;

pub use profile::{
    ColorSpaceSignature, ContentId, DeviceClass, IccProfileInfo, IccStreamBinding, Pcs, ParsedHeader, RenderingIntent,
};
pub use registry::IccRegistry;
pub use transform::{build_transform, Direction, TransformChain, WhitepointPreCurve};
