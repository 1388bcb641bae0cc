// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! ICC profile parsing and identity (spec §3 IccProfileInfo, §4.8, §6 "ICC
//! profile on disk"). Reads ICC.1:2010 header fields well enough to
//! classify, dedup, and pick a transform path; does not implement the full
//! tag table or rendering pipeline beyond what §4.8's `transform_for`
//! contract names.

use md5::{Digest, Md5};

use crate::error::Error;
use crate::icc::transform::{CachedChain, Direction, TransformChain};

pub const HEADER_LEN: usize = 128;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceClass {
    Input,
    Display,
    Output,
    ColorSpace,
    DeviceLink,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pcs {
    Xyz,
    Lab,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ColorSpaceSignature {
    Gray,
    Rgb,
    Cmyk,
    Lab,
    Xyz,
    DeviceN(u8),
}

impl ColorSpaceSignature {
    pub fn channel_count(self) -> u8 {
        match self {
            ColorSpaceSignature::Gray => 1,
            ColorSpaceSignature::Rgb | ColorSpaceSignature::Lab | ColorSpaceSignature::Xyz => 3,
            ColorSpaceSignature::Cmyk => 4,
            ColorSpaceSignature::DeviceN(n) => n,
        }
    }

    fn from_signature(sig: &[u8; 4]) -> Result<Self, Error> {
        match sig {
            b"GRAY" => Ok(ColorSpaceSignature::Gray),
            b"RGB " => Ok(ColorSpaceSignature::Rgb),
            b"CMYK" => Ok(ColorSpaceSignature::Cmyk),
            b"Lab " => Ok(ColorSpaceSignature::Lab),
            b"XYZ " => Ok(ColorSpaceSignature::Xyz),
            other if other[0] == b'C' && other[1] == b'L' && other[2] == b'R' => {
                let n = other[3].saturating_sub(b'0').max(1);
                Ok(ColorSpaceSignature::DeviceN(n))
            }
            _ => Err(Error::Invalid),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RenderingIntent {
    Perceptual,
    RelativeColorimetric,
    Saturation,
}

impl RenderingIntent {
    pub const ALL: [RenderingIntent; 3] = [
        RenderingIntent::Perceptual,
        RenderingIntent::RelativeColorimetric,
        RenderingIntent::Saturation,
    ];

    pub fn index(self) -> usize {
        match self {
            RenderingIntent::Perceptual => 0,
            RenderingIntent::RelativeColorimetric => 1,
            RenderingIntent::Saturation => 2,
        }
    }

    fn from_header_value(v: u32) -> Self {
        match v {
            1 => RenderingIntent::RelativeColorimetric,
            2 => RenderingIntent::Saturation,
            _ => RenderingIntent::Perceptual,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ParsedHeader {
    pub device_class: DeviceClass,
    pub color_space: ColorSpaceSignature,
    pub pcs: Option<Pcs>,
    pub declared_intent: RenderingIntent,
    pub has_input_table: bool,
    pub has_output_table: bool,
    pub has_devicelink_table: bool,
}

fn be_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

fn sig4(bytes: &[u8], offset: usize) -> [u8; 4] {
    [bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]]
}

/// Validates magic, version, device class, and PCS, and extracts the
/// header fields `transform_for`/registry dedup need (spec §4.8 step 3).
pub fn parse_header(bytes: &[u8]) -> Result<ParsedHeader, Error> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::Invalid);
    }
    if &sig4(bytes, 36) != b"acsp" {
        return Err(Error::Invalid);
    }
    let version_major = bytes[8];
    if version_major < 2 {
        return Err(Error::Invalid);
    }

    let class_sig = sig4(bytes, 12);
    let device_class = match &class_sig {
        b"scnr" => DeviceClass::Input,
        b"mntr" => DeviceClass::Display,
        b"prtr" => DeviceClass::Output,
        b"spac" => DeviceClass::ColorSpace,
        b"link" => DeviceClass::DeviceLink,
        _ => return Err(Error::Invalid),
    };

    let color_space = ColorSpaceSignature::from_signature(&sig4(bytes, 16))?;

    let pcs_sig = sig4(bytes, 20);
    let pcs = match &pcs_sig {
        b"XYZ " => Some(Pcs::Xyz),
        b"Lab " => Some(Pcs::Lab),
        _ if device_class == DeviceClass::DeviceLink => None,
        _ => return Err(Error::Invalid),
    };
    if device_class != DeviceClass::DeviceLink && pcs.is_none() {
        return Err(Error::Invalid);
    }

    let declared_intent = RenderingIntent::from_header_value(be_u32(bytes, 64));

    Ok(ParsedHeader {
        device_class,
        color_space,
        pcs,
        declared_intent,
        has_input_table: matches!(device_class, DeviceClass::Input | DeviceClass::ColorSpace),
        has_output_table: matches!(device_class, DeviceClass::Output | DeviceClass::ColorSpace),
        has_devicelink_table: device_class == DeviceClass::DeviceLink,
    })
}

/// Zeroes the flags, rendering-intent, and profileID fields common to both
/// the header and full-profile MD5 (spec §4.8 step 3/4, `gscicc.c`
/// `calculate_profile_MD5`: 12 bytes total across the three fields — this
/// crate's ground truth follows the original's narrower profileID zeroing
/// window rather than the full 16-byte ICC.1:2010 profile ID field).
fn zero_identity_fields(buf: &mut [u8]) {
    for &(offset, len) in &[(44usize, 4usize), (64, 4), (84, 4)] {
        if offset + len <= buf.len() {
            buf[offset..offset + len].fill(0);
        }
    }
}

pub fn header_md5(bytes: &[u8]) -> Result<[u8; 16], Error> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::Invalid);
    }
    let mut header = bytes[..HEADER_LEN].to_vec();
    zero_identity_fields(&mut header);
    let mut hasher = Md5::new();
    hasher.update(&header);
    Ok(hasher.finalize().into())
}

/// MD5 of the entire profile with the same three fields zeroed as
/// `header_md5` (spec §4.8 step 4, `calculate_profile_MD5` with
/// `header_only=false`): without this, two profiles differing only in
/// their rendering-intent byte would never compare equal here even though
/// they are content-identical for every purpose this cache cares about.
pub fn full_md5(bytes: &[u8]) -> [u8; 16] {
    let mut buf = bytes.to_vec();
    zero_identity_fields(&mut buf);
    let mut hasher = Md5::new();
    hasher.update(&buf);
    hasher.finalize().into()
}

/// A unique content id bound to one profile stream opening (spec §3
/// IccStreamBinding), used to reattach a detached binding after save-restore.
pub type ContentId = u64;

/// Per-profile stream binding (spec §3 IccStreamBinding).
pub struct IccStreamBinding {
    pub content_id: ContentId,
    pub original_save_level: u64,
    pub wrapper_save_level: u64,
    /// Closed (detached) when the original stream is no longer reachable
    /// but the content id may still resolve if the original is later
    /// reopened at the same identity.
    pub detached: bool,
}

/// The cache's per-content-hash record (spec §3 IccProfileInfo).
pub struct IccProfileInfo {
    pub bindings: Vec<IccStreamBinding>,
    pub device_color_space: ColorSpaceSignature,
    pub pcs: Option<Pcs>,
    pub declared_intent: RenderingIntent,
    pub white_point: [f64; 3],
    pub black_point: [f64; 3],
    pub relative_white_point: [f64; 3],
    pub relative_black_point: [f64; 3],
    pub full_md5: Option<[u8; 16]>,
    pub header_md5: [u8; 16],
    pub valid: bool,
    pub override_alternate_space: bool,
    pub has_input_table: bool,
    pub has_output_table: bool,
    pub has_devicelink_table: bool,
    pub scrgb: bool,
    pub device_n_colorant_table: Option<Vec<String>>,
    pub pcs_colorant_table: Option<Vec<String>>,
    pub device_n_synthetic_save_level: Option<u64>,
    /// Per-rendering-intent forward transform links (spec §3
    /// IccProfileInfo), indexed by [`RenderingIntent::index`].
    pub forward_chains: [Option<CachedChain>; 3],
    /// Per-rendering-intent inverse transform links (spec §3
    /// IccProfileInfo), indexed by [`RenderingIntent::index`].
    pub inverse_chains: [Option<CachedChain>; 3],
    pub last_use: std::time::Instant,
}

impl IccProfileInfo {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let header = parse_header(bytes)?;
        let header_md5 = header_md5(bytes)?;
        // D50 illuminant default; real implementations read the wtpt/bkpt
        // tags. Out of scope here — tag-table parsing belongs to the
        // downstream color chain, not this cache (spec §1 Non-goals).
        let white_point = [0.9642, 1.0, 0.8249];
        let black_point = [0.0, 0.0, 0.0];
        Ok(Self {
            bindings: Vec::new(),
            device_color_space: header.color_space,
            pcs: header.pcs,
            declared_intent: header.declared_intent,
            white_point,
            black_point,
            relative_white_point: white_point,
            relative_black_point: black_point,
            full_md5: None,
            header_md5,
            valid: true,
            override_alternate_space: false,
            has_input_table: header.has_input_table,
            has_output_table: header.has_output_table,
            has_devicelink_table: header.has_devicelink_table,
            scrgb: false,
            device_n_colorant_table: None,
            pcs_colorant_table: None,
            device_n_synthetic_save_level: None,
            forward_chains: [None, None, None],
            inverse_chains: [None, None, None],
            last_use: std::time::Instant::now(),
        })
    }

    pub fn has_open_binding(&self) -> bool {
        self.bindings.iter().any(|b| !b.detached)
    }

    pub fn is_detached_with_valid_md5(&self) -> bool {
        !self.has_open_binding() && self.full_md5.is_some()
    }

    fn chains_mut(&mut self, direction: Direction) -> &mut [Option<CachedChain>; 3] {
        match direction {
            Direction::Forward => &mut self.forward_chains,
            Direction::Inverse => &mut self.inverse_chains,
        }
    }

    /// Returns a clone of the cached chain for `direction`/`intent`,
    /// refreshing its last-use time, or `None` on a cache miss (spec §4.8
    /// `transform_for`: "returns the cached transform chain if present").
    pub fn cached_chain(&mut self, direction: Direction, intent: RenderingIntent) -> Option<TransformChain> {
        let cached = self.chains_mut(direction)[intent.index()].as_mut()?;
        cached.last_use = std::time::Instant::now();
        Some(cached.chain.clone())
    }

    pub fn cache_chain(&mut self, direction: Direction, intent: RenderingIntent, chain: TransformChain) {
        self.chains_mut(direction)[intent.index()] = Some(CachedChain {
            chain,
            last_use: std::time::Instant::now(),
        });
    }

    /// Frees the least-recently-used cached chain among all six
    /// per-direction/per-intent slots (spec §4.7 `icc-profile` handler).
    /// Returns `true` if a chain was actually freed.
    pub fn evict_lru_chain(&mut self) -> bool {
        let mut oldest: Option<(Direction, usize, std::time::Instant)> = None;
        for (i, slot) in self.forward_chains.iter().enumerate() {
            if let Some(c) = slot {
                if oldest.map_or(true, |(_, _, t)| c.last_use < t) {
                    oldest = Some((Direction::Forward, i, c.last_use));
                }
            }
        }
        for (i, slot) in self.inverse_chains.iter().enumerate() {
            if let Some(c) = slot {
                if oldest.map_or(true, |(_, _, t)| c.last_use < t) {
                    oldest = Some((Direction::Inverse, i, c.last_use));
                }
            }
        }
        match oldest {
            Some((direction, idx, _)) => {
                self.chains_mut(direction)[idx] = None;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn synthetic_header(device_class: &[u8; 4], color_space: &[u8; 4], pcs: &[u8; 4], intent: u32) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN];
        buf[8] = 2;
        buf[9] = 0x10;
        buf[12..16].copy_from_slice(device_class);
        buf[16..20].copy_from_slice(color_space);
        buf[20..24].copy_from_slice(pcs);
        buf[36..40].copy_from_slice(b"acsp");
        buf[64..68].copy_from_slice(&intent.to_be_bytes());
        buf
    }

    #[test]
    fn parses_a_well_formed_header() {
        let bytes = synthetic_header(b"mntr", b"RGB ", b"XYZ ", 0);
        let header = parse_header(&bytes).unwrap();
        assert_eq!(header.device_class, DeviceClass::Display);
        assert_eq!(header.color_space, ColorSpaceSignature::Rgb);
        assert_eq!(header.pcs, Some(Pcs::Xyz));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = synthetic_header(b"mntr", b"RGB ", b"XYZ ", 0);
        bytes[36] = b'x';
        assert!(parse_header(&bytes).is_err());
    }

    #[test]
    fn header_md5_ignores_rendering_intent_field() {
        let a = synthetic_header(b"mntr", b"RGB ", b"XYZ ", 0);
        let mut b = a.clone();
        b[64..68].copy_from_slice(&2u32.to_be_bytes());
        assert_eq!(header_md5(&a).unwrap(), header_md5(&b).unwrap());
    }

    #[test]
    fn header_md5_differs_on_color_space() {
        let a = synthetic_header(b"mntr", b"RGB ", b"XYZ ", 0);
        let b = synthetic_header(b"mntr", b"GRAY", b"XYZ ", 0);
        assert_ne!(header_md5(&a).unwrap(), header_md5(&b).unwrap());
    }

    #[test]
    fn full_md5_ignores_rendering_intent_field() {
        let a = synthetic_header(b"mntr", b"RGB ", b"XYZ ", 0);
        let mut b = a.clone();
        b[64..68].copy_from_slice(&2u32.to_be_bytes());
        assert_eq!(full_md5(&a), full_md5(&b));
    }

    #[test]
    fn full_md5_differs_on_tag_data_beyond_the_header() {
        let mut a = synthetic_header(b"mntr", b"RGB ", b"XYZ ", 0);
        a.extend_from_slice(&[0u8; 32]);
        let mut b = a.clone();
        let last = b.len() - 1;
        b[last] = 0xff;

        assert_eq!(header_md5(&a).unwrap(), header_md5(&b).unwrap());
        assert_ne!(full_md5(&a), full_md5(&b));
    }
}
