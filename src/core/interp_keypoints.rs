//! Keypoint interpolation between two bracketing source frames.

use log::warn;

use crate::entities::{InterpolatedKeypoint, Keypoint};

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Blend one keypoint. `t` is clamped to `[0, 1]`.
///
/// Confidence takes the weaker side; z is blended only when both sides carry it.
pub fn interpolate(before: &Keypoint, after: &Keypoint, t: f32) -> Keypoint {
    let t = t.clamp(0.0, 1.0);
    let z = match (before.z, after.z) {
        (Some(a), Some(b)) => Some(lerp(a, b, t)),
        (a, b) => a.or(b),
    };
    Keypoint {
        name: before.name.clone().or_else(|| after.name.clone()),
        index: before.index.or(after.index),
        x: lerp(before.x, after.x, t),
        y: lerp(before.y, after.y, t),
        z,
        confidence: before.confidence.min(after.confidence),
    }
}

/// Blend two keypoint lists element-wise.
///
/// Lists of unequal length are padded from the longer one (the extra entries
/// blend with themselves), so the result always has the longer length.
pub fn interpolate_frame(
    before: &[Keypoint],
    after: &[Keypoint],
    t: f32,
    before_idx: i32,
    after_idx: i32,
) -> Vec<InterpolatedKeypoint> {
    if before.len() != after.len() {
        warn!(
            "Keypoint count mismatch between frames {} ({}) and {} ({}), padding",
            before_idx,
            before.len(),
            after_idx,
            after.len()
        );
    }

    let t = t.clamp(0.0, 1.0);
    let len = before.len().max(after.len());
    (0..len)
        .filter_map(|i| {
            let (b, a) = match (before.get(i), after.get(i)) {
                (Some(b), Some(a)) => (b, a),
                (Some(only), None) | (None, Some(only)) => (only, only),
                (None, None) => return None,
            };
            Some(InterpolatedKeypoint {
                keypoint: interpolate(b, a, t),
                interpolated: true,
                source_frames: [before_idx, after_idx],
                interpolation_factor: t,
            })
        })
        .collect()
}

/// Frozen copy of a source frame's keypoints (leading/trailing gaps).
pub fn duplicate_keypoints(keypoints: &[Keypoint], source_idx: i32) -> Vec<InterpolatedKeypoint> {
    keypoints
        .iter()
        .map(|kp| InterpolatedKeypoint {
            keypoint: kp.clone(),
            interpolated: true,
            source_frames: [source_idx, source_idx],
            interpolation_factor: 0.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::KeypointName;

    fn kp(x: f32, y: f32, c: f32) -> Keypoint {
        Keypoint::new(x, y, c)
    }

    #[test]
    fn test_endpoints_reproduce_brackets() {
        let b = kp(1.5, -2.0, 0.9).with_z(3.0);
        let a = kp(7.25, 4.0, 0.6).with_z(-1.0);

        let at0 = interpolate(&b, &a, 0.0);
        assert_eq!((at0.x, at0.y, at0.z), (b.x, b.y, b.z));

        let at1 = interpolate(&b, &a, 1.0);
        assert!((at1.x - a.x).abs() < 1e-6);
        assert!((at1.y - a.y).abs() < 1e-6);
        assert!((at1.z.unwrap() - a.z.unwrap()).abs() < 1e-6);
    }

    #[test]
    fn test_midpoint_and_confidence_min() {
        let b = kp(0.0, 0.0, 0.9);
        let a = kp(10.0, 20.0, 0.4);
        let mid = interpolate(&b, &a, 0.5);
        assert_eq!(mid.x, 5.0);
        assert_eq!(mid.y, 10.0);
        assert_eq!(mid.confidence, 0.4);
    }

    #[test]
    fn test_z_from_either_side_and_name_fallback() {
        let b = kp(0.0, 0.0, 1.0);
        let a = Keypoint::named(KeypointName::Nose, 1.0, 1.0, 1.0).with_z(2.0);
        let out = interpolate(&b, &a, 0.25);
        assert_eq!(out.z, Some(2.0));
        assert_eq!(out.name.as_deref(), Some("nose"));
        assert_eq!(out.index, Some(0));
    }

    #[test]
    fn test_t_is_clamped() {
        let b = kp(0.0, 0.0, 1.0);
        let a = kp(10.0, 0.0, 1.0);
        assert_eq!(interpolate(&b, &a, 1.7).x, 10.0);
        assert_eq!(interpolate(&b, &a, -3.0).x, 0.0);
    }

    #[test]
    fn test_frame_tags_and_padding() {
        let before = vec![kp(0.0, 0.0, 1.0), kp(2.0, 2.0, 1.0), kp(9.0, 9.0, 0.5)];
        let after = vec![kp(4.0, 4.0, 1.0)];
        let out = interpolate_frame(&before, &after, 0.5, 3, 7);

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].keypoint.x, 2.0);
        // Padded entries blend with themselves
        assert_eq!(out[1].keypoint.x, 2.0);
        assert_eq!(out[2].keypoint.x, 9.0);
        for k in &out {
            assert!(k.interpolated);
            assert_eq!(k.source_frames, [3, 7]);
            assert_eq!(k.interpolation_factor, 0.5);
        }

        // Mirror case: after is longer
        let out = interpolate_frame(&after, &before, 0.5, 3, 7);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_empty_lists() {
        assert!(interpolate_frame(&[], &[], 0.3, 0, 1).is_empty());
        assert!(duplicate_keypoints(&[], 4).is_empty());
    }

    #[test]
    fn test_duplicate_is_frozen() {
        let src = vec![kp(1.0, 2.0, 0.7)];
        let out = duplicate_keypoints(&src, 4);
        assert_eq!(out[0].keypoint, src[0]);
        assert_eq!(out[0].source_frames, [4, 4]);
        assert_eq!(out[0].interpolation_factor, 0.0);
        assert!(out[0].interpolated);
    }
}
