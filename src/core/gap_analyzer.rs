//! Gap analysis over sparse source frame indices
//!
//! Pure functions: given the indices that carry ground truth, describe every
//! maximal run of missing indices and where to interpolate from.

use log::{debug, warn};

use crate::entities::{Bracket, Gap, GapKind, GapMap};

/// Build the gap map for `total_frames` frames of which `source_indices` have data.
///
/// Indices are sorted and deduplicated; out-of-range ones are dropped with a
/// warning. An empty source set yields a single gap over the whole range.
pub fn analyze(source_indices: &[i32], total_frames: i32) -> GapMap {
    let total_frames = total_frames.max(0);
    if total_frames == 0 {
        if !source_indices.is_empty() {
            warn!("Gap analysis over 0 frames ignores {} source indices", source_indices.len());
        }
        return GapMap::empty();
    }

    let mut sources: Vec<i32> = source_indices.to_vec();
    sources.sort_unstable();
    sources.dedup();
    let before = sources.len();
    sources.retain(|&i| (0..total_frames).contains(&i));
    if sources.len() != before {
        warn!(
            "Dropped {} source indices outside [0, {})",
            before - sources.len(),
            total_frames
        );
    }

    let mut gaps = Vec::new();

    let (Some(&first), Some(&last)) = (sources.first(), sources.last()) else {
        warn!("No source frames: all {} frames need interpolation", total_frames);
        return GapMap {
            total_frames,
            source_frame_count: 0,
            missing_frame_count: total_frames as usize,
            gaps: vec![Gap::spanning(None, None, 0, total_frames)],
            has_start_gap: true,
            has_end_gap: true,
            source_indices: sources,
        };
    };

    let has_start_gap = first > 0;
    if has_start_gap {
        gaps.push(Gap::spanning(None, Some(first), 0, first));
    }

    for pair in sources.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a > 1 {
            gaps.push(Gap::spanning(Some(a), Some(b), a + 1, b));
        }
    }

    let has_end_gap = last < total_frames - 1;
    if has_end_gap {
        gaps.push(Gap::spanning(Some(last), None, last + 1, total_frames));
    }

    let missing_frame_count: usize = gaps.iter().map(|g| g.gap_size).sum();
    debug!(
        "Gap analysis: {} frames, {} source, {} missing in {} gaps",
        total_frames,
        sources.len(),
        missing_frame_count,
        gaps.len()
    );

    GapMap {
        total_frames,
        source_frame_count: sources.len(),
        missing_frame_count,
        gaps,
        has_start_gap,
        has_end_gap,
        source_indices: sources,
    }
}

/// Normalized position of `frame_idx` inside `gap`, always in `[0, 1]`.
///
/// Start gaps (and fully missing ranges) freeze on the after-bracket side at 0,
/// end gaps freeze on the before-bracket side at 1.
pub fn interpolation_factor(frame_idx: i32, gap: &Gap) -> f32 {
    match (gap.kind(), gap.start_frame, gap.end_frame) {
        (GapKind::Middle, Some(start), Some(end)) => {
            let span = (end - start) as f32;
            if span <= 0.0 {
                return 0.0;
            }
            ((frame_idx - start) as f32 / span).clamp(0.0, 1.0)
        }
        (GapKind::End, _, _) => 1.0,
        _ => 0.0,
    }
}

pub fn find_gap_for_frame(frame_idx: i32, gaps: &[Gap]) -> Option<&Gap> {
    gaps.iter().find(|g| g.contains(frame_idx))
}

/// Source frames to blend for a missing `frame_idx`.
///
/// None when the frame is itself a source frame, not inside any gap, or no
/// source exists at all. Start/end gaps return a frozen bracket
/// (`before == after`) on the nearest source.
pub fn source_frames_for_interpolation(
    frame_idx: i32,
    gaps: &[Gap],
    sorted_sources: &[i32],
) -> Option<Bracket> {
    if sorted_sources.binary_search(&frame_idx).is_ok() {
        return None;
    }
    let gap = find_gap_for_frame(frame_idx, gaps)?;

    match (gap.start_frame, gap.end_frame) {
        (Some(before), Some(after)) => Some(Bracket { before, after }),
        (None, Some(after)) => Some(Bracket { before: after, after }),
        (Some(before), None) => Some(Bracket { before, after: before }),
        (None, None) => {
            // Gap list may be stale relative to the sources; fall back to neighbours.
            let pos = sorted_sources.partition_point(|&s| s < frame_idx);
            let prev = pos.checked_sub(1).and_then(|p| sorted_sources.get(p)).copied();
            let next = sorted_sources.get(pos).copied();
            match (prev, next) {
                (Some(before), Some(after)) => Some(Bracket { before, after }),
                (Some(only), None) | (None, Some(only)) => Some(Bracket { before: only, after: only }),
                (None, None) => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-6;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < EPS
    }

    #[test]
    fn test_concrete_scenario_four_sources() {
        let map = analyze(&[0, 3, 7, 9], 10);

        assert_eq!(map.total_frames, 10);
        assert_eq!(map.source_frame_count, 4);
        assert_eq!(map.missing_frame_count, 6);
        assert!(!map.has_start_gap);
        assert!(!map.has_end_gap);
        assert_eq!(map.gaps.len(), 3);

        let g0 = &map.gaps[0];
        assert_eq!((g0.start_frame, g0.end_frame), (Some(0), Some(3)));
        assert_eq!(g0.missing_frames, vec![1, 2]);
        assert!(approx(interpolation_factor(1, g0), 1.0 / 3.0));
        assert!(approx(interpolation_factor(2, g0), 2.0 / 3.0));

        let g1 = &map.gaps[1];
        assert_eq!((g1.start_frame, g1.end_frame), (Some(3), Some(7)));
        assert_eq!(g1.missing_frames, vec![4, 5, 6]);
        assert!(approx(interpolation_factor(4, g1), 0.25));
        assert!(approx(interpolation_factor(5, g1), 0.5));
        assert!(approx(interpolation_factor(6, g1), 0.75));

        let g2 = &map.gaps[2];
        assert_eq!((g2.start_frame, g2.end_frame), (Some(7), Some(9)));
        assert_eq!(g2.missing_frames, vec![8]);
        assert!(approx(interpolation_factor(8, g2), 0.5));
    }

    #[test]
    fn test_empty_sources_single_full_gap() {
        let map = analyze(&[], 5);
        assert_eq!(map.gaps.len(), 1);
        assert_eq!(map.gaps[0].missing_frames, vec![0, 1, 2, 3, 4]);
        assert_eq!(map.gaps[0].kind(), GapKind::Full);
        assert_eq!(map.interpolation_percentage(), 100.0);
        assert!(map.is_fully_missing());
        for idx in 0..5 {
            assert!(source_frames_for_interpolation(idx, &map.gaps, &map.source_indices).is_none());
        }
    }

    #[test]
    fn test_counts_always_sum_to_total() {
        // Deterministic pseudo-random subsets
        let mut seed: u32 = 0x2545_f491;
        for total in 1..40 {
            for _ in 0..8 {
                let mut sources = Vec::new();
                for i in 0..total {
                    seed ^= seed << 13;
                    seed ^= seed >> 17;
                    seed ^= seed << 5;
                    if seed % 3 == 0 {
                        sources.push(i);
                    }
                }
                let map = analyze(&sources, total);
                assert_eq!(
                    map.source_frame_count + map.missing_frame_count,
                    total as usize,
                    "total={} sources={:?}",
                    total,
                    sources
                );
                // Every index covered exactly once
                for idx in 0..total {
                    let in_gaps = map.gaps.iter().filter(|g| g.missing_frames.contains(&idx)).count();
                    let in_src = usize::from(map.is_source(idx));
                    assert_eq!(in_gaps + in_src, 1, "idx={} sources={:?}", idx, sources);
                }
            }
        }
    }

    #[test]
    fn test_middle_gap_boundary_factors() {
        for (start, end) in [(0, 2), (3, 7), (10, 25)] {
            let map = analyze(&[start, end], end + 1);
            let gap = find_gap_for_frame(start + 1, &map.gaps).unwrap();
            let span = (end - start) as f32;
            assert!(approx(interpolation_factor(start + 1, gap), 1.0 / span));
            assert!(approx(interpolation_factor(end - 1, gap), (span - 1.0) / span));
        }
    }

    #[test]
    fn test_start_and_end_gaps_freeze() {
        let map = analyze(&[4, 6], 10);
        assert!(map.has_start_gap);
        assert!(map.has_end_gap);

        let start = &map.gaps[0];
        assert_eq!(start.kind(), GapKind::Start);
        assert_eq!(start.missing_frames, vec![0, 1, 2, 3]);
        for idx in 0..4 {
            assert_eq!(interpolation_factor(idx, start), 0.0);
            assert_eq!(
                source_frames_for_interpolation(idx, &map.gaps, &map.source_indices),
                Some(Bracket { before: 4, after: 4 })
            );
        }

        let end = map.gaps.last().unwrap();
        assert_eq!(end.kind(), GapKind::End);
        assert_eq!(end.missing_frames, vec![7, 8, 9]);
        for idx in 7..10 {
            assert_eq!(interpolation_factor(idx, end), 1.0);
            let bracket = source_frames_for_interpolation(idx, &map.gaps, &map.source_indices).unwrap();
            assert!(bracket.is_frozen());
            assert_eq!(bracket.before, 6);
        }
    }

    #[test]
    fn test_brackets_for_sources_and_middle() {
        let map = analyze(&[0, 3, 7, 9], 10);
        assert!(source_frames_for_interpolation(3, &map.gaps, &map.source_indices).is_none());
        assert_eq!(
            source_frames_for_interpolation(5, &map.gaps, &map.source_indices),
            Some(Bracket { before: 3, after: 7 })
        );
        assert!(find_gap_for_frame(9, &map.gaps).is_none());
        assert!(find_gap_for_frame(42, &map.gaps).is_none());
    }

    #[test]
    fn test_unsorted_duplicate_and_out_of_range_input() {
        let map = analyze(&[9, 3, 3, -2, 0, 7, 15], 10);
        assert_eq!(map.source_indices, vec![0, 3, 7, 9]);
        assert_eq!(map.source_frame_count, 4);
        assert_eq!(map.missing_frame_count, 6);
    }

    #[test]
    fn test_zero_total_frames() {
        let map = analyze(&[0, 1], 0);
        assert!(map.gaps.is_empty());
        assert_eq!(map.interpolation_percentage(), 0.0);
    }

    #[test]
    fn test_factor_never_out_of_range() {
        let map = analyze(&[2, 8], 12);
        for gap in &map.gaps {
            for idx in -5..20 {
                let t = interpolation_factor(idx, gap);
                assert!((0.0..=1.0).contains(&t));
            }
        }
    }
}
