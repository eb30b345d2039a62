//! Gap metadata produced by the gap analyzer.
//!
//! A gap is a maximal run of consecutive frame indices without ground truth.
//! `None` bounds mark the leading/trailing holes that only have one bracket.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GapKind {
    /// Hole before the first source frame
    Start,
    /// Hole between two source frames
    Middle,
    /// Hole after the last source frame
    End,
    /// No source frames at all
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Gap {
    pub start_frame: Option<i32>,
    pub end_frame: Option<i32>,
    pub missing_frames: Vec<i32>,
    pub gap_size: usize,
}

impl Gap {
    /// Gap over the half-open range `[first, last_exclusive)` of missing indices
    pub(crate) fn spanning(
        start_frame: Option<i32>,
        end_frame: Option<i32>,
        first: i32,
        last_exclusive: i32,
    ) -> Self {
        let missing_frames: Vec<i32> = (first..last_exclusive).collect();
        Self {
            start_frame,
            end_frame,
            gap_size: missing_frames.len(),
            missing_frames,
        }
    }

    pub fn kind(&self) -> GapKind {
        match (self.start_frame, self.end_frame) {
            (None, None) => GapKind::Full,
            (None, Some(_)) => GapKind::Start,
            (Some(_), None) => GapKind::End,
            (Some(_), Some(_)) => GapKind::Middle,
        }
    }

    pub fn first_missing(&self) -> Option<i32> {
        self.missing_frames.first().copied()
    }

    pub fn last_missing(&self) -> Option<i32> {
        self.missing_frames.last().copied()
    }

    /// Missing runs are contiguous, so a bounds check suffices
    pub fn contains(&self, frame_idx: i32) -> bool {
        match (self.first_missing(), self.last_missing()) {
            (Some(first), Some(last)) => frame_idx >= first && frame_idx <= last,
            _ => false,
        }
    }

    /// Distance between the brackets; only meaningful for middle gaps
    pub fn span(&self) -> Option<i32> {
        Some(self.end_frame? - self.start_frame?)
    }
}

/// Gap layout of one entity. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GapMap {
    pub total_frames: i32,
    pub source_frame_count: usize,
    pub missing_frame_count: usize,
    pub gaps: Vec<Gap>,
    pub has_start_gap: bool,
    pub has_end_gap: bool,
    /// Sorted, deduplicated, in-range source indices
    #[serde(skip)]
    pub source_indices: Vec<i32>,
}

impl GapMap {
    pub fn empty() -> Self {
        Self {
            total_frames: 0,
            source_frame_count: 0,
            missing_frame_count: 0,
            gaps: Vec::new(),
            has_start_gap: false,
            has_end_gap: false,
            source_indices: Vec::new(),
        }
    }

    /// Share of frames that must be synthesized, 0..=100
    pub fn interpolation_percentage(&self) -> f64 {
        if self.total_frames <= 0 {
            0.0
        } else {
            self.missing_frame_count as f64 / self.total_frames as f64 * 100.0
        }
    }

    pub fn is_source(&self, frame_idx: i32) -> bool {
        self.source_indices.binary_search(&frame_idx).is_ok()
    }

    pub fn in_range(&self, frame_idx: i32) -> bool {
        frame_idx >= 0 && frame_idx < self.total_frames
    }

    /// No ground truth at all for this entity
    pub fn is_fully_missing(&self) -> bool {
        self.total_frames > 0 && self.source_frame_count == 0
    }
}

/// Source frames to blend between. `before == after` means freeze.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bracket {
    pub before: i32,
    pub after: i32,
}

impl Bracket {
    pub fn is_frozen(&self) -> bool {
        self.before == self.after
    }
}
