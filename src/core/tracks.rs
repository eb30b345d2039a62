//! Track registry: one cohesive record (config + live state) per track.
//!
//! A track views the scheduler's clock through an offset and an optional
//! looping window. Independent tracks run their own clock instead.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::entities::TrackId;

/// Static description of a track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackConfig {
    pub label: String,
    /// Shift applied to the base clock
    pub offset_ms: f64,
    pub window_start_ms: f64,
    /// Length of the looping window; `<= 0` means no window
    pub window_duration_ms: f64,
    /// Frames in this track's media; 0 inherits the scheduler's count
    pub total_frames: i32,
    /// Run on an own clock instead of the shared one
    pub independent: bool,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            label: String::new(),
            offset_ms: 0.0,
            window_start_ms: 0.0,
            window_duration_ms: 0.0,
            total_frames: 0,
            independent: false,
        }
    }
}

impl TrackConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_offset(mut self, offset_ms: f64) -> Self {
        self.offset_ms = offset_ms;
        self
    }

    pub fn with_window(mut self, start_ms: f64, duration_ms: f64) -> Self {
        self.window_start_ms = start_ms;
        self.window_duration_ms = duration_ms;
        self
    }

    pub fn with_total_frames(mut self, total_frames: i32) -> Self {
        self.total_frames = total_frames;
        self
    }

    pub fn independent(mut self, independent: bool) -> Self {
        self.independent = independent;
        self
    }

    pub fn is_windowed(&self) -> bool {
        self.window_duration_ms > 0.0
    }
}

/// Live clock of an independent track. Ignored while the track follows the
/// shared clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackState {
    pub virtual_time_ms: f64,
    pub speed: f64,
    pub is_playing: bool,
    pub is_looping: bool,
}

impl Default for TrackState {
    fn default() -> Self {
        Self {
            virtual_time_ms: 0.0,
            speed: 1.0,
            is_playing: false,
            is_looping: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: TrackId,
    pub config: TrackConfig,
    pub state: TrackState,
}

impl Track {
    /// Clock the track reads from: shared time, or its own when independent
    pub fn base_time_ms(&self, global_ms: f64) -> f64 {
        if self.config.independent {
            self.state.virtual_time_ms
        } else {
            global_ms
        }
    }

    /// `((base - offset - windowStart) mod windowDuration) + windowStart`,
    /// true modulo. Unwindowed tracks just subtract the offset.
    pub fn local_time_ms(&self, global_ms: f64) -> f64 {
        let shifted = self.base_time_ms(global_ms) - self.config.offset_ms;
        if self.config.is_windowed() {
            let ws = self.config.window_start_ms;
            (shifted - ws).rem_euclid(self.config.window_duration_ms) + ws
        } else {
            shifted
        }
    }

    /// Completed passes through the window (0 when unwindowed)
    pub fn loop_count(&self, global_ms: f64) -> i64 {
        if !self.config.is_windowed() {
            return 0;
        }
        let shifted = self.base_time_ms(global_ms) - self.config.offset_ms - self.config.window_start_ms;
        (shifted / self.config.window_duration_ms).floor() as i64
    }

    pub fn frame_index(&self, global_ms: f64, frame_interval_ms: f64) -> i32 {
        frame_index_for(self.local_time_ms(global_ms), frame_interval_ms, self.config.total_frames)
    }

    /// Length of the track's own timeline
    pub fn own_duration_ms(&self, frame_interval_ms: f64) -> f64 {
        self.config.total_frames.max(0) as f64 * frame_interval_ms
    }
}

/// Slack for times that land a rounding error short of a frame boundary
const FRAME_EPSILON: f64 = 1e-9;

/// `floor(t / interval) mod total`, 0 for an empty timeline
pub fn frame_index_for(time_ms: f64, frame_interval_ms: f64, total_frames: i32) -> i32 {
    if total_frames <= 0 || frame_interval_ms.is_nan() || frame_interval_ms <= 0.0 || !time_ms.is_finite() {
        return 0;
    }
    let raw = (time_ms / frame_interval_ms + FRAME_EPSILON).floor() as i64;
    raw.rem_euclid(total_frames as i64) as i32
}

/// Ordered track storage, keyed by typed ids
#[derive(Debug, Default, Clone)]
pub struct TrackRegistry {
    tracks: IndexMap<TrackId, Track>,
    next_id: u32,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, config: TrackConfig) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        self.tracks.insert(
            id,
            Track {
                id,
                config,
                state: TrackState::default(),
            },
        );
        id
    }

    pub fn remove(&mut self, id: TrackId) -> Option<Track> {
        self.tracks.shift_remove(&id)
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.values_mut()
    }

    pub fn ids(&self) -> Vec<TrackId> {
        self.tracks.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
