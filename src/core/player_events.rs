//! Playback events emitted by the scheduler.

use serde::Serialize;

use crate::entities::TrackId;

/// Transport and clock notifications. Each variant carries only what its
/// consumers need.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaybackEvent {
    Play,
    Pause,
    Stop,
    #[serde(rename_all = "camelCase")]
    Seek { time_ms: f64, frame_index: i32 },
    SpeedChanged { speed: f64 },
    LoopChanged { enabled: bool },
    /// Fired on every tick, playing or not
    #[serde(rename_all = "camelCase")]
    FrameUpdate { time_ms: f64, frame_index: i32, playing: bool },
    TrackPlay { track: TrackId },
    TrackPause { track: TrackId },
    #[serde(rename_all = "camelCase")]
    TrackFrameNext { track: TrackId, frame_index: i32 },
    #[serde(rename_all = "camelCase")]
    TrackFramePrev { track: TrackId, frame_index: i32 },
}

impl PlaybackEvent {
    /// Stable event name for logs and the REST surface
    pub fn name(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Seek { .. } => "seek",
            Self::SpeedChanged { .. } => "speedChanged",
            Self::LoopChanged { .. } => "loopChanged",
            Self::FrameUpdate { .. } => "frameUpdate",
            Self::TrackPlay { .. } => "trackPlay",
            Self::TrackPause { .. } => "trackPause",
            Self::TrackFrameNext { .. } => "trackFrameNext",
            Self::TrackFramePrev { .. } => "trackFramePrev",
        }
    }

    /// Track the event is scoped to, if any
    pub fn track(&self) -> Option<TrackId> {
        match self {
            Self::TrackPlay { track }
            | Self::TrackPause { track }
            | Self::TrackFrameNext { track, .. }
            | Self::TrackFramePrev { track, .. } => Some(*track),
            _ => None,
        }
    }

    /// Play position jumped; pending preloads are stale
    pub fn invalidates_preload(&self) -> bool {
        matches!(self, Self::Seek { .. } | Self::Stop)
    }
}
