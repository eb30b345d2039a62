//! Engine error type.
//!
//! Only true impossibilities surface here. Data-quality problems (keypoint or
//! vertex count mismatches, empty source sets) are logged and degraded around
//! instead of being reported as errors.

use crate::entities::{EntityId, TrackId};

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("frame {frame} out of range (total frames: {total})")]
    FrameOutOfRange { frame: i32, total: i32 },

    #[error("interpolation engine not initialized")]
    NotInitialized,

    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),

    #[error("unknown track: {0}")]
    UnknownTrack(TrackId),

    #[error("track {0} follows the shared clock; make it independent first")]
    TrackNotIndependent(TrackId),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// True for the input-validation failure callers are expected to handle inline.
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::FrameOutOfRange { .. })
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}
