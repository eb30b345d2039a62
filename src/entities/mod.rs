//! Entities module - data types shared by the engine
//!
//! Frame records, keypoints, gap metadata, identifiers and the collaborator
//! traits through which the engine reads pose data and imagery.

pub mod frame;
pub mod gap;
pub mod ids;
pub mod keypoint;
pub mod loader;
pub mod store;
pub mod traits;
pub mod transform;

pub use frame::{CacheValue, FrameRecord, FrameVariant, FrameView, ViewRequest};
pub use gap::{Bracket, Gap, GapKind, GapMap};
pub use ids::{EntityId, TrackId};
pub use keypoint::{InterpolatedKeypoint, Keypoint, KeypointName, Skeleton};
pub use loader::{LoadOptions, LoadedTrack, PoseTrackDocument, load_track};
pub use store::{DirVariantStore, MemoryFrameSource, MemoryVariantStore};
pub use traits::{FrameSource, VariantStore};
