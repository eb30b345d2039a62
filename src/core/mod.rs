//! Core engine modules - gap analysis, interpolation, cache, scheduler, workers
//!
//! These modules form the playback engine, independent of any transport
//! (CLI, REST) that drives it.

pub mod cache_man;
pub mod clock;
pub mod event_bus;
pub mod frame_cache;
pub mod gap_analyzer;
pub mod interp_keypoints;
pub mod interp_mesh;
pub mod orchestrator;
pub mod player_events;
pub mod scheduler;
pub mod service;
pub mod tracks;
pub mod workers;

// Re-exports for convenience
pub use cache_man::CacheManager;
pub use clock::{ClockSource, IntervalClock, ManualClock};
pub use event_bus::{EventBus, PlaybackSubscriber, SubscriptionId};
pub use frame_cache::{CacheKey, CacheStats, CacheStatsSnapshot, FrameCache};
pub use orchestrator::{EngineStatistics, InterpolationEngine};
pub use player_events::PlaybackEvent;
pub use scheduler::{PlaybackScheduler, PlaybackState, PlaybackStatus, TrackSnapshot};
pub use service::FrameService;
pub use tracks::{Track, TrackConfig, TrackRegistry, TrackState};
pub use workers::Workers;
