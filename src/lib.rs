//! posesync - synchronized playback and pose-gap-filling engine
//!
//! Re-exports all modules for use by the binary target.

// Core engine (gap analysis, interpolation, cache, scheduler, workers)
pub mod core;
pub mod entities;
pub mod error;

// App modules
pub mod cli;
pub mod config;
pub mod paths;
pub mod runner;
pub mod server;

// Re-export commonly used types from core
pub use core::cache_man::CacheManager;
pub use core::event_bus::{EventBus, PlaybackSubscriber};
pub use core::frame_cache::FrameCache;
pub use core::orchestrator::InterpolationEngine;
pub use core::player_events::PlaybackEvent;
pub use core::scheduler::PlaybackScheduler;
pub use core::service::FrameService;

// Re-export entities
pub use entities::{EntityId, FrameRecord, FrameView, GapMap, Keypoint, TrackId};
pub use error::{EngineError, EngineResult};
