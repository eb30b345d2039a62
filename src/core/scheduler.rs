//! Playback scheduler: the single authority for "what time is it"
//!
//! Owns the virtual clock and the track registry. Nothing else mutates
//! playback state; callers go through the transport methods below, each of
//! which announces itself on the `EventBus`.
//!
//! # Timing Model
//!
//! Virtual time in milliseconds, advanced by `delta * speed` on every
//! `tick(delta)`. The tick source is pluggable (`ClockSource`), so tests
//! drive it with a synthetic clock. Looping wraps with true modulo, so
//! reverse playback wraps as well; without looping the clock clamps and
//! pauses at the bound.
//!
//! # Frame Index
//!
//! `floor(t / frameInterval) mod totalFrames` everywhere. Tracks apply it to
//! their local time against their own frame count.
//!
//! # JKL Controls
//!
//! `jog_forward` / `jog_backward` start playback in a direction and step
//! through `SPEED_PRESETS` when tapped repeatedly.

use log::{debug, info, trace, warn};
use serde::Serialize;

use crate::core::clock::ClockSource;
use crate::core::event_bus::EventBus;
use crate::core::player_events::PlaybackEvent;
use crate::core::tracks::{Track, TrackConfig, TrackRegistry, frame_index_for};
use crate::entities::TrackId;
use crate::error::{EngineError, EngineResult};

/// Speed magnitudes for jog/shuttle control
const SPEED_PRESETS: &[f64] = &[0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 16.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackStatus {
    /// At time 0, not playing
    Stopped,
    Playing,
    Paused,
}

/// Snapshot of the shared clock
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub virtual_time_ms: f64,
    /// Sign encodes direction
    pub speed: f64,
    pub is_playing: bool,
    pub is_looping: bool,
    pub duration_ms: f64,
    pub frame_index: i32,
    pub total_frames: i32,
    pub fps: f64,
}

/// Per-track view at the current time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSnapshot {
    pub id: TrackId,
    pub label: String,
    pub independent: bool,
    pub local_time_ms: f64,
    pub frame_index: i32,
    pub loop_count: i64,
    pub is_playing: bool,
    pub speed: f64,
}

#[derive(Debug)]
pub struct PlaybackScheduler {
    status: PlaybackStatus,
    virtual_time_ms: f64,
    speed: f64,
    looping: bool,
    fps: f64,
    total_frames: i32,
    tracks: TrackRegistry,
    bus: EventBus,
    ticks: u64,
}

impl PlaybackScheduler {
    /// New scheduler stopped at 0, looping enabled.
    pub fn new(fps: f64, total_frames: i32, bus: EventBus) -> Self {
        let fps = sanitize_fps(fps);
        let total_frames = total_frames.max(0);
        info!("Scheduler: {} frames @ {} fps", total_frames, fps);
        Self {
            status: PlaybackStatus::Stopped,
            virtual_time_ms: 0.0,
            speed: 1.0,
            looping: true,
            fps,
            total_frames,
            tracks: TrackRegistry::new(),
            bus,
            ticks: 0,
        }
    }

    /// Replace the timeline (new entity loaded). Time is kept in range.
    pub fn set_timeline(&mut self, fps: f64, total_frames: i32) {
        self.fps = sanitize_fps(fps);
        self.total_frames = total_frames.max(0);
        self.virtual_time_ms = self.virtual_time_ms.clamp(0.0, self.duration_ms());
        debug!("Timeline set: {} frames @ {} fps", self.total_frames, self.fps);
    }

    // === Accessors ===

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn total_frames(&self) -> i32 {
        self.total_frames
    }

    pub fn frame_interval_ms(&self) -> f64 {
        1000.0 / self.fps
    }

    pub fn duration_ms(&self) -> f64 {
        self.total_frames as f64 * self.frame_interval_ms()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn virtual_time_ms(&self) -> f64 {
        self.virtual_time_ms
    }

    /// Number of ticks processed
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Frame index at time `t` on the shared timeline
    pub fn frame_index(&self, time_ms: f64) -> i32 {
        frame_index_for(time_ms, self.frame_interval_ms(), self.total_frames)
    }

    /// Frame index at the current time. A clamped clock sitting exactly on
    /// the end bound shows the last frame instead of wrapping to 0.
    pub fn current_frame_index(&self) -> i32 {
        if !self.looping && self.total_frames > 0 && self.virtual_time_ms >= self.duration_ms() {
            return self.total_frames - 1;
        }
        self.frame_index(self.virtual_time_ms)
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState {
            status: self.status,
            virtual_time_ms: self.virtual_time_ms,
            speed: self.speed,
            is_playing: self.is_playing(),
            is_looping: self.looping,
            duration_ms: self.duration_ms(),
            frame_index: self.current_frame_index(),
            total_frames: self.total_frames,
            fps: self.fps,
        }
    }

    // === Transport ===

    /// Stopped/paused -> playing. Without looping, playing from the bound
    /// in the direction of travel restarts from the opposite bound.
    pub fn play(&mut self) {
        if self.is_playing() {
            return;
        }
        if !self.looping {
            let duration = self.duration_ms();
            if self.speed >= 0.0 && self.virtual_time_ms >= duration {
                self.virtual_time_ms = 0.0;
            } else if self.speed < 0.0 && self.virtual_time_ms <= 0.0 {
                self.virtual_time_ms = duration;
            }
        }
        self.status = PlaybackStatus::Playing;
        trace!("Playback started at {:.1} ms", self.virtual_time_ms);
        self.bus.emit(PlaybackEvent::Play);
    }

    /// Playing -> paused. No-op otherwise.
    pub fn pause(&mut self) {
        if !self.is_playing() {
            return;
        }
        self.status = PlaybackStatus::Paused;
        trace!("Playback paused at {:.1} ms", self.virtual_time_ms);
        self.bus.emit(PlaybackEvent::Pause);
    }

    pub fn toggle_play(&mut self) {
        if self.is_playing() {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Any state -> stopped at 0
    pub fn stop(&mut self) {
        self.status = PlaybackStatus::Stopped;
        self.virtual_time_ms = 0.0;
        trace!("Playback stopped");
        self.bus.emit(PlaybackEvent::Stop);
    }

    /// Jump to `time_ms`, keeping the play state. Wraps when looping,
    /// clamps otherwise.
    pub fn seek(&mut self, time_ms: f64) {
        if !time_ms.is_finite() {
            warn!("Ignoring seek to non-finite time {}", time_ms);
            return;
        }
        self.virtual_time_ms = self.bounded(time_ms);
        let frame_index = self.current_frame_index();
        trace!("Seek to {:.1} ms (frame {})", self.virtual_time_ms, frame_index);
        self.bus.emit(PlaybackEvent::Seek {
            time_ms: self.virtual_time_ms,
            frame_index,
        });
    }

    pub fn seek_frame(&mut self, frame_idx: i32) {
        self.seek(frame_idx as f64 * self.frame_interval_ms());
    }

    /// Negative speed plays in reverse. Non-finite values are ignored.
    pub fn set_speed(&mut self, speed: f64) {
        if !speed.is_finite() {
            warn!("Ignoring non-finite speed {}", speed);
            return;
        }
        self.speed = speed;
        trace!("Speed set to {}", speed);
        self.bus.emit(PlaybackEvent::SpeedChanged { speed });
    }

    pub fn set_looping(&mut self, enabled: bool) {
        self.looping = enabled;
        if !enabled {
            self.virtual_time_ms = self.virtual_time_ms.clamp(0.0, self.duration_ms());
        }
        self.bus.emit(PlaybackEvent::LoopChanged { enabled });
    }

    /// Returns the new loop flag
    pub fn toggle_loop(&mut self) -> bool {
        self.set_looping(!self.looping);
        self.looping
    }

    /// Step exactly one frame in `direction`'s sign, wrapping at the ends.
    /// Returns the new frame index.
    pub fn advance_frame(&mut self, direction: i32) -> i32 {
        let current = self.current_frame_index();
        if direction == 0 || self.total_frames <= 0 {
            return current;
        }
        let next = (current + direction.signum()).rem_euclid(self.total_frames);
        self.virtual_time_ms = next as f64 * self.frame_interval_ms();
        trace!("Step {} -> {}", current, next);
        self.bus.emit(PlaybackEvent::Seek {
            time_ms: self.virtual_time_ms,
            frame_index: next,
        });
        next
    }

    fn jog(&mut self, direction: f64) {
        if !self.is_playing() {
            self.set_speed(direction);
            self.play();
        } else if self.speed.signum() != direction {
            self.set_speed(direction);
        } else {
            let magnitude = self.speed.abs();
            if let Some(&next) = SPEED_PRESETS.iter().find(|&&s| s > magnitude) {
                self.set_speed(next * direction);
            }
        }
    }

    /// Play forward; repeat to go faster
    pub fn jog_forward(&mut self) {
        self.jog(1.0);
    }

    /// Play backward; repeat to go faster
    pub fn jog_backward(&mut self) {
        self.jog(-1.0);
    }

    fn bounded(&self, time_ms: f64) -> f64 {
        let duration = self.duration_ms();
        if duration <= 0.0 {
            0.0
        } else if self.looping {
            time_ms.rem_euclid(duration)
        } else {
            time_ms.clamp(0.0, duration)
        }
    }

    // === Tick ===

    /// Advance all clocks by `delta_ms` of real time and fire `FrameUpdate`.
    ///
    /// Every independent, playing track advances with the same delta.
    /// Returns the shared frame index after the update.
    pub fn tick(&mut self, delta_ms: f64) -> i32 {
        let delta = if delta_ms.is_finite() && delta_ms > 0.0 { delta_ms } else { 0.0 };
        let duration = self.duration_ms();

        if self.is_playing() {
            let advanced = self.virtual_time_ms + delta * self.speed;
            if self.looping {
                self.virtual_time_ms = self.bounded(advanced);
            } else {
                self.virtual_time_ms = advanced.clamp(0.0, duration.max(0.0));
                let at_end = self.speed > 0.0 && self.virtual_time_ms >= duration;
                let at_start = self.speed < 0.0 && self.virtual_time_ms <= 0.0;
                if at_end || at_start || duration <= 0.0 {
                    debug!("Reached bound at {:.1} ms, pausing", self.virtual_time_ms);
                    self.status = PlaybackStatus::Paused;
                    self.bus.emit(PlaybackEvent::Pause);
                }
            }
        }

        self.advance_tracks(delta);

        self.ticks += 1;
        let frame_index = self.current_frame_index();
        self.bus.emit(PlaybackEvent::FrameUpdate {
            time_ms: self.virtual_time_ms,
            frame_index,
            playing: self.is_playing(),
        });
        frame_index
    }

    fn advance_tracks(&mut self, delta: f64) {
        let interval = self.frame_interval_ms();
        let mut paused = Vec::new();
        for track in self.tracks.iter_mut() {
            if !track.config.independent || !track.state.is_playing {
                continue;
            }
            let own_duration = track.own_duration_ms(interval);
            let advanced = track.state.virtual_time_ms + delta * track.state.speed;
            if own_duration <= 0.0 {
                track.state.virtual_time_ms = 0.0;
            } else if track.state.is_looping {
                track.state.virtual_time_ms = advanced.rem_euclid(own_duration);
            } else {
                track.state.virtual_time_ms = advanced.clamp(0.0, own_duration);
                let s = track.state.speed;
                let t = track.state.virtual_time_ms;
                if (s > 0.0 && t >= own_duration) || (s < 0.0 && t <= 0.0) {
                    track.state.is_playing = false;
                    paused.push(track.id);
                }
            }
        }
        for track in paused {
            debug!("{} reached its bound, pausing", track);
            self.bus.emit(PlaybackEvent::TrackPause { track });
        }
    }

    /// Run `ticks` ticks pulling deltas from `clock`. Returns the last frame index.
    pub fn drive(&mut self, clock: &mut dyn ClockSource, ticks: usize) -> i32 {
        let mut frame = self.current_frame_index();
        for _ in 0..ticks {
            frame = self.tick(clock.next_delta_ms());
        }
        frame
    }

    // === Tracks ===

    /// Register a track. A zero frame count inherits the scheduler's.
    pub fn add_track(&mut self, mut config: TrackConfig) -> TrackId {
        if config.total_frames <= 0 {
            config.total_frames = self.total_frames;
        }
        let independent = config.independent;
        let id = self.tracks.add(config);
        if independent {
            self.seed_track_clock(id);
        }
        debug!("Added {} (independent: {})", id, independent);
        id
    }

    pub fn remove_track(&mut self, id: TrackId) -> EngineResult<Track> {
        self.tracks.remove(id).ok_or(EngineError::UnknownTrack(id))
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    fn track_ref(&self, id: TrackId) -> EngineResult<&Track> {
        self.tracks.get(id).ok_or(EngineError::UnknownTrack(id))
    }

    fn independent_mut(&mut self, id: TrackId) -> EngineResult<&mut Track> {
        let track = self.tracks.get_mut(id).ok_or(EngineError::UnknownTrack(id))?;
        if !track.config.independent {
            return Err(EngineError::TrackNotIndependent(id));
        }
        Ok(track)
    }

    /// Start the own clock where the shared one is
    fn seed_track_clock(&mut self, id: TrackId) {
        let (time, speed, playing, looping) =
            (self.virtual_time_ms, self.speed, self.is_playing(), self.looping);
        if let Some(track) = self.tracks.get_mut(id) {
            track.state.virtual_time_ms = time;
            track.state.speed = speed;
            track.state.is_playing = playing;
            track.state.is_looping = looping;
        }
    }

    /// Detach a track onto its own clock (seeded from the shared one), or
    /// reattach it.
    pub fn set_track_independent(&mut self, id: TrackId, independent: bool) -> EngineResult<()> {
        let track = self.tracks.get_mut(id).ok_or(EngineError::UnknownTrack(id))?;
        if track.config.independent == independent {
            return Ok(());
        }
        track.config.independent = independent;
        if independent {
            self.seed_track_clock(id);
        }
        Ok(())
    }

    pub fn track_local_time(&self, id: TrackId) -> EngineResult<f64> {
        Ok(self.track_ref(id)?.local_time_ms(self.virtual_time_ms))
    }

    pub fn track_loop_count(&self, id: TrackId) -> EngineResult<i64> {
        Ok(self.track_ref(id)?.loop_count(self.virtual_time_ms))
    }

    pub fn track_frame_index(&self, id: TrackId) -> EngineResult<i32> {
        Ok(self.track_ref(id)?.frame_index(self.virtual_time_ms, self.frame_interval_ms()))
    }

    pub fn track_snapshot(&self, id: TrackId) -> EngineResult<TrackSnapshot> {
        Ok(self.snapshot_of(self.track_ref(id)?))
    }

    pub fn track_snapshots(&self) -> Vec<TrackSnapshot> {
        self.tracks.iter().map(|t| self.snapshot_of(t)).collect()
    }

    fn snapshot_of(&self, track: &Track) -> TrackSnapshot {
        let global = self.virtual_time_ms;
        let (is_playing, speed) = if track.config.independent {
            (track.state.is_playing, track.state.speed)
        } else {
            (self.is_playing(), self.speed)
        };
        TrackSnapshot {
            id: track.id,
            label: track.config.label.clone(),
            independent: track.config.independent,
            local_time_ms: track.local_time_ms(global),
            frame_index: track.frame_index(global, self.frame_interval_ms()),
            loop_count: track.loop_count(global),
            is_playing,
            speed,
        }
    }

    pub fn track_play(&mut self, id: TrackId) -> EngineResult<()> {
        let interval = self.frame_interval_ms();
        let track = self.independent_mut(id)?;
        if track.state.is_playing {
            return Ok(());
        }
        if !track.state.is_looping {
            let own = track.own_duration_ms(interval);
            if track.state.speed >= 0.0 && track.state.virtual_time_ms >= own {
                track.state.virtual_time_ms = 0.0;
            } else if track.state.speed < 0.0 && track.state.virtual_time_ms <= 0.0 {
                track.state.virtual_time_ms = own;
            }
        }
        track.state.is_playing = true;
        self.bus.emit(PlaybackEvent::TrackPlay { track: id });
        Ok(())
    }

    pub fn track_pause(&mut self, id: TrackId) -> EngineResult<()> {
        let track = self.independent_mut(id)?;
        if !track.state.is_playing {
            return Ok(());
        }
        track.state.is_playing = false;
        self.bus.emit(PlaybackEvent::TrackPause { track: id });
        Ok(())
    }

    pub fn track_set_speed(&mut self, id: TrackId, speed: f64) -> EngineResult<()> {
        if !speed.is_finite() {
            return Err(EngineError::invalid_config(format!("track speed {}", speed)));
        }
        self.independent_mut(id)?.state.speed = speed;
        Ok(())
    }

    pub fn track_set_looping(&mut self, id: TrackId, enabled: bool) -> EngineResult<()> {
        self.independent_mut(id)?.state.is_looping = enabled;
        Ok(())
    }

    /// Move the track's own clock. Wraps or clamps against its own duration.
    pub fn track_seek(&mut self, id: TrackId, time_ms: f64) -> EngineResult<()> {
        if !time_ms.is_finite() {
            return Err(EngineError::invalid_config(format!("track seek to {}", time_ms)));
        }
        let interval = self.frame_interval_ms();
        let track = self.independent_mut(id)?;
        let own = track.own_duration_ms(interval);
        track.state.virtual_time_ms = if own <= 0.0 {
            0.0
        } else if track.state.is_looping {
            time_ms.rem_euclid(own)
        } else {
            time_ms.clamp(0.0, own)
        };
        Ok(())
    }

    /// One frame on the track's own clock, wrapping. Returns the track's
    /// frame index afterwards.
    pub fn track_advance_frame(&mut self, id: TrackId, direction: i32) -> EngineResult<i32> {
        let interval = self.frame_interval_ms();
        let global = self.virtual_time_ms;
        let track = self.independent_mut(id)?;
        let total = track.config.total_frames;
        if direction == 0 || total <= 0 {
            return Ok(track.frame_index(global, interval));
        }
        let current = frame_index_for(track.state.virtual_time_ms, interval, total);
        let next = (current + direction.signum()).rem_euclid(total);
        track.state.virtual_time_ms = next as f64 * interval;
        let frame_index = track.frame_index(global, interval);

        let event = if direction > 0 {
            PlaybackEvent::TrackFrameNext { track: id, frame_index }
        } else {
            PlaybackEvent::TrackFramePrev { track: id, frame_index }
        };
        self.bus.emit(event);
        Ok(frame_index)
    }
}

fn sanitize_fps(fps: f64) -> f64 {
    if fps.is_finite() && fps > 0.0 {
        fps
    } else {
        warn!("Invalid fps {}, using 30", fps);
        30.0
    }
}
