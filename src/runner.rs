//! Command runner - wires settings, the frame service and the scheduler for
//! each CLI subcommand.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info, trace, warn};
use serde::Serialize;

use crate::cli::{Args, Command, TrackArgs};
use crate::config::EngineSettings;
use crate::core::cache_man::CacheManager;
use crate::core::clock::{ClockSource, IntervalClock, ManualClock};
use crate::core::event_bus::EventBus;
use crate::core::frame_cache::{CacheStatsSnapshot, FrameCache};
use crate::core::orchestrator::EngineStatistics;
use crate::core::scheduler::PlaybackScheduler;
use crate::core::service::FrameService;
use crate::core::tracks::TrackConfig;
use crate::core::workers::Workers;
use crate::entities::{DirVariantStore, GapKind, GapMap, LoadOptions, LoadedTrack, load_track};
use crate::paths::PathConfig;
use crate::server::{ApiCommand, ApiServer, SharedApiState};

/// Run the subcommand in `args` with settings from the config directory.
pub fn run(args: Args) -> Result<()> {
    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    let settings = EngineSettings::load(&path_config)?;
    trace!("Settings: {:?}", settings);

    match args.command {
        Command::Analyze { track, json } => {
            let loaded = load(&track, &settings)?;
            let service = build_service(&settings, false)?;
            let map = service.load_track(&loaded);
            let stats = service.statistics(loaded.entity)?;
            if json {
                let report = AnalyzeReport { gap_map: map.as_ref(), statistics: &stats, skipped_frames: loaded.skipped_frames };
                println!("{}", serde_json::to_string_pretty(&report).context("Failed to serialize report")?);
            } else {
                print!("{}", format_gap_map(&loaded, &map));
            }
            Ok(())
        }
        Command::Simulate { track, duration_ms, speed, tick_ms, no_loop } => {
            let loaded = load(&track, &settings)?;
            let options = SimulateOptions {
                duration_ms,
                speed,
                tick_ms,
                looping: settings.loop_enabled && !no_loop,
            };
            let report = simulate(&loaded, &settings, &options)?;
            println!("{}", serde_json::to_string_pretty(&report).context("Failed to serialize report")?);
            Ok(())
        }
        Command::Serve { track, port, images, image_ext, autoplay } => {
            let loaded = load(&track, &settings)?;
            let mut service = build_service(&settings, true)?;
            if let Some(dir) = images {
                let store = Arc::new(DirVariantStore::new(dir, &image_ext));
                service = service.with_variant_store(store);
            }
            serve(loaded, Arc::new(service), &settings, port.unwrap_or(settings.api_port), autoplay)
        }
    }
}

/// CLI flags first, then the document, then settings for the frame rate
fn load_options(track: &TrackArgs, settings: &EngineSettings) -> LoadOptions {
    LoadOptions {
        person_id: track.person_id,
        flip_mesh: track.flip_mesh,
        flip_camera: track.flip_camera,
        fps: track.fps,
        fallback_fps: Some(settings.fps),
        total_frames: track.total_frames,
    }
}

fn load(track: &TrackArgs, settings: &EngineSettings) -> Result<LoadedTrack> {
    let opts = load_options(track, settings);
    let loaded = load_track(&track.file, &opts)
        .with_context(|| format!("Failed to load pose track: {}", track.file.display()))?;
    if loaded.skipped_frames > 0 {
        warn!("{} frames skipped while loading {}", loaded.skipped_frames, track.file.display());
    }
    Ok(loaded)
}

/// Frame service configured from settings, optionally with a preload pool
pub fn build_service(settings: &EngineSettings, with_workers: bool) -> Result<FrameService> {
    let manager = Arc::new(CacheManager::new(settings.cache_memory_mb));
    let cache = Arc::new(FrameCache::new(settings.cache_capacity, settings.cache_ttl(), Arc::clone(&manager)));
    let mut service = FrameService::new(cache).with_preload_frames(settings.preload_frames);
    if with_workers {
        let workers = Workers::new(settings.resolved_worker_threads(), manager.epoch_ref())
            .context("Failed to start preload workers")?;
        service = service.with_workers(workers);
    }
    Ok(service)
}

// === analyze ===

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeReport<'a> {
    gap_map: &'a GapMap,
    statistics: &'a EngineStatistics,
    skipped_frames: usize,
}

fn format_gap_map(track: &LoadedTrack, map: &GapMap) -> String {
    let mut out = String::new();
    out.push_str(&format!("Entity:        {}\n", track.entity));
    out.push_str(&format!("Frames:        {} @ {} fps\n", map.total_frames, track.fps));
    out.push_str(&format!("Source:        {}\n", map.source_frame_count));
    out.push_str(&format!(
        "Missing:       {} ({:.1}%)\n",
        map.missing_frame_count,
        map.interpolation_percentage()
    ));
    out.push_str(&format!("Gaps:          {}\n", map.gaps.len()));
    for gap in &map.gaps {
        let (Some(first), Some(last)) = (gap.first_missing(), gap.last_missing()) else {
            continue;
        };
        let bounds = match gap.kind() {
            GapKind::Middle => format!("between {} and {}", fmt_bound(gap.start_frame), fmt_bound(gap.end_frame)),
            GapKind::Start => format!("before {}", fmt_bound(gap.end_frame)),
            GapKind::End => format!("after {}", fmt_bound(gap.start_frame)),
            GapKind::Full => "no source frames".to_string(),
        };
        out.push_str(&format!("  {:>6}..={:<6} {:>5} frames, {}\n", first, last, gap.gap_size, bounds));
    }
    out
}

fn fmt_bound(bound: Option<i32>) -> String {
    bound.map_or_else(|| "-".to_string(), |b| b.to_string())
}

// === simulate ===

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Real time to simulate
    pub duration_ms: f64,
    pub speed: f64,
    pub tick_ms: f64,
    pub looping: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub ticks: u64,
    pub final_time_ms: f64,
    pub final_frame: i32,
    /// Distinct frame changes observed by the consumer
    pub frames_shown: usize,
    /// Frames that could not be produced (consumer kept the last one)
    pub frames_unavailable: usize,
    pub first_frames: Vec<i32>,
    pub statistics: EngineStatistics,
    pub cache: CacheStatsSnapshot,
}

/// Play `track` with a synthetic clock, pulling frames like a renderer would.
pub fn simulate(track: &LoadedTrack, settings: &EngineSettings, options: &SimulateOptions) -> Result<SimulationReport> {
    if !(options.tick_ms.is_finite() && options.tick_ms > 0.0) {
        anyhow::bail!("tick length must be positive, got {}", options.tick_ms);
    }
    let service = build_service(settings, false)?;
    service.load_track(track);

    let bus = EventBus::new();
    service.attach(&bus);
    let mut scheduler = PlaybackScheduler::new(track.fps, track.total_frames, bus);
    scheduler.add_track(TrackConfig::new("mesh"));
    scheduler.set_looping(options.looping);
    scheduler.set_speed(options.speed);
    scheduler.play();

    let ticks = (options.duration_ms.max(0.0) / options.tick_ms).ceil() as usize;
    let mut clock = ManualClock::fixed(options.tick_ms);
    let mut last_frame = None;
    let mut frames_shown = 0;
    let mut frames_unavailable = 0;
    let mut first_frames = Vec::new();

    for _ in 0..ticks {
        let frame = scheduler.tick(clock.next_delta_ms());
        if last_frame == Some(frame) {
            continue;
        }
        last_frame = Some(frame);
        frames_shown += 1;
        if first_frames.len() < 16 {
            first_frames.push(frame);
        }
        if service.get_frame(track.entity, frame)?.is_none() {
            frames_unavailable += 1;
        }
        let ahead = if scheduler.speed() < 0.0 {
            frame - service.preload_frames() as i32
        } else {
            frame + 1
        };
        service.preload(track.entity, ahead)?;
    }

    let report = SimulationReport {
        ticks: scheduler.ticks(),
        final_time_ms: scheduler.virtual_time_ms(),
        final_frame: scheduler.current_frame_index(),
        frames_shown,
        frames_unavailable,
        first_frames,
        statistics: service.statistics(track.entity)?,
        cache: service.cache_stats(),
    };
    info!(
        "Simulated {} ticks: {} frames shown, hit rate {:.1}%",
        report.ticks,
        report.frames_shown,
        report.cache.hit_rate * 100.0
    );
    Ok(report)
}

// === serve ===

/// Apply one REST command to the scheduler
pub fn apply_command(scheduler: &mut PlaybackScheduler, command: ApiCommand) {
    debug!("API command: {:?}", command);
    match command {
        ApiCommand::Play => scheduler.play(),
        ApiCommand::Pause => scheduler.pause(),
        ApiCommand::Stop => scheduler.stop(),
        ApiCommand::ToggleLoop => {
            scheduler.toggle_loop();
        }
        ApiCommand::Seek(ms) => scheduler.seek(ms),
        ApiCommand::SetSpeed(speed) => scheduler.set_speed(speed),
        ApiCommand::Step(direction) => {
            scheduler.advance_frame(direction);
        }
    }
}

/// Tick loop on this thread, REST API on a background thread. Runs until killed.
fn serve(track: LoadedTrack, service: Arc<FrameService>, settings: &EngineSettings, port: u16, autoplay: bool) -> Result<()> {
    let entity = track.entity;
    service.load_track(&track);

    let bus = EventBus::new();
    service.attach(&bus);
    let mut scheduler = PlaybackScheduler::new(track.fps, track.total_frames, bus);
    scheduler.add_track(TrackConfig::new("video"));
    scheduler.add_track(TrackConfig::new("mesh"));
    scheduler.set_looping(settings.loop_enabled);
    if autoplay {
        scheduler.play();
    }

    let state = Arc::new(SharedApiState::new(entity, Arc::clone(&service), scheduler.state()));
    let commands = ApiServer::start(port, Arc::clone(&state));
    info!("Serving {} on port {} ({} Hz tick)", entity, port, settings.tick_hz);

    let mut clock = IntervalClock::new(settings.tick_hz);
    let mut last_frame = None;
    loop {
        for command in commands.try_iter() {
            apply_command(&mut scheduler, command);
        }

        let frame = scheduler.tick(clock.next_delta_ms());
        if last_frame != Some(frame) {
            last_frame = Some(frame);
            // Hold the previous frame when this one can't be built
            match service.get_frame(entity, frame) {
                Ok(Some(_)) => {}
                Ok(None) => trace!("Frame {} unavailable, holding previous", frame),
                Err(e) => warn!("Frame {}: {}", frame, e),
            }
            if let Err(e) = service.preload_async(entity, frame + 1) {
                debug!("Preload from {} failed: {}", frame + 1, e);
            }
        }

        // Bus queue is only drained here
        scheduler.bus().poll();
        state.update(scheduler.state(), scheduler.track_snapshots());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scheduler::PlaybackStatus;
    use crate::entities::PoseTrackDocument;

    fn track(indices: &[i32], total: i32) -> LoadedTrack {
        let frames: Vec<serde_json::Value> = indices
            .iter()
            .map(|&i| {
                serde_json::json!({
                    "frameNumber": i,
                    "timestamp": i as f64 / 30.0,
                    "persons": [{
                        "personId": 0,
                        "confidence": 0.9,
                        "tracked": true,
                        "keypoints": [{"name": "nose", "x": i as f64, "y": 0.0, "z": 0.0, "confidence": 0.9}]
                    }]
                })
            })
            .collect();
        let doc = serde_json::json!({ "frames": frames, "frameCount": indices.len(), "totalFrames": total, "fps": 30.0 });
        PoseTrackDocument::from_json(&doc.to_string())
            .unwrap()
            .into_track(&LoadOptions::default())
            .unwrap()
    }

    #[test]
    fn test_simulate_steady_playback_hits_cache() {
        let loaded = track(&[0, 10, 20, 29], 30);
        let settings = EngineSettings::default();
        let options = SimulateOptions {
            duration_ms: 900.0,
            speed: 1.0,
            tick_ms: 1000.0 / 60.0,
            looping: true,
        };
        let report = simulate(&loaded, &settings, &options).unwrap();
        assert_eq!(report.ticks, 54);
        assert_eq!(report.frames_unavailable, 0);
        assert!(report.frames_shown >= 26);
        assert_eq!(report.first_frames[0], 0);
        // Every shown frame was warmed by the preload before it
        assert!(report.cache.hit_rate > 0.9, "hit rate {}", report.cache.hit_rate);
    }

    #[test]
    fn test_simulate_rejects_bad_tick() {
        let loaded = track(&[0], 5);
        let options = SimulateOptions {
            duration_ms: 100.0,
            speed: 1.0,
            tick_ms: 0.0,
            looping: true,
        };
        assert!(simulate(&loaded, &EngineSettings::default(), &options).is_err());
    }

    #[test]
    fn test_settings_fps_used_when_track_has_none() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("track.json");
        std::fs::write(&file, r#"{ "frames": [ { "frameNumber": 0, "persons": [ { "personId": 0 } ] } ] }"#)
            .unwrap();
        let settings = EngineSettings { fps: 24.0, ..Default::default() };
        let mut args = TrackArgs {
            file,
            person_id: None,
            fps: None,
            total_frames: None,
            flip_mesh: false,
            flip_camera: false,
        };

        assert_eq!(load(&args, &settings).unwrap().fps, 24.0);
        args.fps = Some(60.0);
        assert_eq!(load(&args, &settings).unwrap().fps, 60.0);
    }

    #[test]
    fn test_apply_commands() {
        let mut s = PlaybackScheduler::new(30.0, 30, EventBus::new());
        apply_command(&mut s, ApiCommand::Play);
        assert_eq!(s.status(), PlaybackStatus::Playing);
        apply_command(&mut s, ApiCommand::Seek(510.0));
        assert_eq!(s.current_frame_index(), 15);
        apply_command(&mut s, ApiCommand::Step(-1));
        assert_eq!(s.current_frame_index(), 14);
        apply_command(&mut s, ApiCommand::SetSpeed(-1.0));
        assert_eq!(s.speed(), -1.0);
        apply_command(&mut s, ApiCommand::ToggleLoop);
        assert!(!s.is_looping());
        apply_command(&mut s, ApiCommand::Stop);
        assert_eq!(s.status(), PlaybackStatus::Stopped);
    }

    #[test]
    fn test_gap_report_text() {
        let loaded = track(&[2, 5], 8);
        let service = build_service(&EngineSettings::default(), false).unwrap();
        let map = service.load_track(&loaded);
        let text = format_gap_map(&loaded, &map);
        assert!(text.contains("Source:        2"));
        assert!(text.contains("before 2"));
        assert!(text.contains("between 2 and 5"));
        assert!(text.contains("after 5"));
    }
}
