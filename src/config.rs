//! Engine settings persisted as `posesync.json`.

use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::paths::{self, PathConfig};

pub const SETTINGS_FILE: &str = "posesync.json";

/// Engine settings. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    // Playback
    pub fps: f64,
    pub loop_enabled: bool,
    pub tick_hz: f64, // Scheduler tick rate for `serve`

    // Cache
    pub cache_capacity: usize,  // Entries, LRU beyond this
    pub cache_ttl_secs: u64,
    pub cache_memory_mb: usize, // 0 = no memory budget
    pub preload_frames: usize,  // Frames warmed ahead of the play position

    // Workers
    pub worker_threads: usize, // 0 = auto

    // REST API Server
    pub api_port: u16,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fps: 30.0,
            loop_enabled: true,
            tick_hz: 60.0,
            cache_capacity: 2048,
            cache_ttl_secs: 3600,
            cache_memory_mb: 0,
            preload_frames: 10,
            worker_threads: 0,
            api_port: 9017,
        }
    }
}

impl EngineSettings {
    /// Read settings from `path`. A missing file yields defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        let settings: Self = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
        info!("Settings loaded from {}", path.display());
        Ok(settings.sanitized())
    }

    /// Settings from the resolved config directory
    pub fn load(path_config: &PathConfig) -> Result<Self> {
        Self::load_or_default(&paths::config_file(SETTINGS_FILE, path_config))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write settings: {}", path.display()))?;
        debug!("Settings saved to {}", path.display());
        Ok(())
    }

    /// Worker count with 0 resolved to 3/4 of the cores
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            (num_cpus::get() * 3 / 4).max(1)
        }
    }

    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_ttl_secs)
    }

    /// Replace values that would break the engine with defaults
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !(self.fps.is_finite() && self.fps > 0.0) {
            warn!("Invalid fps {} in settings, using {}", self.fps, defaults.fps);
            self.fps = defaults.fps;
        }
        if !(self.tick_hz.is_finite() && self.tick_hz > 0.0) {
            warn!("Invalid tick_hz {} in settings, using {}", self.tick_hz, defaults.tick_hz);
            self.tick_hz = defaults.tick_hz;
        }
        if self.cache_capacity == 0 {
            warn!("cache_capacity 0 in settings, using {}", defaults.cache_capacity);
            self.cache_capacity = defaults.cache_capacity;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let s = EngineSettings::load_or_default(&tmp.path().join(SETTINGS_FILE)).unwrap();
        assert_eq!(s, EngineSettings::default());
        assert_eq!(s.api_port, 9017);
        assert_eq!(s.preload_frames, 10);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(SETTINGS_FILE);
        std::fs::write(&path, r#"{"fps": 24.0, "preload_frames": 4}"#).unwrap();
        let s = EngineSettings::load_or_default(&path).unwrap();
        assert_eq!(s.fps, 24.0);
        assert_eq!(s.preload_frames, 4);
        assert_eq!(s.cache_ttl_secs, 3600);
    }

    #[test]
    fn test_save_roundtrip_into_new_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sub").join(SETTINGS_FILE);
        let s = EngineSettings {
            worker_threads: 3,
            loop_enabled: false,
            ..Default::default()
        };
        s.save(&path).unwrap();
        assert_eq!(EngineSettings::load_or_default(&path).unwrap(), s);
    }

    #[test]
    fn test_garbage_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(SETTINGS_FILE);
        std::fs::write(&path, "not json").unwrap();
        let err = EngineSettings::load_or_default(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse settings"));
    }

    #[test]
    fn test_sanitize() {
        let s = EngineSettings {
            fps: -1.0,
            tick_hz: f64::NAN,
            cache_capacity: 0,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(s.fps, 30.0);
        assert_eq!(s.tick_hz, 60.0);
        assert_eq!(s.cache_capacity, 2048);
    }

    #[test]
    fn test_worker_resolution() {
        let fixed = EngineSettings {
            worker_threads: 5,
            ..Default::default()
        };
        assert_eq!(fixed.resolved_worker_threads(), 5);
        assert!(EngineSettings::default().resolved_worker_threads() >= 1);
    }
}
