use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "POSESYNC_CONFIG_DIR";

const APP_DIR: &str = "posesync";

/// Files whose presence makes the working directory the config directory
const LOCAL_MARKERS: [&str; 2] = ["posesync.json", "posesync.log"];

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args → ENV var (POSESYNC_CONFIG_DIR) → None (use defaults)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| std::env::var(CONFIG_DIR_ENV).ok().map(PathBuf::from));
        Self { config_dir }
    }
}

/// Get path to a configuration file
///
/// Priority:
/// 1. CLI --config-dir argument
/// 2. POSESYNC_CONFIG_DIR environment variable
/// 3. Working directory IF it already holds posesync.json or posesync.log
/// 4. Platform-specific config directory from dirs-next (default)
///
/// Platform paths:
/// - Linux: ~/.config/posesync/{name}
/// - macOS: ~/Library/Application Support/posesync/{name}
/// - Windows: %APPDATA%\posesync\{name}
pub fn config_file(name: &str, config: &PathConfig) -> PathBuf {
    config_dir(config).join(name)
}

/// Get path to a data file (logs). Same priority as `config_file`, with the
/// platform data directory as the default.
pub fn data_file(name: &str, config: &PathConfig) -> PathBuf {
    data_dir(config).join(name)
}

/// Create the config and data directories if missing
pub fn ensure_dirs(config: &PathConfig) -> Result<()> {
    let config_dir = config_dir(config);
    let data_dir = data_dir(config);

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;
    if data_dir != config_dir {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;
    }
    Ok(())
}

fn has_local_config_files(dir: &Path) -> bool {
    LOCAL_MARKERS.iter().any(|f| dir.join(f).exists())
}

/// Shared resolution; `platform` is the dirs-next base for the default case.
fn resolve_dir(config: &PathConfig, cwd: Option<&Path>, platform: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = &config.config_dir {
        return dir.clone();
    }
    if let Some(cwd) = cwd
        && has_local_config_files(cwd)
    {
        return cwd.to_path_buf();
    }
    platform
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn config_dir(config: &PathConfig) -> PathBuf {
    let cwd = std::env::current_dir().ok();
    resolve_dir(config, cwd.as_deref(), dirs_next::config_dir())
}

fn data_dir(config: &PathConfig) -> PathBuf {
    let cwd = std::env::current_dir().ok();
    resolve_dir(config, cwd.as_deref(), dirs_next::data_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_with_custom_dir() {
        let config = PathConfig {
            config_dir: Some(PathBuf::from("/custom")),
        };
        assert_eq!(config_file("posesync.json", &config), PathBuf::from("/custom/posesync.json"));
        assert_eq!(data_file("posesync.log", &config), PathBuf::from("/custom/posesync.log"));
    }

    #[test]
    fn test_cli_beats_env() {
        let config = PathConfig::from_env_and_cli(Some(PathBuf::from("/from-cli")));
        assert_eq!(config.config_dir, Some(PathBuf::from("/from-cli")));
    }

    #[test]
    fn test_platform_default() {
        let dir = resolve_dir(&PathConfig::default(), None, Some(PathBuf::from("/home/u/.config")));
        assert_eq!(dir, PathBuf::from("/home/u/.config/posesync"));
        assert_eq!(resolve_dir(&PathConfig::default(), None, None), PathBuf::from("."));
    }

    #[test]
    fn test_local_files_priority() {
        let tmp = tempfile::tempdir().unwrap();
        let platform = Some(PathBuf::from("/platform"));

        let without = resolve_dir(&PathConfig::default(), Some(tmp.path()), platform.clone());
        assert_eq!(without, PathBuf::from("/platform/posesync"));

        std::fs::write(tmp.path().join("posesync.json"), "{}").unwrap();
        let with = resolve_dir(&PathConfig::default(), Some(tmp.path()), platform);
        assert_eq!(with, tmp.path());
    }

    #[test]
    fn test_ensure_dirs_creates_custom_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PathConfig {
            config_dir: Some(tmp.path().join("nested").join("cfg")),
        };
        ensure_dirs(&config).unwrap();
        assert!(tmp.path().join("nested/cfg").is_dir());
    }
}
