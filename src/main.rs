use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};

use posesync::cli::Args;
use posesync::paths::{self, PathConfig};
use posesync::runner;

fn main() -> Result<()> {
    // Parse command-line arguments first (needed for log setup)
    let args = Args::parse();

    let path_config = PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = paths::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {:#}", e);
    }

    init_logging(&args, &path_config)?;

    info!("posesync {} starting", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);
    info!(
        "Config path: {}",
        paths::config_file(posesync::config::SETTINGS_FILE, &path_config).display()
    );

    runner::run(args)
}

/// 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
fn init_logging(args: &Args, path_config: &PathConfig) -> Result<()> {
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| paths::data_file("posesync.log", path_config));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .filter_module("tiny_http", log::LevelFilter::Warn) // rouille's server is chatty
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Respects RUST_LOG if set
        let default_level = log_level.as_str().to_lowercase();
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .filter_module("tiny_http", log::LevelFilter::Warn)
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}
