use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// Synchronized playback and pose-gap-filling engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Write the log to a file (default: posesync.log in the data directory)
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE", global = true)]
    pub log_file: Option<Option<PathBuf>>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Custom configuration directory (overrides default platform paths)
    #[arg(short = 'c', long = "config-dir", value_name = "DIR", global = true)]
    pub config_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load a pose track and print its gap map
    Analyze {
        #[command(flatten)]
        track: TrackArgs,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Drive the scheduler with a synthetic clock and report playback
    Simulate {
        #[command(flatten)]
        track: TrackArgs,

        /// Virtual playback length to simulate
        #[arg(long = "duration-ms", value_name = "MS", default_value_t = 5000.0)]
        duration_ms: f64,

        /// Playback speed (negative plays in reverse)
        #[arg(long, default_value_t = 1.0, allow_hyphen_values = true)]
        speed: f64,

        /// Synthetic tick length
        #[arg(long = "tick-ms", value_name = "MS", default_value_t = 1000.0 / 60.0)]
        tick_ms: f64,

        /// Disable looping
        #[arg(long = "no-loop")]
        no_loop: bool,
    },

    /// Run the tick loop and expose the REST API
    Serve {
        #[command(flatten)]
        track: TrackArgs,

        /// REST port (default from settings)
        #[arg(short = 'p', long, value_name = "PORT")]
        port: Option<u16>,

        /// Directory of original/overlay images ({dir}/{entity}/{variant}/{frame:06}.{ext})
        #[arg(long = "images", value_name = "DIR")]
        images: Option<PathBuf>,

        /// Image file extension inside --images
        #[arg(long = "image-ext", value_name = "EXT", default_value = "jpg")]
        image_ext: String,

        /// Start playing immediately
        #[arg(short = 'a', long = "autoplay")]
        autoplay: bool,
    },
}

/// Options shared by every subcommand that loads a track
#[derive(ClapArgs, Debug, Clone)]
pub struct TrackArgs {
    /// Pose track JSON
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Person to follow (default: first person of each frame)
    #[arg(long = "person", value_name = "ID")]
    pub person_id: Option<u32>,

    /// Frame rate override
    #[arg(long, value_name = "FPS")]
    pub fps: Option<f64>,

    /// Total frame count override
    #[arg(long = "total-frames", value_name = "N")]
    pub total_frames: Option<i32>,

    /// Rotate meshes 180 degrees about X
    #[arg(long = "flip-mesh")]
    pub flip_mesh: bool,

    /// Negate camera translation X
    #[arg(long = "flip-camera")]
    pub flip_camera: bool,
}
