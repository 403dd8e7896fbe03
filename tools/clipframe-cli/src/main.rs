//! Clipframe CLI: inspect, trim, reframe, and render short clips.
//!
//! Usage:
//!   clipframe info <SOURCE>                 Show container information
//!   clipframe remux <SOURCE> -o <OUT>       Trim without re-encoding
//!   clipframe trajectory <ANCHORS>          Solve a camera path from anchors
//!   clipframe render <SOURCE> -o <OUT>      Transcode a clip
//!   clipframe check                         Check codec and compositor support

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clipframe_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "clipframe",
    about = "Trim, reframe, and render short video clips",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show container information
    Info {
        /// Source MP4 file
        source: PathBuf,
    },

    /// Trim a clip by copying samples (no re-encode)
    Remux {
        /// Source MP4 file
        source: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Trim start (seconds)
        #[arg(long, default_value = "0.0")]
        start: f64,

        /// Trim end (seconds); defaults to the source duration
        #[arg(long)]
        end: Option<f64>,
    },

    /// Turn face anchors (JSON) into camera keyframes (JSON)
    Trajectory {
        /// JSON file holding a list of anchor points
        anchors: PathBuf,

        /// Clip duration (seconds)
        #[arg(long)]
        duration: f64,

        /// Camera mood: linear|cut|smooth-cut
        #[arg(long, default_value = "linear")]
        mood: String,

        /// Write keyframes here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render a clip through the transcode pipeline
    Render {
        /// Source MP4 file
        source: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// JSON render request; overrides the geometry and trim flags
        #[arg(long)]
        request: Option<PathBuf>,

        /// Output width
        #[arg(long, default_value = "1080")]
        width: u32,

        /// Output height
        #[arg(long, default_value = "1920")]
        height: u32,

        /// Output FPS; defaults to the configured render FPS
        #[arg(long)]
        fps: Option<u32>,

        /// Target bitrate (bits/s); derived from geometry when omitted
        #[arg(long)]
        bitrate: Option<u64>,

        /// Trim start (seconds)
        #[arg(long, default_value = "0.0")]
        start: f64,

        /// Trim end (seconds); defaults to the source duration
        #[arg(long)]
        end: Option<f64>,

        /// Camera keyframes JSON
        #[arg(long)]
        keyframes: Option<PathBuf>,

        /// Face anchors JSON, solved into keyframes with --mood
        #[arg(long, conflicts_with = "keyframes")]
        anchors: Option<PathBuf>,

        /// Camera mood used with --anchors
        #[arg(long, default_value = "linear")]
        mood: String,

        /// Overlay elements JSON
        #[arg(long)]
        overlays: Option<PathBuf>,
    },

    /// Check codec capabilities
    Check {
        /// Probe decoding of this source as well
        source: Option<PathBuf>,

        /// Output width to probe
        #[arg(long, default_value = "1080")]
        width: u32,

        /// Output height to probe
        #[arg(long, default_value = "1920")]
        height: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load();

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    clipframe_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Info { source } => commands::info::run(source),
        Commands::Remux {
            source,
            output,
            start,
            end,
        } => commands::remux::run(source, output, start, end),
        Commands::Trajectory {
            anchors,
            duration,
            mood,
            output,
        } => commands::trajectory::run(&config, anchors, duration, &mood, output),
        Commands::Render {
            source,
            output,
            request,
            width,
            height,
            fps,
            bitrate,
            start,
            end,
            keyframes,
            anchors,
            mood,
            overlays,
        } => {
            let args = commands::render::RenderArgs {
                source,
                output,
                request,
                width,
                height,
                fps,
                bitrate,
                start,
                end,
                keyframes,
                anchors,
                mood,
                overlays,
            };
            commands::render::run(&config, args).await
        }
        Commands::Check {
            source,
            width,
            height,
        } => commands::check::run(&config, source, width, height).await,
    }
}
