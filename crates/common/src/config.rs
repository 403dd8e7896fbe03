//! Application configuration.
//!
//! The numeric tuning constants used by the sampler, the trajectory solver,
//! and the transcode pipeline are product tuning, not algorithmic truths,
//! so all of them live here as overridable defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Transcode pipeline defaults.
    #[serde(default)]
    pub render: RenderDefaults,

    /// Scene sampler thresholds.
    #[serde(default)]
    pub sampler: SamplerDefaults,

    /// Trajectory solver defaults.
    #[serde(default)]
    pub trajectory: TrajectoryDefaults,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default transcode parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderDefaults {
    /// Maximum decoded-but-not-yet-encoded frames.
    pub max_in_flight_frames: usize,

    /// Longest allowed span between output keyframes (us).
    pub gop_ceiling_us: i64,

    /// Bits per pixel per frame used when no bitrate is requested.
    pub bitrate_factor: f64,

    /// Floor for the derived bitrate (bits/s).
    pub min_bitrate: u64,

    /// Interval between backpressure polls (ms).
    pub backpressure_poll_ms: u64,

    /// Default output frame rate.
    pub fps: u32,

    /// Where frames are composited.
    pub compositor: CompositorPreference,
}

/// Compositor selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositorPreference {
    /// GPU when an adapter is available, CPU otherwise.
    #[default]
    Auto,
    /// GPU only; a render fails without an adapter.
    Gpu,
    Cpu,
}

/// Scene sampler thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerDefaults {
    /// Normalized frame difference that closes a shot.
    pub cut_threshold: f64,

    /// Normalized frame difference above which a shot is not static.
    pub static_threshold: f64,

    /// Horizontal center delta that asks for a bisection.
    pub position_mismatch: f64,

    /// Horizontal center delta that forces a bisection.
    pub forced_mismatch: f64,

    /// Side of the square grid frames are reduced to before differencing.
    pub activity_grid: u32,
}

/// Trajectory solver defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryDefaults {
    /// Vertical framing offset applied to the camera center.
    pub vertical_bias: f64,

    /// Spring simulation rate (Hz).
    pub simulation_hz: u32,

    /// Snap distance above which hard-cut moods jump instead of panning.
    pub cut_distance_threshold: f64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "clipframe=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            max_in_flight_frames: 5,
            gop_ceiling_us: 2_000_000,
            bitrate_factor: 0.15,
            min_bitrate: 2_000_000,
            backpressure_poll_ms: 2,
            fps: 30,
            compositor: CompositorPreference::Auto,
        }
    }
}

impl Default for SamplerDefaults {
    fn default() -> Self {
        Self {
            cut_threshold: 0.25,
            static_threshold: 0.03,
            position_mismatch: 0.1,
            forced_mismatch: 0.3,
            activity_grid: 64,
        }
    }
}

impl Default for TrajectoryDefaults {
    fn default() -> Self {
        Self {
            vertical_bias: -0.05,
            simulation_hz: 30,
            cut_distance_threshold: 0.25,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl RenderDefaults {
    /// Bitrate to use for an output of the given geometry.
    ///
    /// `requested` of `None` or `0` falls back to
    /// `max(min_bitrate, width * height * fps * bitrate_factor)`.
    pub fn resolve_bitrate(&self, requested: Option<u64>, width: u32, height: u32, fps: u32) -> u64 {
        match requested {
            Some(bitrate) if bitrate > 0 => bitrate,
            _ => {
                let derived = width as f64 * height as f64 * fps as f64 * self.bitrate_factor;
                (derived.round() as u64).max(self.min_bitrate)
            }
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("clipframe").join("config.json")
}
