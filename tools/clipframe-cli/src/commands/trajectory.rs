//! Solve camera keyframes from face anchors.

use std::path::{Path, PathBuf};

use clipframe_common::config::AppConfig;
use clipframe_media_model::{AnchorPoint, CameraKeyframe};
use clipframe_processing_core::{TrajectoryConfig, TrajectorySolver};

pub fn run(
    config: &AppConfig,
    anchors: PathBuf,
    duration: f64,
    mood: &str,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let keyframes = solve(config, &anchors, duration, mood)?;
    let json = serde_json::to_string_pretty(&keyframes)?;

    match output {
        Some(path) => {
            std::fs::write(&path, json)?;
            eprintln!("Wrote {} keyframes to {}", keyframes.len(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Load anchors from `path` and run the solver over them.
pub fn solve(
    config: &AppConfig,
    path: &Path,
    duration: f64,
    mood: &str,
) -> anyhow::Result<Vec<CameraKeyframe>> {
    let mood = super::parse_mood(mood)?;
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read anchors {}: {e}", path.display()))?;
    let anchors: Vec<AnchorPoint> = serde_json::from_str(&content)?;

    let solver = TrajectorySolver::new(TrajectoryConfig::from_defaults(&config.trajectory, mood));
    let keyframes = solver.solve(&anchors, duration);
    tracing::info!(
        anchors = anchors.len(),
        keyframes = keyframes.len(),
        ?mood,
        "Trajectory solved"
    );
    Ok(keyframes)
}
