//! Render a clip through the transcode pipeline.

use std::io::Write;
use std::path::PathBuf;

use clipframe_common::config::AppConfig;
use clipframe_media_model::{CameraKeyframe, OverlayElement, RenderConfig};
use clipframe_render_engine::{
    default_backend, PipelineConfig, RenderEvent, RenderRequest, RenderWorker,
};

pub struct RenderArgs {
    pub source: PathBuf,
    pub output: PathBuf,
    pub request: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub fps: Option<u32>,
    pub bitrate: Option<u64>,
    pub start: f64,
    pub end: Option<f64>,
    pub keyframes: Option<PathBuf>,
    pub anchors: Option<PathBuf>,
    pub mood: String,
    pub overlays: Option<PathBuf>,
}

pub async fn run(config: &AppConfig, args: RenderArgs) -> anyhow::Result<()> {
    let (data, reader) = super::open_source(&args.source)?;
    let duration = reader.info().duration_secs();

    let mut request = match &args.request {
        Some(path) => read_json::<RenderConfig>(path)?,
        None => {
            let mut request = RenderConfig::trim(
                args.width,
                args.height,
                args.fps.unwrap_or(config.render.fps),
                args.start,
                args.end.unwrap_or(duration),
            );
            request.bitrate = args.bitrate;
            request
        }
    };

    if let Some(path) = &args.keyframes {
        request.keyframes = Some(read_json::<Vec<CameraKeyframe>>(path)?);
    }
    if let Some(path) = &args.anchors {
        let keyframes = super::trajectory::solve(config, path, duration, &args.mood)?;
        request.keyframes = Some(keyframes);
    }
    if let Some(path) = &args.overlays {
        request.overlays = Some(read_json::<Vec<OverlayElement>>(path)?);
    }
    request
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid render request: {e}"))?;

    let backend = default_backend().ok_or_else(|| {
        anyhow::anyhow!(
            "No codec backend in this build. Rebuild with `--features openh264`, \
             or use `clipframe remux` for a plain trim"
        )
    })?;

    println!("Rendering {}", args.source.display());
    println!("  Output: {}", args.output.display());
    println!(
        "  Geometry: {}x{} @ {}fps",
        request.width, request.height, request.fps
    );
    println!("  Trim: [{:.3}s, {:.3}s)", request.start_s, request.end_s);
    println!("  Backend: {}", backend.name());

    let worker = RenderWorker::new(backend, PipelineConfig::from_defaults(&config.render));
    let handle = worker.spawn(RenderRequest {
        source: data,
        config: request,
    })?;
    let cancel = handle.cancel_flag();

    let mut waiter = tokio::task::spawn_blocking(move || {
        handle.wait(|p| {
            print!(
                "\r  {:?}: {:.0}% ({}/{} frames, ETA: {:.0}s)  ",
                p.phase, p.percent, p.frames_processed, p.total_frames, p.eta_secs,
            );
            let _ = std::io::stdout().flush();
        })
    });

    let terminal = tokio::select! {
        joined = &mut waiter => joined?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, cancelling render");
            cancel.cancel();
            waiter.await?
        }
    };

    match terminal {
        Some(RenderEvent::Done(output)) => {
            std::fs::write(&args.output, &output.data)?;
            println!("\nRender complete: {}", args.output.display());
            println!("  {}", serde_json::to_string(&output.stats)?);
            Ok(())
        }
        Some(RenderEvent::Error(message)) => Err(anyhow::anyhow!("Render failed: {message}")),
        Some(RenderEvent::Progress(_)) | None => {
            println!("\nRender cancelled");
            Ok(())
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", path.display()))
}
