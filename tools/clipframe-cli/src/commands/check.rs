//! Check codec capabilities.

use std::path::PathBuf;

use clipframe_common::config::{AppConfig, CompositorPreference};
use clipframe_render_engine::{default_backend, Compositor, EncoderSettings};

pub async fn run(
    config: &AppConfig,
    source: Option<PathBuf>,
    width: u32,
    height: u32,
) -> anyhow::Result<()> {
    println!("Clipframe Capability Check");
    println!("{}", "=".repeat(50));

    let preference = config.render.compositor;
    match Compositor::create((width, height), (width, height), preference).await {
        Ok(compositor) if compositor.engine_name() == "gpu" => println!("[OK] Compositor: GPU"),
        Ok(_) if preference == CompositorPreference::Cpu => println!("[OK] Compositor: CPU (configured)"),
        Ok(_) => println!("[WARN] Compositor: no GPU adapter, frames composite on the CPU"),
        Err(e) => println!("[FAIL] Compositor: {e}"),
    }

    let Some(backend) = default_backend() else {
        println!("[WARN] No codec backend compiled in");
        println!("       Passthrough trims (`clipframe remux`) still work.");
        println!("       Rebuild with `--features openh264` to render.");
        return Ok(());
    };
    println!("[OK] Codec backend: {}", backend.name());

    let fps = config.render.fps;
    let bitrate = config.render.resolve_bitrate(None, width, height, fps);
    let settings = EncoderSettings::h264(width, height, fps, bitrate);
    let mut all_ok = match backend.probe(&settings) {
        Ok(()) => {
            println!("[OK] Encode {width}x{height} @ {fps}fps ({bitrate} bits/s)");
            true
        }
        Err(e) => {
            println!("[FAIL] Encode {width}x{height}: {e}");
            false
        }
    };

    if let Some(path) = source {
        let (_, reader) = super::open_source(&path)?;
        let video = &reader.info().video;
        match backend.probe_decoder(video) {
            Ok(()) => println!("[OK] Decode {} ({})", path.display(), video.codec),
            Err(e) => {
                println!("[FAIL] Decode {}: {e}", path.display());
                all_ok = false;
            }
        }
    }

    println!();
    if all_ok {
        println!("All probes passed. Clipframe is ready to render.");
    } else {
        println!("Some probes failed. See above.");
    }
    Ok(())
}
