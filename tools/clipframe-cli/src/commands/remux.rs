//! Trim a clip without re-encoding.

use std::path::PathBuf;

use clipframe_container::PassthroughRemuxer;

pub fn run(source: PathBuf, output: PathBuf, start: f64, end: Option<f64>) -> anyhow::Result<()> {
    let (_, reader) = super::open_source(&source)?;
    let end = end.unwrap_or_else(|| reader.info().duration_secs());

    println!("Remuxing {} [{start:.3}s, {end:.3}s]", source.display());

    let remuxed = PassthroughRemuxer::new(&reader)
        .remux(start, end)
        .map_err(|e| anyhow::anyhow!("Remux failed: {e}"))?;

    std::fs::write(&output, &remuxed.data)?;

    println!(
        "  Copied {} video / {} audio samples",
        remuxed.video_samples, remuxed.audio_samples
    );
    println!(
        "  Starts at source {:.3}s, duration {:.3}s",
        remuxed.source_start_us as f64 / 1_000_000.0,
        remuxed.duration_us as f64 / 1_000_000.0
    );
    println!("Remux complete: {}", output.display());
    Ok(())
}
