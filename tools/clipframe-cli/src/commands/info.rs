//! Show container information.

use std::path::PathBuf;

use clipframe_media_model::{TrackConfig, TrackKind, TrackParams};

pub fn run(source: PathBuf) -> anyhow::Result<()> {
    let (data, reader) = super::open_source(&source)?;
    let info = reader.info();

    println!("Source: {}", source.display());
    println!("  Size: {} bytes", data.len());
    println!("  Brand: {}", info.major_brand);
    println!("  Duration: {:.3}s", info.duration_secs());
    println!();

    println!("Video:");
    print_track(&info.video);
    let video = reader.all_samples(TrackKind::Video);
    let sync = video.iter().filter(|s| s.is_key()).count();
    println!("  Samples: {} ({} sync)", info.video_sample_count, sync);
    if let Some(fps) = info.average_fps() {
        println!("  Average FPS: {fps:.2}");
    }
    let reordered = video.iter().any(|s| s.composition_offset_us() != 0);
    println!("  Reordered frames: {}", if reordered { "yes" } else { "no" });
    println!();

    match &info.audio {
        Some(audio) => {
            println!("Audio:");
            print_track(audio);
            println!("  Samples: {}", info.audio_sample_count);
        }
        None => println!("Audio: none"),
    }

    Ok(())
}

fn print_track(config: &TrackConfig) {
    println!("  Codec: {}", config.codec);
    match config.params {
        TrackParams::Video { width, height } => println!("  Resolution: {width}x{height}"),
        TrackParams::Audio {
            channels,
            sample_rate,
        } => println!("  Format: {channels}ch @ {sample_rate}Hz"),
    }
    println!("  Description: {} bytes", config.description.len());
}
