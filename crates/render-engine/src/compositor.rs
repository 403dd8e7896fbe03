//! Frame compositor: crops the source along the camera path, scales to the
//! output geometry, and blends the overlay layer on top.
//!
//! Two engines share one crop derivation. The GPU engine (feature `gpu`)
//! remaps UVs in a single textured draw and blends the overlay in a second
//! one. The CPU engine does the same with `image` and is used when no
//! adapter is available or when configured.
//!
//! The overlay raster is built once per render and reused for every frame.

use clipframe_common::config::CompositorPreference;
use clipframe_media_model::{CameraKeyframe, CropRect};
use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::error::PipelineError;
#[cfg(feature = "gpu")]
use crate::gpu::{GpuCompositor, GpuError};

enum Engine {
    Cpu { overlay: Option<RgbaImage> },
    #[cfg(feature = "gpu")]
    Gpu(Box<GpuCompositor>),
}

/// Per-render compositing state.
pub struct Compositor {
    source_size: (u32, u32),
    output_size: (u32, u32),
    engine: Engine,
}

impl Compositor {
    /// CPU compositor.
    pub fn new(source_size: (u32, u32), output_size: (u32, u32)) -> Self {
        Self {
            source_size,
            output_size,
            engine: Engine::Cpu { overlay: None },
        }
    }

    /// GPU compositor on the first available adapter.
    #[cfg(feature = "gpu")]
    pub async fn gpu(source_size: (u32, u32), output_size: (u32, u32)) -> Result<Self, GpuError> {
        let gpu = GpuCompositor::new(output_size).await?;
        Ok(Self {
            source_size,
            output_size,
            engine: Engine::Gpu(Box::new(gpu)),
        })
    }

    /// Compositor for a render, following `preference`.
    pub async fn create(
        source_size: (u32, u32),
        output_size: (u32, u32),
        preference: CompositorPreference,
    ) -> Result<Self, PipelineError> {
        match preference {
            CompositorPreference::Cpu => Ok(Self::new(source_size, output_size)),
            #[cfg(feature = "gpu")]
            CompositorPreference::Gpu => Ok(Self::gpu(source_size, output_size).await?),
            #[cfg(feature = "gpu")]
            CompositorPreference::Auto => match Self::gpu(source_size, output_size).await {
                Ok(compositor) => Ok(compositor),
                Err(e) => {
                    tracing::warn!(error = %e, "GPU compositor unavailable, compositing on the CPU");
                    Ok(Self::new(source_size, output_size))
                }
            },
            #[cfg(not(feature = "gpu"))]
            CompositorPreference::Gpu => Err(PipelineError::Compositor(
                "built without GPU support".to_string(),
            )),
            #[cfg(not(feature = "gpu"))]
            CompositorPreference::Auto => Ok(Self::new(source_size, output_size)),
        }
    }

    /// Attach a pre-rendered overlay layer. Layers of the wrong size are
    /// scaled to the output size. The GPU engine uploads it once here.
    pub fn with_overlay(mut self, overlay: RgbaImage) -> Self {
        let (w, h) = self.output_size;
        let overlay = if overlay.dimensions() == (w, h) {
            overlay
        } else {
            imageops::resize(&overlay, w, h, FilterType::Triangle)
        };
        match &mut self.engine {
            Engine::Cpu { overlay: slot } => *slot = Some(overlay),
            #[cfg(feature = "gpu")]
            Engine::Gpu(gpu) => gpu.set_overlay(&overlay),
        }
        self
    }

    pub fn output_size(&self) -> (u32, u32) {
        self.output_size
    }

    pub fn has_overlay(&self) -> bool {
        match &self.engine {
            Engine::Cpu { overlay } => overlay.is_some(),
            #[cfg(feature = "gpu")]
            Engine::Gpu(gpu) => gpu.has_overlay(),
        }
    }

    /// `gpu` or `cpu`.
    pub fn engine_name(&self) -> &'static str {
        match &self.engine {
            Engine::Cpu { .. } => "cpu",
            #[cfg(feature = "gpu")]
            Engine::Gpu(_) => "gpu",
        }
    }

    /// Crop window for a camera position. Without one the window is the
    /// largest centered rectangle with the output aspect.
    pub fn crop_for(&self, keyframe: Option<&CameraKeyframe>) -> CropRect {
        let (cx, cy, scale) = keyframe
            .map(|k| (k.center_x, k.center_y, k.scale))
            .unwrap_or((0.5, 0.5, 1.0));
        CropRect::fit_aspect(
            aspect(self.source_size),
            aspect(self.output_size),
            cx,
            cy,
            scale,
        )
    }

    /// Produce one output frame.
    pub fn render(&mut self, source: &RgbaImage, crop: &CropRect) -> Result<RgbaImage, PipelineError> {
        match &mut self.engine {
            Engine::Cpu { overlay } => Ok(render_cpu(source, crop, self.output_size, overlay.as_ref())),
            #[cfg(feature = "gpu")]
            Engine::Gpu(gpu) => Ok(gpu.render(source, crop)?),
        }
    }
}

fn render_cpu(
    source: &RgbaImage,
    crop: &CropRect,
    (out_w, out_h): (u32, u32),
    overlay: Option<&RgbaImage>,
) -> RgbaImage {
    let (src_w, src_h) = source.dimensions();
    let (x, y, w, h) = crop.to_pixels(src_w, src_h);

    let cropped = imageops::crop_imm(source, x, y, w, h).to_image();
    let mut frame = if (w, h) == (out_w, out_h) {
        cropped
    } else {
        imageops::resize(&cropped, out_w, out_h, FilterType::Triangle)
    };

    if let Some(overlay) = overlay {
        imageops::overlay(&mut frame, overlay, 0, 0);
    }
    frame
}

fn aspect((w, h): (u32, u32)) -> f64 {
    w.max(1) as f64 / h.max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    /// Left half red, right half blue.
    fn split_source(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, _| {
            if x < w / 2 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        })
    }

    #[test]
    fn test_vertical_crop_follows_center() {
        let mut compositor = Compositor::new((320, 180), (90, 160));
        let source = split_source(320, 180);

        let left = compositor.crop_for(Some(&CameraKeyframe::new(0.0, 0.1, 0.5, 1.0)));
        let out = compositor.render(&source, &left).unwrap();
        assert_eq!(out.dimensions(), (90, 160));
        assert_eq!(out.get_pixel(45, 80)[0], 255);

        let right = compositor.crop_for(Some(&CameraKeyframe::new(0.0, 0.9, 0.5, 1.0)));
        let out = compositor.render(&source, &right).unwrap();
        assert_eq!(out.get_pixel(45, 80)[2], 255);
    }

    #[test]
    fn test_default_crop_is_centered_full_height() {
        let compositor = Compositor::new((1920, 1080), (1080, 1920));
        let crop = compositor.crop_for(None);
        assert!((crop.h - 1.0).abs() < 1e-9);
        assert!((crop.center().x - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_overlay_blends_source_over() {
        let mut layer = RgbaImage::new(8, 8);
        layer.put_pixel(0, 0, Rgba([0, 255, 0, 255]));
        let mut compositor = Compositor::new((8, 8), (8, 8)).with_overlay(layer);
        assert!(compositor.has_overlay());

        let source = RgbaImage::from_pixel(8, 8, Rgba([10, 10, 10, 255]));
        let out = compositor.render(&source, &CropRect::FULL).unwrap();
        assert_eq!(*out.get_pixel(0, 0), Rgba([0, 255, 0, 255]));
        // Transparent overlay pixels leave the video untouched.
        assert_eq!(*out.get_pixel(5, 5), Rgba([10, 10, 10, 255]));
    }

    #[tokio::test]
    async fn test_cpu_preference_never_touches_the_gpu() {
        let compositor = Compositor::create((64, 36), (36, 64), CompositorPreference::Cpu)
            .await
            .unwrap();
        assert_eq!(compositor.engine_name(), "cpu");
        assert!(!compositor.has_overlay());
    }

    #[tokio::test]
    async fn test_auto_preference_always_yields_a_compositor() {
        let mut compositor = Compositor::create((320, 180), (90, 160), CompositorPreference::Auto)
            .await
            .unwrap();
        let source = split_source(320, 180);
        let crop = compositor.crop_for(Some(&CameraKeyframe::new(0.0, 0.1, 0.5, 1.0)));
        let out = compositor.render(&source, &crop).unwrap();
        assert_eq!(out.dimensions(), (90, 160));
        assert_eq!(out.get_pixel(45, 80)[0], 255);
    }
}
