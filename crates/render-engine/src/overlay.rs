//! Overlay layer rasterization.
//!
//! All overlay elements of a render are drawn once into a single RGBA
//! raster at the output resolution. The compositor then blends that raster
//! over every frame.

use std::path::Path;

use clipframe_media_model::{OverlayAnchor, OverlayElement, OverlayKind, OverlayStyle};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use rusttype::{point, Font, PositionedGlyph, Scale};

use crate::error::PipelineError;

/// Horizontal margin and top margin, as a fraction of the output size.
const EDGE_MARGIN: f64 = 0.05;
/// Bottom anchors sit higher to stay clear of player controls.
const BOTTOM_MARGIN: f64 = 0.15;
/// Text wraps before reaching this fraction of the output width.
const MAX_TEXT_WIDTH: f64 = 0.9;

const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Renders overlay elements into one output-sized layer.
#[derive(Default)]
pub struct OverlayRasterizer {
    default_font: Option<Font<'static>>,
}

impl OverlayRasterizer {
    /// Rasterizer using the first system font found for unstyled text.
    pub fn new() -> Self {
        let default_font = SYSTEM_FONTS
            .iter()
            .map(Path::new)
            .find_map(|path| load_font(path).ok());
        if default_font.is_none() {
            tracing::debug!("No system font found; text overlays need an explicit font_path");
        }
        Self { default_font }
    }

    /// Rasterizer with an explicit default font.
    pub fn with_font(font: Font<'static>) -> Self {
        Self {
            default_font: Some(font),
        }
    }

    /// Draw every element, in list order, into a transparent raster.
    ///
    /// Image files that can not be read fail the render. Text without any
    /// usable font is skipped with a warning.
    pub fn rasterize(
        &self,
        elements: &[OverlayElement],
        width: u32,
        height: u32,
    ) -> Result<RgbaImage, PipelineError> {
        let mut layer = RgbaImage::new(width, height);

        for element in elements {
            match element.kind {
                OverlayKind::Text => self.draw_text(&mut layer, element)?,
                OverlayKind::Image | OverlayKind::Video => draw_picture(&mut layer, element)?,
            }
        }

        tracing::debug!(elements = elements.len(), width, height, "Overlay layer rasterized");
        Ok(layer)
    }

    fn draw_text(&self, layer: &mut RgbaImage, element: &OverlayElement) -> Result<(), PipelineError> {
        if element.content.trim().is_empty() {
            return Ok(());
        }

        let explicit;
        let font = match &element.style.font_path {
            Some(path) => {
                explicit = load_font(path)?;
                &explicit
            }
            None => match &self.default_font {
                Some(font) => font,
                None => {
                    tracing::warn!(id = %element.id, "Skipping text overlay: no font available");
                    return Ok(());
                }
            },
        };

        let (width, height) = layer.dimensions();
        let style = &element.style;
        let px = (style.font_size * element.scale * height as f64).max(1.0) as f32;
        let scale = Scale::uniform(px);
        let v_metrics = font.v_metrics(scale);
        let line_height = (v_metrics.ascent - v_metrics.descent + v_metrics.line_gap).ceil();

        let max_width = (width as f64 * MAX_TEXT_WIDTH) as f32;
        let lines = wrap_lines(font, scale, &element.content, max_width);
        let text_width = lines
            .iter()
            .map(|line| measure(font, scale, line))
            .fold(0.0f32, f32::max)
            .ceil() as u32;
        let text_height = (line_height * lines.len() as f32).ceil() as u32;

        let pad = style.padding_px;
        let box_w = text_width + 2 * pad;
        let box_h = text_height + 2 * pad;
        let (box_x, box_y) = place(element.anchor, (box_w, box_h), (width, height));

        if let Some(bg) = style.background {
            draw_filled_rect_mut(
                layer,
                Rect::at(box_x, box_y).of_size(box_w.max(1), box_h.max(1)),
                Rgba(bg.0),
            );
        }

        for (i, line) in lines.iter().enumerate() {
            let line_w = measure(font, scale, line);
            let offset_x = match element.anchor.column() {
                0 => 0.0,
                1 => (text_width as f32 - line_w) / 2.0,
                _ => text_width as f32 - line_w,
            };
            let origin = point(
                box_x as f32 + pad as f32 + offset_x,
                box_y as f32 + pad as f32 + line_height * i as f32 + v_metrics.ascent,
            );
            let glyphs: Vec<PositionedGlyph<'_>> = font.layout(line, scale, origin).collect();
            draw_glyphs(layer, &glyphs, style);
        }

        Ok(())
    }
}

/// Image and video elements: scaled to `width_percent` of the output and
/// placed by anchor.
fn draw_picture(layer: &mut RgbaImage, element: &OverlayElement) -> Result<(), PipelineError> {
    let picture = image::open(&element.content)
        .map_err(|e| PipelineError::Overlay(format!("{}: {e}", element.content)))?
        .to_rgba8();

    let (width, height) = layer.dimensions();
    let target_w = (width as f64 * element.style.width_percent / 100.0 * element.scale)
        .round()
        .clamp(1.0, width as f64) as u32;
    let (pw, ph) = picture.dimensions();
    let target_h = ((ph as f64 * target_w as f64 / pw.max(1) as f64).round() as u32).max(1);

    let scaled = imageops::resize(&picture, target_w, target_h, FilterType::Triangle);
    let (x, y) = place(element.anchor, (target_w, target_h), (width, height));
    imageops::overlay(layer, &scaled, x as i64, y as i64);
    Ok(())
}

/// Top-left corner for a box of `size` pinned at `anchor`.
pub fn place(anchor: OverlayAnchor, size: (u32, u32), frame: (u32, u32)) -> (i32, i32) {
    let (w, h) = (size.0 as f64, size.1 as f64);
    let (fw, fh) = (frame.0 as f64, frame.1 as f64);

    let x = match anchor.column() {
        0 => fw * EDGE_MARGIN,
        1 => (fw - w) / 2.0,
        _ => fw * (1.0 - EDGE_MARGIN) - w,
    };
    let y = if anchor.is_bottom() {
        fh * (1.0 - BOTTOM_MARGIN) - h
    } else {
        fh * EDGE_MARGIN
    };

    (x.round() as i32, y.round() as i32)
}

fn load_font(path: &Path) -> Result<Font<'static>, PipelineError> {
    let data = std::fs::read(path)
        .map_err(|e| PipelineError::Overlay(format!("font {}: {e}", path.display())))?;
    Font::try_from_vec(data)
        .ok_or_else(|| PipelineError::Overlay(format!("font {} is not a TrueType font", path.display())))
}

fn measure(font: &Font<'_>, scale: Scale, text: &str) -> f32 {
    font.layout(text, scale, point(0.0, 0.0))
        .last()
        .map(|g| g.position().x + g.unpositioned().h_metrics().advance_width)
        .unwrap_or(0.0)
}

/// Greedy word wrap. Explicit newlines are kept.
fn wrap_lines(font: &Font<'_>, scale: Scale, text: &str, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{current} {word}")
            };
            if !current.is_empty() && measure(font, scale, &candidate) > max_width {
                lines.push(std::mem::replace(&mut current, word.to_string()));
            } else {
                current = candidate;
            }
        }
        lines.push(current);
    }
    lines
}

fn draw_glyphs(layer: &mut RgbaImage, glyphs: &[PositionedGlyph<'_>], style: &OverlayStyle) {
    let (width, height) = layer.dimensions();
    let [r, g, b, a] = style.color.0;

    for glyph in glyphs {
        let Some(bb) = glyph.pixel_bounding_box() else {
            continue;
        };
        glyph.draw(|gx, gy, coverage| {
            let x = bb.min.x + gx as i32;
            let y = bb.min.y + gy as i32;
            if x < 0 || y < 0 || x >= width as i32 || y >= height as i32 {
                return;
            }
            let alpha = (coverage * a as f32).round() as u8;
            if alpha == 0 {
                return;
            }
            let pixel = layer.get_pixel_mut(x as u32, y as u32);
            blend_over(pixel, Rgba([r, g, b, alpha]));
        });
    }
}

/// Source-over blend of `top` onto `pixel`, straight alpha.
fn blend_over(pixel: &mut Rgba<u8>, top: Rgba<u8>) {
    let ta = top[3] as f32 / 255.0;
    let ba = pixel[3] as f32 / 255.0;
    let out_a = ta + ba * (1.0 - ta);
    if out_a <= 0.0 {
        *pixel = Rgba([0, 0, 0, 0]);
        return;
    }
    let mut out = [0u8; 4];
    for c in 0..3 {
        let v = (top[c] as f32 * ta + pixel[c] as f32 * ba * (1.0 - ta)) / out_a;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round() as u8;
    *pixel = Rgba(out);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_bottom_uses_larger_margin() {
        let frame = (1080, 1920);
        let (_, top_y) = place(OverlayAnchor::TopCenter, (200, 100), frame);
        let (_, bottom_y) = place(OverlayAnchor::BottomCenter, (200, 100), frame);
        assert_eq!(top_y, 96);
        assert_eq!(bottom_y, 1632 - 100);
    }

    #[test]
    fn test_place_columns() {
        let frame = (1000, 1000);
        assert_eq!(place(OverlayAnchor::TopLeft, (100, 50), frame).0, 50);
        assert_eq!(place(OverlayAnchor::TopCenter, (100, 50), frame).0, 450);
        assert_eq!(place(OverlayAnchor::BottomRight, (100, 50), frame).0, 850);
    }

    #[test]
    fn test_empty_list_is_transparent() {
        let layer = OverlayRasterizer::default().rasterize(&[], 16, 16).unwrap();
        assert!(layer.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_text_without_font_is_skipped() {
        let element = OverlayElement::text("t", "hello", OverlayAnchor::BottomCenter);
        let layer = OverlayRasterizer::default()
            .rasterize(&[element], 64, 64)
            .unwrap();
        assert!(layer.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_image_element_scaled_to_width_percent() {
        let dir = std::env::temp_dir().join(format!("clipframe-overlay-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("logo.png");
        RgbaImage::from_pixel(20, 10, Rgba([255, 0, 0, 255]))
            .save(&path)
            .unwrap();

        let mut element = OverlayElement::image("logo", path.to_string_lossy(), OverlayAnchor::TopLeft);
        element.style.width_percent = 50.0;
        let layer = OverlayRasterizer::default()
            .rasterize(&[element], 100, 100)
            .unwrap();

        // 50 px wide, 25 px tall, 5 px from the top-left corner.
        assert_eq!(layer.get_pixel(5, 5)[0], 255);
        assert_eq!(layer.get_pixel(54, 29)[3], 255);
        assert_eq!(layer.get_pixel(56, 5)[3], 0);
        assert_eq!(layer.get_pixel(5, 31)[3], 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_image_is_an_overlay_error() {
        let element = OverlayElement::image("x", "/nonexistent/overlay.png", OverlayAnchor::TopLeft);
        let err = OverlayRasterizer::default()
            .rasterize(&[element], 10, 10)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Overlay(_)));
    }

    #[test]
    fn test_blend_over_transparent_takes_top() {
        let mut pixel = Rgba([0, 0, 0, 0]);
        blend_over(&mut pixel, Rgba([200, 100, 50, 128]));
        assert_eq!(pixel, Rgba([200, 100, 50, 128]));
    }
}
