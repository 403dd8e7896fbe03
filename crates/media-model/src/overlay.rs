//! Overlay elements drawn over the reframed video.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What an overlay element draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayKind {
    /// `content` is the text to draw.
    Text,
    /// `content` is a path to an image file.
    Image,
    /// `content` is a path to a still frame representing the clip.
    Video,
}

/// Where an element is pinned in the output frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverlayAnchor {
    TopLeft,
    TopCenter,
    TopRight,
    BottomLeft,
    #[default]
    BottomCenter,
    BottomRight,
}

impl OverlayAnchor {
    pub fn is_bottom(&self) -> bool {
        matches!(
            self,
            Self::BottomLeft | Self::BottomCenter | Self::BottomRight
        )
    }

    /// Horizontal alignment: 0 = left, 1 = center, 2 = right.
    pub fn column(&self) -> u8 {
        match self {
            Self::TopLeft | Self::BottomLeft => 0,
            Self::TopCenter | Self::BottomCenter => 1,
            Self::TopRight | Self::BottomRight => 2,
        }
    }
}

/// An RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    pub const WHITE: Rgba = Rgba([255, 255, 255, 255]);
    pub const BLACK: Rgba = Rgba([0, 0, 0, 255]);
    pub const TRANSLUCENT_BLACK: Rgba = Rgba([0, 0, 0, 160]);
}

/// Visual styling for an overlay element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    /// TrueType/OpenType font used for text elements.
    pub font_path: Option<PathBuf>,

    /// Font size as a fraction of the output height.
    pub font_size: f64,

    /// Text color.
    pub color: Rgba,

    /// Optional box drawn behind text, sized to the measured text bounds.
    pub background: Option<Rgba>,

    /// Padding around text inside the background box, in pixels.
    pub padding_px: u32,

    /// Width of image/video elements as a percentage of the output width.
    pub width_percent: f64,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            font_path: None,
            font_size: 0.045,
            color: Rgba::WHITE,
            background: Some(Rgba::TRANSLUCENT_BLACK),
            padding_px: 16,
            width_percent: 30.0,
        }
    }
}

/// One overlay layer entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayElement {
    pub id: String,
    pub kind: OverlayKind,
    pub content: String,
    #[serde(default)]
    pub anchor: OverlayAnchor,
    /// Extra scale applied on top of the style size.
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub style: OverlayStyle,
}

fn default_scale() -> f64 {
    1.0
}

impl OverlayElement {
    pub fn text(id: impl Into<String>, text: impl Into<String>, anchor: OverlayAnchor) -> Self {
        Self {
            id: id.into(),
            kind: OverlayKind::Text,
            content: text.into(),
            anchor,
            scale: 1.0,
            style: OverlayStyle::default(),
        }
    }

    pub fn image(id: impl Into<String>, path: impl Into<String>, anchor: OverlayAnchor) -> Self {
        Self {
            id: id.into(),
            kind: OverlayKind::Image,
            content: path.into(),
            anchor,
            scale: 1.0,
            style: OverlayStyle::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_serde_names() {
        let json = serde_json::to_string(&OverlayAnchor::BottomCenter).unwrap();
        assert_eq!(json, "\"bottom-center\"");
        let parsed: OverlayAnchor = serde_json::from_str("\"top-right\"").unwrap();
        assert_eq!(parsed, OverlayAnchor::TopRight);
    }

    #[test]
    fn test_anchor_geometry_helpers() {
        assert!(OverlayAnchor::BottomLeft.is_bottom());
        assert!(!OverlayAnchor::TopCenter.is_bottom());
        assert_eq!(OverlayAnchor::TopRight.column(), 2);
        assert_eq!(OverlayAnchor::BottomCenter.column(), 1);
    }

    #[test]
    fn test_element_defaults_from_minimal_json() {
        let raw = r#"{"id":"t1","kind":"text","content":"Hello"}"#;
        let element: OverlayElement = serde_json::from_str(raw).unwrap();
        assert_eq!(element.anchor, OverlayAnchor::BottomCenter);
        assert_eq!(element.scale, 1.0);
        assert_eq!(element.style.color, Rgba::WHITE);
    }
}
