//! Error types shared across Clipframe crates.

use std::path::PathBuf;

/// Top-level error type for Clipframe operations.
///
/// Library crates keep their own narrow error enums; this type is what
/// those collapse into at tool and worker boundaries.
#[derive(Debug, thiserror::Error)]
pub enum ClipframeError {
    #[error("Container error: {message}")]
    Container { message: String },

    #[error("Codec error: {message}")]
    Codec { message: String },

    #[error("Processing error: {message}")]
    Processing { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ClipframeError.
pub type ClipframeResult<T> = Result<T, ClipframeError>;

impl ClipframeError {
    pub fn container(msg: impl Into<String>) -> Self {
        Self::Container {
            message: msg.into(),
        }
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec {
            message: msg.into(),
        }
    }

    pub fn processing(msg: impl Into<String>) -> Self {
        Self::Processing {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructor_messages() {
        let err = ClipframeError::render("encoder stalled");
        assert_eq!(err.to_string(), "Render error: encoder stalled");

        let err = ClipframeError::unsupported("hevc");
        assert_eq!(err.to_string(), "Unsupported operation: hevc");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ClipframeError = io.into();
        assert!(matches!(err, ClipframeError::Io(_)));
    }
}
