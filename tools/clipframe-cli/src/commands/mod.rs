pub mod check;
pub mod info;
pub mod remux;
pub mod render;
pub mod trajectory;

use std::path::Path;

use bytes::Bytes;
use clipframe_container::ContainerReader;

/// Read and parse a source container.
pub fn open_source(path: &Path) -> anyhow::Result<(Bytes, ContainerReader)> {
    let data = Bytes::from(
        std::fs::read(path).map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?,
    );
    let reader = ContainerReader::open(data.clone())
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {e}", path.display()))?;
    Ok((data, reader))
}

/// Parse a camera mood name.
pub fn parse_mood(mood: &str) -> anyhow::Result<clipframe_processing_core::Mood> {
    use clipframe_processing_core::Mood;
    match mood {
        "linear" => Ok(Mood::Linear),
        "cut" => Ok(Mood::Cut),
        "smooth-cut" => Ok(Mood::SmoothCut),
        _ => Err(anyhow::anyhow!(
            "Unknown mood: {mood}. Use: linear, cut, smooth-cut"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipframe_processing_core::Mood;

    #[test]
    fn test_parse_mood() {
        assert_eq!(parse_mood("linear").unwrap(), Mood::Linear);
        assert_eq!(parse_mood("smooth-cut").unwrap(), Mood::SmoothCut);
        assert!(parse_mood("dolly").is_err());
    }

    #[test]
    fn test_open_missing_source() {
        let err = open_source(Path::new("/nonexistent/clip.mp4")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
