//! Line-range extraction for text and code files.

use std::path::Path;

use async_trait::async_trait;

use crate::models::{Location, Modality};
use crate::resolve::{ExtractBackend, ExtractError};

/// Copies an inclusive, 1-indexed line range into the destination file.
///
/// An `end` past the last line is clamped (providers often overshoot by a
/// line or two on the closing brace); a `start` past the last line is an
/// error.
pub struct TextBackend;

#[async_trait]
impl ExtractBackend for TextBackend {
    fn modality(&self) -> Modality {
        Modality::Text
    }

    async fn extract(
        &self,
        location: &Location,
        source: &Path,
        dest: &Path,
    ) -> Result<(), ExtractError> {
        let (start, end) = match location {
            Location::Text { lines } => *lines,
            other => {
                return Err(ExtractError::InvalidCoordinates(format!(
                    "text backend got a {} location",
                    other.modality()
                )))
            }
        };
        if start == 0 || end < start {
            return Err(ExtractError::InvalidCoordinates(format!(
                "invalid line range {}-{}",
                start, end
            )));
        }

        let content = tokio::fs::read_to_string(source).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidData {
                ExtractError::Unsupported(format!("{} is not valid UTF-8", source.display()))
            } else {
                ExtractError::Io(e)
            }
        })?;

        let lines: Vec<&str> = content.lines().collect();
        if start as usize > lines.len() {
            return Err(ExtractError::InvalidCoordinates(format!(
                "line {} past end of file ({} lines)",
                start,
                lines.len()
            )));
        }
        let end = (end as usize).min(lines.len());

        let mut slice = lines[start as usize - 1..end].join("\n");
        slice.push('\n');
        tokio::fs::write(dest, slice).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_extracts_inclusive_range() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("code.rs");
        let dest = tmp.path().join("out.rs");
        std::fs::write(&source, "one\ntwo\nthree\nfour\nfive\n").unwrap();

        TextBackend
            .extract(&Location::Text { lines: (2, 4) }, &source, &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "two\nthree\nfour\n");
    }

    #[tokio::test]
    async fn test_end_clamped_to_file_length() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("code.rs");
        let dest = tmp.path().join("out.rs");
        std::fs::write(&source, "one\ntwo\n").unwrap();

        TextBackend
            .extract(&Location::Text { lines: (1, 99) }, &source, &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "one\ntwo\n");
    }

    #[tokio::test]
    async fn test_start_past_eof_rejected() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("code.rs");
        std::fs::write(&source, "one\n").unwrap();

        let err = TextBackend
            .extract(
                &Location::Text { lines: (5, 9) },
                &source,
                &tmp.path().join("out.rs"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidCoordinates(_)));
    }

    #[tokio::test]
    async fn test_zero_start_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = TextBackend
            .extract(
                &Location::Text { lines: (0, 3) },
                &tmp.path().join("code.rs"),
                &tmp.path().join("out.rs"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidCoordinates(_)));
    }
}
