//! Time-range extraction for video and audio via the `ffmpeg` binary.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::models::{Location, Modality};
use crate::resolve::{ExtractBackend, ExtractError};

/// Cuts a `[start, end]` segment out of a media file with ffmpeg.
///
/// The first attempt stream-copies (`-c copy`) for speed; if ffmpeg refuses
/// (codec/container combinations that cannot be cut on non-keyframes), the
/// segment is re-encoded. One backend type serves both video and audio; the
/// two differ only in the modality they register under.
pub struct MediaBackend {
    modality: Modality,
}

impl MediaBackend {
    pub fn video() -> Self {
        Self { modality: Modality::Video }
    }

    pub fn audio() -> Self {
        Self { modality: Modality::Audio }
    }

    fn time_range(&self, location: &Location) -> Result<(f64, f64), ExtractError> {
        match (self.modality, location) {
            (Modality::Video, Location::Video { start, end })
            | (Modality::Audio, Location::Audio { start, end }) => {
                if *start < 0.0 || *end <= *start {
                    return Err(ExtractError::InvalidCoordinates(format!(
                        "invalid time range {}..{}",
                        start, end
                    )));
                }
                Ok((*start, *end))
            }
            (_, other) => Err(ExtractError::InvalidCoordinates(format!(
                "{} backend got a {} location",
                self.modality,
                other.modality()
            ))),
        }
    }
}

async fn run_ffmpeg(
    source: &Path,
    dest: &Path,
    start: f64,
    duration: f64,
    stream_copy: bool,
) -> Result<bool, ExtractError> {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-y")
        .arg("-ss")
        .arg(start.to_string())
        .arg("-i")
        .arg(source)
        .arg("-t")
        .arg(duration.to_string());
    if stream_copy {
        cmd.arg("-c").arg("copy");
    }
    cmd.arg(dest).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::piped());

    let output = match cmd.output().await {
        Ok(output) => output,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ExtractError::MissingTool("ffmpeg".to_string()))
        }
        Err(e) => return Err(e.into()),
    };

    if output.status.success() {
        Ok(true)
    } else if stream_copy {
        // Caller retries with re-encoding.
        Ok(false)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ExtractError::Failed(format!(
            "ffmpeg exited with {}: {}",
            output.status,
            stderr.lines().last().unwrap_or("")
        )))
    }
}

#[async_trait]
impl ExtractBackend for MediaBackend {
    fn modality(&self) -> Modality {
        self.modality
    }

    async fn extract(
        &self,
        location: &Location,
        source: &Path,
        dest: &Path,
    ) -> Result<(), ExtractError> {
        let (start, end) = self.time_range(location)?;

        if !tokio::fs::try_exists(source).await? {
            return Err(ExtractError::Failed(format!(
                "source file not found: {}",
                source.display()
            )));
        }

        let duration = end - start;
        if run_ffmpeg(source, dest, start, duration, true).await? {
            return Ok(());
        }
        let _ = tokio::fs::remove_file(dest).await;
        run_ffmpeg(source, dest, start, duration, false).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_rejects_inverted_range() {
        let tmp = TempDir::new().unwrap();
        let backend = MediaBackend::video();
        let err = backend
            .extract(
                &Location::Video { start: 30.0, end: 10.0 },
                &tmp.path().join("clip.mp4"),
                &tmp.path().join("out.mp4"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidCoordinates(_)));
    }

    #[tokio::test]
    async fn test_rejects_negative_start() {
        let tmp = TempDir::new().unwrap();
        let backend = MediaBackend::audio();
        let err = backend
            .extract(
                &Location::Audio { start: -1.0, end: 5.0 },
                &tmp.path().join("talk.mp3"),
                &tmp.path().join("out.mp3"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidCoordinates(_)));
    }

    #[tokio::test]
    async fn test_rejects_cross_modality_location() {
        let tmp = TempDir::new().unwrap();
        let backend = MediaBackend::video();
        let err = backend
            .extract(
                &Location::Audio { start: 0.0, end: 5.0 },
                &tmp.path().join("clip.mp4"),
                &tmp.path().join("out.mp4"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidCoordinates(_)));
    }

    #[tokio::test]
    async fn test_missing_source_fails_before_ffmpeg() {
        let tmp = TempDir::new().unwrap();
        let backend = MediaBackend::video();
        let err = backend
            .extract(
                &Location::Video { start: 0.0, end: 5.0 },
                &tmp.path().join("missing.mp4"),
                &tmp.path().join("out.mp4"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Failed(_)));
    }
}
