//! Region cropping for images.

use std::path::Path;

use async_trait::async_trait;

use crate::models::{Location, Modality};
use crate::resolve::{ExtractBackend, ExtractError};

/// Crops a normalized `[x1, y1, x2, y2]` bounding box out of an image with
/// the `image` crate. Coordinates are fractions of width/height measured
/// from the top-left; the crop is clamped to the image bounds after scaling
/// to pixels.
pub struct ImageBackend;

#[async_trait]
impl ExtractBackend for ImageBackend {
    fn modality(&self) -> Modality {
        Modality::Image
    }

    async fn extract(
        &self,
        location: &Location,
        source: &Path,
        dest: &Path,
    ) -> Result<(), ExtractError> {
        let bbox = match location {
            Location::Image { bbox } => *bbox,
            other => {
                return Err(ExtractError::InvalidCoordinates(format!(
                    "image backend got a {} location",
                    other.modality()
                )))
            }
        };

        let source = source.to_path_buf();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || crop_image(&source, &dest, bbox))
            .await
            .map_err(|e| ExtractError::Failed(format!("crop task panicked: {}", e)))?
    }
}

fn crop_image(
    source: &Path,
    dest: &Path,
    (x1, y1, x2, y2): (f64, f64, f64, f64),
) -> Result<(), ExtractError> {
    let img = image::open(source)
        .map_err(|e| ExtractError::Unsupported(format!("{}: {}", source.display(), e)))?;

    let (width, height) = (img.width() as f64, img.height() as f64);
    let px1 = (x1 * width).floor().max(0.0) as u32;
    let py1 = (y1 * height).floor().max(0.0) as u32;
    let px2 = ((x2 * width).ceil() as u32).min(img.width());
    let py2 = ((y2 * height).ceil() as u32).min(img.height());

    if px2 <= px1 || py2 <= py1 {
        return Err(ExtractError::InvalidCoordinates(format!(
            "bbox ({}, {}, {}, {}) collapses to an empty region",
            x1, y1, x2, y2
        )));
    }

    let cropped = img.crop_imm(px1, py1, px2 - px1, py2 - py1);
    cropped
        .save(dest)
        .map_err(|e| ExtractError::Failed(format!("failed to write {}: {}", dest.display(), e)))?;
    Ok(())
}
