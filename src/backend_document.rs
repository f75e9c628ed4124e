//! Page extraction for PDF documents.

use std::path::Path;

use async_trait::async_trait;
use lopdf::Document;

use crate::models::{Location, Modality};
use crate::resolve::{ExtractBackend, ExtractError};

/// Builds a new PDF containing only the requested pages, via `lopdf`.
///
/// Page numbers are 1-indexed. Pages beyond the document's length are
/// rejected rather than silently dropped, so a map whose provider
/// hallucinated page numbers fails loudly.
pub struct DocumentBackend;

#[async_trait]
impl ExtractBackend for DocumentBackend {
    fn modality(&self) -> Modality {
        Modality::Document
    }

    async fn extract(
        &self,
        location: &Location,
        source: &Path,
        dest: &Path,
    ) -> Result<(), ExtractError> {
        let pages = match location {
            Location::Document { pages } => {
                let mut pages = pages.clone();
                pages.sort_unstable();
                pages.dedup();
                pages
            }
            other => {
                return Err(ExtractError::InvalidCoordinates(format!(
                    "document backend got a {} location",
                    other.modality()
                )))
            }
        };

        let source = source.to_path_buf();
        let dest = dest.to_path_buf();

        // lopdf is synchronous and page surgery on large files is CPU-bound.
        tokio::task::spawn_blocking(move || extract_pages(&source, &dest, &pages))
            .await
            .map_err(|e| ExtractError::Failed(format!("extraction task panicked: {}", e)))?
    }
}

fn extract_pages(source: &Path, dest: &Path, wanted: &[u32]) -> Result<(), ExtractError> {
    let mut doc = Document::load(source)
        .map_err(|e| ExtractError::Unsupported(format!("{}: {}", source.display(), e)))?;

    let total = doc.get_pages().len() as u32;
    if let Some(&bad) = wanted.iter().find(|&&p| p == 0 || p > total) {
        return Err(ExtractError::InvalidCoordinates(format!(
            "page {} out of range (document has {} pages)",
            bad, total
        )));
    }

    let unwanted: Vec<u32> = (1..=total).filter(|p| !wanted.contains(p)).collect();
    if !unwanted.is_empty() {
        doc.delete_pages(&unwanted);
    }
    doc.prune_objects();

    doc.save(dest)
        .map_err(|e| ExtractError::Failed(format!("failed to write {}: {}", dest.display(), e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;
    use lopdf::{Object, Stream};
    use tempfile::TempDir;

    // Minimal valid multi-page PDF built in memory.
    fn write_pdf(path: &Path, page_count: usize) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut kids = Vec::new();
        for _ in 0..page_count {
            let content = Stream::new(dictionary! {}, Vec::new());
            let content_id = doc.add_object(content);
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_count as i64,
                "MediaBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(612),
                    Object::Integer(792),
                ],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    #[tokio::test]
    async fn test_extracts_requested_pages() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("book.pdf");
        let dest = tmp.path().join("out.pdf");
        write_pdf(&source, 5);

        let backend = DocumentBackend;
        backend
            .extract(&Location::Document { pages: vec![2, 3] }, &source, &dest)
            .await
            .unwrap();

        let result = Document::load(&dest).unwrap();
        assert_eq!(result.get_pages().len(), 2);
    }

    #[tokio::test]
    async fn test_page_out_of_range() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("book.pdf");
        write_pdf(&source, 3);

        let backend = DocumentBackend;
        let err = backend
            .extract(
                &Location::Document { pages: vec![2, 9] },
                &source,
                &tmp.path().join("out.pdf"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidCoordinates(_)));
    }

    #[tokio::test]
    async fn test_non_pdf_is_unsupported() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("notes.pdf");
        std::fs::write(&source, "this is not a pdf").unwrap();

        let backend = DocumentBackend;
        let err = backend
            .extract(
                &Location::Document { pages: vec![1] },
                &source,
                &tmp.path().join("out.pdf"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_wrong_location_kind() {
        let tmp = TempDir::new().unwrap();
        let backend = DocumentBackend;
        let err = backend
            .extract(
                &Location::Text { lines: (1, 5) },
                &tmp.path().join("x.pdf"),
                &tmp.path().join("out.pdf"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvalidCoordinates(_)));
    }
}
