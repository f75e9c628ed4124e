//! Resolution dispatch: from `(resource_id, node_id)` to evidence.
//!
//! Loads the stored map, finds the node (depth-first, first match wins),
//! builds its canonical address, and then either:
//!
//! - **pointer mode** (or any `virtual` location): returns the address with
//!   `output_path: None` — no backend call, no filesystem output, works
//!   with zero extraction backends installed; or
//! - **materializing mode**: dispatches to the backend registered for the
//!   location's modality and produces a standalone evidence file.
//!
//! Output filenames are deterministic over `(resource_id, node_id,
//! location)`, so re-resolving a node is idempotent: an existing file at
//! the deterministic path short-circuits the backend entirely. Backends
//! write into a staging path that is renamed into place on success, so a
//! failed extraction never leaves a partial file at the deterministic path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::address::build_address;
use crate::backend_document::DocumentBackend;
use crate::backend_image::ImageBackend;
use crate::backend_media::MediaBackend;
use crate::backend_text::TextBackend;
use crate::models::{Location, Modality, ResolvedEvidence};
use crate::store::{MapStore, StoreError};

/// Extraction backend failure.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("missing external tool: {0}")]
    MissingTool(String),
    #[error("invalid coordinates for this source: {0}")]
    InvalidCoordinates(String),
    #[error("unsupported source format: {0}")]
    Unsupported(String),
    #[error("extraction io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("extraction failed: {0}")]
    Failed(String),
}

/// Resolution failure.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no map found for resource '{0}'")]
    ResourceNotFound(String),
    #[error("node '{node_id}' not found in resource '{resource_id}'; available: {available:?}")]
    NodeNotFound {
        resource_id: String,
        node_id: String,
        available: Vec<String>,
    },
    #[error("no extraction backend registered for modality: {0}")]
    BackendUnavailable(Modality),
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ResolveError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ResolveError::ResourceNotFound(id),
            other => ResolveError::Store(other),
        }
    }
}

/// How a node should be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Materialize an evidence file via the modality's backend.
    Physical,
    /// Pointer-only: address and metadata, no extraction.
    Virtual,
}

/// A modality-specific extraction backend.
///
/// Backends write exactly to `dest` (a staging path chosen by the
/// dispatcher) and must be deterministic for identical inputs. Failures are
/// typed [`ExtractError`]s, never panics.
#[async_trait]
pub trait ExtractBackend: Send + Sync {
    /// The modality this backend handles.
    fn modality(&self) -> Modality;

    /// Extract the region described by `location` from `source` into `dest`.
    async fn extract(
        &self,
        location: &Location,
        source: &Path,
        dest: &Path,
    ) -> Result<(), ExtractError>;
}

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Modality-dispatching resolver.
pub struct Dispatcher {
    store: MapStore,
    output_dir: PathBuf,
    backends: HashMap<Modality, Arc<dyn ExtractBackend>>,
}

impl Dispatcher {
    /// A dispatcher with no backends registered. Pointer-mode resolution is
    /// fully functional; materializing resolution fails with
    /// [`ResolveError::BackendUnavailable`].
    pub fn new(store: MapStore, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            output_dir: output_dir.into(),
            backends: HashMap::new(),
        }
    }

    /// A dispatcher with the built-in backends for all five physical
    /// modalities.
    pub fn with_default_backends(store: MapStore, output_dir: impl Into<PathBuf>) -> Self {
        let mut dispatcher = Self::new(store, output_dir);
        dispatcher.register_backend(Arc::new(DocumentBackend));
        dispatcher.register_backend(Arc::new(MediaBackend::video()));
        dispatcher.register_backend(Arc::new(MediaBackend::audio()));
        dispatcher.register_backend(Arc::new(ImageBackend));
        dispatcher.register_backend(Arc::new(TextBackend));
        dispatcher
    }

    /// Register (or replace) the backend for a modality.
    pub fn register_backend(&mut self, backend: Arc<dyn ExtractBackend>) {
        self.backends.insert(backend.modality(), backend);
    }

    /// Resolve a node into evidence.
    pub async fn resolve(
        &self,
        resource_id: &str,
        node_id: &str,
        mode: ResolveMode,
    ) -> Result<ResolvedEvidence, ResolveError> {
        let map = self.store.load(resource_id).await?;

        let node = map
            .get_node(node_id)
            .ok_or_else(|| ResolveError::NodeNotFound {
                resource_id: resource_id.to_string(),
                node_id: node_id.to_string(),
                available: map.list_node_ids(),
            })?
            .clone();

        let address = build_address(resource_id, &node.location);
        let modality = node.location.modality();

        // Pointer mode and virtual locations never touch a backend or the
        // output directory.
        if mode == ResolveMode::Virtual || modality == Modality::Virtual {
            return Ok(ResolvedEvidence {
                output_path: None,
                modality,
                address,
                node,
                resource_id: resource_id.to_string(),
            });
        }

        let backend = self
            .backends
            .get(&modality)
            .ok_or(ResolveError::BackendUnavailable(modality))?;

        let source = PathBuf::from(&map.source_path);
        let file_name = output_file_name(resource_id, node_id, &node.location, &source);
        let final_path = self.output_dir.join(&file_name);

        // Output-level cache: repeated resolution of the same node returns
        // the already-materialized file.
        if tokio::fs::try_exists(&final_path)
            .await
            .map_err(ExtractError::Io)?
        {
            return Ok(ResolvedEvidence {
                output_path: Some(final_path.to_string_lossy().into_owned()),
                modality,
                address,
                node,
                resource_id: resource_id.to_string(),
            });
        }

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(ExtractError::Io)?;
        // Unique per call: concurrent resolutions of the same node race on
        // the final rename only, never on the staging file.
        let staging = self.output_dir.join(format!(
            ".tmp-{}-{}",
            STAGING_SEQ.fetch_add(1, Ordering::Relaxed),
            file_name
        ));

        match backend.extract(&node.location, &source, &staging).await {
            Ok(()) => {
                tokio::fs::rename(&staging, &final_path)
                    .await
                    .map_err(ExtractError::Io)?;
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(e.into());
            }
        }

        Ok(ResolvedEvidence {
            output_path: Some(final_path.to_string_lossy().into_owned()),
            modality,
            address,
            node,
            resource_id: resource_id.to_string(),
        })
    }
}

/// Deterministic output filename for `(resource_id, node_id, location)`.
fn output_file_name(
    resource_id: &str,
    node_id: &str,
    location: &Location,
    source: &Path,
) -> String {
    let safe_node: String = node_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    let tag = match location {
        Location::Document { pages } => {
            let mut sorted = pages.clone();
            sorted.sort_unstable();
            sorted.dedup();
            let parts: Vec<String> = sorted.iter().map(|p| p.to_string()).collect();
            format!("pages_{}", parts.join("-"))
        }
        Location::Video { start, end } | Location::Audio { start, end } => {
            format!("t_{}-{}", start, end)
        }
        Location::Text { lines: (start, end) } => format!("lines_{}-{}", start, end),
        Location::Image { bbox: (x1, y1, x2, y2) } => {
            format!("crop_{}_{}_{}_{}", x1, y1, x2, y2)
        }
        Location::Virtual { .. } => "virtual".to_string(),
    };

    let ext = match location.modality() {
        Modality::Document => "pdf".to_string(),
        Modality::Text => source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("txt")
            .to_string(),
        _ => source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_string(),
    };

    format!("{}_{}_{}.{}", resource_id, safe_node, tag, ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Node, ResourceMap};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingBackend {
        modality: Modality,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ExtractBackend for CountingBackend {
        fn modality(&self) -> Modality {
            self.modality
        }

        async fn extract(
            &self,
            _location: &Location,
            _source: &Path,
            dest: &Path,
        ) -> Result<(), ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(dest, b"evidence").await?;
            Ok(())
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl ExtractBackend for FailingBackend {
        fn modality(&self) -> Modality {
            Modality::Document
        }

        async fn extract(
            &self,
            _location: &Location,
            _source: &Path,
            dest: &Path,
        ) -> Result<(), ExtractError> {
            // Simulate a backend dying after a partial write.
            tokio::fs::write(dest, b"partial").await?;
            Err(ExtractError::Failed("backend died".to_string()))
        }
    }

    fn doc_node(id: &str, pages: Vec<u32>) -> Node {
        Node {
            id: id.to_string(),
            title: None,
            kind: "section".to_string(),
            location: Location::Document { pages },
            summary: None,
            children: vec![],
        }
    }

    async fn seed_map(store: &MapStore, tmp: &TempDir, nodes: Vec<Node>) -> ResourceMap {
        let source = tmp.path().join("book.pdf");
        std::fs::write(&source, "pdf bytes").unwrap();
        let map = ResourceMap {
            resource_id: "book".to_string(),
            modality: Modality::Document,
            title: "Book".to_string(),
            source_path: source.to_string_lossy().into_owned(),
            nodes,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        };
        store.save(&map).await.unwrap();
        map
    }

    #[tokio::test]
    async fn test_resource_not_found() {
        let tmp = TempDir::new().unwrap();
        let dispatcher = Dispatcher::new(MapStore::new(tmp.path()), tmp.path().join("out"));
        let err = dispatcher
            .resolve("ghost", "n", ResolveMode::Virtual)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn test_node_not_found_lists_available() {
        let tmp = TempDir::new().unwrap();
        let store = MapStore::new(tmp.path().join("maps"));
        seed_map(&store, &tmp, vec![doc_node("ch1", vec![1])]).await;
        let dispatcher = Dispatcher::new(store, tmp.path().join("out"));

        let err = dispatcher
            .resolve("book", "ch9", ResolveMode::Virtual)
            .await
            .unwrap_err();
        match err {
            ResolveError::NodeNotFound { available, .. } => {
                assert_eq!(available, vec!["ch1"]);
            }
            other => panic!("expected NodeNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pointer_mode_never_calls_backend() {
        let tmp = TempDir::new().unwrap();
        let store = MapStore::new(tmp.path().join("maps"));
        seed_map(&store, &tmp, vec![doc_node("ch1", vec![1, 2, 3])]).await;

        let backend = Arc::new(CountingBackend {
            modality: Modality::Document,
            calls: AtomicUsize::new(0),
        });
        let out_dir = tmp.path().join("out");
        let mut dispatcher = Dispatcher::new(store, &out_dir);
        dispatcher.register_backend(backend.clone());

        let evidence = dispatcher
            .resolve("book", "ch1", ResolveMode::Virtual)
            .await
            .unwrap();

        assert_eq!(evidence.output_path, None);
        assert_eq!(evidence.address, "doc://book#pages=1-3");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        // The output directory is never even created.
        assert!(!out_dir.exists());
    }

    #[tokio::test]
    async fn test_virtual_location_needs_no_backend() {
        let tmp = TempDir::new().unwrap();
        let store = MapStore::new(tmp.path().join("maps"));
        let node = Node {
            id: "ref".to_string(),
            title: None,
            kind: "entity".to_string(),
            location: Location::Virtual { virtual_address: "virtual://kb#e42".to_string() },
            summary: None,
            children: vec![],
        };
        seed_map(&store, &tmp, vec![node]).await;
        let dispatcher = Dispatcher::new(store, tmp.path().join("out"));

        // Physical mode requested, but the location is virtual.
        let evidence = dispatcher
            .resolve("book", "ref", ResolveMode::Physical)
            .await
            .unwrap();
        assert_eq!(evidence.output_path, None);
        assert_eq!(evidence.address, "virtual://kb#e42");
    }

    #[tokio::test]
    async fn test_materializing_resolution_and_output_cache() {
        let tmp = TempDir::new().unwrap();
        let store = MapStore::new(tmp.path().join("maps"));
        seed_map(&store, &tmp, vec![doc_node("ch1", vec![1, 2])]).await;

        let backend = Arc::new(CountingBackend {
            modality: Modality::Document,
            calls: AtomicUsize::new(0),
        });
        let mut dispatcher = Dispatcher::new(store, tmp.path().join("out"));
        dispatcher.register_backend(backend.clone());

        let first = dispatcher
            .resolve("book", "ch1", ResolveMode::Physical)
            .await
            .unwrap();
        let path = first.output_path.clone().unwrap();
        assert!(Path::new(&path).exists());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        // Second resolution hits the output-level cache.
        let second = dispatcher
            .resolve("book", "ch1", ResolveMode::Physical)
            .await
            .unwrap();
        assert_eq!(second.output_path.as_deref(), Some(path.as_str()));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    struct BarrierBackend {
        barrier: tokio::sync::Barrier,
    }

    #[async_trait]
    impl ExtractBackend for BarrierBackend {
        fn modality(&self) -> Modality {
            Modality::Document
        }

        async fn extract(
            &self,
            _location: &Location,
            _source: &Path,
            dest: &Path,
        ) -> Result<(), ExtractError> {
            // Both racing calls are in-flight before either writes.
            self.barrier.wait().await;
            tokio::fs::write(dest, b"evidence").await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_concurrent_resolution_of_same_node_both_succeed() {
        let tmp = TempDir::new().unwrap();
        let store = MapStore::new(tmp.path().join("maps"));
        seed_map(&store, &tmp, vec![doc_node("ch1", vec![1])]).await;

        let out_dir = tmp.path().join("out");
        let mut dispatcher = Dispatcher::new(store, &out_dir);
        dispatcher.register_backend(Arc::new(BarrierBackend {
            barrier: tokio::sync::Barrier::new(2),
        }));
        let dispatcher = Arc::new(dispatcher);

        let a = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher.resolve("book", "ch1", ResolveMode::Physical).await
            })
        };
        let b = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher.resolve("book", "ch1", ResolveMode::Physical).await
            })
        };

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(a.output_path, b.output_path);
        assert_eq!(
            std::fs::read(a.output_path.unwrap()).unwrap(),
            b"evidence"
        );

        // No staging leftovers once both calls finish.
        let leftovers: Vec<_> = std::fs::read_dir(&out_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_backend_unavailable() {
        let tmp = TempDir::new().unwrap();
        let store = MapStore::new(tmp.path().join("maps"));
        seed_map(&store, &tmp, vec![doc_node("ch1", vec![1])]).await;
        let dispatcher = Dispatcher::new(store, tmp.path().join("out"));

        let err = dispatcher
            .resolve("book", "ch1", ResolveMode::Physical)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::BackendUnavailable(Modality::Document)
        ));
    }

    #[tokio::test]
    async fn test_failed_extraction_leaves_no_output() {
        let tmp = TempDir::new().unwrap();
        let store = MapStore::new(tmp.path().join("maps"));
        seed_map(&store, &tmp, vec![doc_node("ch1", vec![1])]).await;

        let out_dir = tmp.path().join("out");
        let mut dispatcher = Dispatcher::new(store, &out_dir);
        dispatcher.register_backend(Arc::new(FailingBackend));

        let err = dispatcher
            .resolve("book", "ch1", ResolveMode::Physical)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Extraction(_)));

        // Neither the deterministic path nor the staging file survives.
        let mut entries = std::fs::read_dir(&out_dir).unwrap();
        assert!(entries.next().is_none());
    }

    #[test]
    fn test_output_file_name_deterministic() {
        let source = Path::new("/data/lecture.mp4");
        let loc = Location::Video { start: 12.5, end: 30.0 };
        let a = output_file_name("lec", "intro.hook", &loc, source);
        let b = output_file_name("lec", "intro.hook", &loc, source);
        assert_eq!(a, b);
        assert_eq!(a, "lec_intro_hook_t_12.5-30.mp4");

        let doc = Location::Document { pages: vec![3, 1, 2] };
        assert_eq!(
            output_file_name("book", "ch1", &doc, Path::new("/x/book.pdf")),
            "book_ch1_pages_1-2-3.pdf"
        );
    }
}
