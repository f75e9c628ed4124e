//! Ingestion pipeline orchestration.
//!
//! Turns `(source_path, modality, optional resource id)` into a persisted
//! [`ResourceMap`] exactly once per distinct content:
//!
//! 1. hash the file (SHA-256 of its bytes),
//! 2. return the existing map if the hash is already stored (no provider
//!    call, no gate slot),
//! 3. acquire a slot from the bounded FIFO concurrency gate,
//! 4. call the analysis provider with per-attempt timeout and exponential
//!    backoff retry on transient failures,
//! 5. repair raw output into nodes, validate locations, inject metadata,
//!    persist.
//!
//! Nothing partial is ever persisted: persistence is the final step.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::MapperConfig;
use crate::mapper::{MapperOutput, MapperProvider, ProviderError};
use crate::models::{
    InvalidLocation, Modality, Node, ResourceMap, META_SOURCE_HASH, META_SOURCE_SIZE,
};
use crate::repair;
use crate::store::{MapStore, StoreError};

/// Ingestion failure.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("source not found: {0}")]
    SourceNotFound(PathBuf),
    #[error("provider could not access source: {0}")]
    ProviderSourceNotFound(String),
    #[error("cannot ingest modality '{0}': nothing to analyze")]
    InvalidModality(Modality),
    #[error(transparent)]
    Location(#[from] InvalidLocation),
    #[error("ingestion failed after {attempts} attempt(s): {cause}")]
    Failed { attempts: u32, cause: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to read source: {0}")]
    Io(#[from] std::io::Error),
}

/// Ingestion orchestrator.
///
/// Holds the provider, the store, and the process-wide concurrency gate.
/// Cheap to clone behind `Arc`s; all state is shared.
pub struct Ingestor {
    mapper: Arc<dyn MapperProvider>,
    store: MapStore,
    gate: Arc<Semaphore>,
    max_retries: u32,
    attempt_timeout: Duration,
}

impl Ingestor {
    pub fn new(mapper: Arc<dyn MapperProvider>, store: MapStore, config: &MapperConfig) -> Self {
        Self {
            mapper,
            store,
            // tokio's semaphore queues waiters FIFO, which gives the gate
            // its arrival-order fairness.
            gate: Arc::new(Semaphore::new(config.concurrency.max(1))),
            max_retries: config.max_retries.max(1),
            attempt_timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Ingest one file, deduplicating by content hash.
    ///
    /// Re-ingesting byte-identical content (under any path) returns the
    /// stored map without consuming a gate slot or calling the provider.
    pub async fn ingest(
        &self,
        source: &Path,
        modality: Modality,
        resource_id: Option<&str>,
    ) -> Result<ResourceMap, IngestError> {
        if modality == Modality::Virtual {
            return Err(IngestError::InvalidModality(modality));
        }
        let bytes = match tokio::fs::read(source).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IngestError::SourceNotFound(source.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let hash = format!("{:x}", hasher.finalize());
        let source_size = bytes.len() as u64;
        drop(bytes);

        if let Some(existing) = self.store.find_by_hash(&hash).await? {
            return Ok(existing);
        }

        let _permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .expect("concurrency gate closed");

        // A queued caller may have been waiting behind an in-flight
        // ingestion of the same bytes; re-check before spending a call.
        if let Some(existing) = self.store.find_by_hash(&hash).await? {
            return Ok(existing);
        }

        let nodes = self.call_with_retry(source, modality, resource_id).await?;

        let resource_id = resource_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| slug_from_path(source));
        let mut metadata = BTreeMap::new();
        metadata.insert(META_SOURCE_HASH.to_string(), serde_json::json!(hash));
        metadata.insert(META_SOURCE_SIZE.to_string(), serde_json::json!(source_size));

        let map = ResourceMap {
            resource_id,
            modality,
            title: title_from_path(source),
            source_path: source.to_string_lossy().into_owned(),
            nodes,
            metadata,
            created_at: Utc::now(),
        };
        map.validate_nodes()?;
        self.store.save(&map).await?;
        Ok(map)
    }

    /// Call the provider with per-attempt timeout and exponential backoff
    /// (1s doubling). Transient failures — rate limits, timeouts, and
    /// unrepairable responses — are retried; everything else fails fast.
    async fn call_with_retry(
        &self,
        source: &Path,
        modality: Modality,
        resource_id: Option<&str>,
    ) -> Result<Vec<Node>, IngestError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let transient_cause = match tokio::time::timeout(
                self.attempt_timeout,
                self.mapper.generate(source, modality, resource_id),
            )
            .await
            {
                Err(_) => format!("attempt timed out after {:?}", self.attempt_timeout),
                Ok(Err(e)) if e.is_transient() => e.to_string(),
                Ok(Err(ProviderError::NotFound(msg))) => {
                    // The provider's detail is a "path: cause" string, not a
                    // path; keep it verbatim instead of coercing to PathBuf.
                    return Err(IngestError::ProviderSourceNotFound(msg))
                }
                Ok(Err(ProviderError::InvalidModality(m))) => {
                    return Err(IngestError::InvalidModality(m))
                }
                Ok(Err(e)) => {
                    return Err(IngestError::Failed { attempts: attempt, cause: e.to_string() })
                }
                Ok(Ok(MapperOutput::Nodes(nodes))) => return Ok(nodes),
                Ok(Ok(MapperOutput::Raw(text))) => match repair::repair_nodes(&text) {
                    Ok(nodes) => return Ok(nodes),
                    Err(e) => e.to_string(),
                },
            };

            if attempt >= self.max_retries {
                return Err(IngestError::Failed { attempts: attempt, cause: transient_cause });
            }
            let backoff = Duration::from_secs(1u64 << (attempt - 1));
            tokio::time::sleep(backoff).await;
        }
    }
}

/// Derive a slug-shaped resource id from the file's base name.
fn slug_from_path(source: &Path) -> String {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("resource");
    let slug: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    let slug = slug.trim_matches('_').to_string();
    if slug.is_empty() {
        "resource".to_string()
    } else {
        slug
    }
}

/// Prettify the file stem into a human title: `intro_to-calculus` becomes
/// `Intro To Calculus`.
fn title_from_path(source: &Path) -> String {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Resource");
    stem.split(['_', '-', ' '])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
