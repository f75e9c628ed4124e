//! Map adapters: register externally-produced maps without a provider call.
//!
//! An adapter converts an external artifact (a pre-built map file, a
//! GraphRAG export) into a [`ResourceMap`]. Adapted maps go through the
//! same location validation and the same store as provider-generated ones;
//! no content hash is injected, so adapter imports do not participate in
//! ingestion deduplication.

use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::models::{InvalidLocation, Location, Modality, Node, ResourceMap};
use crate::store::{MapStore, StoreError};

/// Adaptation failure.
#[derive(Debug, Error)]
pub enum AdaptError {
    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),
    #[error("input is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("unrecognized input: {0}")]
    Unrecognized(String),
    #[error(transparent)]
    Location(#[from] InvalidLocation),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Overrides applied on top of whatever the input provides.
#[derive(Debug, Clone, Default)]
pub struct AdaptOptions {
    pub resource_id: Option<String>,
    pub title: Option<String>,
}

/// Converts one kind of external artifact into a [`ResourceMap`].
///
/// `source_path` is the path the input was read from; adapters record it in
/// the map so resolution of any physical locations it may carry still finds
/// the source.
pub trait MapAdapter: Send + Sync {
    /// Adapter name as selected on the CLI (e.g. `"generic"`).
    fn name(&self) -> &str;

    /// Build a map from the raw input text.
    fn adapt(
        &self,
        raw: &str,
        source_path: &Path,
        options: &AdaptOptions,
    ) -> Result<ResourceMap, AdaptError>;
}

/// Instantiate the adapter selected by name.
pub fn create_adapter(kind: &str) -> anyhow::Result<Box<dyn MapAdapter>> {
    match kind {
        "generic" => Ok(Box::new(GenericAdapter)),
        "graphrag" => Ok(Box::new(GraphRagAdapter)),
        other => anyhow::bail!("unknown adapter: {} (expected generic, graphrag)", other),
    }
}

/// Read an artifact, adapt it, validate every node location, and persist.
pub async fn import_map(
    store: &MapStore,
    adapter: &dyn MapAdapter,
    input: &Path,
    options: &AdaptOptions,
) -> Result<ResourceMap, AdaptError> {
    let raw = tokio::fs::read_to_string(input).await?;
    let map = adapter.adapt(&raw, input, options)?;
    map.validate_nodes()?;
    store.save(&map).await?;
    Ok(map)
}

/// Pass-through adapter: the input is already a serialized map and only
/// needs schema validation (and optional id/title overrides).
pub struct GenericAdapter;

impl MapAdapter for GenericAdapter {
    fn name(&self) -> &str {
        "generic"
    }

    fn adapt(
        &self,
        raw: &str,
        _source_path: &Path,
        options: &AdaptOptions,
    ) -> Result<ResourceMap, AdaptError> {
        let mut map: ResourceMap = serde_json::from_str(raw)?;
        if let Some(id) = &options.resource_id {
            map.resource_id = id.clone();
        }
        if let Some(title) = &options.title {
            map.title = title.clone();
        }
        Ok(map)
    }
}

/// Heuristic adapter for GraphRAG entity/community exports.
///
/// Entities (objects with `name` + `description`) and community reports
/// (objects with `title` + `summary`) become flat virtual-location nodes;
/// other list elements are skipped. An input yielding no nodes at all is
/// rejected rather than stored empty.
pub struct GraphRagAdapter;

impl MapAdapter for GraphRagAdapter {
    fn name(&self) -> &str {
        "graphrag"
    }

    fn adapt(
        &self,
        raw: &str,
        source_path: &Path,
        options: &AdaptOptions,
    ) -> Result<ResourceMap, AdaptError> {
        let items: Vec<Value> = serde_json::from_str(raw)?;

        let mut nodes = Vec::new();
        for item in &items {
            if let (Some(name), Some(description)) =
                (item["name"].as_str(), item["description"].as_str())
            {
                let graph_id = item["id"].as_str().unwrap_or(name);
                nodes.push(Node {
                    id: sanitize_id(name),
                    title: Some(name.to_string()),
                    kind: "entity".to_string(),
                    location: Location::Virtual {
                        virtual_address: format!("graph://{}", graph_id),
                    },
                    summary: Some(description.to_string()),
                    children: vec![],
                });
            } else if let (Some(title), Some(summary)) =
                (item["title"].as_str(), item["summary"].as_str())
            {
                let graph_id = item["id"].as_str().unwrap_or("unknown");
                nodes.push(Node {
                    id: format!("community_{}", graph_id),
                    title: Some(title.to_string()),
                    kind: "community".to_string(),
                    location: Location::Virtual {
                        virtual_address: format!("graph://community/{}", graph_id),
                    },
                    summary: Some(summary.to_string()),
                    children: vec![],
                });
            }
        }

        if nodes.is_empty() {
            return Err(AdaptError::Unrecognized(
                "no GraphRAG entities or communities found in input".to_string(),
            ));
        }

        Ok(ResourceMap {
            resource_id: options
                .resource_id
                .clone()
                .unwrap_or_else(|| "graphrag_import".to_string()),
            modality: Modality::Virtual,
            title: options
                .title
                .clone()
                .unwrap_or_else(|| "GraphRAG Import".to_string()),
            source_path: source_path.to_string_lossy().into_owned(),
            nodes,
            metadata: std::collections::BTreeMap::new(),
            created_at: chrono::Utc::now(),
        })
    }
}

fn sanitize_id(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}
