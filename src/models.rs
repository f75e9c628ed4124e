//! Core data models used throughout CiteMap.
//!
//! These types represent the resource maps, nodes, and locations that flow
//! through the ingestion and resolution pipeline. A [`ResourceMap`] is the
//! persisted unit of indexing; a [`Node`] is one semantic region within it;
//! a [`Location`] pins a node to physical coordinates in the source file.
//!
//! [`Location`] is a tagged union with exactly one coordinate shape per
//! modality, so illegal combinations (e.g. both pages and a bounding box)
//! are unrepresentable.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind of resource a map or location refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Document,
    Video,
    Audio,
    Image,
    Text,
    Virtual,
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Modality::Document => "document",
            Modality::Video => "video",
            Modality::Audio => "audio",
            Modality::Image => "image",
            Modality::Text => "text",
            Modality::Virtual => "virtual",
        };
        f.write_str(s)
    }
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" => Ok(Modality::Document),
            "video" => Ok(Modality::Video),
            "audio" => Ok(Modality::Audio),
            "image" => Ok(Modality::Image),
            "text" => Ok(Modality::Text),
            "virtual" => Ok(Modality::Virtual),
            other => Err(format!(
                "unknown modality '{}' (expected document, video, audio, image, text, virtual)",
                other
            )),
        }
    }
}

/// A location failed its modality-specific invariant check.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid location: {0}")]
pub struct InvalidLocation(pub String);

/// Physical location within a resource that a node points to.
///
/// Serialized with the `modality` field as the tag, matching the persisted
/// map format:
///
/// ```json
/// { "modality": "document", "pages": [1, 2, 3] }
/// { "modality": "video", "start": 12.0, "end": 30.5 }
/// { "modality": "text", "lines": [1, 5] }
/// { "modality": "image", "bbox": [0.2, 0.3, 0.8, 0.7] }
/// { "modality": "virtual", "virtual_address": "graph://entity_42" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "modality", rename_all = "lowercase")]
pub enum Location {
    /// 1-indexed page numbers within a document.
    Document { pages: Vec<u32> },
    /// Time range in seconds within a video.
    Video { start: f64, end: f64 },
    /// Time range in seconds within an audio file.
    Audio { start: f64, end: f64 },
    /// 1-indexed inclusive line range within a text file.
    Text { lines: (u32, u32) },
    /// Normalized `(x1, y1, x2, y2)` bounding box, top-left origin, 0.0–1.0.
    Image { bbox: (f64, f64, f64, f64) },
    /// Opaque external reference; no extraction is possible.
    Virtual { virtual_address: String },
}

impl Location {
    /// The modality this location's coordinate shape belongs to.
    pub fn modality(&self) -> Modality {
        match self {
            Location::Document { .. } => Modality::Document,
            Location::Video { .. } => Modality::Video,
            Location::Audio { .. } => Modality::Audio,
            Location::Text { .. } => Modality::Text,
            Location::Image { .. } => Modality::Image,
            Location::Virtual { .. } => Modality::Virtual,
        }
    }

    /// Check the modality-specific invariants for this location.
    ///
    /// Runs both when a map is persisted (provider output may be malformed)
    /// and when callers construct locations programmatically. Downstream
    /// components assume a validated location.
    pub fn validate(&self) -> Result<(), InvalidLocation> {
        match self {
            Location::Document { pages } => {
                if pages.is_empty() {
                    return Err(InvalidLocation("page list must not be empty".into()));
                }
                if pages.iter().any(|p| *p < 1) {
                    return Err(InvalidLocation(format!(
                        "page numbers are 1-indexed, got {:?}",
                        pages
                    )));
                }
                Ok(())
            }
            Location::Video { start, end } | Location::Audio { start, end } => {
                if !start.is_finite() || !end.is_finite() {
                    return Err(InvalidLocation(format!(
                        "time range must be finite, got start={}, end={}",
                        start, end
                    )));
                }
                if *start < 0.0 {
                    return Err(InvalidLocation(format!(
                        "start time must be >= 0, got {}",
                        start
                    )));
                }
                if end <= start {
                    return Err(InvalidLocation(format!(
                        "end time must be greater than start, got start={}, end={}",
                        start, end
                    )));
                }
                Ok(())
            }
            Location::Text { lines: (start, end) } => {
                if *start < 1 {
                    return Err(InvalidLocation(format!(
                        "line numbers are 1-indexed, got start={}",
                        start
                    )));
                }
                if end < start {
                    return Err(InvalidLocation(format!(
                        "end line must be >= start line, got {}-{}",
                        start, end
                    )));
                }
                Ok(())
            }
            Location::Image { bbox: (x1, y1, x2, y2) } => {
                for v in [x1, y1, x2, y2] {
                    if !v.is_finite() || *v < 0.0 || *v > 1.0 {
                        return Err(InvalidLocation(format!(
                            "bbox values must be within [0, 1], got ({}, {}, {}, {})",
                            x1, y1, x2, y2
                        )));
                    }
                }
                if x2 <= x1 || y2 <= y1 {
                    return Err(InvalidLocation(format!(
                        "bbox must satisfy x2 > x1 and y2 > y1, got ({}, {}, {}, {})",
                        x1, y1, x2, y2
                    )));
                }
                Ok(())
            }
            Location::Virtual { .. } => Ok(()),
        }
    }
}

fn default_node_type() -> String {
    "section".to_string()
}

/// A concept or section within a resource, pointing to a physical location.
///
/// Node ids conventionally follow a dot-separated hierarchy
/// (`chapter_1.intro`), but uniqueness within a map is a convention, not an
/// enforced constraint: lookups take the first match in pre-order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Free-form node type: section, definition, example, diagram, etc.
    #[serde(rename = "type", default = "default_node_type")]
    pub kind: String,
    pub location: Location,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub children: Vec<Node>,
}

/// Metadata key holding the SHA-256 of the source file at ingestion time.
/// The sole deduplication key for content-addressed ingestion.
pub const META_SOURCE_HASH: &str = "source_hash";
/// Metadata key holding the source file size in bytes at ingestion time.
pub const META_SOURCE_SIZE: &str = "source_size";

/// Structured map of a resource — the persisted output of ingestion.
///
/// Maps are immutable once persisted: re-ingesting byte-identical content
/// returns the existing map instead of writing a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMap {
    pub resource_id: String,
    pub modality: Modality,
    pub title: String,
    pub source_path: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ResourceMap {
    /// Find a node by id, depth-first pre-order. First match wins.
    pub fn get_node(&self, node_id: &str) -> Option<&Node> {
        fn find<'a>(nodes: &'a [Node], node_id: &str) -> Option<&'a Node> {
            for node in nodes {
                if node.id == node_id {
                    return Some(node);
                }
                if let Some(found) = find(&node.children, node_id) {
                    return Some(found);
                }
            }
            None
        }
        find(&self.nodes, node_id)
    }

    /// All node ids in this map, pre-order.
    pub fn list_node_ids(&self) -> Vec<String> {
        fn collect(nodes: &[Node], out: &mut Vec<String>) {
            for node in nodes {
                out.push(node.id.clone());
                collect(&node.children, out);
            }
        }
        let mut ids = Vec::new();
        collect(&self.nodes, &mut ids);
        ids
    }

    /// The `source_hash` metadata entry, if present.
    pub fn source_hash(&self) -> Option<&str> {
        self.metadata.get(META_SOURCE_HASH).and_then(|v| v.as_str())
    }

    /// Validate every node location in the tree: the modality-specific
    /// invariants plus compatibility with this map's modality. Locations of
    /// modality `virtual` are valid under any map.
    pub fn validate_nodes(&self) -> Result<(), InvalidLocation> {
        fn walk(nodes: &[Node], map_modality: Modality) -> Result<(), InvalidLocation> {
            for node in nodes {
                node.location.validate()?;
                let loc_modality = node.location.modality();
                if loc_modality != map_modality && loc_modality != Modality::Virtual {
                    return Err(InvalidLocation(format!(
                        "node '{}' has a {} location under a {} map",
                        node.id, loc_modality, map_modality
                    )));
                }
                walk(&node.children, map_modality)?;
            }
            Ok(())
        }
        walk(&self.nodes, self.modality)
    }
}

/// Result of resolving a node — returned per call, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedEvidence {
    /// Path to the extracted artifact. `None` for pointer-mode resolution.
    pub output_path: Option<String>,
    pub modality: Modality,
    /// Canonical URI address, e.g. `doc://book#pages=12-13`.
    pub address: String,
    pub node: Node,
    pub resource_id: String,
}
