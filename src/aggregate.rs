//! Aggregation of stored maps into a single agent-context index.
//!
//! The index is what an agent reads before asking for evidence: every
//! resource with its node ids, titles, and summaries, but no content. The
//! agent picks `(resource_id, node_id)` pairs from it and resolves them.

use serde_json::json;

use crate::models::{Node, ResourceMap};

/// Index output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextFormat {
    Markdown,
    Json,
}

impl std::str::FromStr for ContextFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "markdown" | "md" => Ok(ContextFormat::Markdown),
            "json" => Ok(ContextFormat::Json),
            other => Err(format!("unknown context format: {}", other)),
        }
    }
}

/// Render an index over `maps` in the requested format.
pub fn create_agent_context(maps: &[ResourceMap], format: ContextFormat) -> String {
    match format {
        ContextFormat::Markdown => markdown_index(maps),
        ContextFormat::Json => json_index(maps),
    }
}

fn markdown_index(maps: &[ResourceMap]) -> String {
    let mut lines = vec!["# Available Resources Index".to_string(), String::new()];
    for map in maps {
        lines.push(format!(
            "## {} (ID: {}, Type: {})",
            map.title, map.resource_id, map.modality
        ));
        for node in &map.nodes {
            push_node_lines(&mut lines, node, 0);
        }
        lines.push(String::new());
    }
    lines.join("\n").trim().to_string()
}

fn push_node_lines(lines: &mut Vec<String>, node: &Node, depth: usize) {
    lines.push(format!(
        "{}- **{}**: {} - {}",
        "  ".repeat(depth),
        node.id,
        node.title.as_deref().unwrap_or(""),
        node.summary.as_deref().unwrap_or(""),
    ));
    for child in &node.children {
        push_node_lines(lines, child, depth + 1);
    }
}

fn json_index(maps: &[ResourceMap]) -> String {
    let summary: Vec<_> = maps
        .iter()
        .map(|map| {
            json!({
                "id": map.resource_id,
                "title": map.title,
                "type": map.modality,
                "nodes": map.nodes.iter().map(node_entry).collect::<Vec<_>>(),
            })
        })
        .collect();
    serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "[]".to_string())
}

fn node_entry(node: &Node) -> serde_json::Value {
    let mut entry = json!({
        "id": node.id,
        "title": node.title,
        "summary": node.summary,
    });
    if !node.children.is_empty() {
        entry["children"] = node.children.iter().map(node_entry).collect();
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Location, Modality};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn sample_maps() -> Vec<ResourceMap> {
        let child = Node {
            id: "ch1.intro".to_string(),
            title: Some("Intro".to_string()),
            kind: "section".to_string(),
            location: Location::Document { pages: vec![1] },
            summary: Some("Opening remarks.".to_string()),
            children: vec![],
        };
        vec![ResourceMap {
            resource_id: "book".to_string(),
            modality: Modality::Document,
            title: "The Book".to_string(),
            source_path: "/data/book.pdf".to_string(),
            nodes: vec![Node {
                id: "ch1".to_string(),
                title: Some("Chapter 1".to_string()),
                kind: "section".to_string(),
                location: Location::Document { pages: vec![1, 2, 3] },
                summary: Some("First chapter.".to_string()),
                children: vec![child],
            }],
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }]
    }

    #[test]
    fn test_markdown_index() {
        let out = create_agent_context(&sample_maps(), ContextFormat::Markdown);
        assert!(out.starts_with("# Available Resources Index"));
        assert!(out.contains("## The Book (ID: book, Type: document)"));
        assert!(out.contains("- **ch1**: Chapter 1 - First chapter."));
        // Nested node is indented under its parent.
        assert!(out.contains("  - **ch1.intro**: Intro - Opening remarks."));
    }

    #[test]
    fn test_json_index() {
        let out = create_agent_context(&sample_maps(), ContextFormat::Json);
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0]["id"], "book");
        assert_eq!(parsed[0]["nodes"][0]["id"], "ch1");
        assert_eq!(parsed[0]["nodes"][0]["children"][0]["id"], "ch1.intro");
        // No content or locations leak into the index.
        assert!(out.find("pages").is_none());
    }

    #[test]
    fn test_empty_input() {
        let out = create_agent_context(&[], ContextFormat::Markdown);
        assert_eq!(out, "# Available Resources Index");
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("md".parse::<ContextFormat>().unwrap(), ContextFormat::Markdown);
        assert_eq!("json".parse::<ContextFormat>().unwrap(), ContextFormat::Json);
        assert!("xml".parse::<ContextFormat>().is_err());
    }
}
