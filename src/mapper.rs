//! Analysis provider abstraction and implementations.
//!
//! Defines the [`MapperProvider`] trait and concrete implementations:
//! - **[`DisabledMapper`]** — returns errors; used when no provider is configured.
//! - **[`GeminiMapper`]** — sends the file inline to the Gemini
//!   `generateContent` API and returns the raw text for repair.
//!
//! # Error Taxonomy
//!
//! Provider failures carry a category so the ingestion orchestrator can
//! decide what to retry:
//! - `RateLimited`, `Timeout` → transient, retried with backoff
//! - `Malformed` → transient (a fresh call may produce parsable output)
//! - `NotFound`, `InvalidModality` → non-transient, fail immediately
//!
//! The orchestrator owns retries and the per-attempt timeout; providers make
//! exactly one upstream call per `generate` invocation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

use crate::config::MapperConfig;
use crate::models::{Modality, Node};

/// Provider failure with a retry category.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider could not access source: {0}")]
    NotFound(String),
    #[error("provider does not support modality: {0}")]
    InvalidModality(Modality),
    #[error("provider rate limited: {0}")]
    RateLimited(String),
    #[error("provider timed out: {0}")]
    Timeout(String),
    #[error("provider returned a malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Whether the ingestion orchestrator should retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_) | ProviderError::Timeout(_) | ProviderError::Malformed(_)
        )
    }
}

/// What a provider produced for one analysis call.
#[derive(Debug, Clone)]
pub enum MapperOutput {
    /// Structured node list; validated directly, no repair pass.
    Nodes(Vec<Node>),
    /// Free text expected to encode a JSON node list; goes through repair.
    Raw(String),
}

/// An external analysis service that maps a file into semantic nodes.
///
/// Implement this trait to plug a custom provider into the ingestion
/// orchestrator. The provider analyzes the file at `source` for the given
/// modality and returns either structured nodes or raw text to be repaired.
#[async_trait]
pub trait MapperProvider: Send + Sync {
    /// Provider name for status output (e.g. `"gemini"`).
    fn name(&self) -> &str;

    /// Analyze one file. Called on the tokio runtime; may perform network I/O.
    async fn generate(
        &self,
        source: &Path,
        modality: Modality,
        resource_id: Option<&str>,
    ) -> Result<MapperOutput, ProviderError>;
}

/// Instantiate the provider selected by the configuration.
pub fn create_mapper(config: &MapperConfig) -> anyhow::Result<Arc<dyn MapperProvider>> {
    match config.provider.as_str() {
        "gemini" => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("[mapper] provider 'gemini' requires api_key"))?;
            Ok(Arc::new(GeminiMapper::new(
                api_key,
                config.model.clone(),
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        "disabled" => Ok(Arc::new(DisabledMapper)),
        other => anyhow::bail!("unknown mapper provider: {}", other),
    }
}

/// Provider used when no mapper is configured. Ingestion fails fast with a
/// clear message; resolution of existing maps keeps working.
pub struct DisabledMapper;

#[async_trait]
impl MapperProvider for DisabledMapper {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _source: &Path,
        modality: Modality,
        _resource_id: Option<&str>,
    ) -> Result<MapperOutput, ProviderError> {
        Err(ProviderError::InvalidModality(modality))
    }
}

// ── Prompt templates ────────────────────────────────────────────────────

const DOCUMENT_PROMPT: &str = "You are a structure analyzer. Analyze the attached document and \
produce a JSON array of nodes identifying its key sections, definitions, examples, and diagrams.\n\
Each node: {\"id\": dot-separated identifier, \"title\": short title, \"type\": one of \
section|definition|example|explanation|diagram|theorem|exercise|summary, \
\"location\": {\"modality\": \"document\", \"pages\": [1-indexed page numbers]}, \
\"summary\": 1-2 sentences}.\n\
Be thorough, keep ids hierarchical. Return ONLY the JSON array.";

const VIDEO_PROMPT: &str = "You are a video structure analyzer. Identify the meaningful segments \
of the attached video.\n\
Each node: {\"id\": dot-separated identifier, \"title\": short title, \"type\": one of \
introduction|explanation|example|demonstration|summary|transition, \
\"location\": {\"modality\": \"video\", \"start\": seconds, \"end\": seconds}, \
\"summary\": brief description}.\n\
Cover the entire duration. Return ONLY the JSON array.";

const AUDIO_PROMPT: &str = "You are an audio structure analyzer. Identify the meaningful segments \
of the attached audio.\n\
Each node: {\"id\": dot-separated identifier, \"title\": short title, \"type\": one of \
introduction|discussion|explanation|example|summary|interlude, \
\"location\": {\"modality\": \"audio\", \"start\": seconds, \"end\": seconds}, \
\"summary\": brief description}.\n\
Return ONLY the JSON array.";

const IMAGE_PROMPT: &str = "You are a visual structure analyzer. Identify distinct regions of \
interest in the attached image.\n\
Each node: {\"id\": dot-separated identifier, \"title\": short title, \"type\": one of \
diagram|chart|text_region|photo|illustration|table|formula, \
\"location\": {\"modality\": \"image\", \"bbox\": [x1, y1, x2, y2]} with values normalized 0.0-1.0 \
from the top-left, \"summary\": brief description}.\n\
Return ONLY the JSON array.";

const TEXT_PROMPT: &str = "You are a code/text structure analyzer. Map the structural blocks of \
the attached text file (classes, top-level functions, markdown headers).\n\
Each node: {\"id\": dot-separated identifier, \"title\": short title, \"type\": one of \
class|function|method|header|section|directive, \
\"location\": {\"modality\": \"text\", \"lines\": [start, end]} (1-indexed, inclusive), \
\"summary\": 1 sentence}.\n\
Be precise with line numbers. Return ONLY the JSON array.";

fn prompt_for(modality: Modality) -> Option<&'static str> {
    match modality {
        Modality::Document => Some(DOCUMENT_PROMPT),
        Modality::Video => Some(VIDEO_PROMPT),
        Modality::Audio => Some(AUDIO_PROMPT),
        Modality::Image => Some(IMAGE_PROMPT),
        Modality::Text => Some(TEXT_PROMPT),
        Modality::Virtual => None,
    }
}

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Mapper provider backed by the Google Gemini API.
///
/// The file is attached inline as base64 in a single `generateContent`
/// request, with `response_mime_type: application/json` requested. The
/// response text still goes through the repair pipeline — JSON mode is a
/// hint, not a guarantee.
pub struct GeminiMapper {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiMapper {
    pub fn new(api_key: String, model: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    fn mime_type(source: &Path, modality: Modality) -> String {
        // Gemini rejects source-code MIME types; everything textual goes up
        // as text/plain.
        if modality == Modality::Text {
            return "text/plain".to_string();
        }
        mime_guess::from_path(source)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string()
    }
}

#[async_trait]
impl MapperProvider for GeminiMapper {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        source: &Path,
        modality: Modality,
        _resource_id: Option<&str>,
    ) -> Result<MapperOutput, ProviderError> {
        let prompt =
            prompt_for(modality).ok_or(ProviderError::InvalidModality(modality))?;

        let bytes = tokio::fs::read(source)
            .await
            .map_err(|e| ProviderError::NotFound(format!("{}: {}", source.display(), e)))?;

        let body = serde_json::json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    { "inline_data": {
                        "mime_type": Self::mime_type(source, modality),
                        "data": BASE64.encode(&bytes),
                    }},
                ]
            }],
            "generationConfig": { "response_mime_type": "application/json" },
        });

        let url = format!(
            "{}/{}:generateContent?key={}",
            GEMINI_ENDPOINT, self.model, self.api_key
        );

        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Malformed(format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited(format!("HTTP {}", status)));
        }
        if status.as_u16() == 408 || status.as_u16() == 504 {
            return Err(ProviderError::Timeout(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Malformed(format!(
                "HTTP {}: {}",
                status,
                text.chars().take(300).collect::<String>()
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("invalid response JSON: {}", e)))?;

        let text = payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| {
                ProviderError::Malformed("response has no candidate text".to_string())
            })?;

        Ok(MapperOutput::Raw(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapperConfig;

    #[test]
    fn test_create_mapper_disabled_by_default() {
        let config = MapperConfig::default();
        let mapper = create_mapper(&config).unwrap();
        assert_eq!(mapper.name(), "disabled");
    }

    #[test]
    fn test_create_mapper_gemini_requires_key() {
        let config = MapperConfig {
            provider: "gemini".to_string(),
            ..MapperConfig::default()
        };
        assert!(create_mapper(&config).is_err());
    }

    #[test]
    fn test_create_mapper_unknown_provider() {
        let config = MapperConfig {
            provider: "acme".to_string(),
            ..MapperConfig::default()
        };
        assert!(create_mapper(&config).is_err());
    }

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::RateLimited("429".into()).is_transient());
        assert!(ProviderError::Timeout("t".into()).is_transient());
        assert!(ProviderError::Malformed("m".into()).is_transient());
        assert!(!ProviderError::NotFound("f".into()).is_transient());
        assert!(!ProviderError::InvalidModality(Modality::Virtual).is_transient());
    }

    #[tokio::test]
    async fn test_disabled_mapper_errors() {
        let mapper = DisabledMapper;
        let err = mapper
            .generate(Path::new("/tmp/x.pdf"), Modality::Document, None)
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
