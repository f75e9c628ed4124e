//! TOML configuration parsing.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub mapper: MapperConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory holding one JSON map per resource id.
    #[serde(default = "default_maps_dir")]
    pub maps_dir: PathBuf,
    /// Directory materialized evidence files are written into.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            maps_dir: default_maps_dir(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_maps_dir() -> PathBuf {
    PathBuf::from(".resource_maps")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(".citemap_output")
}

#[derive(Debug, Deserialize, Clone)]
pub struct MapperConfig {
    /// Analysis provider: `"gemini"` or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// API key for the provider. Required when the provider is not disabled.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Maximum simultaneously in-flight provider calls across the process.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Provider attempts per ingestion before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-attempt timeout, distinct from retry backoff.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            model: None,
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_concurrency() -> usize {
    5
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7431".to_string()
}

impl Config {
    /// Parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Parse a config file, or fall back to pure defaults when it does not
    /// exist. The library works without any configuration; only ingestion
    /// needs a provider configured.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.mapper.provider, "disabled");
        assert_eq!(config.mapper.concurrency, 5);
        assert_eq!(config.mapper.max_retries, 3);
        assert_eq!(config.storage.maps_dir, PathBuf::from(".resource_maps"));
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
[storage]
maps_dir = "/data/maps"

[mapper]
provider = "gemini"
api_key = "k"
concurrency = 2
"#,
        )
        .unwrap();
        assert_eq!(config.storage.maps_dir, PathBuf::from("/data/maps"));
        assert_eq!(config.storage.output_dir, PathBuf::from(".citemap_output"));
        assert_eq!(config.mapper.provider, "gemini");
        assert_eq!(config.mapper.concurrency, 2);
        assert_eq!(config.mapper.timeout_secs, 120);
        assert_eq!(config.server.bind, "127.0.0.1:7431");
    }
}
