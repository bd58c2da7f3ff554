use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path};

use crate::error::{AnchorError, CoreResult};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds (default 60000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

/// USD per 1000 tokens.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub input_per_1k: f64,
    #[serde(default)]
    pub output_per_1k: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct PricingTable {
    #[serde(default)]
    pub models: HashMap<String, ModelPrice>,
}

impl PricingTable {
    /// Exact model name first, then the longest configured prefix, so
    /// `gpt-4o` also prices dated snapshots like `gpt-4o-2024-08-06`.
    pub fn price(&self, model: &str) -> Option<&ModelPrice> {
        self.models.get(model).or_else(|| {
            self.models
                .iter()
                .filter(|(name, _)| model.starts_with(name.as_str()))
                .max_by_key(|(name, _)| name.len())
                .map(|(_, price)| price)
        })
    }

    pub fn cost(&self, model: &str, input_tokens: Option<i64>, output_tokens: Option<i64>) -> Option<f64> {
        let price = self.price(model)?;
        if input_tokens.is_none() && output_tokens.is_none() {
            return None;
        }
        let input = input_tokens.unwrap_or(0) as f64 / 1000.0 * price.input_per_1k;
        let output = output_tokens.unwrap_or(0) as f64 / 1000.0 * price.output_per_1k;
        Some(input + output)
    }
}

fn default_instrumentations() -> Vec<String> {
    vec!["openai".to_string()]
}
fn default_true() -> bool {
    true
}

/// Everything `init` needs. Missing keys in a config file fall back to defaults.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InitOptions {
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default)]
    pub otlp_headers: HashMap<String, String>,
    /// Use the synchronous span processor instead of batching.
    #[serde(default)]
    pub disable_batch: bool,
    #[serde(default = "default_instrumentations")]
    pub instrumentations: Vec<String>,
    #[serde(default = "default_true")]
    pub capture_message_content: bool,
    #[serde(default)]
    pub disable_metrics: bool,
    #[serde(default)]
    pub pricing: PricingTable,
    /// HTTP client configuration (timeouts, pooling). Missing in older configs → defaults.
    #[serde(default)]
    pub http: HttpCfg,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            application_name: None,
            environment: None,
            otlp_endpoint: None,
            otlp_headers: HashMap::new(),
            disable_batch: false,
            instrumentations: default_instrumentations(),
            capture_message_content: true,
            disable_metrics: false,
            pricing: PricingTable::default(),
            http: HttpCfg::default(),
        }
    }
}

impl InitOptions {
    /// Load options from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        parse_file(path.as_ref())
    }
}

impl PricingTable {
    /// Standalone pricing file, same formats as [`InitOptions::from_path`].
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        parse_file(path.as_ref())
    }
}

fn parse_file<T: serde::de::DeserializeOwned>(path: &Path) -> CoreResult<T> {
    let bytes = fs::read(path).map_err(AnchorError::from)?;
    let s = std::str::from_utf8(&bytes).map_err(|e| AnchorError::Other(e.into()))?;
    let parsed = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str::<T>(s).map_err(|e| AnchorError::Other(e.into()))?,
        Some("toml") => toml::from_str::<T>(s).map_err(|e| AnchorError::Other(e.into()))?,
        _ => serde_json::from_str::<T>(s)
            .map_err(|e| AnchorError::Other(e.into()))
            .or_else(|_| toml::from_str::<T>(s).map_err(|e| AnchorError::Other(e.into())))?,
    };
    Ok(parsed)
}
