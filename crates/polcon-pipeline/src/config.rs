//! Pipeline configuration.
//!
//! Read from a JSON file (every key optional) and then overridden by CLI
//! flags. Validation happens once, before any policy is ingested.

use polcon_extract::{ConjunctionPolicy, GatewayConfig, LlmConfig, Provider};
use polcon_ingest::ChunkerConfig;
use polcon_ontology::{Ontology, OntologyError};
use polcon_reason::ComparatorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("environment variable `{0}` holding the API key is not set")]
    MissingApiKey(String),

    #[error("LLM configuration rejected: {0}")]
    Llm(String),

    #[error(transparent)]
    Ontology(#[from] OntologyError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    #[default]
    Deterministic,
    Llm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmSettings {
    pub provider: Provider,
    pub model: String,
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAI,
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.0,
            timeout_secs: 60,
        }
    }
}

impl LlmSettings {
    /// Resolve the API key from the environment and build a checked client config.
    pub fn to_llm_config(&self) -> Result<LlmConfig, ConfigError> {
        let key = std::env::var(&self.api_key_env).ok();
        let mut config = match self.provider {
            Provider::OpenAI => {
                let key = key.ok_or_else(|| ConfigError::MissingApiKey(self.api_key_env.clone()))?;
                LlmConfig::openai(&key, &self.model)
            }
            Provider::Local => {
                let url = self.base_url.as_deref().ok_or(ConfigError::Invalid {
                    key: "llm.base_url",
                    reason: "required for the local provider".to_string(),
                })?;
                let mut config = LlmConfig::local(url, &self.model);
                config.api_key = key.unwrap_or_default();
                config
            }
        };
        if let Some(url) = &self.base_url {
            config = config.with_base_url(url.clone());
        }
        let config = config
            .with_temperature(self.temperature)
            .with_timeout_secs(self.timeout_secs);
        config.validate().map_err(|e| ConfigError::Llm(e.to_string()))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifierSettings {
    pub enabled: bool,
    /// Use the LLM verifier when no verifier is supplied programmatically
    pub use_llm: bool,
    pub min_confidence: f64,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            use_llm: false,
            min_confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub strict_mode: bool,
    pub strict_context: bool,
    pub extractor_backend: ExtractorKind,
    pub llm: LlmSettings,
    pub verifier: VerifierSettings,
    /// Target chunk size in words
    pub chunk_target_size: usize,
    /// Overlap between consecutive chunks, in percent
    pub chunk_overlap_pct: f64,
    pub concurrency_limit: usize,
    pub extraction_timeout_ms: u64,
    pub extraction_max_retries: u32,
    pub retry_backoff_ms: u64,
    pub conjunction: ConjunctionPolicy,
    pub vocab_path: Option<PathBuf>,
    pub rules_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let gateway = GatewayConfig::default();
        Self {
            strict_mode: false,
            strict_context: false,
            extractor_backend: ExtractorKind::Deterministic,
            llm: LlmSettings::default(),
            verifier: VerifierSettings::default(),
            chunk_target_size: 1000,
            chunk_overlap_pct: 12.0,
            concurrency_limit: gateway.concurrency_limit,
            extraction_timeout_ms: gateway.timeout_ms,
            extraction_max_retries: gateway.max_retries,
            retry_backoff_ms: gateway.backoff_base_ms,
            conjunction: ConjunctionPolicy::Merge,
            vocab_path: None,
            rules_path: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&json, &path.display().to_string())?;
        tracing::debug!(path = %path.display(), "loaded pipeline config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &'static str, reason: &str| {
            Err(ConfigError::Invalid {
                key,
                reason: reason.to_string(),
            })
        };
        if self.chunk_target_size == 0 {
            return invalid("chunk_target_size", "must be at least 1");
        }
        if !(0.0..=100.0).contains(&self.chunk_overlap_pct) {
            return invalid("chunk_overlap_pct", "must be a percentage between 0 and 100");
        }
        if self.concurrency_limit == 0 {
            return invalid("concurrency_limit", "must be at least 1");
        }
        if self.extraction_timeout_ms == 0 {
            return invalid("extraction_timeout_ms", "must be positive");
        }
        if !(0.0..=1.0).contains(&self.verifier.min_confidence) {
            return invalid("verifier.min_confidence", "must be between 0 and 1");
        }
        if self.llm.model.trim().is_empty() {
            return invalid("llm.model", "must not be empty");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return invalid("llm.temperature", "must be between 0 and 2");
        }
        Ok(())
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            max_retries: self.extraction_max_retries,
            timeout_ms: self.extraction_timeout_ms,
            backoff_base_ms: self.retry_backoff_ms,
            conjunction: self.conjunction,
            concurrency_limit: self.concurrency_limit,
            ..GatewayConfig::default()
        }
    }

    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig::new(self.chunk_target_size, self.chunk_overlap_pct / 100.0)
    }

    pub fn comparator_config(&self) -> ComparatorConfig {
        ComparatorConfig {
            strict_mode: self.strict_mode,
            strict_context: self.strict_context,
        }
    }

    /// Configured vocabulary and rules, or the embedded defaults.
    pub fn load_ontology(&self) -> Result<Ontology, ConfigError> {
        Ok(Ontology::load(self.vocab_path.as_deref(), self.rules_path.as_deref())?)
    }
}
