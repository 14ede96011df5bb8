//! Runtime configuration
//!
//! Layered as: built-in defaults, then an optional TOML file, then
//! `READER_<SECTION>__<KEY>` environment variables (for example
//! `READER_LLM__BACKEND=anthropic`). Durations are whole seconds.

use crate::error::{ReaderError, Result};
use crate::types::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_K_FACTOR};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub rating: RatingConfig,
    pub refinement: RefinementConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file, or `:memory:`
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path().to_string_lossy().to_string(),
        }
    }
}

/// Which LLM service answers judge calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmBackendKind {
    Anthropic,
    #[default]
    Ollama,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: LlmBackendKind,

    /// Falls back to `ANTHROPIC_API_KEY` when empty
    pub anthropic_api_key: String,
    pub anthropic_model: String,

    pub ollama_base_url: String,
    pub ollama_model: String,

    /// Per-request HTTP timeout (seconds)
    #[serde(with = "serde_duration")]
    pub request_timeout: Duration,

    pub temperature: f32,

    /// Token budget for comparison and characterization replies
    pub judgment_max_tokens: u32,

    /// Token budget for refinement replies
    pub refinement_max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackendKind::Ollama,
            anthropic_api_key: String::new(),
            anthropic_model: "claude-3-5-haiku-20241022".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.2".to_string(),
            request_timeout: Duration::from_secs(120),
            temperature: 0.2,
            judgment_max_tokens: 300,
            refinement_max_tokens: 2000,
        }
    }
}

// Keep the key out of logs
impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("backend", &self.backend)
            .field(
                "anthropic_api_key",
                &if self.anthropic_api_key.is_empty() { "<unset>" } else { "<redacted>" },
            )
            .field("anthropic_model", &self.anthropic_model)
            .field("ollama_base_url", &self.ollama_base_url)
            .field("ollama_model", &self.ollama_model)
            .field("request_timeout", &self.request_timeout)
            .field("temperature", &self.temperature)
            .field("judgment_max_tokens", &self.judgment_max_tokens)
            .field("refinement_max_tokens", &self.refinement_max_tokens)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    pub k_factor: f64,

    /// Comparisons after which a rating is trusted
    pub confidence_threshold: u32,

    /// Opponents drawn per rating round
    pub opponents_per_round: usize,

    /// Characters of article content sent to the judge
    pub preview_chars: usize,

    /// Upper bound on a single judge call (seconds)
    #[serde(with = "serde_duration")]
    pub judge_timeout: Duration,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            k_factor: DEFAULT_K_FACTOR,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            opponents_per_round: DEFAULT_CONFIDENCE_THRESHOLD as usize,
            preview_chars: 1000,
            judge_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// Run refinement from the scheduler
    pub enabled: bool,

    /// How far back unlinked feedback is collected (seconds)
    #[serde(with = "serde_duration")]
    pub window: Duration,

    /// Run at UTC midnight instead of every `interval`
    pub align_to_midnight: bool,

    #[serde(with = "serde_duration")]
    pub interval: Duration,

    /// Upper bound on one refinement run (seconds)
    #[serde(with = "serde_duration")]
    pub max_duration: Duration,

    /// Shorter criteria text is rejected as implausible
    pub min_criteria_chars: usize,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(86400),
            align_to_midnight: true,
            interval: Duration::from_secs(86400),
            max_duration: Duration::from_secs(300),
            min_criteria_chars: 40,
        }
    }
}

// Custom serde module for Duration (serialize/deserialize as seconds)
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// `<data dir>/nerd-reader/reader.db`
pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nerd-reader")
        .join("reader.db")
}

impl ReaderConfig {
    /// Load defaults, then `path` (if any), then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&ReaderConfig::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("READER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: ReaderConfig = builder.build()?.try_deserialize()?;
        config.apply_env_fallbacks();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: ReaderConfig =
            toml::from_str(toml_str).map_err(|e| ReaderError::Validation(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_fallbacks(&mut self) {
        if self.llm.anthropic_api_key.is_empty() {
            if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
                self.llm.anthropic_api_key = key;
            }
        }
    }

    /// Switch refinement to a fixed interval, checked like a configured one
    pub fn with_refinement_interval(mut self, interval: Duration) -> Result<Self> {
        self.refinement.align_to_midnight = false;
        self.refinement.interval = interval;
        self.validate()?;
        Ok(self)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let rating = &self.rating;
        if !(rating.k_factor.is_finite() && rating.k_factor > 0.0) {
            return Err(ReaderError::Validation(
                "rating.k_factor must be a positive number".to_string(),
            ));
        }
        if rating.confidence_threshold == 0 {
            return Err(ReaderError::Validation(
                "rating.confidence_threshold must be at least 1".to_string(),
            ));
        }
        if rating.opponents_per_round == 0 {
            return Err(ReaderError::Validation(
                "rating.opponents_per_round must be at least 1".to_string(),
            ));
        }
        if rating.preview_chars == 0 {
            return Err(ReaderError::Validation(
                "rating.preview_chars must be at least 1".to_string(),
            ));
        }
        if rating.judge_timeout.is_zero() || self.llm.request_timeout.is_zero() {
            return Err(ReaderError::Validation(
                "judge timeouts must be at least 1 second".to_string(),
            ));
        }

        let refinement = &self.refinement;
        if refinement.window < Duration::from_secs(3600) {
            return Err(ReaderError::Validation(
                "refinement.window must be at least 1 hour".to_string(),
            ));
        }
        if !refinement.align_to_midnight && refinement.interval < Duration::from_secs(3600) {
            return Err(ReaderError::Validation(
                "refinement.interval must be at least 1 hour".to_string(),
            ));
        }
        if refinement.max_duration.is_zero() {
            return Err(ReaderError::Validation(
                "refinement.max_duration must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }
}
