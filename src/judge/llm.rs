//! HTTP-backed judge
//!
//! Talks to either the Anthropic Messages API or a local Ollama server. Each
//! judge call is one request; failures are reported, never retried.

use crate::config::{LlmBackendKind, LlmConfig};
use crate::error::{JudgeError, ReaderError, Result};
use crate::judge::{parse, prompts, Judge};
use crate::types::{ArticlePayload, Characterization, FeedbackItem, Judgment};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";

/// Resolved backend endpoint
#[derive(Clone)]
pub enum LlmBackend {
    Anthropic { api_key: String, model: String },
    Ollama { base_url: String, model: String },
}

impl std::fmt::Debug for LlmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmBackend::Anthropic { model, .. } => write!(f, "Anthropic({})", model),
            LlmBackend::Ollama { base_url, model } => write!(f, "Ollama({} @ {})", model, base_url),
        }
    }
}

impl LlmBackend {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        match config.backend {
            LlmBackendKind::Anthropic => {
                if config.anthropic_api_key.is_empty() {
                    return Err(ReaderError::Config(config::ConfigError::Message(
                        "ANTHROPIC_API_KEY not set".to_string(),
                    )));
                }
                Ok(LlmBackend::Anthropic {
                    api_key: config.anthropic_api_key.clone(),
                    model: config.anthropic_model.clone(),
                })
            }
            LlmBackendKind::Ollama => Ok(LlmBackend::Ollama {
                base_url: config.ollama_base_url.trim_end_matches('/').to_string(),
                model: config.ollama_model.clone(),
            }),
        }
    }
}

/// Anthropic API message format
#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

/// Anthropic API response format
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    text: String,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

pub struct LlmJudge {
    backend: LlmBackend,
    temperature: f32,
    judgment_max_tokens: u32,
    refinement_max_tokens: u32,
    client: reqwest::Client,
}

impl LlmJudge {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let backend = LlmBackend::from_config(config)?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ReaderError::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            backend,
            temperature: config.temperature,
            judgment_max_tokens: config.judgment_max_tokens,
            refinement_max_tokens: config.refinement_max_tokens,
            client,
        })
    }

    pub fn backend(&self) -> &LlmBackend {
        &self.backend
    }

    /// Send one prompt and return the raw completion text
    async fn call_api(&self, prompt: &str, max_tokens: u32) -> std::result::Result<String, JudgeError> {
        match &self.backend {
            LlmBackend::Anthropic { api_key, model } => {
                debug!("Calling Anthropic API ({})", model);
                let request = AnthropicRequest {
                    model,
                    max_tokens,
                    temperature: self.temperature,
                    messages: vec![Message {
                        role: "user",
                        content: prompt,
                    }],
                };

                let response = self
                    .client
                    .post(ANTHROPIC_URL)
                    .header("x-api-key", api_key)
                    .header("anthropic-version", "2023-06-01")
                    .header("content-type", "application/json")
                    .json(&request)
                    .send()
                    .await?;

                if !response.status().is_success() {
                    let status = response.status();
                    let error_text = response.text().await.unwrap_or_default();
                    return Err(JudgeError::Unavailable(format!(
                        "API request failed with status {}: {}",
                        status, error_text
                    )));
                }

                let api_response: AnthropicResponse = response.json().await.map_err(|e| {
                    JudgeError::MalformedResponse(format!("Failed to parse response: {}", e))
                })?;

                api_response
                    .content
                    .into_iter()
                    .next()
                    .map(|c| c.text)
                    .ok_or_else(|| JudgeError::MalformedResponse("Empty response from API".to_string()))
            }
            LlmBackend::Ollama { base_url, model } => {
                debug!("Calling Ollama at {} ({})", base_url, model);
                let request = OllamaRequest {
                    model,
                    prompt,
                    stream: false,
                    format: "json",
                    options: OllamaOptions {
                        temperature: self.temperature,
                        num_predict: max_tokens,
                    },
                };

                let response = self
                    .client
                    .post(format!("{}/api/generate", base_url))
                    .json(&request)
                    .send()
                    .await?;

                if !response.status().is_success() {
                    let status = response.status();
                    let error_text = response.text().await.unwrap_or_default();
                    return Err(JudgeError::Unavailable(format!(
                        "Ollama request failed with status {}: {}",
                        status, error_text
                    )));
                }

                let body: OllamaResponse = response.json().await.map_err(|e| {
                    JudgeError::MalformedResponse(format!("Failed to parse response: {}", e))
                })?;
                Ok(body.response)
            }
        }
    }
}

#[async_trait]
impl Judge for LlmJudge {
    fn name(&self) -> &str {
        match self.backend {
            LlmBackend::Anthropic { .. } => "anthropic",
            LlmBackend::Ollama { .. } => "ollama",
        }
    }

    async fn compare(
        &self,
        criteria: &str,
        a: &ArticlePayload,
        b: &ArticlePayload,
    ) -> std::result::Result<Judgment, JudgeError> {
        let prompt = prompts::comparison_prompt(criteria, a, b);
        let reply = self.call_api(&prompt, self.judgment_max_tokens).await?;
        parse::parse_judgment(&reply)
    }

    async fn characterize(
        &self,
        article: &ArticlePayload,
    ) -> std::result::Result<Characterization, JudgeError> {
        let prompt = prompts::characterization_prompt(article);
        let reply = self.call_api(&prompt, self.judgment_max_tokens).await?;
        parse::parse_characterization(&reply)
    }

    async fn refine(
        &self,
        criteria: &str,
        feedback: &[FeedbackItem],
    ) -> std::result::Result<String, JudgeError> {
        let prompt = prompts::refinement_prompt(criteria, feedback);
        let reply = self.call_api(&prompt, self.refinement_max_tokens).await?;
        parse::parse_refinement(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_anthropic_requires_key() {
        let config = LlmConfig {
            backend: LlmBackendKind::Anthropic,
            anthropic_api_key: String::new(),
            ..LlmConfig::default()
        };
        assert!(matches!(LlmJudge::new(&config), Err(ReaderError::Config(_))));
    }

    #[test]
    fn test_ollama_backend_from_config() {
        let config = LlmConfig {
            ollama_base_url: "http://localhost:11434/".to_string(),
            ..LlmConfig::default()
        };
        let judge = LlmJudge::new(&config).unwrap();
        assert_eq!(judge.name(), "ollama");
        match judge.backend() {
            LlmBackend::Ollama { base_url, model } => {
                assert_eq!(base_url, "http://localhost:11434");
                assert_eq!(model, "llama3.2");
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }

    #[test]
    fn test_debug_hides_api_key() {
        let backend = LlmBackend::Anthropic {
            api_key: "sk-secret".into(),
            model: "m".into(),
        };
        assert!(!format!("{:?}", backend).contains("sk-secret"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let config = LlmConfig {
            // Reserved TEST-NET address, nothing listens there
            ollama_base_url: "http://192.0.2.1:9".to_string(),
            request_timeout: Duration::from_secs(1),
            ..LlmConfig::default()
        };
        let judge = LlmJudge::new(&config).unwrap();
        let payload = ArticlePayload {
            title: "t".into(),
            source: "s".into(),
            preview: "p".into(),
        };
        let result = judge.compare("criteria", &payload, &payload).await;
        assert!(matches!(result, Err(JudgeError::Unavailable(_))));
    }

    #[tokio::test]
    #[ignore] // Requires ANTHROPIC_API_KEY
    async fn test_anthropic_comparison() {
        let config = LlmConfig {
            backend: LlmBackendKind::Anthropic,
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            ..LlmConfig::default()
        };
        let judge = LlmJudge::new(&config).unwrap();
        let kernel = ArticlePayload {
            title: "Inside the Linux scheduler".into(),
            source: "LWN".into(),
            preview: "A walk through EEVDF and its latency trade-offs.".into(),
        };
        let gossip = ArticlePayload {
            title: "Celebrity buys yacht".into(),
            source: "Tabloid".into(),
            preview: "The star was seen at the marina.".into(),
        };
        let judgment = judge
            .compare(prompts::DEFAULT_CRITERIA, &kernel, &gossip)
            .await
            .unwrap();
        assert_eq!(judgment.outcome, crate::types::Outcome::AWins);
    }
}
