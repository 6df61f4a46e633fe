//! Text-generation providers and the fallback gateway
//!
//! Provides a `TextProvider` trait with one implementation:
//! - **ChatCompletionsProvider**: any OpenAI-compatible `/chat/completions` API
//!   (OpenAI, OpenRouter, xAI)
//!
//! `ProviderGateway` holds an ordered chain of providers and returns the first
//! successful completion. Each provider gets exactly one attempt per call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ProviderEntry, ProvidersConfig};

// ============================================================================
// TextProvider trait
// ============================================================================

/// Abstraction over text-generation providers.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Complete a single-turn prompt, producing at most `max_tokens` tokens.
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, ProviderError>;

    /// Provider name for logging and the diagnostic trail.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

/// Failure of a single provider attempt.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Missing API key")]
    MissingApiKey,
}

/// Failure of the whole chain.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("No text-generation provider configured")]
    NoProviderConfigured,

    #[error("All providers failed: {trail}")]
    AllProvidersExhausted { trail: String },
}

// ============================================================================
// Chat completions wire format (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatErrorResponse {
    error: Option<ChatErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ChatErrorDetail {
    message: String,
}

// ============================================================================
// ChatCompletionsProvider
// ============================================================================

/// Settings for one OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletionsConfig {
    pub name: String,
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub referer: Option<String>,
    pub temperature: f32,
    pub timeout: Duration,
}

/// Client for an OpenAI-compatible chat completions API.
#[derive(Debug, Clone)]
pub struct ChatCompletionsProvider {
    client: Client,
    config: ChatCompletionsConfig,
}

impl ChatCompletionsProvider {
    pub fn new(config: ChatCompletionsConfig) -> Result<Self, ProviderError> {
        if config.api_key.is_empty() {
            return Err(ProviderError::MissingApiKey);
        }

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    /// Build from a chain entry. Returns `Ok(None)` when the entry has no key.
    pub fn from_entry(
        entry: &ProviderEntry,
        settings: &ProvidersConfig,
    ) -> Result<Option<Self>, ProviderError> {
        let Some(api_key) = entry.resolve_api_key() else {
            return Ok(None);
        };

        Self::new(ChatCompletionsConfig {
            name: entry.name.clone(),
            base_url: entry.base_url.trim_end_matches('/').to_string(),
            model: entry.model.clone(),
            api_key,
            referer: entry.referer.clone(),
            temperature: settings.temperature,
            timeout: Duration::from_secs(settings.timeout_seconds),
        })
        .map(Some)
    }
}

#[async_trait]
impl TextProvider for ChatCompletionsProvider {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            temperature: self.config.temperature,
        };

        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request);
        if let Some(referer) = &self.config.referer {
            builder = builder.header("HTTP-Referer", referer);
        }

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ChatErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            return Err(ProviderError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::MalformedResponse("no choices in response".to_string()))
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

// ============================================================================
// ProviderGateway
// ============================================================================

/// Outcome of one provider attempt inside a gateway call.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct Attempt {
    pub provider: String,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
}

/// Successful gateway call with its diagnostic trail.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub provider: String,
    pub attempts: Vec<Attempt>,
}

/// Ordered fallback over the configured providers.
#[derive(Clone)]
pub struct ProviderGateway {
    providers: Vec<Arc<dyn TextProvider>>,
}

impl ProviderGateway {
    /// Create a gateway. An empty chain is rejected before any network call.
    pub fn new(providers: Vec<Arc<dyn TextProvider>>) -> Result<Self, GatewayError> {
        if providers.is_empty() {
            return Err(GatewayError::NoProviderConfigured);
        }
        Ok(Self { providers })
    }

    /// Build the chain from config, skipping entries without an API key.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self, GatewayError> {
        let mut providers: Vec<Arc<dyn TextProvider>> = Vec::new();

        for entry in &config.chain {
            match ChatCompletionsProvider::from_entry(entry, config) {
                Ok(Some(provider)) => {
                    tracing::info!(provider = %entry.name, model = %entry.model, "Provider enabled");
                    providers.push(Arc::new(provider));
                }
                Ok(None) => {
                    tracing::debug!(provider = %entry.name, "Provider skipped: no API key");
                }
                Err(e) => {
                    tracing::warn!(provider = %entry.name, error = %e, "Provider skipped");
                }
            }
        }

        Self::new(providers)
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Generate text from the first provider that succeeds.
    pub async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, GatewayError> {
        self.generate_with_trail(prompt, max_tokens)
            .await
            .map(|generation| generation.text)
    }

    /// Like `generate`, also returning every attempt made.
    pub async fn generate_with_trail(
        &self,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<Generation, GatewayError> {
        let mut attempts = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            let start = Instant::now();
            let result = provider.generate(prompt, max_tokens).await;
            let elapsed = start.elapsed();

            match result {
                Ok(text) => {
                    tracing::info!(
                        provider = provider.name(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Provider attempt succeeded"
                    );
                    attempts.push(Attempt {
                        provider: provider.name().to_string(),
                        outcome: AttemptOutcome::Succeeded,
                        elapsed,
                    });
                    return Ok(Generation {
                        text,
                        provider: provider.name().to_string(),
                        attempts,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        provider = provider.name(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        error = %e,
                        "Provider attempt failed"
                    );
                    attempts.push(Attempt {
                        provider: provider.name().to_string(),
                        outcome: AttemptOutcome::Failed(e.to_string()),
                        elapsed,
                    });
                }
            }
        }

        let trail = attempts
            .iter()
            .filter_map(|a| match &a.outcome {
                AttemptOutcome::Failed(reason) => Some(format!("{} failed: {}", a.provider, reason)),
                AttemptOutcome::Succeeded => None,
            })
            .collect::<Vec<_>>()
            .join("; ");

        tracing::error!(attempts = attempts.len(), "All text-generation providers failed");
        Err(GatewayError::AllProvidersExhausted { trail })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(name: &str, base_url: String) -> ChatCompletionsConfig {
        ChatCompletionsConfig {
            name: name.to_string(),
            base_url,
            model: "gpt-4o-mini".to_string(),
            api_key: "test-api-key".to_string(),
            referer: None,
            temperature: 0.1,
            timeout: Duration::from_secs(5),
        }
    }

    fn completion(text: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": text } }]
        })
    }

    async fn provider_at(server: &MockServer, name: &str) -> Arc<dyn TextProvider> {
        Arc::new(ChatCompletionsProvider::new(test_config(name, server.uri())).unwrap())
    }

    #[tokio::test]
    async fn test_generate_posts_chat_request_and_returns_content() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-api-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [{ "role": "user", "content": "hello" }],
                "max_tokens": 500
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("SELECT 1")))
            .mount(&server)
            .await;

        let provider = ChatCompletionsProvider::new(test_config("openai", server.uri())).unwrap();
        let text = provider.generate("hello", 500).await.unwrap();
        assert_eq!(text, "SELECT 1");
    }

    #[tokio::test]
    async fn test_referer_header_is_sent_when_configured() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(header("HTTP-Referer", "https://example.test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
            .mount(&server)
            .await;

        let mut config = test_config("opensource", server.uri());
        config.referer = Some("https://example.test".to_string());
        let provider = ChatCompletionsProvider::new(config).unwrap();
        assert_eq!(provider.generate("hi", 10).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_non_2xx_maps_to_api_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "Rate limit exceeded" }
            })))
            .mount(&server)
            .await;

        let provider = ChatCompletionsProvider::new(test_config("openai", server.uri())).unwrap();
        match provider.generate("hello", 10).await {
            Err(ProviderError::Api { code, message }) => {
                assert_eq!(code, 429);
                assert_eq!(message, "Rate limit exceeded");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_choices_is_malformed() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })),
            )
            .mount(&server)
            .await;

        let provider = ChatCompletionsProvider::new(test_config("openai", server.uri())).unwrap();
        assert!(matches!(
            provider.generate("hello", 10).await,
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let mut config = test_config("openai", "http://localhost".to_string());
        config.api_key = String::new();
        assert!(matches!(
            ChatCompletionsProvider::new(config),
            Err(ProviderError::MissingApiKey)
        ));
    }

    // --- Gateway tests ---

    #[test]
    fn test_empty_chain_is_no_provider_configured() {
        assert!(matches!(
            ProviderGateway::new(Vec::new()),
            Err(GatewayError::NoProviderConfigured)
        ));
    }

    #[test]
    fn test_from_config_without_keys_fails() {
        let config = ProvidersConfig {
            timeout_seconds: 5,
            temperature: 0.1,
            chain: vec![ProviderEntry {
                name: "openai".to_string(),
                base_url: "http://localhost".to_string(),
                model: "m".to_string(),
                api_key_env: Some("INSIGHT_TEST_NEVER_SET_KEY".to_string()),
                api_key: None,
                referer: None,
            }],
        };
        assert!(matches!(
            ProviderGateway::from_config(&config),
            Err(GatewayError::NoProviderConfigured)
        ));
    }

    #[tokio::test]
    async fn test_fallback_to_second_provider() {
        let failing = MockServer::start().await;
        let healthy = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&failing)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("from B")))
            .expect(1)
            .mount(&healthy)
            .await;

        let gateway = ProviderGateway::new(vec![
            provider_at(&failing, "A").await,
            provider_at(&healthy, "B").await,
        ])
        .unwrap();

        let generation = gateway.generate_with_trail("prompt", 100).await.unwrap();
        assert_eq!(generation.text, "from B");
        assert_eq!(generation.provider, "B");
        assert_eq!(generation.attempts.len(), 2);
        assert!(matches!(generation.attempts[0].outcome, AttemptOutcome::Failed(_)));
        assert_eq!(generation.attempts[1].outcome, AttemptOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_first_success_short_circuits() {
        let first = MockServer::start().await;
        let second = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("first")))
            .mount(&first)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("second")))
            .expect(0)
            .mount(&second)
            .await;

        let gateway = ProviderGateway::new(vec![
            provider_at(&first, "A").await,
            provider_at(&second, "B").await,
        ])
        .unwrap();

        assert_eq!(gateway.generate("prompt", 10).await.unwrap(), "first");
    }

    #[tokio::test]
    async fn test_all_failing_is_exhausted_with_trail() {
        let a = MockServer::start().await;
        let b = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&a)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&b)
            .await;

        let gateway =
            ProviderGateway::new(vec![provider_at(&a, "A").await, provider_at(&b, "B").await])
                .unwrap();

        match gateway.generate("prompt", 10).await {
            Err(GatewayError::AllProvidersExhausted { trail }) => {
                assert!(trail.contains("A failed: API error (401)"), "trail: {}", trail);
                assert!(trail.contains("B failed: Malformed response"), "trail: {}", trail);
                assert!(trail.contains("; "));
            }
            other => panic!("Expected AllProvidersExhausted, got {:?}", other.map(|_| ())),
        }
    }
}
