//! Gemini client for script generation.
//!
//! Calls `models/{model}:generateContent`, falling back through the
//! configured models until one answers.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{BackendError, GenerationBackend, ResponseFormat};
use crate::error::{WorkerError, WorkerResult};
use crate::metrics::record_backend_call;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const DEFAULT_MODELS: &[&str] = &["gemini-1.5-pro", "gemini-2.0-flash", "gemini-2.5-flash"];

/// Gemini client configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    /// Tried in order
    pub models: Vec<String>,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            models: DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 1024,
        }
    }

    /// Load from environment. `GEMINI_API_KEY` is required.
    pub fn from_env() -> WorkerResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| WorkerError::config_error("GEMINI_API_KEY not set"))?;

        let mut config = Self::new(api_key);
        if let Ok(url) = std::env::var("GEMINI_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(models) = std::env::var("GEMINI_MODELS") {
            let models: Vec<String> = models
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
            if !models.is_empty() {
                config.models = models;
            }
        }
        if let Some(tokens) = std::env::var("GEMINI_MAX_OUTPUT_TOKENS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.max_output_tokens = tokens;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiResponse {
    /// Text of the first candidate, parts concatenated.
    fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Gemini API client.
#[derive(Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> WorkerResult<Self> {
        if config.models.is_empty() {
            return Err(WorkerError::config_error("no Gemini models configured"));
        }
        let client = Client::builder()
            .build()
            .map_err(|e| WorkerError::config_error(format!("HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> WorkerResult<Self> {
        Self::new(GeminiConfig::from_env()?)
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    async fn call_model(
        &self,
        model: &str,
        prompt: &str,
        format: ResponseFormat,
    ) -> Result<String, BackendError> {
        let url = format!("{}/models/{}:generateContent", self.config.base_url, model);

        let request = GeminiRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                top_k: self.config.top_k,
                top_p: self.config.top_p,
                max_output_tokens: self.config.max_output_tokens,
                response_mime_type: match format {
                    ResponseFormat::Json => Some("application/json"),
                    ResponseFormat::Text => None,
                },
            },
        };

        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::unavailable(format!("Gemini request failed: {}", e)))?;
        record_backend_call(model, started.elapsed().as_secs_f64());

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        parsed.into_text().ok_or(BackendError::Empty)
    }
}

#[async_trait]
impl GenerationBackend for GeminiClient {
    async fn generate(&self, prompt: &str, format: ResponseFormat) -> Result<String, BackendError> {
        let mut last_error = None;

        for model in &self.config.models {
            debug!(model = %model, "Calling Gemini");
            match self.call_model(model, prompt, format).await {
                Ok(text) => {
                    info!(model = %model, chars = text.len(), "Gemini answered");
                    return Ok(text);
                }
                Err(e) => {
                    warn!(model = %model, "Gemini model failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| BackendError::unavailable("no Gemini models configured")))
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn answer(text: &str) -> serde_json::Value {
        json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]},
                "finishReason": "STOP"
            }]
        })
    }

    fn client(server: &MockServer, models: &[&str]) -> GeminiClient {
        let config = GeminiConfig::new("test-key")
            .with_base_url(server.uri())
            .with_models(models.iter().copied());
        GeminiClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_generate_returns_first_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-a:generateContent"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("Plants eat light.")))
            .expect(1)
            .mount(&server)
            .await;

        let text = client(&server, &["gemini-a"])
            .generate("photosynthesis", ResponseFormat::Json)
            .await
            .unwrap();
        assert_eq!(text, "Plants eat light.");

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "photosynthesis");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["topK"], 40);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[tokio::test]
    async fn test_falls_back_to_next_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-a:generateContent"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-b:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("fallback")))
            .mount(&server)
            .await;

        let text = client(&server, &["gemini-a", "gemini-b"])
            .generate("p", ResponseFormat::Text)
            .await
            .unwrap();
        assert_eq!(text, "fallback");
    }

    #[tokio::test]
    async fn test_last_error_is_reported_when_all_models_fail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client(&server, &["gemini-a", "gemini-b"])
            .generate("p", ResponseFormat::Text)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::Status {
                status: 500,
                body: "boom".into()
            }
        );
    }

    #[tokio::test]
    async fn test_empty_candidates_are_empty_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
            .mount(&server)
            .await;

        let err = client(&server, &["gemini-a"])
            .generate("p", ResponseFormat::Text)
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::Empty);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server, &["gemini-a"])
            .generate("p", ResponseFormat::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse(_)));
    }

    #[test]
    fn test_config_requires_models() {
        let config = GeminiConfig::new("k").with_models(Vec::<String>::new());
        assert!(GeminiClient::new(config).is_err());
    }
}
