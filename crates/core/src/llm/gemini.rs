use crate::config::{ApiKey, DEFAULT_GEMINI_MODEL};
use crate::llm::{Prompt, TextTransform, TransformError};
use crate::util::{retry_with_backoff, RetryPolicy};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const LOG_TARGET: &str = "llm::gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: Option<ApiKey>,
    base_url: String,
    model: String,
    generation: GenerationConfig,
    retry: RetryPolicy,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: 2048,
            temperature: 0.9,
            top_p: 0.95,
        }
    }
}

impl GeminiClient {
    pub fn new(api_key: Option<ApiKey>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            generation: GenerationConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    pub fn with_generation_config(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url,
            urlencoding::encode(&self.model)
        )
    }

    async fn generate_once(
        &self,
        key: &ApiKey,
        body: &GenerateRequest<'_>,
    ) -> Result<String, TransformError> {
        let response = self
            .client
            .post(format!("{}?key={}", self.endpoint(), urlencoding::encode(key.expose())))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransformError::Api {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| TransformError::InvalidResponse(e.to_string()))?;
        parsed.into_text()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    /// Concatenates the text parts of the first candidate.
    fn into_text(self) -> Result<String, TransformError> {
        let text: String = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(TransformError::EmptyResponse);
        }
        Ok(text)
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorPayload,
}

#[derive(Deserialize)]
struct ErrorPayload {
    message: String,
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => env.error.message,
        Err(_) if body.trim().is_empty() => "no error body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

impl TextTransform for GeminiClient {
    fn complete(&self, prompt: Prompt) -> BoxFuture<'_, Result<String, TransformError>> {
        async move {
            let key = self.api_key.as_ref().ok_or(TransformError::MissingCredential)?;
            let rendered = prompt.render();
            let body = GenerateRequest {
                contents: [Content {
                    role: "user",
                    parts: [Part { text: &rendered }],
                }],
                generation_config: self.generation,
            };

            tracing::debug!(
                target: LOG_TARGET,
                model = %self.model,
                prompt_chars = rendered.chars().count(),
                "requesting completion"
            );

            retry_with_backoff(
                &self.retry,
                || self.generate_once(key, &body),
                TransformError::is_retryable,
            )
            .await
        }
        .boxed()
    }
}
