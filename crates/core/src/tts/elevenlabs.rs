use crate::config::{ApiKey, DEFAULT_TTS_MODEL};
use crate::tts::{
    QuotaExceeded, SynthesizedAudio, TtsClient, TtsError, TtsRequest, AUDIO_MPEG, UPGRADE_URL,
};
use crate::voices::VoiceSource;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

const LOG_TARGET: &str = "tts::elevenlabs";

#[derive(Clone)]
pub struct ElevenLabsTtsClient {
    client: Client,
    api_key: Option<ApiKey>,
    base_url: String,
    model_id: String,
}

impl ElevenLabsTtsClient {
    /// `api_key` is the operator key; a request's own credential takes precedence.
    pub fn new(api_key: Option<ApiKey>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: "https://api.elevenlabs.io/v1".to_string(),
            model_id: DEFAULT_TTS_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model_id: String) -> Self {
        self.model_id = model_id;
        self
    }

    fn key_for<'a>(&'a self, credential: Option<&'a ApiKey>) -> Result<&'a ApiKey, TtsError> {
        credential
            .or(self.api_key.as_ref())
            .ok_or(TtsError::MissingCredential)
    }
}

#[derive(Serialize)]
struct ElevenLabsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    use_speaker_boost: Option<bool>,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.75,
            style: Some(0.0),
            use_speaker_boost: Some(true),
        }
    }
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<ErrorDetail>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
    Structured { message: String },
    Plain(String),
}

fn error_message(body: &str) -> String {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    match parsed.detail {
        Some(ErrorDetail::Structured { message }) | Some(ErrorDetail::Plain(message)) => message,
        None if body.trim().is_empty() => "no error body".to_string(),
        None => body.trim().to_string(),
    }
}

impl TtsClient for ElevenLabsTtsClient {
    fn synthesize(&self, request: TtsRequest) -> BoxFuture<'_, Result<SynthesizedAudio, TtsError>> {
        async move {
            if request.text.trim().is_empty() {
                return Err(TtsError::EmptyText);
            }
            let key = self.key_for(request.credential.as_ref())?;

            let url = format!(
                "{}/text-to-speech/{}",
                self.base_url,
                urlencoding::encode(request.voice.as_str())
            );
            let body = ElevenLabsRequest {
                text: &request.text,
                model_id: &self.model_id,
                voice_settings: VoiceSettings::default(),
            };

            tracing::debug!(
                target: LOG_TARGET,
                voice = %request.voice.as_str(),
                chars = request.text.chars().count(),
                byo_key = request.credential.is_some(),
                "requesting speech"
            );

            let response = self
                .client
                .post(&url)
                .header("xi-api-key", key.expose())
                .header("Accept", AUDIO_MPEG)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let text = response.text().await.unwrap_or_default();
                tracing::warn!(target: LOG_TARGET, "speech api quota exceeded");
                return Err(TtsError::RateLimited(QuotaExceeded {
                    message: error_message(&text),
                    remaining: 0,
                    limit: None,
                    reset_at: None,
                    upgrade_url: UPGRADE_URL.to_string(),
                }));
            }
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(TtsError::Api {
                    status: status.as_u16(),
                    message: error_message(&text),
                });
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or(AUDIO_MPEG)
                .to_string();
            let bytes = response.bytes().await?;
            if bytes.is_empty() {
                return Err(TtsError::InvalidResponse("empty audio body".to_string()));
            }

            Ok(SynthesizedAudio {
                content_type,
                bytes,
            })
        }
        .boxed()
    }
}

impl VoiceSource for ElevenLabsTtsClient {
    fn fetch_voices(
        &self,
        credential: Option<ApiKey>,
    ) -> BoxFuture<'_, Result<serde_json::Value, TtsError>> {
        async move {
            let key = self.key_for(credential.as_ref())?.clone();
            let response = self
                .client
                .get(format!("{}/voices", self.base_url))
                .header("xi-api-key", key.expose())
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(TtsError::Api {
                    status: status.as_u16(),
                    message: error_message(&text),
                });
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| TtsError::InvalidResponse(format!("voice list: {e}")))
        }
        .boxed()
    }
}
