//! Voice catalog loading.

use crate::config::ApiKey;
use crate::tts::TtsError;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

const LOG_TARGET: &str = "voices";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoiceCatalogEntry {
    pub id: String,
    pub display_name: String,
}

#[derive(thiserror::Error, Debug)]
pub enum VoiceCatalogError {
    #[error("voice catalog unavailable: {0}")]
    Unavailable(#[from] TtsError),

    #[error("unrecognized voice list shape: {0}")]
    UnexpectedShape(String),
}

/// Anything that can return the provider's raw voice listing.
pub trait VoiceSource: Send + Sync {
    fn fetch_voices(
        &self,
        credential: Option<ApiKey>,
    ) -> BoxFuture<'_, Result<serde_json::Value, TtsError>>;
}

#[derive(Deserialize)]
struct RawVoice {
    #[serde(alias = "voice_id")]
    id: String,
    #[serde(alias = "displayName", alias = "name", default)]
    display_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VoiceListing {
    Wrapped { voices: Vec<RawVoice> },
    Bare(Vec<RawVoice>),
}

/// Accepts either a bare array or an object with a `voices` array.
pub fn parse_voice_list(value: serde_json::Value) -> Result<Vec<VoiceCatalogEntry>, VoiceCatalogError> {
    let listing: VoiceListing = serde_json::from_value(value)
        .map_err(|e| VoiceCatalogError::UnexpectedShape(e.to_string()))?;
    let raw = match listing {
        VoiceListing::Wrapped { voices } => voices,
        VoiceListing::Bare(voices) => voices,
    };
    Ok(raw
        .into_iter()
        .map(|v| VoiceCatalogEntry {
            display_name: v.display_name.unwrap_or_else(|| v.id.clone()),
            id: v.id,
        })
        .collect())
}

/// Loads the catalog once per session and hands out copies.
///
/// Failures never reach the caller: they are logged and an empty list is returned,
/// which the casting step treats as "no voices yet". Only successful loads are cached.
pub struct VoiceCatalogLoader {
    source: Arc<dyn VoiceSource>,
    credential: Option<ApiKey>,
    cached: Mutex<Option<Vec<VoiceCatalogEntry>>>,
}

impl VoiceCatalogLoader {
    pub fn new(source: Arc<dyn VoiceSource>) -> Self {
        Self {
            source,
            credential: None,
            cached: Mutex::new(None),
        }
    }

    pub fn with_credential(mut self, credential: Option<ApiKey>) -> Self {
        self.credential = credential;
        self
    }

    pub async fn load(&self) -> Vec<VoiceCatalogEntry> {
        let mut cached = self.cached.lock().await;
        if let Some(voices) = cached.as_ref() {
            return voices.clone();
        }

        match self.try_load().await {
            Ok(voices) => {
                tracing::info!(target: LOG_TARGET, count = voices.len(), "voice catalog loaded");
                *cached = Some(voices.clone());
                voices
            }
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, error = %e, "failed to load voices");
                Vec::new()
            }
        }
    }

    /// Forgets the cached catalog so the next `load` fetches again.
    pub async fn reload(&self) -> Vec<VoiceCatalogEntry> {
        self.cached.lock().await.take();
        self.load().await
    }

    async fn try_load(&self) -> Result<Vec<VoiceCatalogEntry>, VoiceCatalogError> {
        let value = self.source.fetch_voices(self.credential.clone()).await?;
        parse_voice_list(value)
    }
}
