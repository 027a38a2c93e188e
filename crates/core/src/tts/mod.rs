mod elevenlabs;
mod quota;

use crate::config::ApiKey;
use crate::quota::ClientId;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

pub use elevenlabs::ElevenLabsTtsClient;
pub use quota::QuotaGatedTtsClient;

pub const AUDIO_MPEG: &str = "audio/mpeg";
pub const UPGRADE_URL: &str = "https://elevenlabs.io";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VoiceId(pub String);

impl VoiceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TtsRequest {
    pub text: String,
    pub voice: VoiceId,
    /// Bring-your-own credential. Requests carrying one skip the shared quota.
    pub credential: Option<ApiKey>,
    pub client_id: Option<ClientId>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SynthesizedAudio {
    pub content_type: String,
    pub bytes: Bytes,
}

/// Details attached to a quota-exceeded rejection so the UI can offer an upgrade.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaExceeded {
    pub message: String,
    pub remaining: u32,
    pub limit: Option<u32>,
    pub reset_at: Option<SystemTime>,
    pub upgrade_url: String,
}

#[derive(thiserror::Error, Debug)]
pub enum TtsError {
    #[error("rate limited: {}", .0.message)]
    RateLimited(QuotaExceeded),

    #[error("text is {len} characters, free tier allows {max}")]
    TextTooLong { len: usize, max: usize },

    #[error("nothing to synthesize")]
    EmptyText,

    #[error("no speech api key configured")]
    MissingCredential,

    #[error("speech api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TtsError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TtsError::RateLimited(_))
    }

    pub fn quota(&self) -> Option<&QuotaExceeded> {
        match self {
            TtsError::RateLimited(q) => Some(q),
            _ => None,
        }
    }
}

pub trait TtsClient: Send + Sync {
    fn synthesize(&self, request: TtsRequest) -> BoxFuture<'_, Result<SynthesizedAudio, TtsError>>;
}
