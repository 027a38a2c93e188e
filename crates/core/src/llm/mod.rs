//! Text transform backends: prompt framing plus user text in, generated text out.

mod echo;
mod gemini;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use echo::EchoTransform;
pub use gemini::GeminiClient;

/// A request to the language model.
///
/// `framing` carries the instructions; `text` is the user-supplied material they apply to.
/// Backends join the two in that order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Prompt {
    pub framing: String,
    pub text: String,
}

impl Prompt {
    pub fn new<F: Into<String>, T: Into<String>>(framing: F, text: T) -> Self {
        Self {
            framing: framing.into(),
            text: text.into(),
        }
    }

    /// A prompt whose instructions already embed everything.
    pub fn framing_only<F: Into<String>>(framing: F) -> Self {
        Self::new(framing, String::new())
    }

    pub fn render(&self) -> String {
        match (self.framing.trim().is_empty(), self.text.trim().is_empty()) {
            (_, true) => self.framing.clone(),
            (true, false) => self.text.clone(),
            (false, false) => format!("{}\n\n{}", self.framing, self.text),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TransformError {
    #[error("no language model api key configured")]
    MissingCredential,

    #[error("language model api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("model returned no text")]
    EmptyResponse,

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl TransformError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TransformError::Api { status, .. } => crate::util::is_http_retryable(*status),
            TransformError::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

pub trait TextTransform: Send + Sync {
    fn complete(&self, prompt: Prompt) -> BoxFuture<'_, Result<String, TransformError>>;
}
