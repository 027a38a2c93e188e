use crate::llm::{Prompt, TextTransform, TransformError};
use futures::future::BoxFuture;
use futures::FutureExt;

/// Offline transform that hands the user text back unchanged.
///
/// Lets the CLI and tests run without a language model key.
#[derive(Clone, Debug, Default)]
pub struct EchoTransform;

impl EchoTransform {
    pub fn new() -> Self {
        Self
    }
}

impl TextTransform for EchoTransform {
    fn complete(&self, prompt: Prompt) -> BoxFuture<'_, Result<String, TransformError>> {
        async move {
            let out = if prompt.text.trim().is_empty() {
                prompt.framing
            } else {
                prompt.text
            };
            if out.trim().is_empty() {
                return Err(TransformError::EmptyResponse);
            }
            Ok(out)
        }
        .boxed()
    }
}
