use crate::llm::{Prompt, TextTransform};
use regex::Regex;
use std::sync::{Arc, OnceLock};

const LOG_TARGET: &str = "persona::factory";

fn preamble() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?:here is|here's)[^:\n]*:\s*").expect("static pattern compiles"))
}

/// Writes the system prompt for a new persona.
#[derive(Clone)]
pub struct PersonaFactory {
    transform: Arc<dyn TextTransform>,
}

impl PersonaFactory {
    pub fn new(transform: Arc<dyn TextTransform>) -> Self {
        Self { transform }
    }

    /// Never fails: if the model is unavailable the prompt comes from a fixed template.
    pub async fn system_prompt(&self, name: &str, description: &str) -> String {
        let framing = format!(
            "You are a professional acting coach creating a detailed \"Method Acting\" system \
             prompt for an AI voice actor.\n\n\
             Character Name: {name}\n\
             Character Vibe/Description: {description}\n\n\
             Create a VERBOSE, highly detailed system prompt (3-5 sentences minimum) that \
             covers who they are, their vocal rhythm and speech patterns, the vocabulary or \
             catchphrases they use, references to their world, and their worldview.\n\n\
             IMPORTANT: Output ONLY the system prompt itself, starting with \"You are\". Do NOT \
             include any preamble like \"Here is the prompt:\" or explanations."
        );

        match self.transform.complete(Prompt::framing_only(framing)).await {
            Ok(raw) => {
                let cleaned = strip_preamble(&raw);
                if cleaned.is_empty() {
                    tracing::warn!(target: LOG_TARGET, %name, "model returned only a preamble");
                    return fallback_prompt(name, description);
                }
                cleaned
            }
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, %name, error = %e, "using template system prompt");
                fallback_prompt(name, description)
            }
        }
    }
}

pub(crate) fn strip_preamble(raw: &str) -> String {
    preamble().replace(raw.trim(), "").trim().to_string()
}

pub(crate) fn fallback_prompt(name: &str, description: &str) -> String {
    format!(
        "You are {name}. Your character is described as: {description}. Fully embody this persona \
         in every word you speak. Use vocabulary, rhythm, and tone that matches this character \
         perfectly."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{EchoTransform, TransformError};
    use futures::future::BoxFuture;
    use futures::FutureExt;

    struct Down;

    impl TextTransform for Down {
        fn complete(&self, _prompt: Prompt) -> BoxFuture<'_, Result<String, TransformError>> {
            async { Err(TransformError::MissingCredential) }.boxed()
        }
    }

    struct Reply(&'static str);

    impl TextTransform for Reply {
        fn complete(&self, _prompt: Prompt) -> BoxFuture<'_, Result<String, TransformError>> {
            let text = self.0.to_string();
            async move { Ok(text) }.boxed()
        }
    }

    #[test]
    fn preamble_is_removed() {
        assert_eq!(
            strip_preamble("Here is the system prompt: You are Kai."),
            "You are Kai."
        );
        assert_eq!(strip_preamble("here's your prompt:\nYou are Kai."), "You are Kai.");
        assert_eq!(strip_preamble("You are Kai: a surfer."), "You are Kai: a surfer.");
    }

    #[tokio::test]
    async fn falls_back_to_template_when_model_fails() {
        let factory = PersonaFactory::new(Arc::new(Down));
        let prompt = factory.system_prompt("Kai", "a laid back surfer").await;
        assert!(prompt.starts_with("You are Kai. Your character is described as: a laid back surfer."));
    }

    #[tokio::test]
    async fn uses_model_output_when_available() {
        let factory = PersonaFactory::new(Arc::new(Reply("Here's the prompt: You are Kai, stoked.")));
        assert_eq!(factory.system_prompt("Kai", "surfer dude").await, "You are Kai, stoked.");
    }

    #[tokio::test]
    async fn echo_backend_returns_the_framing() {
        let factory = PersonaFactory::new(Arc::new(EchoTransform::new()));
        let prompt = factory.system_prompt("Kai", "surfer dude").await;
        assert!(prompt.contains("Character Name: Kai"));
    }
}
