//! Script, rewrite and dialogue generation on top of a [`TextTransform`].

use crate::llm::{Prompt, TextTransform, TransformError};
use std::sync::Arc;

const LOG_TARGET: &str = "generation";

const SCRIPT_FRAMING: &str = "You are a playwright writing a short scene for two or three actors to \
rehearse. Write only the script. Put each line of dialogue on its own line as CHARACTER NAME: line, \
with names in capital letters. Put stage directions on their own lines in parentheses. Do not add \
a title, commentary, or markdown.\n\nScene idea:";

#[derive(thiserror::Error, Debug)]
pub enum GenerationError {
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("{0} must not be empty")]
    EmptyInput(&'static str),
}

impl From<TransformError> for GenerationError {
    fn from(e: TransformError) -> Self {
        GenerationError::GenerationFailed(e.to_string())
    }
}

fn require(value: &str, field: &'static str) -> Result<(), GenerationError> {
    if value.trim().is_empty() {
        return Err(GenerationError::EmptyInput(field));
    }
    Ok(())
}

#[derive(Clone)]
pub struct GenerationGateway {
    transform: Arc<dyn TextTransform>,
}

impl GenerationGateway {
    pub fn new(transform: Arc<dyn TextTransform>) -> Self {
        Self { transform }
    }

    /// Asks the model for a new script. The result is only guaranteed to be text; callers
    /// run it through the script parser like anything the user pastes.
    pub async fn generate_script(&self, prompt: &str) -> Result<String, GenerationError> {
        require(prompt, "prompt")?;
        let raw = self
            .transform
            .complete(Prompt::new(SCRIPT_FRAMING, prompt.trim()))
            .await
            .map_err(|e| {
                tracing::warn!(target: LOG_TARGET, error = %e, "script generation failed");
                GenerationError::from(e)
            })?;

        let script = strip_code_blocks(&raw);
        if script.is_empty() {
            return Err(GenerationError::GenerationFailed(
                "model returned an empty script".to_string(),
            ));
        }
        tracing::info!(
            target: LOG_TARGET,
            lines = script.lines().count(),
            "script generated"
        );
        Ok(script)
    }

    /// Rewrites `text` in the voice described by `character_prompt`.
    pub async fn rewrite(&self, text: &str, character_prompt: &str) -> Result<String, GenerationError> {
        require(text, "text")?;
        require(character_prompt, "character prompt")?;
        let framing = format!("{character_prompt}\n\nRewrite the following text in character:");
        let out = self.transform.complete(Prompt::new(framing, text)).await?;
        Ok(out.trim().to_string())
    }

    pub async fn generate_dialogue(
        &self,
        scenario: &str,
        character_name: &str,
        character_traits: &str,
    ) -> Result<String, GenerationError> {
        require(scenario, "scenario")?;
        require(character_name, "character name")?;
        require(character_traits, "character traits")?;
        let framing = format!(
            "You are {character_name}, a character with these traits: {character_traits}.\n\n\
             Given this scenario: {scenario}\n\n\
             Generate a natural, in-character response as {character_name}."
        );
        let out = self.transform.complete(Prompt::framing_only(framing)).await?;
        Ok(out.trim().to_string())
    }
}

/// Removes markdown code fences (with or without a language tag) and trims the result.
pub fn strip_code_blocks(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::sync::Mutex;

    /// Returns a canned reply and records the rendered prompts it was given.
    struct Canned {
        reply: Result<String, u16>,
        seen: Mutex<Vec<String>>,
    }

    impl Canned {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing(status: u16) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(status),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl TextTransform for Canned {
        fn complete(&self, prompt: Prompt) -> BoxFuture<'_, Result<String, TransformError>> {
            async move {
                self.seen.lock().unwrap().push(prompt.render());
                match &self.reply {
                    Ok(text) => Ok(text.clone()),
                    Err(status) => Err(TransformError::Api {
                        status: *status,
                        message: "upstream".into(),
                    }),
                }
            }
            .boxed()
        }
    }

    #[test]
    fn strips_fences_with_language_tags() {
        let raw = "```text\nALICE: Hi.\nBOB: Hello.\n```\n";
        assert_eq!(strip_code_blocks(raw), "ALICE: Hi.\nBOB: Hello.");
        assert_eq!(strip_code_blocks("  ALICE: Hi.  "), "ALICE: Hi.");
    }

    #[tokio::test]
    async fn generate_script_strips_fences_and_includes_prompt() {
        let model = Canned::ok("```\nALICE: We need to talk.\nBOB: About what?\n```");
        let gateway = GenerationGateway::new(model.clone());
        let script = gateway.generate_script("a breakup in a diner").await.unwrap();
        assert_eq!(script, "ALICE: We need to talk.\nBOB: About what?");
        let seen = model.seen.lock().unwrap();
        assert!(seen[0].ends_with("a breakup in a diner"));
    }

    #[tokio::test]
    async fn generate_script_maps_transform_failure() {
        let gateway = GenerationGateway::new(Canned::failing(500));
        let err = gateway.generate_script("anything").await.unwrap_err();
        assert!(matches!(err, GenerationError::GenerationFailed(_)));
    }

    #[tokio::test]
    async fn fence_only_output_is_a_failure() {
        let gateway = GenerationGateway::new(Canned::ok("```\n```"));
        assert!(matches!(
            gateway.generate_script("x").await,
            Err(GenerationError::GenerationFailed(_))
        ));
    }

    #[tokio::test]
    async fn empty_inputs_are_rejected_before_calling_the_model() {
        let model = Canned::ok("unused");
        let gateway = GenerationGateway::new(model.clone());
        assert!(matches!(
            gateway.generate_script("  ").await,
            Err(GenerationError::EmptyInput("prompt"))
        ));
        assert!(matches!(
            gateway.rewrite("hello", "").await,
            Err(GenerationError::EmptyInput("character prompt"))
        ));
        assert!(matches!(
            gateway.generate_dialogue("s", "NAME", " ").await,
            Err(GenerationError::EmptyInput("character traits"))
        ));
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rewrite_frames_text_with_character_prompt() {
        let model = Canned::ok("  Listen, dame.  ");
        let gateway = GenerationGateway::new(model.clone());
        let out = gateway.rewrite("Hello", "A noir detective.").await.unwrap();
        assert_eq!(out, "Listen, dame.");
        assert_eq!(
            model.seen.lock().unwrap()[0],
            "A noir detective.\n\nRewrite the following text in character:\n\nHello"
        );
    }

    #[tokio::test]
    async fn dialogue_prompt_names_the_character() {
        let model = Canned::ok("Cowabunga.");
        let gateway = GenerationGateway::new(model.clone());
        gateway
            .generate_dialogue("the waves are flat", "Kai", "laid back")
            .await
            .unwrap();
        let seen = model.seen.lock().unwrap();
        assert!(seen[0].starts_with("You are Kai, a character with these traits: laid back."));
        assert!(seen[0].contains("Given this scenario: the waves are flat"));
    }
}
