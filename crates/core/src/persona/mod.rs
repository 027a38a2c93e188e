//! Character personas: a label, a system prompt that tells the model how to speak, and
//! optionally the voice that reads the result.

mod factory;
mod store;

use crate::tts::VoiceId;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use factory::PersonaFactory;
pub use store::JsonFilePersonaStore;

pub const MIN_NAME_CHARS: usize = 2;
pub const MIN_DESCRIPTION_CHARS: usize = 10;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub id: String,
    pub label: String,
    pub system_prompt: String,
    #[serde(default, rename = "elevenLabsVoiceId", skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<VoiceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_custom: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPersona {
    pub name: String,
    pub description: String,
    pub voice_id: Option<VoiceId>,
}

impl NewPersona {
    /// Checks the trimmed name and description against the minimum lengths.
    pub fn validate(&self) -> Result<(), PersonaError> {
        if self.name.trim().chars().count() < MIN_NAME_CHARS {
            return Err(PersonaError::Invalid(format!(
                "name must be at least {MIN_NAME_CHARS} characters"
            )));
        }
        if self.description.trim().chars().count() < MIN_DESCRIPTION_CHARS {
            return Err(PersonaError::Invalid(format!(
                "description must be at least {MIN_DESCRIPTION_CHARS} characters"
            )));
        }
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PersonaError {
    #[error("invalid persona: {0}")]
    Invalid(String),

    #[error("persona \"{0}\" already exists")]
    AlreadyExists(String),

    #[error("persona \"{0}\" is built in and cannot be deleted")]
    BuiltIn(String),

    #[error("persona \"{0}\" not found")]
    NotFound(String),

    #[error("persona file io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("persona file {path} is unreadable: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub trait PersonaStore: Send + Sync {
    /// Built-ins first, then custom personas ordered by id.
    fn all(&self) -> BoxFuture<'_, Result<Vec<Persona>, PersonaError>>;
    fn create(&self, new: NewPersona) -> BoxFuture<'_, Result<Persona, PersonaError>>;
    fn delete(&self, id: String) -> BoxFuture<'_, Result<(), PersonaError>>;
}

/// Lowercases `name` and collapses every run of characters outside `[a-z0-9]` into `_`.
pub fn persona_id(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_gap = false;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            in_gap = false;
        } else if !in_gap {
            out.push('_');
            in_gap = true;
        }
    }
    out
}

pub fn built_in_personas() -> Vec<Persona> {
    let built_in = |id: &str, label: &str, prompt: &str, voice: &str| Persona {
        id: id.to_owned(),
        label: label.to_owned(),
        system_prompt: prompt.to_owned(),
        voice_id: Some(VoiceId(voice.to_owned())),
        description: None,
        is_custom: false,
        created_at: None,
    };
    vec![
        built_in(
            "noir_detective",
            "Gritty Noir Detective",
            "A cynical, tired private investigator from the 1940s. Use noir tropes, speak in a \
             gravelly, world-weary tone with dramatic pauses. Reference cigarette smoke, \
             rain-slicked streets, and moral ambiguity. Use phrases like 'dame', 'case', 'lead', \
             and employ a fatalistic worldview.",
            "TxGEqnHWrfWFTfGW9XjX",
        ),
        built_in(
            "surfer_dude",
            "SoCal Surfer",
            "A relaxed, enthusiastic surfer from Southern California. Use slang like 'gnarly', \
             'dude', 'stoked', 'wave', 'radical', and 'totally'. Speak in a laid-back, upbeat \
             manner. Reference the ocean, beach life, and good vibes. Keep it chill and positive.",
            "Zlb1dXrM653N07WRdFW3",
        ),
        built_in(
            "hyper_news",
            "1920s Transatlantic News Anchor",
            "A fast-talking, high-energy news reporter with a mid-atlantic accent from the 1920s. \
             Speak rapidly and enthusiastically. Use formal, dramatic language. Reference breaking \
             news, urgent developments, and important bulletins. Employ exclamation points and \
             dramatic emphasis.",
            "ErXwobaYiq0cONca06Hu",
        ),
    ]
}

pub fn is_built_in(id: &str) -> bool {
    built_in_personas().iter().any(|p| p.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_collapse_non_alphanumeric_runs() {
        assert_eq!(persona_id("Noir Detective"), "noir_detective");
        assert_eq!(persona_id("Captain  O'Hara!!"), "captain_o_hara_");
        assert_eq!(persona_id("R2-D2"), "r2_d2");
    }

    #[test]
    fn validation_trims_before_counting() {
        let ok = NewPersona {
            name: "Al".into(),
            description: "a grumpy pirate".into(),
            voice_id: None,
        };
        assert!(ok.validate().is_ok());

        let short_name = NewPersona {
            name: " A ".into(),
            ..ok.clone()
        };
        assert!(matches!(short_name.validate(), Err(PersonaError::Invalid(_))));

        let short_desc = NewPersona {
            description: "   pirate   ".into(),
            ..ok
        };
        assert!(matches!(short_desc.validate(), Err(PersonaError::Invalid(_))));
    }

    #[test]
    fn built_ins_have_voices_and_stable_ids() {
        let all = built_in_personas();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|p| p.voice_id.is_some() && !p.is_custom));
        assert!(is_built_in("surfer_dude"));
        assert!(!is_built_in("pirate"));
    }

    #[test]
    fn persona_serializes_with_camel_case_keys() {
        let p = &built_in_personas()[0];
        let v = serde_json::to_value(p).unwrap();
        assert_eq!(v["elevenLabsVoiceId"], "TxGEqnHWrfWFTfGW9XjX");
        assert_eq!(v["isCustom"], false);
        assert!(v.get("createdAt").is_none());
    }
}
