//! Character role assignments.

use crate::tts::VoiceId;
use crate::voices::VoiceCatalogEntry;
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleAssignment {
    pub role: Role,
    /// Required for AI playback; absent means a timed pause stands in for the line.
    #[serde(default, rename = "voiceId", skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<VoiceId>,
}

impl RoleAssignment {
    pub fn user() -> Self {
        Self {
            role: Role::User,
            voice_id: None,
        }
    }

    pub fn ai(voice_id: Option<VoiceId>) -> Self {
        Self {
            role: Role::Ai,
            voice_id,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CastAssignments {
    entries: BTreeMap<String, RoleAssignment>,
}

impl CastAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// First character goes to the user, everyone else to a random catalog voice.
    pub fn auto_assign<R: Rng + ?Sized>(
        characters: &[String],
        catalog: &[VoiceCatalogEntry],
        rng: &mut R,
    ) -> Self {
        let mut cast = Self::new();
        for (i, name) in characters.iter().enumerate() {
            let assignment = if i == 0 {
                RoleAssignment::user()
            } else {
                let voice = catalog.choose(rng).map(|v| VoiceId(v.id.clone()));
                RoleAssignment::ai(voice)
            };
            cast.entries.insert(name.clone(), assignment);
        }
        tracing::debug!(
            characters = characters.len(),
            voices = catalog.len(),
            "auto-assigned cast"
        );
        cast
    }

    pub fn set_assignment(&mut self, character: &str, role: Role, voice_id: Option<VoiceId>) {
        self.entries
            .insert(character.to_owned(), RoleAssignment { role, voice_id });
    }

    pub fn get(&self, character: &str) -> Option<&RoleAssignment> {
        self.entries.get(character)
    }

    pub fn remove(&mut self, character: &str) -> Option<RoleAssignment> {
        self.entries.remove(character)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RoleAssignment)> {
        self.entries.iter()
    }

    pub fn is_complete(&self, characters: &[String]) -> bool {
        characters.iter().all(|c| self.entries.contains_key(c))
    }

    /// Drops entries for anyone not on `characters`.
    pub fn retain_characters(&mut self, characters: &[String]) {
        self.entries.retain(|name, _| characters.contains(name));
    }

    /// Roster members without an entry, in roster order.
    pub fn missing(&self, characters: &[String]) -> Vec<String> {
        characters
            .iter()
            .filter(|c| !self.entries.contains_key(*c))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn roster(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn catalog(ids: &[&str]) -> Vec<VoiceCatalogEntry> {
        ids.iter()
            .map(|id| VoiceCatalogEntry {
                id: id.to_string(),
                display_name: id.to_uppercase(),
            })
            .collect()
    }

    #[test]
    fn auto_assign_gives_first_character_to_user() {
        let chars = roster(&["DETECTIVE", "SUSPECT", "WITNESS"]);
        let voices = catalog(&["v1", "v2"]);
        let mut rng = StdRng::seed_from_u64(7);
        let cast = CastAssignments::auto_assign(&chars, &voices, &mut rng);

        assert_eq!(cast.get("DETECTIVE"), Some(&RoleAssignment::user()));
        for name in ["SUSPECT", "WITNESS"] {
            let a = cast.get(name).unwrap();
            assert_eq!(a.role, Role::Ai);
            let voice = a.voice_id.as_ref().unwrap();
            assert!(voices.iter().any(|v| v.id == voice.0));
        }
    }

    #[test]
    fn auto_assign_is_reproducible_with_same_seed() {
        let chars = roster(&["A", "B", "C", "D"]);
        let voices = catalog(&["v1", "v2", "v3"]);
        let a = CastAssignments::auto_assign(&chars, &voices, &mut StdRng::seed_from_u64(42));
        let b = CastAssignments::auto_assign(&chars, &voices, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn auto_assign_with_empty_catalog_leaves_voice_unset() {
        let chars = roster(&["A", "B"]);
        let cast = CastAssignments::auto_assign(&chars, &[], &mut StdRng::seed_from_u64(1));
        assert_eq!(cast.get("B"), Some(&RoleAssignment::ai(None)));
    }

    #[test]
    fn completeness_round_trip_names_the_missing_character() {
        let chars = roster(&["A", "B", "C"]);
        let mut cast = CastAssignments::new();
        for c in &chars {
            cast.set_assignment(c, Role::Ai, Some(VoiceId("v".into())));
        }
        assert!(cast.is_complete(&chars));
        assert!(cast.missing(&chars).is_empty());

        cast.remove("B");
        assert!(!cast.is_complete(&chars));
        assert_eq!(cast.missing(&chars), vec!["B".to_owned()]);
    }

    #[test]
    fn set_assignment_is_idempotent() {
        let mut cast = CastAssignments::new();
        cast.set_assignment("A", Role::Ai, Some(VoiceId("v1".into())));
        let once = cast.clone();
        cast.set_assignment("A", Role::Ai, Some(VoiceId("v1".into())));
        assert_eq!(cast, once);
        assert_eq!(cast.len(), 1);
    }

    #[test]
    fn set_assignment_overrides_role() {
        let mut cast = CastAssignments::new();
        cast.set_assignment("A", Role::User, None);
        cast.set_assignment("A", Role::Ai, Some(VoiceId("v1".into())));
        assert_eq!(cast.get("A").unwrap().role, Role::Ai);
    }

    #[test]
    fn serializes_as_flat_map() {
        let mut cast = CastAssignments::new();
        cast.set_assignment("A", Role::User, None);
        cast.set_assignment("B", Role::Ai, Some(VoiceId("v9".into())));
        let json = serde_json::to_value(&cast).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "A": { "role": "user" },
                "B": { "role": "ai", "voiceId": "v9" }
            })
        );
        let back: CastAssignments = serde_json::from_value(json).unwrap();
        assert_eq!(back, cast);
    }
}
