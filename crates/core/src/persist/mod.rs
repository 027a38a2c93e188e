//! Durable client-side state: the script being rehearsed, the prompt that produced it and
//! the cast, plus the quota client id and the user's own speech credential.
//!
//! Every slot is read and written on its own. A missing or unreadable slot is reported as
//! absent and never prevents the other slots from loading.

mod store;

use crate::cast::CastAssignments;
use crate::config::ApiKey;
use crate::quota::ClientId;
use rand::Rng;

pub use store::{JsonFileStore, KeyValueStore, MemoryStore};

const LOG_TARGET: &str = "persist";

pub const SCRIPT_KEY: &str = "method_studio_script";
pub const PROMPT_KEY: &str = "method_studio_prompt";
pub const ASSIGNMENTS_KEY: &str = "method_studio_assignments";
pub const CLIENT_ID_KEY: &str = "method_ai_client_id";
pub const CREDENTIAL_KEY: &str = "elevenlabs_api_key";
pub const QUOTA_KEY: &str = "method_ai_quota";

#[derive(thiserror::Error, Debug)]
pub enum PersistError {
    #[error("state file io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode {key}: {source}")]
    Encode {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// What could be recovered from storage at startup.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RestoredSession {
    pub script: Option<String>,
    pub prompt: Option<String>,
    pub assignments: Option<CastAssignments>,
}

pub struct StudioPersistence<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> StudioPersistence<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn save_script(&self, script: &str) -> Result<(), PersistError> {
        self.store.set(SCRIPT_KEY, script)
    }

    pub fn save_prompt(&self, prompt: &str) -> Result<(), PersistError> {
        self.store.set(PROMPT_KEY, prompt)
    }

    pub fn save_assignments(&self, assignments: &CastAssignments) -> Result<(), PersistError> {
        let encoded = serde_json::to_string(assignments).map_err(|source| PersistError::Encode {
            key: ASSIGNMENTS_KEY,
            source,
        })?;
        self.store.set(ASSIGNMENTS_KEY, &encoded)
    }

    pub fn load(&self) -> RestoredSession {
        let assignments = self.read_slot(ASSIGNMENTS_KEY).and_then(|raw| {
            serde_json::from_str::<CastAssignments>(&raw)
                .map_err(|e| {
                    tracing::warn!(
                        target: LOG_TARGET,
                        key = ASSIGNMENTS_KEY,
                        error = %e,
                        "ignoring unreadable saved cast"
                    );
                })
                .ok()
        });

        let restored = RestoredSession {
            script: self.read_slot(SCRIPT_KEY),
            prompt: self.read_slot(PROMPT_KEY),
            assignments,
        };
        tracing::debug!(
            target: LOG_TARGET,
            script = restored.script.is_some(),
            prompt = restored.prompt.is_some(),
            assignments = restored.assignments.is_some(),
            "restored session"
        );
        restored
    }

    /// Forgets the script, prompt and cast. The client id and credential survive.
    pub fn clear(&self) -> Result<(), PersistError> {
        for key in [SCRIPT_KEY, PROMPT_KEY, ASSIGNMENTS_KEY] {
            self.store.remove(key)?;
        }
        Ok(())
    }

    /// Returns the stored quota client id, creating and saving one on first use.
    pub fn client_id<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ClientId, PersistError> {
        if let Some(existing) = self.read_slot(CLIENT_ID_KEY).filter(|v| !v.trim().is_empty()) {
            return Ok(ClientId(existing));
        }
        let id = ClientId::generate(rng);
        self.store.set(CLIENT_ID_KEY, id.as_str())?;
        tracing::info!(target: LOG_TARGET, client = %id.as_str(), "created client id");
        Ok(id)
    }

    pub fn credential(&self) -> Option<ApiKey> {
        self.read_slot(CREDENTIAL_KEY)
            .and_then(|raw| ApiKey::new(raw).ok())
    }

    pub fn has_credential(&self) -> bool {
        self.credential().is_some()
    }

    /// Stores the user's own key; `None` removes it.
    pub fn set_credential(&self, key: Option<&ApiKey>) -> Result<(), PersistError> {
        match key {
            Some(k) => self.store.set(CREDENTIAL_KEY, k.expose()),
            None => self.store.remove(CREDENTIAL_KEY),
        }
    }

    fn read_slot(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, key, error = %e, "failed to read slot");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cast::Role;
    use crate::tts::VoiceId;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn cast() -> CastAssignments {
        let mut a = CastAssignments::new();
        a.set_assignment("ALICE", Role::User, None);
        a.set_assignment("BOB", Role::Ai, Some(VoiceId("v1".into())));
        a
    }

    #[test]
    fn slots_round_trip_independently() {
        let p = StudioPersistence::new(MemoryStore::new());
        p.save_script("ALICE: Hi.").unwrap();
        p.save_assignments(&cast()).unwrap();

        let restored = p.load();
        assert_eq!(restored.script.as_deref(), Some("ALICE: Hi."));
        assert_eq!(restored.prompt, None);
        assert_eq!(restored.assignments, Some(cast()));
    }

    #[test]
    fn corrupt_assignments_do_not_block_other_slots() {
        let store = MemoryStore::new();
        store.set(ASSIGNMENTS_KEY, "{not json").unwrap();
        store.set(PROMPT_KEY, "a heist").unwrap();
        let p = StudioPersistence::new(store);
        p.save_script("BOB: Go.").unwrap();

        let restored = p.load();
        assert_eq!(restored.assignments, None);
        assert_eq!(restored.prompt.as_deref(), Some("a heist"));
        assert_eq!(restored.script.as_deref(), Some("BOB: Go."));
    }

    #[test]
    fn clear_keeps_client_id_and_credential() {
        let p = StudioPersistence::new(MemoryStore::new());
        let mut rng = StdRng::seed_from_u64(1);
        let id = p.client_id(&mut rng).unwrap();
        p.set_credential(Some(&ApiKey::new("mine").unwrap())).unwrap();
        p.save_script("x").unwrap();
        p.save_prompt("y").unwrap();
        p.save_assignments(&cast()).unwrap();

        p.clear().unwrap();
        assert_eq!(p.load(), RestoredSession::default());
        assert_eq!(p.client_id(&mut rng).unwrap(), id);
        assert!(p.has_credential());
    }

    #[test]
    fn client_id_is_created_once() {
        let p = StudioPersistence::new(MemoryStore::new());
        let mut rng = StdRng::seed_from_u64(7);
        let first = p.client_id(&mut rng).unwrap();
        assert!(first.as_str().starts_with("client_"));
        assert_eq!(p.client_id(&mut rng).unwrap(), first);
    }

    #[test]
    fn credential_can_be_removed() {
        let p = StudioPersistence::new(MemoryStore::new());
        assert!(!p.has_credential());
        p.set_credential(Some(&ApiKey::new("mine").unwrap())).unwrap();
        assert_eq!(p.credential().unwrap().expose(), "mine");
        p.set_credential(None).unwrap();
        assert!(p.credential().is_none());
    }
}
