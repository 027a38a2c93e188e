use crate::persona::{
    built_in_personas, is_built_in, persona_id, NewPersona, Persona, PersonaError, PersonaFactory,
    PersonaStore,
};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const LOG_TARGET: &str = "persona::store";

type CustomPersonas = BTreeMap<String, Persona>;

/// Custom personas in a pretty-printed JSON object keyed by id, layered over the built-ins.
pub struct JsonFilePersonaStore {
    path: PathBuf,
    factory: PersonaFactory,
    // Serializes read-modify-write cycles on the file.
    file_lock: Mutex<()>,
}

impl JsonFilePersonaStore {
    pub fn new<P: Into<PathBuf>>(path: P, factory: PersonaFactory) -> Self {
        Self {
            path: path.into(),
            factory,
            file_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        match self.file_lock.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn io_err(&self, source: std::io::Error) -> PersonaError {
        PersonaError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    /// Reads the custom personas, creating an empty file on first use.
    fn load_custom(&self) -> Result<CustomPersonas, PersonaError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(CustomPersonas::new()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| PersonaError::Corrupt {
                path: self.path.display().to_string(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let empty = CustomPersonas::new();
                self.save_custom(&empty)?;
                Ok(empty)
            }
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn save_custom(&self, personas: &CustomPersonas) -> Result<(), PersonaError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| self.io_err(e))?;
        }
        let encoded = serde_json::to_string_pretty(personas).map_err(|source| {
            PersonaError::Corrupt {
                path: self.path.display().to_string(),
                source,
            }
        })?;
        fs::write(&self.path, encoded).map_err(|e| self.io_err(e))
    }
}

impl PersonaStore for JsonFilePersonaStore {
    fn all(&self) -> BoxFuture<'_, Result<Vec<Persona>, PersonaError>> {
        async move {
            let custom = {
                let _guard = self.lock();
                self.load_custom()?
            };
            let mut out = built_in_personas();
            out.extend(custom.into_values().filter(|p| !is_built_in(&p.id)));
            Ok(out)
        }
        .boxed()
    }

    fn create(&self, new: NewPersona) -> BoxFuture<'_, Result<Persona, PersonaError>> {
        async move {
            new.validate()?;
            let name = new.name.trim().to_owned();
            let description = new.description.trim().to_owned();
            let id = persona_id(&name);

            let exists = |custom: &CustomPersonas| is_built_in(&id) || custom.contains_key(&id);
            {
                let _guard = self.lock();
                if exists(&self.load_custom()?) {
                    return Err(PersonaError::AlreadyExists(name));
                }
            }

            tracing::info!(target: LOG_TARGET, %id, "generating system prompt");
            let system_prompt = self.factory.system_prompt(&name, &description).await;

            let persona = Persona {
                id: id.clone(),
                label: name.clone(),
                system_prompt,
                voice_id: new.voice_id,
                description: Some(description),
                is_custom: true,
                created_at: Some(Utc::now()),
            };

            let _guard = self.lock();
            let mut custom = self.load_custom()?;
            // Another create may have landed while the prompt was generated.
            if exists(&custom) {
                return Err(PersonaError::AlreadyExists(name));
            }
            custom.insert(id.clone(), persona.clone());
            self.save_custom(&custom)?;
            tracing::info!(target: LOG_TARGET, %id, "persona created");
            Ok(persona)
        }
        .boxed()
    }

    fn delete(&self, id: String) -> BoxFuture<'_, Result<(), PersonaError>> {
        async move {
            if is_built_in(&id) {
                return Err(PersonaError::BuiltIn(id));
            }
            let _guard = self.lock();
            let mut custom = self.load_custom()?;
            if custom.remove(&id).is_none() {
                return Err(PersonaError::NotFound(id));
            }
            self.save_custom(&custom)?;
            tracing::info!(target: LOG_TARGET, %id, "persona deleted");
            Ok(())
        }
        .boxed()
    }
}
