use crate::persist::PersistError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const LOG_TARGET: &str = "persist::store";

/// String-keyed durable storage, the shape of a browser's local storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PersistError>;
    fn set(&self, key: &str, value: &str) -> Result<(), PersistError>;
    fn remove(&self, key: &str) -> Result<(), PersistError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), PersistError> {
        (**self).remove(key)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!(target: LOG_TARGET, "store lock was poisoned; recovering");
            poisoned.into_inner()
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistError> {
        lock(&self.values).insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistError> {
        lock(&self.values).remove(key);
        Ok(())
    }
}

/// Keeps every slot in one JSON object on disk and rewrites the file on each change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Loads `path` if it exists. A missing file is an empty store.
    ///
    /// Slots that are not strings are skipped, and a file that is not a JSON object at all
    /// is treated as empty; both are logged. Only an unreadable file is an error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistError> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(raw) => decode_slots(&path, &raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => {
                return Err(PersistError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        tracing::debug!(
            target: LOG_TARGET,
            path = %path.display(),
            slots = values.len(),
            "opened state file"
        );
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &BTreeMap<String, String>) -> Result<(), PersistError> {
        let io_err = |source: std::io::Error| PersistError::Io {
            path: self.path.display().to_string(),
            source,
        };
        let encoded = serde_json::to_string_pretty(values).map_err(|source| PersistError::Encode {
            key: "state file",
            source,
        })?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, encoded).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        Ok(lock(&self.values).get(key).cloned())
    }

    /// The new value becomes visible only once it is on disk.
    fn set(&self, key: &str, value: &str) -> Result<(), PersistError> {
        let mut values = lock(&self.values);
        if values.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        let mut next = values.clone();
        next.insert(key.to_owned(), value.to_owned());
        self.flush(&next)?;
        *values = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistError> {
        let mut values = lock(&self.values);
        if !values.contains_key(key) {
            return Ok(());
        }
        let mut next = values.clone();
        next.remove(key);
        self.flush(&next)?;
        *values = next;
        Ok(())
    }
}

fn decode_slots(path: &Path, raw: &str) -> BTreeMap<String, String> {
    if raw.trim().is_empty() {
        return BTreeMap::new();
    }
    let object = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(object)) => object,
        Ok(other) => {
            tracing::warn!(
                target: LOG_TARGET,
                path = %path.display(),
                found = json_kind(&other),
                "state file is not a json object; starting empty"
            );
            return BTreeMap::new();
        }
        Err(e) => {
            tracing::warn!(
                target: LOG_TARGET,
                path = %path.display(),
                error = %e,
                "state file is unreadable; starting empty"
            );
            return BTreeMap::new();
        }
    };
    object
        .into_iter()
        .filter_map(|(key, value)| match value {
            serde_json::Value::String(s) => Some((key, s)),
            other => {
                tracing::warn!(
                    target: LOG_TARGET,
                    %key,
                    found = json_kind(&other),
                    "skipping non-string slot"
                );
                None
            }
        })
        .collect()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
